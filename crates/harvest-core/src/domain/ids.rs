//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの ID + Phantom Type
//! 収集 ID（`CollectionId`）は ULID を使用します。
//! - **時刻でソート可能**: 新しい収集ほど大きな ID になる
//! - **分散生成可能**: 調整なしで複数プロセスから発行できる
//! - **短い**: 26 文字の Crockford base32（永続化キーにそのまま使える）
//!
//! `Id<T>` の `T` は PhantomData のマーカー型で、実行時コストはゼロです。
//!
//! セッションとオーナーは外部（認証層）から与えられる文字列なので、
//! ULID ではなく文字列ラッパーとして定義します。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

use super::errors::HarvestError;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"col-" など）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// `col-01H...` 形式の文字列を ID に戻す（永続化キーからの復元用）
impl<T: IdMarker> FromStr for Id<T> {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix(T::prefix())
            .ok_or_else(|| HarvestError::InvalidId(s.to_string()))?;
        let ulid = Ulid::from_string(raw).map_err(|_| HarvestError::InvalidId(s.to_string()))?;
        Ok(Self::from_ulid(ulid))
    }
}

impl<T: IdMarker> Serialize for Id<T> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de, T: IdMarker> Deserialize<'de> for Id<T> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Collection のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {}

impl IdMarker for Collection {
    fn prefix() -> &'static str {
        "col-"
    }
}

/// Identifier of one collection run and of its persisted record.
pub type CollectionId = Id<Collection>;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }
    };
}

string_id!(
    /// Unit of single-flight exclusivity: at most one running collection per session.
    SessionId
);

string_id!(
    /// Identity whose namespace persisted collections live under.
    OwnerId
);
