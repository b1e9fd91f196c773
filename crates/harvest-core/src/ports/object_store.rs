//! ObjectStore port - 収集メタデータと payload の正本（source of truth）
//!
//! オブジェクトストレージの意味論（put / get / prefix list / prefix delete）だけを
//! 要求します。ビジネスロジックは持ちません。
//!
//! # キー配置
//! - `owner/<ownerID>/collections/<collectionID>/metadata`
//! - `owner/<ownerID>/collections/<collectionID>/payload`
//! - `owner/<ownerID>/collections/<collectionID>/categories/<category>`（旧レイアウト）
//!
//! ownerID と category は `keys::segment` でエスケープする（`/` を含んでも別オーナーの prefix に入らない）

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("store operation failed: {0}")]
    OperationFailed(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

/// ObjectStore は byte 指向の key/value + prefix 操作
///
/// # 設計原則
/// - キーは `/` 区切りの論理パス
/// - 並行アクセスに対して安全（実装側で細粒度ロック）
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Missing keys are `StoreError::NotFound`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Returns how many objects were removed.
    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize, StoreError>;
}

/// Logical key layout.
pub mod keys {
    use std::borrow::Cow;

    use crate::domain::{Category, CollectionId, OwnerId};

    pub const METADATA: &str = "metadata";
    pub const PAYLOAD: &str = "payload";

    /// Escape one caller-supplied key segment so it never contains `/`.
    ///
    /// `%` is escaped too, which keeps the mapping injective.
    pub fn segment(raw: &str) -> Cow<'_, str> {
        if !raw.contains(['/', '%']) {
            return Cow::Borrowed(raw);
        }
        let mut escaped = String::with_capacity(raw.len() + 4);
        for c in raw.chars() {
            match c {
                '%' => escaped.push_str("%25"),
                '/' => escaped.push_str("%2F"),
                c => escaped.push(c),
            }
        }
        Cow::Owned(escaped)
    }

    pub fn owner_prefix(owner: &OwnerId) -> String {
        format!("owner/{}/", segment(owner.as_str()))
    }

    pub fn collections_prefix(owner: &OwnerId) -> String {
        format!("{}collections/", owner_prefix(owner))
    }

    pub fn collection_prefix(owner: &OwnerId, collection: &CollectionId) -> String {
        format!("{}{collection}/", collections_prefix(owner))
    }

    pub fn metadata(owner: &OwnerId, collection: &CollectionId) -> String {
        format!("{}{METADATA}", collection_prefix(owner, collection))
    }

    pub fn payload(owner: &OwnerId, collection: &CollectionId) -> String {
        format!("{}{PAYLOAD}", collection_prefix(owner, collection))
    }

    /// Per-category object used by the older storage layout.
    pub fn category(owner: &OwnerId, collection: &CollectionId, category: &Category) -> String {
        format!(
            "{}categories/{}",
            collection_prefix(owner, collection),
            segment(category.as_str())
        )
    }

    /// Extract the collection id segment from a `.../<id>/metadata` key.
    pub fn collection_id_from_metadata_key<'a>(owner: &OwnerId, key: &'a str) -> Option<&'a str> {
        let rest = key.strip_prefix(&collections_prefix(owner))?;
        let id = rest.strip_suffix(&format!("/{METADATA}"))?;
        (!id.is_empty() && !id.contains('/')).then_some(id)
    }

}
