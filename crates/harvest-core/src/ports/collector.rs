//! Collector port - カテゴリ単位のデータ取得（外部コラボレーター）
//!
//! コアから見ると純粋関数です。遅い（数秒）こともあり、カテゴリごとに独立して失敗します。

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::domain::{Category, CollectOutcome};

/// Opaque credentials/context handed through to collectors.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    values: BTreeMap<String, String>,
}

impl AuthContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Collector は 1 カテゴリ分のデータを取得する
///
/// # 失敗の扱い
/// - `Ok(CollectOutcome { success: false, .. })` と `Err(_)` はどちらもカテゴリ単位の失敗
/// - オーケストレーターはプレースホルダーで埋めて次のカテゴリへ進む
#[async_trait]
pub trait Collector: Send + Sync {
    async fn collect(
        &self,
        category: &Category,
        region: &str,
        auth: &AuthContext,
    ) -> Result<CollectOutcome, String>;

    /// Run once before any category with the categories this collector will
    /// serve in the run. An error aborts the whole run.
    async fn preflight(
        &self,
        _categories: &[Category],
        _region: &str,
        _auth: &AuthContext,
    ) -> Result<(), String> {
        Ok(())
    }
}
