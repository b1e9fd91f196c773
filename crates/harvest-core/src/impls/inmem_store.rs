//! InMemoryObjectStore - 開発・テスト用の ObjectStore
//!
//! - DashMap でキー単位（シャード単位）のロック
//! - 失敗注入（`fail_writes`）で永続化失敗のテストができる

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::ports::{ObjectStore, StoreError};

#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: DashMap<String, Vec<u8>>,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put` fail (persistence failure injection).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of `get` calls served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::OperationFailed(format!("write rejected: {key}")));
        }
        self.objects.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.objects
            .get(key)
            .map(|v| v.value().clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let keys = self.list_by_prefix(prefix).await?;
        Ok(keys
            .iter()
            .filter(|k| self.objects.remove(k.as_str()).is_some())
            .count())
    }
}
