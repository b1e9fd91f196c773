//! CollectionRepository - ObjectStore + ResultCache の読み書き経路
//!
//! # 読み取り（get_collection）
//! 1. metadata: キャッシュ → ストア（無ければ NotFound、リトライしない）→ キャッシュへ
//! 2. payload: キャッシュ → 統合 payload → （無ければ）カテゴリ別の旧レイアウトから再構成
//!    - 再構成は決して失敗しない（読めないカテゴリはプレースホルダー）
//!    - 再構成した統合 payload はストアへ書き戻してからキャッシュする
//!
//! # 書き込み（save）
//! - metadata と payload を書いた後にキャッシュへ投入し、一覧キャッシュを無効化
//!
//! # 読み取りと削除の競合
//! - ストアを読む前にキャッシュ世代を取り、`set_if_current` でだけキャッシュする
//! - 読み取り中に delete / reset / save が入ったら、読んだ値はキャッシュしない
//! - 再構成の書き戻しも同じ世代で判定し、削除後にオブジェクトを復活させない

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::{CacheGeneration, CacheKey, CacheScope, CachedValue, ResultCache};
use crate::domain::{
    Category, CollectionId, CollectionMetadata, CollectionPayload, CollectionRecord, HarvestError,
    OwnerId,
};
use crate::ports::{ObjectStore, StoreError, keys};

pub struct CollectionRepository {
    store: Arc<dyn ObjectStore>,
    cache: Arc<ResultCache>,
}

impl CollectionRepository {
    pub fn new(store: Arc<dyn ObjectStore>, cache: Arc<ResultCache>) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Persist a completed run and seed the cache with it.
    pub async fn save(&self, record: &CollectionRecord) -> Result<(), HarvestError> {
        let owner = &record.metadata.owner_id;
        let id = record.metadata.collection_id;

        let metadata = serde_json::to_vec(&record.metadata)?;
        let payload = serde_json::to_vec(&record.payload)?;
        // payload first: metadata is what makes a collection visible to listings
        self.store.put(&keys::payload(owner, &id), payload).await?;
        self.store.put(&keys::metadata(owner, &id), metadata).await?;

        // reads that started before the writes must not cache what they saw
        self.cache.invalidate(owner, CacheScope::Collection(id));
        self.cache.set(
            CacheKey::metadata(owner, id),
            CachedValue::Metadata(record.metadata.clone()),
        );
        self.cache.set(
            CacheKey::payload(owner, id),
            CachedValue::Payload(record.payload.clone()),
        );
        self.cache.invalidate(owner, CacheScope::CollectionList);
        tracing::info!(
            owner_id = %owner,
            collection_id = %id,
            categories = record.payload.len(),
            "collection persisted"
        );
        Ok(())
    }

    pub async fn get_metadata(
        &self,
        owner: &OwnerId,
        id: CollectionId,
    ) -> Result<CollectionMetadata, HarvestError> {
        if let Some(metadata) = self.cache.get_metadata(owner, id) {
            return Ok(metadata);
        }
        let seen = self.cache.generation(owner, Some(id));
        let bytes = match self.store.get(&keys::metadata(owner, &id)).await {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => {
                return Err(HarvestError::NotFound {
                    owner: owner.clone(),
                    collection: id,
                });
            }
            Err(e) => return Err(e.into()),
        };
        let metadata: CollectionMetadata = serde_json::from_slice(&bytes)?;
        self.cache.set_if_current(
            CacheKey::metadata(owner, id),
            CachedValue::Metadata(metadata.clone()),
            seen,
        );
        Ok(metadata)
    }

    pub async fn get_payload(
        &self,
        metadata: &CollectionMetadata,
    ) -> Result<CollectionPayload, HarvestError> {
        let owner = &metadata.owner_id;
        let id = metadata.collection_id;
        if let Some(payload) = self.cache.get_payload(owner, id) {
            return Ok(payload);
        }

        let seen = self.cache.generation(owner, Some(id));
        let payload = match self.store.get(&keys::payload(owner, &id)).await {
            Ok(bytes) => match serde_json::from_slice::<CollectionPayload>(&bytes) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(owner_id = %owner, collection_id = %id, error = %e, "unreadable consolidated payload, rebuilding");
                    self.reconcile_legacy(metadata, seen).await
                }
            },
            Err(StoreError::NotFound(_)) => self.reconcile_legacy(metadata, seen).await,
            Err(e) => return Err(e.into()),
        };

        self.cache.set_if_current(
            CacheKey::payload(owner, id),
            CachedValue::Payload(payload.clone()),
            seen,
        );
        Ok(payload)
    }

    /// Rebuild the consolidated payload from per-category objects.
    ///
    /// Never fails: any unreadable category degrades to the placeholder.
    /// The write-back is skipped when the collection was invalidated after `seen`.
    async fn reconcile_legacy(
        &self,
        metadata: &CollectionMetadata,
        seen: CacheGeneration,
    ) -> CollectionPayload {
        let owner = &metadata.owner_id;
        let id = metadata.collection_id;
        let mut found: BTreeMap<Category, serde_json::Value> = BTreeMap::new();
        let mut missing = 0usize;

        for category in &metadata.selected_categories {
            let key = keys::category(owner, &id, category);
            let value = match self.store.get(&key).await {
                Ok(bytes) => serde_json::from_slice::<serde_json::Value>(&bytes).ok(),
                Err(StoreError::NotFound(_)) => None,
                Err(e) => {
                    tracing::warn!(owner_id = %owner, collection_id = %id, category = %category, error = %e, "legacy category read failed");
                    None
                }
            };
            match value {
                Some(value) => {
                    found.insert(category.clone(), value);
                }
                None => missing += 1,
            }
        }

        let payload = CollectionPayload::consolidate(&metadata.selected_categories, found);
        tracing::info!(
            owner_id = %owner,
            collection_id = %id,
            placeholders = missing,
            "consolidated payload rebuilt from per-category objects"
        );

        self.write_back(owner, id, &payload, seen).await;
        payload
    }

    async fn write_back(
        &self,
        owner: &OwnerId,
        id: CollectionId,
        payload: &CollectionPayload,
        seen: CacheGeneration,
    ) {
        let unchanged = || self.cache.generation(owner, Some(id)) == seen;
        if !unchanged() {
            tracing::debug!(owner_id = %owner, collection_id = %id, "collection changed during rebuild, write-back skipped");
            return;
        }
        let bytes = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(owner_id = %owner, collection_id = %id, error = %e, "rebuilt payload not serializable");
                return;
            }
        };
        let key = keys::payload(owner, &id);
        if let Err(e) = self.store.put(&key, bytes).await {
            tracing::warn!(owner_id = %owner, collection_id = %id, error = %e, "write-back of rebuilt payload failed");
            return;
        }
        // a delete that ran during the put must not leave the payload behind
        if !unchanged()
            && let Err(e) = self.store.delete_by_prefix(&key).await
        {
            tracing::warn!(owner_id = %owner, collection_id = %id, error = %e, "rollback of rebuilt payload failed");
        }
    }

    pub async fn get_collection(
        &self,
        owner: &OwnerId,
        id: CollectionId,
    ) -> Result<CollectionRecord, HarvestError> {
        let metadata = self.get_metadata(owner, id).await?;
        let payload = self.get_payload(&metadata).await?;
        Ok(CollectionRecord { metadata, payload })
    }

    /// Most recent first.
    pub async fn list_collections(
        &self,
        owner: &OwnerId,
    ) -> Result<Vec<CollectionMetadata>, HarvestError> {
        if let Some(list) = self.cache.get_collection_list(owner) {
            return Ok(list);
        }

        let seen = self.cache.generation(owner, None);
        let object_keys = self.store.list_by_prefix(&keys::collections_prefix(owner)).await?;
        let mut list = Vec::new();
        for key in &object_keys {
            let Some(raw_id) = keys::collection_id_from_metadata_key(owner, key) else {
                continue;
            };
            let id: CollectionId = match raw_id.parse() {
                Ok(id) => id,
                Err(_) => {
                    tracing::warn!(owner_id = %owner, key = %key, "skipping collection with malformed id");
                    continue;
                }
            };
            match self.get_metadata(owner, id).await {
                Ok(metadata) => list.push(metadata),
                // deleted between list and read
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    tracing::warn!(owner_id = %owner, collection_id = %id, error = %e, "skipping unreadable metadata");
                }
            }
        }
        list.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.collection_id.cmp(&a.collection_id))
        });

        self.cache.set_if_current(
            CacheKey::collection_list(owner),
            CachedValue::CollectionList(list.clone()),
            seen,
        );
        Ok(list)
    }

    /// `Ok(false)` when nothing was stored under that id.
    pub async fn delete_collection(
        &self,
        owner: &OwnerId,
        id: CollectionId,
    ) -> Result<bool, HarvestError> {
        let removed = self
            .store
            .delete_by_prefix(&keys::collection_prefix(owner, &id))
            .await?;
        self.cache.invalidate(owner, CacheScope::Collection(id));
        self.cache.invalidate(owner, CacheScope::CollectionList);
        tracing::info!(owner_id = %owner, collection_id = %id, removed, "collection deleted");
        Ok(removed > 0)
    }

    /// Drop everything stored for the owner.
    pub async fn reset_owner(&self, owner: &OwnerId) -> Result<usize, HarvestError> {
        let removed = self.store.delete_by_prefix(&keys::owner_prefix(owner)).await?;
        self.cache.invalidate(owner, CacheScope::All);
        tracing::info!(owner_id = %owner, removed, "owner reset");
        Ok(removed)
    }
}
