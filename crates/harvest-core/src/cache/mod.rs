//! ResultCache - ObjectStore の手前に置く TTL 付きキャッシュ
//!
//! # 設計原則
//! - 明示的に構築して注入する（プロセス全体の隠れたシングルトンにはしない）
//! - 期限切れは読み取り時に判定（バックグラウンドの掃除はしない）
//! - 期限切れエントリは古い値を返さず、その場で削除する
//! - DashMap のシャード単位ロック（別オーナーの読み書きが直列化されない）
//!
//! # 無効化世代
//! - `invalidate` はエントリを消す前にスコープの世代を進める
//! - ストア読み取りの前に `generation` を取り、`set_if_current` で書き戻す
//! - 読み取り中に無効化が挟まった値は捨てる（古い値で削除や保存を上書きしない）
//! - 世代値は単調増加カウンタから払い出すので、刈り込んでも同じ値は再び現れない

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::domain::{CollectionId, CollectionMetadata, CollectionPayload, OwnerId};
use crate::ports::Clock;

pub const DEFAULT_CACHE_TTL_SECS: i64 = 300;

/// Sub-key used for the consolidated payload entry.
pub const SUB_KEY_ALL: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKind {
    CollectionList,
    Metadata,
    Payload,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: CacheKind,
    pub owner: OwnerId,
    pub collection: Option<CollectionId>,
    pub sub_key: Option<String>,
}

impl CacheKey {
    pub fn collection_list(owner: &OwnerId) -> Self {
        Self {
            kind: CacheKind::CollectionList,
            owner: owner.clone(),
            collection: None,
            sub_key: None,
        }
    }

    pub fn metadata(owner: &OwnerId, collection: CollectionId) -> Self {
        Self {
            kind: CacheKind::Metadata,
            owner: owner.clone(),
            collection: Some(collection),
            sub_key: None,
        }
    }

    pub fn payload(owner: &OwnerId, collection: CollectionId) -> Self {
        Self {
            kind: CacheKind::Payload,
            owner: owner.clone(),
            collection: Some(collection),
            sub_key: Some(SUB_KEY_ALL.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    CollectionList(Vec<CollectionMetadata>),
    Metadata(CollectionMetadata),
    Payload(CollectionPayload),
}

/// What `invalidate` drops for an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheScope {
    /// The owner's single collection-list entry.
    CollectionList,
    /// Every metadata/payload entry of one collection.
    Collection(CollectionId),
    /// Everything keyed by the owner (full account reset).
    All,
}

/// Invalidation stamps observed before a store read.
///
/// Opaque; only compared for equality by `set_if_current`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheGeneration {
    owner: u64,
    scope: u64,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CachedValue,
    written_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Misses caused by an entry older than the TTL.
    pub expired: u64,
    pub entries: usize,
}

pub struct ResultCache {
    entries: DashMap<CacheKey, CacheEntry>,
    /// `None` is the owner's collection list, `Some(id)` one collection.
    generations: DashMap<(OwnerId, Option<CollectionId>), u64>,
    owner_epochs: DashMap<OwnerId, u64>,
    stamps: AtomicU64,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl ResultCache {
    pub fn new(ttl: std::time::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            generations: DashMap::new(),
            owner_epochs: DashMap::new(),
            stamps: AtomicU64::new(0),
            ttl: Duration::from_std(ttl).unwrap_or(Duration::seconds(DEFAULT_CACHE_TTL_SECS)),
            clock,
            counters: Counters::default(),
        }
    }

    pub fn ttl(&self) -> std::time::Duration {
        self.ttl.to_std().unwrap_or_default()
    }

    /// A hit requires the entry to exist and be younger than the TTL.
    pub fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        let now = self.clock.now();
        let fresh = self.entries.get(key).map(|entry| {
            let age = now - entry.written_at;
            (age < self.ttl).then(|| entry.value.clone())
        });
        match fresh {
            Some(Some(value)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some(None) => {
                // Re-check under the write lock: a concurrent `set` may have refreshed it.
                self.entries
                    .remove_if(key, |_, entry| now - entry.written_at >= self.ttl);
                self.counters.expired.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Overwrites unconditionally and refreshes `written_at`.
    pub fn set(&self, key: CacheKey, value: CachedValue) {
        let written_at = self.clock.now();
        self.entries.insert(key, CacheEntry { value, written_at });
    }

    /// Current stamps for one of the owner's scopes: `None` for the
    /// collection list, `Some(id)` for one collection.
    pub fn generation(&self, owner: &OwnerId, collection: Option<CollectionId>) -> CacheGeneration {
        CacheGeneration {
            owner: self.owner_epochs.get(owner).map_or(0, |epoch| *epoch),
            scope: self
                .generations
                .get(&(owner.clone(), collection))
                .map_or(0, |generation| *generation),
        }
    }

    /// Insert unless the key's scope was invalidated after `seen` was taken.
    ///
    /// Returns `false` when the value was dropped as stale.
    pub fn set_if_current(&self, key: CacheKey, value: CachedValue, seen: CacheGeneration) -> bool {
        let current = || self.generation(&key.owner, key.collection) == seen;
        if !current() {
            return false;
        }
        self.set(key.clone(), value);
        // an invalidation may have landed between the check and the insert
        if current() {
            return true;
        }
        self.entries.remove(&key);
        tracing::debug!(owner_id = %key.owner, kind = ?key.kind, "stale cache write dropped");
        false
    }

    fn next_stamp(&self) -> u64 {
        self.stamps.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns how many entries were dropped.
    ///
    /// The scope's generation moves before any entry is removed.
    pub fn invalidate(&self, owner: &OwnerId, scope: CacheScope) -> usize {
        match scope {
            CacheScope::CollectionList => {
                self.generations.insert((owner.clone(), None), self.next_stamp());
            }
            CacheScope::Collection(collection) => {
                self.generations
                    .insert((owner.clone(), Some(collection)), self.next_stamp());
            }
            CacheScope::All => {
                self.owner_epochs.insert(owner.clone(), self.next_stamp());
                self.generations.retain(|(o, _), _| o != owner);
            }
        }
        let dropped = match scope {
            CacheScope::CollectionList => self
                .entries
                .remove(&CacheKey::collection_list(owner))
                .map_or(0, |_| 1),
            CacheScope::Collection(collection) => self.remove_matching(|k| {
                k.owner == *owner
                    && k.collection == Some(collection)
                    && matches!(k.kind, CacheKind::Metadata | CacheKind::Payload)
            }),
            CacheScope::All => self.remove_matching(|k| k.owner == *owner),
        };
        tracing::debug!(owner_id = %owner, ?scope, dropped, "cache invalidated");
        dropped
    }

    fn remove_matching(&self, predicate: impl Fn(&CacheKey) -> bool) -> usize {
        let doomed: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|e| predicate(e.key()))
            .map(|e| e.key().clone())
            .collect();
        doomed
            .iter()
            .filter(|k| self.entries.remove(*k).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }

    pub fn get_metadata(&self, owner: &OwnerId, collection: CollectionId) -> Option<CollectionMetadata> {
        match self.get(&CacheKey::metadata(owner, collection)) {
            Some(CachedValue::Metadata(metadata)) => Some(metadata),
            _ => None,
        }
    }

    pub fn get_payload(&self, owner: &OwnerId, collection: CollectionId) -> Option<CollectionPayload> {
        match self.get(&CacheKey::payload(owner, collection)) {
            Some(CachedValue::Payload(payload)) => Some(payload),
            _ => None,
        }
    }

    pub fn get_collection_list(&self, owner: &OwnerId) -> Option<Vec<CollectionMetadata>> {
        match self.get(&CacheKey::collection_list(owner)) {
            Some(CachedValue::CollectionList(list)) => Some(list),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Category, CollectionPayload};
    use crate::ports::FixedClock;
    use chrono::TimeZone;
    use rstest::rstest;
    use ulid::Ulid;

    fn setup() -> (Arc<FixedClock>, ResultCache) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let cache = ResultCache::new(std::time::Duration::from_secs(300), clock.clone());
        (clock, cache)
    }

    fn metadata(owner: &OwnerId, id: CollectionId) -> CollectionMetadata {
        CollectionMetadata {
            owner_id: owner.clone(),
            collection_id: id,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            region: "us-east-1".into(),
            selected_categories: vec![Category::from("ec2")],
        }
    }

    fn new_id() -> CollectionId {
        CollectionId::from_ulid(Ulid::new())
    }

    #[test]
    fn set_then_get_within_ttl_hits() {
        let (clock, cache) = setup();
        let owner = OwnerId::new("o1");
        let id = new_id();
        cache.set(CacheKey::metadata(&owner, id), CachedValue::Metadata(metadata(&owner, id)));

        clock.advance(Duration::seconds(299));
        assert_eq!(cache.get_metadata(&owner, id), Some(metadata(&owner, id)));
        assert_eq!(cache.stats().hits, 1);
    }

    #[rstest]
    #[case::exactly_ttl(300)]
    #[case::past_ttl(301)]
    #[case::long_past(86_400)]
    fn get_after_ttl_misses_and_drops_entry(#[case] elapsed: i64) {
        let (clock, cache) = setup();
        let owner = OwnerId::new("o1");
        cache.set(CacheKey::collection_list(&owner), CachedValue::CollectionList(vec![]));

        clock.advance(Duration::seconds(elapsed));
        assert_eq!(cache.get_collection_list(&owner), None);
        assert!(cache.is_empty());
        let stats = cache.stats();
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn set_refreshes_written_at() {
        let (clock, cache) = setup();
        let owner = OwnerId::new("o1");
        let key = CacheKey::collection_list(&owner);
        cache.set(key.clone(), CachedValue::CollectionList(vec![]));
        clock.advance(Duration::seconds(200));
        cache.set(key.clone(), CachedValue::CollectionList(vec![]));
        clock.advance(Duration::seconds(200));
        assert!(cache.get(&key).is_some());
    }

    #[test]
    fn invalidate_collection_list_only_drops_the_list() {
        let (_clock, cache) = setup();
        let owner = OwnerId::new("o1");
        let id = new_id();
        cache.set(CacheKey::collection_list(&owner), CachedValue::CollectionList(vec![]));
        cache.set(CacheKey::metadata(&owner, id), CachedValue::Metadata(metadata(&owner, id)));

        assert_eq!(cache.invalidate(&owner, CacheScope::CollectionList), 1);
        assert_eq!(cache.get_collection_list(&owner), None);
        assert!(cache.get_metadata(&owner, id).is_some());
    }

    #[test]
    fn invalidate_collection_drops_metadata_and_payload_of_that_id_only() {
        let (_clock, cache) = setup();
        let owner = OwnerId::new("o1");
        let (gone, kept) = (new_id(), new_id());
        for id in [gone, kept] {
            cache.set(CacheKey::metadata(&owner, id), CachedValue::Metadata(metadata(&owner, id)));
            cache.set(CacheKey::payload(&owner, id), CachedValue::Payload(CollectionPayload::new()));
        }
        cache.set(CacheKey::collection_list(&owner), CachedValue::CollectionList(vec![]));

        assert_eq!(cache.invalidate(&owner, CacheScope::Collection(gone)), 2);
        assert_eq!(cache.get_metadata(&owner, gone), None);
        assert_eq!(cache.get_payload(&owner, gone), None);
        assert!(cache.get_metadata(&owner, kept).is_some());
        assert!(cache.get_payload(&owner, kept).is_some());
        assert!(cache.get_collection_list(&owner).is_some());
    }

    #[test]
    fn invalidate_all_is_scoped_to_owner() {
        let (_clock, cache) = setup();
        let (o1, o2) = (OwnerId::new("o1"), OwnerId::new("o2"));
        let id = new_id();
        for owner in [&o1, &o2] {
            cache.set(CacheKey::collection_list(owner), CachedValue::CollectionList(vec![]));
            cache.set(CacheKey::metadata(owner, id), CachedValue::Metadata(metadata(owner, id)));
        }

        assert_eq!(cache.invalidate(&o1, CacheScope::All), 2);
        assert_eq!(cache.len(), 2);
        assert!(cache.get_collection_list(&o2).is_some());
    }

    #[test]
    fn write_observed_before_an_invalidation_is_dropped() {
        let (_clock, cache) = setup();
        let owner = OwnerId::new("o1");
        let id = new_id();
        let seen = cache.generation(&owner, Some(id));

        cache.invalidate(&owner, CacheScope::Collection(id));
        let stored = cache.set_if_current(
            CacheKey::metadata(&owner, id),
            CachedValue::Metadata(metadata(&owner, id)),
            seen,
        );
        assert!(!stored);
        assert_eq!(cache.get_metadata(&owner, id), None);
    }

    #[test]
    fn write_with_current_generation_is_kept() {
        let (_clock, cache) = setup();
        let owner = OwnerId::new("o1");
        let id = new_id();
        // other scopes moving does not matter
        cache.invalidate(&owner, CacheScope::Collection(new_id()));
        let seen = cache.generation(&owner, Some(id));
        cache.invalidate(&owner, CacheScope::CollectionList);
        cache.invalidate(&OwnerId::new("o2"), CacheScope::All);

        assert!(cache.set_if_current(
            CacheKey::metadata(&owner, id),
            CachedValue::Metadata(metadata(&owner, id)),
            seen,
        ));
        assert!(cache.get_metadata(&owner, id).is_some());
    }

    #[test]
    fn owner_reset_rejects_writes_for_every_scope() {
        let (_clock, cache) = setup();
        let owner = OwnerId::new("o1");
        let id = new_id();
        let seen_list = cache.generation(&owner, None);
        let seen_collection = cache.generation(&owner, Some(id));

        cache.invalidate(&owner, CacheScope::All);
        assert!(!cache.set_if_current(
            CacheKey::collection_list(&owner),
            CachedValue::CollectionList(vec![]),
            seen_list,
        ));
        assert!(!cache.set_if_current(
            CacheKey::payload(&owner, id),
            CachedValue::Payload(CollectionPayload::new()),
            seen_collection,
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn pruned_generations_never_repeat_after_reset() {
        let (_clock, cache) = setup();
        let owner = OwnerId::new("o1");
        let id = new_id();
        cache.invalidate(&owner, CacheScope::Collection(id));
        let seen = cache.generation(&owner, Some(id));

        cache.invalidate(&owner, CacheScope::All);
        cache.invalidate(&owner, CacheScope::Collection(id));
        assert_ne!(cache.generation(&owner, Some(id)), seen);
    }

    #[test]
    fn typed_getters_ignore_mismatched_values() {
        let (_clock, cache) = setup();
        let owner = OwnerId::new("o1");
        let id = new_id();
        cache.set(CacheKey::metadata(&owner, id), CachedValue::CollectionList(vec![]));
        assert_eq!(cache.get_metadata(&owner, id), None);
    }
}
