//! Persisted collection record: metadata + consolidated payload.
//!
//! A record is written once, at the end of a successful run, and never
//! updated in place. A re-run mints a new `CollectionId`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::category::Category;
use super::ids::{CollectionId, OwnerId};

/// The canonical empty result: `{"status": "collected", "data": {}}`.
///
/// Stored for every selected category that produced no usable data so a
/// persisted record never silently omits a requested category.
pub fn placeholder() -> serde_json::Value {
    serde_json::json!({
        "status": "collected",
        "data": {},
    })
}

pub fn is_placeholder(value: &serde_json::Value) -> bool {
    *value == placeholder()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    pub owner_id: OwnerId,
    pub collection_id: CollectionId,
    pub timestamp: DateTime<Utc>,
    pub region: String,
    pub selected_categories: Vec<Category>,
}

/// Category -> result object for one collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionPayload(BTreeMap<Category, serde_json::Value>);

impl CollectionPayload {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, category: Category, value: serde_json::Value) {
        self.0.insert(category, value);
    }

    pub fn get(&self, category: &Category) -> Option<&serde_json::Value> {
        self.0.get(category)
    }

    pub fn contains(&self, category: &Category) -> bool {
        self.0.contains_key(category)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Category, &serde_json::Value)> {
        self.0.iter()
    }

    /// Consolidate over every selected category, filling gaps with the placeholder.
    pub fn consolidate(
        selected: &[Category],
        mut results: BTreeMap<Category, serde_json::Value>,
    ) -> Self {
        let mut payload = Self::new();
        for category in selected {
            let value = results.remove(category).unwrap_or_else(placeholder);
            payload.insert(category.clone(), value);
        }
        payload
    }
}

/// One completed run's metadata + consolidated payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRecord {
    pub metadata: CollectionMetadata,
    pub payload: CollectionPayload,
}
