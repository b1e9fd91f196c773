//! Per-session collection job and its read-only status view.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::category::{Category, dedupe_ordered};
use super::ids::CollectionId;

/// Mutable per-session job state (in-memory only).
///
/// - Single source of truth for the session's run
/// - State transitions via methods (not direct field access from callers)
#[derive(Debug, Clone, Default)]
pub struct CollectionJob {
    pub is_running: bool,
    pub current_category: Option<Category>,

    /// Append-only during a run. May contain duplicates if a category is retried.
    pub completed_categories: Vec<Category>,

    pub total_categories: usize,
    pub selected_categories: Vec<Category>,

    /// Minted at job start; `None` until the first run.
    pub collection_id: Option<CollectionId>,

    /// Last fatal error, if any.
    pub error: Option<String>,

    /// Absorbed per-category failures.
    pub category_errors: BTreeMap<Category, String>,

    pub results_by_category: BTreeMap<Category, serde_json::Value>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CollectionJob {
    /// Reset for a new run. Nothing carries over from the previous run.
    pub fn begin(
        &mut self,
        collection_id: CollectionId,
        selected: Vec<Category>,
        now: DateTime<Utc>,
    ) {
        *self = Self {
            is_running: true,
            total_categories: selected.len(),
            selected_categories: selected,
            collection_id: Some(collection_id),
            started_at: Some(now),
            ..Self::default()
        };
    }

    pub fn start_category(&mut self, category: Category) {
        self.current_category = Some(category);
    }

    /// Returns `false` when the category was never selected (ignored).
    pub fn record_result(
        &mut self,
        category: Category,
        payload: serde_json::Value,
        error: Option<String>,
    ) -> bool {
        if !self.selected_categories.contains(&category) {
            return false;
        }
        match error {
            Some(message) => {
                self.category_errors.insert(category.clone(), message);
            }
            None => {
                self.category_errors.remove(&category);
            }
        }
        self.results_by_category.insert(category.clone(), payload);
        self.completed_categories.push(category);
        true
    }

    pub fn finish(&mut self, fatal: Option<String>, now: DateTime<Utc>) {
        self.is_running = false;
        self.current_category = None;
        if fatal.is_some() {
            self.error = fatal;
        }
        self.finished_at = Some(now);
    }

    pub fn completed_unique(&self) -> Vec<Category> {
        dedupe_ordered(&self.completed_categories)
    }

    /// `min(100, floor(100 * deduped / total))`, `0` when nothing was selected.
    pub fn progress_percent(&self) -> u8 {
        if self.total_categories == 0 {
            return 0;
        }
        let done: HashSet<&Category> = self.completed_categories.iter().collect();
        let pct = (100 * done.len()) / self.total_categories;
        pct.min(100) as u8
    }

    pub fn status(&self) -> JobStatus {
        let completed = self.completed_unique();
        JobStatus {
            is_running: self.is_running,
            collection_id: self.collection_id,
            current_category: self.current_category.clone(),
            completed_count: completed.len(),
            completed_categories: completed,
            total_categories: self.total_categories,
            selected_categories: self.selected_categories.clone(),
            failed_categories: self.category_errors.clone(),
            error: self.error.clone(),
            progress_percent: self.progress_percent(),
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

/// Read-only status snapshot returned to pollers.
///
/// Always a copy; mutating it never affects the tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub is_running: bool,
    pub collection_id: Option<CollectionId>,
    pub current_category: Option<Category>,
    pub completed_categories: Vec<Category>,
    pub completed_count: usize,
    pub total_categories: usize,
    pub selected_categories: Vec<Category>,
    pub failed_categories: BTreeMap<Category, String>,
    pub error: Option<String>,
    pub progress_percent: u8,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}
