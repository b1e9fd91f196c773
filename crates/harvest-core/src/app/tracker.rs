//! CollectionJobTracker - セッション単位のジョブ状態機械
//!
//! # 単一実行（single-flight）
//! - `start_job` の「実行中でないか確認 → 実行中にする」は DashMap の entry API で
//!   1 つのシャードロックの中で行う（同一セッションの同時 start が両方成功することはない）
//! - 別セッションは別シャードに散るので互いに直列化されない
//!
//! # 防御的な振る舞い
//! - 未知のセッションへの操作は no-op（`status` はデフォルトの空状態）
//! - 実行中でないジョブへの記録は no-op（古いバックグラウンドタスクが復活させない）
//! - `status` は常にコピーを返す

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::domain::{Category, CollectionId, CollectionJob, HarvestError, JobStatus, SessionId};
use crate::observability::TrackerCounts;
use crate::ports::{Clock, IdGenerator};

pub struct CollectionJobTracker {
    jobs: DashMap<SessionId, CollectionJob>,
    id_gen: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
}

impl CollectionJobTracker {
    pub fn new(id_gen: Arc<dyn IdGenerator>, clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: DashMap::new(),
            id_gen,
            clock,
        }
    }

    /// Atomically claim the session and reset its job for a new run.
    pub fn start_job(
        &self,
        session: &SessionId,
        selected: Vec<Category>,
    ) -> Result<CollectionId, HarvestError> {
        let collection_id = self.id_gen.generate_collection_id();
        let now = self.clock.now();
        let total = selected.len();
        match self.jobs.entry(session.clone()) {
            Entry::Occupied(mut e) => {
                if e.get().is_running {
                    tracing::info!(session_id = %session, "collection already in progress");
                    return Err(HarvestError::AlreadyRunning {
                        session: session.clone(),
                    });
                }
                e.get_mut().begin(collection_id, selected, now);
            }
            Entry::Vacant(e) => {
                let mut job = CollectionJob::default();
                job.begin(collection_id, selected, now);
                e.insert(job);
            }
        }
        tracing::info!(
            session_id = %session,
            collection_id = %collection_id,
            total_categories = total,
            "collection job started"
        );
        Ok(collection_id)
    }

    pub fn record_category_start(&self, session: &SessionId, category: &Category) {
        if let Some(mut job) = self.jobs.get_mut(session)
            && job.is_running
        {
            job.start_category(category.clone());
            tracing::debug!(session_id = %session, category = %category, "category started");
        }
    }

    /// Best-effort per category: an error is recorded, the run keeps going.
    pub fn record_category_result(
        &self,
        session: &SessionId,
        category: &Category,
        payload: serde_json::Value,
        error: Option<String>,
    ) {
        let Some(mut job) = self.jobs.get_mut(session) else {
            return;
        };
        if !job.is_running {
            return;
        }
        let failed = error.is_some();
        if !job.record_result(category.clone(), payload, error) {
            tracing::warn!(session_id = %session, category = %category, "result for unselected category ignored");
            return;
        }
        tracing::debug!(
            session_id = %session,
            category = %category,
            failed,
            progress = job.progress_percent(),
            "category recorded"
        );
    }

    /// `fatal` is reserved for errors that abort the whole run.
    pub fn finish_job(&self, session: &SessionId, fatal: Option<String>) {
        let now = self.clock.now();
        if let Some(mut job) = self.jobs.get_mut(session) {
            if let Some(err) = &fatal {
                tracing::warn!(session_id = %session, error = %err, "collection job aborted");
            }
            job.finish(fatal, now);
            tracing::info!(
                session_id = %session,
                progress = job.progress_percent(),
                "collection job finished"
            );
        }
    }

    pub fn status(&self, session: &SessionId) -> JobStatus {
        self.jobs
            .get(session)
            .map(|job| job.status())
            .unwrap_or_default()
    }

    /// Copy of the accumulated results of the session's current/last run.
    #[cfg(test)]
    fn results(&self, session: &SessionId) -> std::collections::BTreeMap<Category, serde_json::Value> {
        self.jobs
            .get(session)
            .map(|job| job.results_by_category.clone())
            .unwrap_or_default()
    }

    pub fn is_running(&self, session: &SessionId) -> bool {
        self.jobs.get(session).is_some_and(|job| job.is_running)
    }

    pub fn counts(&self) -> TrackerCounts {
        let mut counts = TrackerCounts::default();
        for job in self.jobs.iter() {
            counts.sessions += 1;
            if job.is_running {
                counts.running += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{SystemClock, UlidGenerator};
    use serde_json::json;

    fn tracker() -> CollectionJobTracker {
        CollectionJobTracker::new(
            Arc::new(UlidGenerator::new(SystemClock)),
            Arc::new(SystemClock),
        )
    }

    fn cats(names: &[&str]) -> Vec<Category> {
        names.iter().copied().map(Category::from).collect()
    }

    #[test]
    fn status_of_unknown_session_is_empty() {
        let status = tracker().status(&SessionId::new("nobody"));
        assert!(!status.is_running);
        assert_eq!(status.total_categories, 0);
        assert_eq!(status.progress_percent, 0);
    }

    #[test]
    fn second_start_conflicts_while_running() {
        let t = tracker();
        let s = SessionId::new("s1");
        t.start_job(&s, cats(&["a"])).unwrap();
        let err = t.start_job(&s, cats(&["a"])).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn restart_after_finish_mints_new_id_and_resets_state() {
        let t = tracker();
        let s = SessionId::new("s1");
        let first = t.start_job(&s, cats(&["a", "b"])).unwrap();
        t.record_category_result(&s, &Category::from("a"), json!({"x": 1}), None);
        t.finish_job(&s, None);

        let second = t.start_job(&s, cats(&["c"])).unwrap();
        assert_ne!(first, second);
        let status = t.status(&s);
        assert!(status.is_running);
        assert_eq!(status.collection_id, Some(second));
        assert_eq!(status.total_categories, 1);
        assert!(status.completed_categories.is_empty());
        assert!(t.results(&s).is_empty());
    }

    #[test]
    fn operations_on_unknown_session_are_noops() {
        let t = tracker();
        let s = SessionId::new("ghost");
        t.record_category_start(&s, &Category::from("a"));
        t.record_category_result(&s, &Category::from("a"), json!({}), None);
        t.finish_job(&s, Some("x".into()));
        assert_eq!(t.counts().sessions, 0);
    }

    #[test]
    fn finished_job_is_not_resurrected_by_stale_updates() {
        let t = tracker();
        let s = SessionId::new("s1");
        t.start_job(&s, cats(&["a", "b"])).unwrap();
        t.finish_job(&s, None);

        t.record_category_start(&s, &Category::from("a"));
        t.record_category_result(&s, &Category::from("a"), json!({}), None);

        let status = t.status(&s);
        assert!(!status.is_running);
        assert_eq!(status.current_category, None);
        assert_eq!(status.completed_count, 0);
    }

    #[test]
    fn status_is_a_copy() {
        let t = tracker();
        let s = SessionId::new("s1");
        t.start_job(&s, cats(&["a"])).unwrap();
        let mut snapshot = t.status(&s);
        snapshot.is_running = false;
        snapshot.completed_categories.push(Category::from("a"));
        assert!(t.status(&s).is_running);
        assert!(t.status(&s).completed_categories.is_empty());
    }

    #[test]
    fn counts_track_running_sessions() {
        let t = tracker();
        t.start_job(&SessionId::new("s1"), cats(&["a"])).unwrap();
        t.start_job(&SessionId::new("s2"), cats(&["a"])).unwrap();
        t.finish_job(&SessionId::new("s2"), None);
        let counts = t.counts();
        assert_eq!(counts.sessions, 2);
        assert_eq!(counts.running, 1);
    }

    #[test]
    fn concurrent_starts_on_one_session_admit_exactly_one() {
        let t = Arc::new(tracker());
        let s = SessionId::new("race");
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let t = Arc::clone(&t);
                let s = s.clone();
                std::thread::spawn(move || t.start_job(&s, cats(&["a"])).is_ok())
            })
            .collect();
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(accepted, 1);
    }
}
