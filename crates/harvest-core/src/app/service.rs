//! CollectionService - リクエストハンドラに公開する Job API
//!
//! # 同期的に返すエラー
//! - Conflict（同一セッションで実行中）
//! - FatalRun（カテゴリ未選択・リージョン未指定）
//! - InvalidId（オーナー未指定。ジョブは開始しない）
//!
//! それ以外の失敗はジョブ状態に記録され、`poll_status` や後続の読み取りで見える。

use std::sync::Arc;
use std::time::Duration;

use super::orchestrator::{CollectionOrchestrator, RunRequest};
use super::repository::CollectionRepository;
use super::tracker::CollectionJobTracker;
use crate::cache::CacheStats;
use crate::domain::category::dedupe_ordered;
use crate::domain::{
    Category, CollectionId, CollectionMetadata, CollectionRecord, HarvestError, JobStatus,
    OwnerId, SessionId,
};
use crate::observability::TrackerCounts;
use crate::ports::AuthContext;

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub session: SessionId,
    pub owner: OwnerId,
    pub region: String,
    pub categories: Vec<Category>,
    pub auth: AuthContext,
}

pub struct CollectionService {
    tracker: Arc<CollectionJobTracker>,
    orchestrator: Arc<CollectionOrchestrator>,
    repository: Arc<CollectionRepository>,
}

impl CollectionService {
    pub fn new(
        tracker: Arc<CollectionJobTracker>,
        orchestrator: Arc<CollectionOrchestrator>,
        repository: Arc<CollectionRepository>,
    ) -> Self {
        Self {
            tracker,
            orchestrator,
            repository,
        }
    }

    /// Claim the session and start the run in the background.
    ///
    /// Returns as soon as the job is marked running. Must be called from
    /// within a tokio runtime.
    pub fn start_collection(&self, request: StartRequest) -> Result<CollectionId, HarvestError> {
        if request.owner.as_str().trim().is_empty() {
            return Err(HarvestError::InvalidId("owner id is empty".to_string()));
        }
        let categories = dedupe_ordered(&request.categories);
        let collection_id = self.tracker.start_job(&request.session, categories.clone())?;

        let fatal = if categories.is_empty() {
            Some("no categories selected")
        } else if request.region.trim().is_empty() {
            Some("no region selected")
        } else {
            None
        };
        if let Some(reason) = fatal {
            self.tracker
                .finish_job(&request.session, Some(reason.to_string()));
            return Err(HarvestError::FatalRun(reason.to_string()));
        }

        // detached: the supervisor owns completion
        let _ = self.orchestrator.spawn(RunRequest {
            session: request.session,
            owner: request.owner,
            collection_id,
            region: request.region,
            categories,
            auth: request.auth,
        });
        Ok(collection_id)
    }

    pub fn poll_status(&self, session: &SessionId) -> JobStatus {
        self.tracker.status(session)
    }

    /// Poll until the session's job is no longer running. `None` on timeout.
    pub async fn wait_for_completion(
        &self,
        session: &SessionId,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Option<JobStatus> {
        let wait = async {
            loop {
                let status = self.tracker.status(session);
                if !status.is_running {
                    return status;
                }
                tokio::time::sleep(poll_interval).await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }

    pub async fn get_collection(
        &self,
        owner: &OwnerId,
        id: CollectionId,
    ) -> Result<CollectionRecord, HarvestError> {
        self.repository.get_collection(owner, id).await
    }

    pub async fn list_collections(
        &self,
        owner: &OwnerId,
    ) -> Result<Vec<CollectionMetadata>, HarvestError> {
        self.repository.list_collections(owner).await
    }

    pub async fn delete_collection(
        &self,
        owner: &OwnerId,
        id: CollectionId,
    ) -> Result<bool, HarvestError> {
        self.repository.delete_collection(owner, id).await
    }

    pub async fn reset_owner(&self, owner: &OwnerId) -> Result<usize, HarvestError> {
        self.repository.reset_owner(owner).await
    }

    pub fn tracker_counts(&self) -> TrackerCounts {
        self.tracker.counts()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.repository.cache().stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppBuilder;
    use crate::domain::CollectOutcome;
    use crate::impls::InMemoryObjectStore;
    use crate::ports::Collector;
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Collector for Echo {
        async fn collect(
            &self,
            category: &Category,
            _region: &str,
            _auth: &AuthContext,
        ) -> Result<CollectOutcome, String> {
            Ok(CollectOutcome::success(json!({ "category": category.as_str() })))
        }
    }

    fn service() -> CollectionService {
        AppBuilder::new()
            .store(Arc::new(InMemoryObjectStore::new()))
            .collector("a", Arc::new(Echo))
            .unwrap()
            .collector("b", Arc::new(Echo))
            .unwrap()
            .build()
            .unwrap()
    }

    fn start(session: &str, categories: &[&str]) -> StartRequest {
        StartRequest {
            session: SessionId::new(session),
            owner: OwnerId::new("o1"),
            region: "us-east-1".into(),
            categories: categories.iter().copied().map(Category::from).collect(),
            auth: AuthContext::new(),
        }
    }

    #[tokio::test]
    async fn empty_selection_is_fatal_and_leaves_job_finished() {
        let svc = service();
        let err = svc.start_collection(start("s1", &[])).unwrap_err();
        assert!(matches!(err, HarvestError::FatalRun(_)));

        let status = svc.poll_status(&SessionId::new("s1"));
        assert!(!status.is_running);
        assert_eq!(status.error.as_deref(), Some("no categories selected"));

        // the session is free again
        assert!(svc.start_collection(start("s1", &["a"])).is_ok());
    }

    #[tokio::test]
    async fn blank_region_is_fatal() {
        let svc = service();
        let mut req = start("s1", &["a"]);
        req.region = "  ".into();
        assert!(matches!(
            svc.start_collection(req),
            Err(HarvestError::FatalRun(_))
        ));
        assert!(!svc.poll_status(&SessionId::new("s1")).is_running);
    }

    #[tokio::test]
    async fn blank_owner_is_rejected_before_claiming_the_session() {
        let svc = service();
        let mut req = start("s1", &["a"]);
        req.owner = OwnerId::new("");
        assert!(matches!(
            svc.start_collection(req),
            Err(HarvestError::InvalidId(_))
        ));
        assert_eq!(svc.tracker_counts().sessions, 0);
    }

    #[tokio::test]
    async fn duplicate_categories_are_collected_once() {
        let svc = service();
        let session = SessionId::new("s1");
        let id = svc.start_collection(start("s1", &["a", "b", "a"])).unwrap();
        let status = svc
            .wait_for_completion(&session, Duration::from_millis(5), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(status.total_categories, 2);
        assert_eq!(status.progress_percent, 100);

        let record = svc.get_collection(&OwnerId::new("o1"), id).await.unwrap();
        assert_eq!(
            record.metadata.selected_categories,
            vec![Category::from("a"), Category::from("b")]
        );
    }

    #[tokio::test]
    async fn counts_and_stats_reflect_activity() {
        let svc = service();
        let session = SessionId::new("s1");
        let id = svc.start_collection(start("s1", &["a"])).unwrap();
        svc.wait_for_completion(&session, Duration::from_millis(5), Duration::from_secs(5))
            .await
            .unwrap();

        svc.get_collection(&OwnerId::new("o1"), id).await.unwrap();
        let counts = svc.tracker_counts();
        assert_eq!(counts.sessions, 1);
        assert_eq!(counts.running, 0);
        assert!(svc.cache_stats().hits >= 2);
    }
}
