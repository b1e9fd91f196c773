//! CollectionOrchestrator - 1 回の収集を最後まで実行して永続化する
//!
//! # フロー
//! 1. Collector::preflight（選択カテゴリのみ。失敗したら致命的エラーとして終了、カテゴリは 1 つも実行しない）
//! 2. 選択順にカテゴリを 1 つずつ: start 記録 → Collector 呼び出し → result 記録
//!    - 失敗・タイムアウト・panic はそのカテゴリだけのプレースホルダーに置き換えて続行
//! 3. 全選択カテゴリで統合 payload を組み立てて保存（保存失敗はログのみ）
//! 4. finish_job
//!
//! `spawn` は実行本体を別タスクで走らせ、監視タスクが JoinHandle を待つ。
//! 本体が panic しても監視側が finish_job を呼ぶので、`is_running` が残り続けることはない。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use super::repository::CollectionRepository;
use super::tracker::CollectionJobTracker;
use crate::domain::{
    Category, CollectionId, CollectionMetadata, CollectionPayload, CollectionRecord, HarvestError,
    OwnerId, SessionId, placeholder,
};
use crate::ports::{AuthContext, Clock, Collector};

/// Everything one background run needs.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub session: SessionId,
    pub owner: OwnerId,
    pub collection_id: CollectionId,
    pub region: String,
    pub categories: Vec<Category>,
    pub auth: AuthContext,
}

/// What a finished run did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub collection_id: CollectionId,
    pub failed: Vec<Category>,
    pub persisted: bool,
    pub fatal: Option<String>,
}

pub struct CollectionOrchestrator {
    tracker: Arc<CollectionJobTracker>,
    collector: Arc<dyn Collector>,
    repository: Arc<CollectionRepository>,
    clock: Arc<dyn Clock>,
    collector_timeout: Option<Duration>,
}

impl CollectionOrchestrator {
    pub fn new(
        tracker: Arc<CollectionJobTracker>,
        collector: Arc<dyn Collector>,
        repository: Arc<CollectionRepository>,
        clock: Arc<dyn Clock>,
        collector_timeout: Option<Duration>,
    ) -> Self {
        Self {
            tracker,
            collector,
            repository,
            clock,
            collector_timeout,
        }
    }

    /// Spawn the run under a supervisor that always finishes the job.
    pub fn spawn(self: &Arc<Self>, request: RunRequest) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let session = request.session.clone();
            let collection_id = request.collection_id;
            let run = {
                let this = Arc::clone(&this);
                tokio::spawn(async move { this.run(&request).await })
            };
            match run.await {
                Ok(report) => {
                    tracing::debug!(
                        session_id = %session,
                        collection_id = %collection_id,
                        failed = report.failed.len(),
                        persisted = report.persisted,
                        "collection run completed"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        session_id = %session,
                        collection_id = %collection_id,
                        error = %e,
                        "collection run panicked"
                    );
                    this.tracker
                        .finish_job(&session, Some(format!("collection run aborted: {e}")));
                }
            }
        })
    }

    /// Drive one run to completion. Per-category failures never escape the loop.
    pub async fn run(&self, request: &RunRequest) -> RunReport {
        let session = &request.session;
        let mut report = RunReport {
            collection_id: request.collection_id,
            failed: Vec::new(),
            persisted: false,
            fatal: None,
        };

        if let Err(e) = self
            .collector
            .preflight(&request.categories, &request.region, &request.auth)
            .await
        {
            let message = format!("preflight failed: {e}");
            self.tracker.finish_job(session, Some(message.clone()));
            report.fatal = Some(message);
            return report;
        }

        let mut results: BTreeMap<Category, serde_json::Value> = BTreeMap::new();
        for category in &request.categories {
            self.tracker.record_category_start(session, category);

            match self.collect_one(category, &request.region, &request.auth).await {
                Ok(payload) => {
                    results.insert(category.clone(), payload.clone());
                    self.tracker
                        .record_category_result(session, category, payload, None);
                }
                Err(message) => {
                    let err = HarvestError::Category {
                        category: category.to_string(),
                        message: message.clone(),
                    };
                    tracing::warn!(
                        session_id = %session,
                        collection_id = %request.collection_id,
                        kind = ?err.kind(),
                        error = %err,
                        "category collection failed, storing placeholder"
                    );
                    report.failed.push(category.clone());
                    self.tracker.record_category_result(
                        session,
                        category,
                        placeholder(),
                        Some(message),
                    );
                }
            }
        }

        let record = CollectionRecord {
            metadata: CollectionMetadata {
                owner_id: request.owner.clone(),
                collection_id: request.collection_id,
                timestamp: self.clock.now(),
                region: request.region.clone(),
                selected_categories: request.categories.clone(),
            },
            payload: CollectionPayload::consolidate(&request.categories, results),
        };

        match self.repository.save(&record).await {
            Ok(()) => report.persisted = true,
            Err(e) => {
                tracing::error!(
                    session_id = %session,
                    owner_id = %request.owner,
                    collection_id = %request.collection_id,
                    error = %e,
                    "persisting collection failed"
                );
            }
        }

        self.tracker.finish_job(session, None);
        report
    }

    /// One collector call in its own task, so a panic or timeout only costs this category.
    async fn collect_one(
        &self,
        category: &Category,
        region: &str,
        auth: &AuthContext,
    ) -> Result<serde_json::Value, String> {
        let collector = Arc::clone(&self.collector);
        let (category, region, auth) = (category.clone(), region.to_string(), auth.clone());
        let mut call = tokio::spawn(async move { collector.collect(&category, &region, &auth).await });

        let joined = match self.collector_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut call).await {
                Ok(joined) => joined,
                Err(_) => {
                    call.abort();
                    return Err(format!("collector timed out after {}s", limit.as_secs_f64()));
                }
            },
            None => call.await,
        };

        match joined {
            Ok(Ok(outcome)) => outcome.into_payload(),
            Ok(Err(e)) => Err(e),
            Err(e) if e.is_panic() => Err("collector panicked".to_string()),
            Err(e) => Err(format!("collector task failed: {e}")),
        }
    }
}
