//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - キャッシュ・トラッカーは明示的に構築して注入する（グローバル状態を持たない）

use std::sync::Arc;

use super::orchestrator::CollectionOrchestrator;
use super::repository::CollectionRepository;
use super::service::CollectionService;
use super::tracker::CollectionJobTracker;
use crate::cache::ResultCache;
use crate::config::HarvestConfig;
use crate::domain::Category;
use crate::impls::{CollectorRegistry, RegistryError};
use crate::ports::{Clock, Collector, ObjectStore, SystemClock, UlidGenerator};

/// AppBuilder は CollectionService を構築
///
/// # 使用例
/// ```ignore
/// let service = AppBuilder::new()
///     .store(Arc::new(LocalObjectStore::new("./harvest-data")))
///     .collector("ec2", Arc::new(Ec2Collector))?
///     .expect_categories(&["ec2"])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - expect_categories() で期待するカテゴリを登録
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
pub struct AppBuilder {
    registry: CollectorRegistry,
    store: Option<Arc<dyn ObjectStore>>,
    clock: Arc<dyn Clock>,
    config: HarvestConfig,
    expected_categories: Option<Vec<Category>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing collectors: {0:?}. These categories were expected but not registered.")]
    MissingCollectors(Vec<String>),

    #[error("No object store configured.")]
    MissingStore,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            registry: CollectorRegistry::new(),
            store: None,
            clock: Arc::new(SystemClock),
            config: HarvestConfig::default(),
            expected_categories: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Collector を登録
    ///
    /// # Example
    /// ```ignore
    /// builder.collector("s3", Arc::new(S3Collector))?;
    /// ```
    pub fn collector(
        mut self,
        category: impl Into<Category>,
        collector: Arc<dyn Collector>,
    ) -> Result<Self, RegistryError> {
        self.registry.register(category.into(), collector)?;
        Ok(self)
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(mut self, config: HarvestConfig) -> Self {
        self.config = config;
        self
    }

    pub fn expect_categories(mut self, categories: &[&str]) -> Self {
        self.expected_categories = Some(categories.iter().copied().map(Category::from).collect());
        self
    }

    /// # 検証
    /// - store が設定されているか
    /// - expect_categories() のカテゴリが全て登録されているか
    pub fn build(self) -> Result<CollectionService, BuildError> {
        let store = self.store.ok_or(BuildError::MissingStore)?;
        if let Some(expected) = &self.expected_categories {
            let registered = self.registry.registered_categories();
            let missing: Vec<String> = expected
                .iter()
                .filter(|c| !registered.contains(c))
                .map(|c| c.to_string())
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingCollectors(missing));
            }
        }

        let cache = Arc::new(ResultCache::new(self.config.cache_ttl, self.clock.clone()));
        let repository = Arc::new(CollectionRepository::new(store, cache));
        let tracker = Arc::new(CollectionJobTracker::new(
            Arc::new(UlidGenerator::new(self.clock.clone())),
            self.clock.clone(),
        ));
        let orchestrator = Arc::new(CollectionOrchestrator::new(
            tracker.clone(),
            Arc::new(self.registry),
            repository.clone(),
            self.clock,
            self.config.collector_timeout,
        ));
        tracing::debug!(
            cache_ttl_secs = self.config.cache_ttl.as_secs(),
            collector_timeout = ?self.config.collector_timeout,
            "collection service built"
        );
        Ok(CollectionService::new(tracker, orchestrator, repository))
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CollectOutcome;
    use crate::impls::InMemoryObjectStore;
    use crate::ports::AuthContext;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Collector for Noop {
        async fn collect(
            &self,
            _category: &Category,
            _region: &str,
            _auth: &AuthContext,
        ) -> Result<CollectOutcome, String> {
            Ok(CollectOutcome::success(serde_json::json!({})))
        }
    }

    #[test]
    fn test_build_success() {
        let app = AppBuilder::new()
            .store(Arc::new(InMemoryObjectStore::new()))
            .collector("ec2", Arc::new(Noop))
            .unwrap()
            .expect_categories(&["ec2"])
            .build();
        assert!(app.is_ok());
    }

    #[test]
    fn test_build_missing_collectors() {
        let app = AppBuilder::new()
            .store(Arc::new(InMemoryObjectStore::new()))
            .collector("ec2", Arc::new(Noop))
            .unwrap()
            .expect_categories(&["ec2", "s3"])
            .build();
        assert!(matches!(
            app,
            Err(BuildError::MissingCollectors(missing)) if missing == vec!["s3".to_string()]
        ));
    }

    #[test]
    fn test_build_without_store() {
        let app = AppBuilder::new().collector("ec2", Arc::new(Noop)).unwrap().build();
        assert!(matches!(app, Err(BuildError::MissingStore)));
    }

    #[test]
    fn test_duplicate_collector() {
        let result = AppBuilder::new()
            .collector("ec2", Arc::new(Noop))
            .unwrap()
            .collector("ec2", Arc::new(Noop));
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }
}
