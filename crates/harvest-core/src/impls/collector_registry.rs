//! CollectorRegistry - カテゴリごとの Collector の登録と振り分け
//!
//! # 内部実装
//! - `HashMap<Category, Arc<dyn Collector>>` で管理
//! - 構築時に登録（mutable）、実行時は読み取りのみ（immutable）なのでロック不要
//! - Registry 自身も `Collector` を実装し、category で振り分ける

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{Category, CollectOutcome};
use crate::ports::{AuthContext, Collector};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("collector for category '{0}' is already registered")]
    AlreadyRegistered(Category),
}

#[derive(Default)]
pub struct CollectorRegistry {
    collectors: HashMap<Category, Arc<dyn Collector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self {
            collectors: HashMap::new(),
        }
    }

    pub fn register(
        &mut self,
        category: Category,
        collector: Arc<dyn Collector>,
    ) -> Result<(), RegistryError> {
        if self.collectors.contains_key(&category) {
            return Err(RegistryError::AlreadyRegistered(category));
        }
        self.collectors.insert(category, collector);
        Ok(())
    }

    pub fn get(&self, category: &Category) -> Option<Arc<dyn Collector>> {
        self.collectors.get(category).cloned()
    }

    pub fn registered_categories(&self) -> Vec<Category> {
        let mut categories: Vec<Category> = self.collectors.keys().cloned().collect();
        categories.sort();
        categories
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}

#[async_trait]
impl Collector for CollectorRegistry {
    async fn collect(
        &self,
        category: &Category,
        region: &str,
        auth: &AuthContext,
    ) -> Result<CollectOutcome, String> {
        match self.get(category) {
            Some(collector) => collector.collect(category, region, auth).await,
            None => Ok(CollectOutcome::failure(format!(
                "no collector registered for category={category}"
            ))),
        }
    }

    /// Only collectors the selected categories resolve to are checked, in
    /// selection order, each once with the categories it serves.
    async fn preflight(
        &self,
        categories: &[Category],
        region: &str,
        auth: &AuthContext,
    ) -> Result<(), String> {
        let mut groups: Vec<(usize, Arc<dyn Collector>, Vec<Category>)> = Vec::new();
        for category in categories {
            // unknown categories fail later as a per-category envelope
            let Some(collector) = self.collectors.get(category) else {
                continue;
            };
            let ptr = Arc::as_ptr(collector) as *const () as usize;
            match groups.iter_mut().find(|(p, _, _)| *p == ptr) {
                Some((_, _, served)) => served.push(category.clone()),
                None => groups.push((ptr, Arc::clone(collector), vec![category.clone()])),
            }
        }
        for (_, collector, served) in &groups {
            collector.preflight(served, region, auth).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Static(serde_json::Value);

    #[async_trait]
    impl Collector for Static {
        async fn collect(
            &self,
            _category: &Category,
            _region: &str,
            _auth: &AuthContext,
        ) -> Result<CollectOutcome, String> {
            Ok(CollectOutcome::success(self.0.clone()))
        }
    }

    struct RejectsCredentials(&'static str);

    #[async_trait]
    impl Collector for RejectsCredentials {
        async fn collect(
            &self,
            _category: &Category,
            _region: &str,
            _auth: &AuthContext,
        ) -> Result<CollectOutcome, String> {
            Ok(CollectOutcome::success(json!({})))
        }

        async fn preflight(
            &self,
            _categories: &[Category],
            _region: &str,
            _auth: &AuthContext,
        ) -> Result<(), String> {
            Err(self.0.to_string())
        }
    }

    /// Records the categories each preflight call was given.
    #[derive(Default)]
    struct RecordsPreflight(std::sync::Mutex<Vec<Vec<Category>>>);

    #[async_trait]
    impl Collector for RecordsPreflight {
        async fn collect(
            &self,
            _category: &Category,
            _region: &str,
            _auth: &AuthContext,
        ) -> Result<CollectOutcome, String> {
            Ok(CollectOutcome::success(json!({})))
        }

        async fn preflight(
            &self,
            categories: &[Category],
            _region: &str,
            _auth: &AuthContext,
        ) -> Result<(), String> {
            self.0.lock().unwrap().push(categories.to_vec());
            Ok(())
        }
    }

    fn cats(names: &[&str]) -> Vec<Category> {
        names.iter().copied().map(Category::from).collect()
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = CollectorRegistry::new();
        registry
            .register(Category::from("ec2"), Arc::new(Static(json!(1))))
            .unwrap();
        let result = registry.register(Category::from("ec2"), Arc::new(Static(json!(2))));
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(c)) if c.as_str() == "ec2"));
    }

    #[test]
    fn registered_categories_are_sorted() {
        let mut registry = CollectorRegistry::new();
        registry.register(Category::from("s3"), Arc::new(Static(json!(1)))).unwrap();
        registry.register(Category::from("ec2"), Arc::new(Static(json!(1)))).unwrap();
        assert_eq!(
            registry.registered_categories(),
            vec![Category::from("ec2"), Category::from("s3")]
        );
    }

    #[tokio::test]
    async fn dispatches_by_category() {
        let mut registry = CollectorRegistry::new();
        registry.register(Category::from("ec2"), Arc::new(Static(json!({"n": 1})))).unwrap();
        registry.register(Category::from("s3"), Arc::new(Static(json!({"n": 2})))).unwrap();

        let auth = AuthContext::new();
        let out = registry.collect(&Category::from("s3"), "us-east-1", &auth).await.unwrap();
        assert_eq!(out.result, Some(json!({"n": 2})));
    }

    #[tokio::test]
    async fn unknown_category_is_a_failure_envelope() {
        let registry = CollectorRegistry::new();
        let out = registry
            .collect(&Category::from("lambda"), "us-east-1", &AuthContext::new())
            .await
            .unwrap();
        assert!(!out.success);
        assert!(out.error.unwrap().contains("lambda"));
    }

    #[tokio::test]
    async fn preflight_fails_when_a_selected_collector_rejects() {
        let mut registry = CollectorRegistry::new();
        registry.register(Category::from("ec2"), Arc::new(Static(json!(1)))).unwrap();
        registry
            .register(Category::from("iam"), Arc::new(RejectsCredentials("invalid credentials")))
            .unwrap();
        let err = registry
            .preflight(&cats(&["ec2", "iam"]), "us-east-1", &AuthContext::new())
            .await
            .unwrap_err();
        assert_eq!(err, "invalid credentials");
    }

    #[tokio::test]
    async fn preflight_ignores_collectors_that_are_not_selected() {
        let mut registry = CollectorRegistry::new();
        registry.register(Category::from("ec2"), Arc::new(Static(json!(1)))).unwrap();
        registry
            .register(Category::from("iam"), Arc::new(RejectsCredentials("iam creds invalid")))
            .unwrap();
        let result = registry
            .preflight(&cats(&["ec2", "unregistered"]), "us-east-1", &AuthContext::new())
            .await;
        assert_eq!(result, Ok(()));
    }

    #[tokio::test]
    async fn preflight_follows_selection_order() {
        let mut registry = CollectorRegistry::new();
        registry.register(Category::from("a"), Arc::new(RejectsCredentials("a rejected"))).unwrap();
        registry.register(Category::from("b"), Arc::new(RejectsCredentials("b rejected"))).unwrap();
        let err = registry
            .preflight(&cats(&["b", "a"]), "us-east-1", &AuthContext::new())
            .await
            .unwrap_err();
        assert_eq!(err, "b rejected");
    }

    #[tokio::test]
    async fn shared_collector_is_preflighted_once_with_its_categories() {
        let shared = Arc::new(RecordsPreflight::default());
        let mut registry = CollectorRegistry::new();
        registry.register(Category::from("s3"), shared.clone()).unwrap();
        registry.register(Category::from("ec2"), Arc::new(Static(json!(1)))).unwrap();
        registry.register(Category::from("glacier"), shared.clone()).unwrap();

        registry
            .preflight(&cats(&["glacier", "ec2", "s3"]), "us-east-1", &AuthContext::new())
            .await
            .unwrap();
        assert_eq!(*shared.0.lock().unwrap(), vec![cats(&["glacier", "s3"])]);
    }
}
