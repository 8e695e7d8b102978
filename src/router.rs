use async_trait::async_trait;
use log::{info, warn};
use rand::seq::SliceRandom;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::deployment::Deployment;
use crate::selector::{DeploymentSource, RoutingStrategy};

/// Host-side router: owns the model list and asks an optional custom
/// strategy before falling back to a random pick within the model group.
pub struct ModelRouter {
    pub deployments: Arc<RwLock<Vec<Deployment>>>,
    strategy: std::sync::RwLock<Option<Arc<dyn RoutingStrategy>>>,
}

impl ModelRouter {
    pub fn new(deployments: Vec<Deployment>) -> Self {
        info!("📋 Router created with {} deployments", deployments.len());
        Self {
            deployments: Arc::new(RwLock::new(deployments)),
            strategy: std::sync::RwLock::new(None),
        }
    }

    pub fn set_custom_routing_strategy(&self, strategy: Arc<dyn RoutingStrategy>) {
        *self.strategy.write().unwrap_or_else(|p| p.into_inner()) = Some(strategy);
        info!("Custom routing strategy registered");
    }

    pub async fn set_model_list(&self, deployments: Vec<Deployment>) {
        *self.deployments.write().await = deployments;
    }

    /// Picks a deployment for `model`, or `None` when the list is empty.
    pub async fn route(&self, model: &str) -> Option<Deployment> {
        let candidates = self.model_list().await;
        if candidates.is_empty() {
            warn!("⚠️ No deployments configured");
            return None;
        }

        let strategy = self.strategy.read().unwrap_or_else(|p| p.into_inner()).clone();
        if let Some(strategy) = strategy {
            if let Some(selected) = strategy.select_deployment(model, &candidates).await {
                return Some(selected);
            }
        }

        default_deployment(model, &candidates)
    }
}

#[async_trait]
impl DeploymentSource for ModelRouter {
    async fn model_list(&self) -> Vec<Deployment> {
        self.deployments.read().await.clone()
    }
}

/// Random deployment of the `model` group, or of the whole list when the group
/// is unknown.
pub fn default_deployment(model: &str, candidates: &[Deployment]) -> Option<Deployment> {
    let group: Vec<&Deployment> = candidates.iter().filter(|d| d.model_name == model).collect();
    let mut rng = rand::thread_rng();
    if group.is_empty() {
        candidates.choose(&mut rng).cloned()
    } else {
        group.choose(&mut rng).map(|d| (*d).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::deployment;

    struct Fixed(Option<&'static str>);

    #[async_trait]
    impl RoutingStrategy for Fixed {
        async fn select_deployment(
            &self,
            _model: &str,
            candidates: &[Deployment],
        ) -> Option<Deployment> {
            let id = self.0?;
            candidates.iter().find(|d| d.chute_id().as_deref() == Some(id)).cloned()
        }
    }

    fn list() -> Vec<Deployment> {
        vec![
            deployment("alpha", "openai/x/A", None, Some("a")),
            deployment("beta", "openai/x/B", None, Some("b")),
            deployment("beta", "openai/x/C", None, Some("c")),
        ]
    }

    #[test]
    fn default_stays_within_group() {
        for _ in 0..20 {
            let picked = default_deployment("beta", &list()).unwrap();
            assert_eq!(picked.model_name, "beta");
        }
        assert!(default_deployment("unknown", &list()).is_some());
        assert_eq!(default_deployment("alpha", &[]), None);
    }

    #[tokio::test]
    async fn strategy_decision_is_used() {
        let router = ModelRouter::new(list());
        router.set_custom_routing_strategy(Arc::new(Fixed(Some("c"))));
        let picked = router.route("alpha").await.unwrap();
        assert_eq!(picked.model_info.chute_id.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn deferral_falls_back_to_group() {
        let router = ModelRouter::new(list());
        router.set_custom_routing_strategy(Arc::new(Fixed(None)));
        let picked = router.route("alpha").await.unwrap();
        assert_eq!(picked.model_info.chute_id.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn empty_router_routes_nothing() {
        let router = ModelRouter::new(Vec::new());
        assert_eq!(router.route("alpha").await, None);

        router.set_model_list(list()).await;
        assert_eq!(router.model_list().await.len(), 3);
    }
}
