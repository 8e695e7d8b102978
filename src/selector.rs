//! Least-utilized deployment selection.
//!
//! ```text
//! candidates ─> chute ids ─> cache hit? ──yes─────────┐
//!                               │ no                   │
//!                               └─> fetch ─> value|0.5 ┴─> table ─> min
//! ```

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use log::{debug, error, info, warn};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::cache::UtilizationCache;
use crate::config::RoutingConfig;
use crate::deployment::Deployment;
use crate::fetcher::UtilizationFetcher;

/// Utilization assumed for a chute whose reading cannot be obtained.
pub const NEUTRAL_UTILIZATION: f64 = 0.5;

/// A pluggable routing decision, called once per request by the host router.
///
/// `None` means "no decision": the host applies its own default selection.
#[async_trait]
pub trait RoutingStrategy: Send + Sync {
    async fn select_deployment(
        &self,
        model: &str,
        candidates: &[Deployment],
    ) -> Option<Deployment>;
}

/// Live view of the host's model list.
#[async_trait]
pub trait DeploymentSource: Send + Sync {
    async fn model_list(&self) -> Vec<Deployment>;
}

#[async_trait]
impl DeploymentSource for tokio::sync::RwLock<Vec<Deployment>> {
    async fn model_list(&self) -> Vec<Deployment> {
        self.read().await.clone()
    }
}

/// Request-scoped chute id -> utilization pairs, in candidate order.
pub type UtilizationTable = Vec<(String, f64)>;

/// Routes to the deployment whose chute reports the lowest utilization.
pub struct UtilizationRouting {
    cache: Arc<UtilizationCache>,
    fetcher: UtilizationFetcher,
    router: RwLock<Option<Arc<dyn DeploymentSource>>>,
}

impl UtilizationRouting {
    pub fn new(config: RoutingConfig) -> Self {
        let cache = Arc::new(UtilizationCache::new(config.cache_ttl));
        let fetcher = UtilizationFetcher::new(&config, cache.clone());
        info!(
            "⚖️ Chutes utilization routing initialized with cache_ttl={}s, api_base={}",
            cache.ttl().as_secs(),
            config.api_base
        );
        Self {
            cache,
            fetcher,
            router: RwLock::new(None),
        }
    }

    pub fn with_router(self, router: Arc<dyn DeploymentSource>) -> Self {
        self.set_router(router);
        self
    }

    /// Replaces the handle used by [`Self::get_available_deployment`].
    pub fn set_router(&self, router: Arc<dyn DeploymentSource>) {
        let mut slot = self.router.write().unwrap_or_else(|p| p.into_inner());
        *slot = Some(router);
    }

    pub fn cache(&self) -> &Arc<UtilizationCache> {
        &self.cache
    }

    /// Selects among the injected router's current model list.
    pub async fn get_available_deployment(&self, model: &str) -> Option<Deployment> {
        let router = self.router.read().unwrap_or_else(|p| p.into_inner()).clone();
        let model_list = match router {
            Some(router) => router.model_list().await,
            None => Vec::new(),
        };

        if model_list.is_empty() {
            warn!("No model list available for routing");
            return None;
        }
        self.select_deployment(model, &model_list).await
    }

    /// Cached value, else a fresh fetch, else [`NEUTRAL_UTILIZATION`].
    async fn resolve(&self, chute_id: &str) -> f64 {
        if let Some(cached) = self.cache.get(chute_id) {
            return cached;
        }
        match self.fetcher.fetch(chute_id).await {
            Some(value) => value,
            None => {
                warn!(
                    "Could not get utilization for {}, using default {}",
                    chute_id, NEUTRAL_UTILIZATION
                );
                NEUTRAL_UTILIZATION
            }
        }
    }

    /// Utilization for every distinct chute id among `candidates`.
    pub async fn utilization_table(&self, candidates: &[Deployment]) -> UtilizationTable {
        let mut ids: Vec<String> = Vec::new();
        for chute_id in candidates.iter().filter_map(Deployment::chute_id) {
            if !ids.contains(&chute_id) {
                ids.push(chute_id);
            }
        }

        let values = join_all(ids.iter().map(|id| self.resolve(id))).await;
        ids.into_iter().zip(values).collect()
    }

    async fn select(&self, model: &str, candidates: &[Deployment]) -> Option<Deployment> {
        if candidates.is_empty() {
            warn!("No model list available for routing");
            return None;
        }

        let table = self.utilization_table(candidates).await;
        let (chute_id, utilization) = match least_utilized(&table) {
            Some(winner) => winner,
            None => {
                warn!("No utilization data available, falling back to default");
                return None;
            }
        };

        info!(
            "Routing to least utilized deployment: {} (utilization: {:.2})",
            chute_id, utilization
        );
        let selected = deployment_for(chute_id, model, candidates);
        if let Some(deployment) = &selected {
            debug!("Selected deployment: {}", deployment.model_name);
        }
        selected
    }
}

#[async_trait]
impl RoutingStrategy for UtilizationRouting {
    async fn select_deployment(
        &self,
        model: &str,
        candidates: &[Deployment],
    ) -> Option<Deployment> {
        match AssertUnwindSafe(self.select(model, candidates)).catch_unwind().await {
            Ok(selected) => selected,
            Err(_) => {
                error!("Error in select_deployment for {}: selection panicked", model);
                None
            }
        }
    }
}

/// Entry with the strictly lowest utilization; the first one wins ties.
pub fn least_utilized(table: &[(String, f64)]) -> Option<(&str, f64)> {
    let mut best: Option<(&str, f64)> = None;
    for (chute_id, utilization) in table {
        match best {
            Some((_, lowest)) if *utilization >= lowest => {}
            _ => best = Some((chute_id.as_str(), *utilization)),
        }
    }
    best
}

/// Maps a winning chute id back to its deployment.
///
/// Falls back to the first deployment named `model`, then to the first one.
pub fn deployment_for(
    chute_id: &str,
    model: &str,
    candidates: &[Deployment],
) -> Option<Deployment> {
    candidates
        .iter()
        .find(|d| d.chute_id().as_deref() == Some(chute_id))
        .or_else(|| candidates.iter().find(|d| d.model_name == model))
        .or_else(|| candidates.first())
        .cloned()
}

/// Builds a [`UtilizationRouting`] with the default API base.
pub fn create_chutes_routing_strategy(
    api_key: Option<String>,
    cache_ttl: u64,
) -> UtilizationRouting {
    let mut config = RoutingConfig::from_env().with_cache_ttl(Duration::from_secs(cache_ttl));
    if api_key.is_some() {
        config.api_key = api_key;
    }
    UtilizationRouting::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::deployment;

    fn offline() -> UtilizationRouting {
        UtilizationRouting::new(RoutingConfig::default())
    }

    fn candidates(ids: &[&str]) -> Vec<Deployment> {
        ids.iter()
            .map(|id| deployment("chutes-models", &format!("openai/org/{}", id), None, Some(id)))
            .collect()
    }

    #[test]
    fn least_utilized_picks_minimum() {
        let table = vec![("A".to_string(), 0.8), ("B".to_string(), 0.2), ("C".to_string(), 0.5)];
        assert_eq!(least_utilized(&table), Some(("B", 0.2)));
    }

    #[test]
    fn least_utilized_breaks_ties_by_order() {
        let table = vec![("A".to_string(), 0.3), ("B".to_string(), 0.3)];
        assert_eq!(least_utilized(&table), Some(("A", 0.3)));
        assert_eq!(least_utilized(&[]), None);
    }

    #[test]
    fn deployment_for_fallbacks() {
        let list = vec![
            deployment("other", "openai/x/One", None, Some("one")),
            deployment("wanted", "openai/x/Two", None, Some("two")),
        ];
        assert_eq!(deployment_for("two", "other", &list).unwrap().model_name, "wanted");
        let by_name = deployment_for("zzz", "wanted", &list).unwrap();
        assert_eq!(by_name.model_info.chute_id.as_deref(), Some("two"));
        let first = deployment_for("zzz", "nope", &list).unwrap();
        assert_eq!(first.model_info.chute_id.as_deref(), Some("one"));
        assert_eq!(deployment_for("zzz", "nope", &[]), None);
    }

    #[tokio::test]
    async fn selects_lowest_cached_utilization() {
        let routing = offline();
        routing.cache().put("A", 0.8);
        routing.cache().put("B", 0.2);
        routing.cache().put("C", 0.5);

        let selected = routing
            .select_deployment("chutes-models", &candidates(&["A", "B", "C"]))
            .await
            .unwrap();
        assert_eq!(selected.model_info.chute_id.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn ties_go_to_first_candidate() {
        let routing = offline();
        routing.cache().put("A", 0.3);
        routing.cache().put("B", 0.3);

        let selected = routing
            .select_deployment("chutes-models", &candidates(&["A", "B"]))
            .await
            .unwrap();
        assert_eq!(selected.model_info.chute_id.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn missing_readings_use_neutral_value() {
        let routing = offline();
        routing.cache().put("B", 0.6);

        let table = routing.utilization_table(&candidates(&["A", "B", "A"])).await;
        assert_eq!(table, vec![("A".to_string(), 0.5), ("B".to_string(), 0.6)]);

        let selected = routing
            .select_deployment("chutes-models", &candidates(&["B", "A"]))
            .await
            .unwrap();
        assert_eq!(selected.model_info.chute_id.as_deref(), Some("A"));
    }

    #[tokio::test]
    async fn empty_or_unidentifiable_candidates_defer() {
        let routing = offline();
        assert_eq!(routing.select_deployment("chutes-models", &[]).await, None);

        let anonymous = vec![deployment("chutes-models", "", None, None)];
        assert_eq!(routing.select_deployment("chutes-models", &anonymous).await, None);
    }

    #[tokio::test]
    async fn model_segment_identifier_maps_back() {
        let routing = offline();
        let list = vec![
            deployment("chutes-models", "openai/zai-org/GLM-5-TEE", None, None),
            deployment("chutes-models", "openai/Qwen/Qwen3-TEE", None, None),
        ];
        routing.cache().put("GLM-5-TEE", 0.9);
        routing.cache().put("Qwen3-TEE", 0.1);

        let selected = routing.select_deployment("chutes-models", &list).await.unwrap();
        assert_eq!(selected.litellm_params.model, "openai/Qwen/Qwen3-TEE");
    }

    #[tokio::test]
    async fn uses_injected_router() {
        let list = Arc::new(tokio::sync::RwLock::new(candidates(&["A", "B"])));
        let routing = offline();
        assert_eq!(routing.get_available_deployment("chutes-models").await, None);

        let routing = routing.with_router(list.clone());
        routing.cache().put("A", 0.9);
        routing.cache().put("B", 0.1);
        let selected = routing.get_available_deployment("chutes-models").await.unwrap();
        assert_eq!(selected.model_info.chute_id.as_deref(), Some("B"));

        list.write().await.clear();
        assert_eq!(routing.get_available_deployment("chutes-models").await, None);
    }
}
