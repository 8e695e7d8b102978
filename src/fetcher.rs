use log::{debug, error, info, warn};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::UtilizationCache;
use crate::config::RoutingConfig;
use crate::error::FetchError;
use crate::response::parse_utilization;

pub const UTILIZATION_PATH: &str = "/chutes/utilization";

/// Pulls utilization readings from the Chutes API into the shared cache.
pub struct UtilizationFetcher {
    client: Client,
    api_key: Option<String>,
    url: String,
    timeout: Duration,
    cache: Arc<UtilizationCache>,
}

impl UtilizationFetcher {
    pub fn new(config: &RoutingConfig, cache: Arc<UtilizationCache>) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            url: format!("{}{}", config.api_base.trim_end_matches('/'), UTILIZATION_PATH),
            timeout: config.fetch_timeout,
            cache,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetches and caches the utilization of `chute_id`.
    ///
    /// Every failure (no key, timeout, transport, status, unknown payload) is
    /// logged and reported as `None`.
    pub async fn fetch(&self, chute_id: &str) -> Option<f64> {
        let api_key = match &self.api_key {
            Some(key) => key,
            None => {
                warn!("No Chutes API key available for chute {}", chute_id);
                return None;
            }
        };

        match self.request(api_key, chute_id).await {
            Ok(utilization) => {
                self.cache.put(chute_id, utilization);
                info!("Fetched utilization for {}: {}", chute_id, utilization);
                Some(utilization)
            }
            Err(e @ FetchError::Shape(_)) => {
                warn!("Could not parse utilization for {}: {}", chute_id, e);
                None
            }
            Err(e) => {
                error!("Error fetching utilization for {}: {}", chute_id, e);
                None
            }
        }
    }

    async fn request(&self, api_key: &str, chute_id: &str) -> Result<f64, FetchError> {
        debug!("Fetching utilization for {} from {}", chute_id, self.url);

        let response = self
            .client
            .get(&self.url)
            .header("X-API-Key", api_key)
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let payload: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Decode(e)
            }
        })?;

        parse_utilization(&payload, chute_id).ok_or_else(|| FetchError::Shape(chute_id.to_string()))
    }

    fn classify(&self, e: reqwest::Error) -> FetchError {
        if e.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::Transport(e)
        }
    }
}
