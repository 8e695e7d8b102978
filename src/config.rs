use log::{info, warn};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::deployment::{Deployment, LitellmParams, ModelInfo};
use crate::error::ConfigError;

pub const DEFAULT_API_BASE: &str = "https://api.chutes.ai";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 30;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MODEL: &str = "chutes-models";
const CHUTES_LLM_BASE: &str = "https://llm.chutes.ai/v1";

/// Settings consumed by the utilization router. Fixed after construction.
#[derive(Clone, Debug, PartialEq)]
pub struct RoutingConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub cache_ttl: Duration,
    pub fetch_timeout: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }
}

impl RoutingConfig {
    /// Reads `CHUTES_API_KEY`, `CHUTES_API_BASE` and `CACHE_TTL`.
    pub fn from_env() -> Self {
        let cache_ttl_secs = env::var("CACHE_TTL")
            .unwrap_or_else(|_| DEFAULT_CACHE_TTL_SECS.to_string())
            .parse()
            .unwrap_or(DEFAULT_CACHE_TTL_SECS);

        Self {
            api_key: load_api_key(),
            api_base: env::var("CHUTES_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            ..Self::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }
}

pub fn load_api_key() -> Option<String> {
    env::var("CHUTES_API_KEY").ok().filter(|k| !k.is_empty())
}

pub fn load_master_key() -> Option<String> {
    env::var("LITELLM_MASTER_KEY").ok().filter(|k| !k.is_empty())
}

pub fn load_default_model() -> String {
    env::var("DEFAULT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string())
}

#[derive(Deserialize)]
struct ConfigFile {
    #[serde(default)]
    model_list: Vec<Deployment>,
}

/// Parses the `model_list` section of a LiteLLM-style YAML file.
pub fn read_model_list(path: &Path) -> Result<Vec<Deployment>, ConfigError> {
    let display = path.display().to_string();
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: display.clone(),
        source,
    })?;
    let file: ConfigFile = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
        path: display,
        source,
    })?;
    Ok(file.model_list)
}

/// Like [`read_model_list`], but falls back to [`default_model_list`] when
/// the file is missing or unreadable.
pub fn load_model_list(path: &Path, api_key: Option<&str>) -> Vec<Deployment> {
    if !path.exists() {
        warn!("⚠️ Config file not found: {}, using defaults", path.display());
        return default_model_list(api_key);
    }

    match read_model_list(path) {
        Ok(list) => {
            info!("📋 Loaded {} models from {}", list.len(), path.display());
            list
        }
        Err(e) => {
            warn!("⚠️ {} (using defaults)", e);
            default_model_list(api_key)
        }
    }
}

/// The Chutes TEE deployments served when no config file is present.
pub fn default_model_list(api_key: Option<&str>) -> Vec<Deployment> {
    [
        ("openai/moonshotai/Kimi-K2.5-TEE", "kimi-k2.5-tee", "chute_kimi_k2.5_tee", 1),
        ("openai/zai-org/GLM-5-TEE", "glm-5-tee", "chute_glm_5_tee", 2),
        ("openai/Qwen/Qwen3.5-397B-A17B-TEE", "qwen3.5-397b-tee", "chute_qwen3.5_397b_tee", 3),
    ]
    .into_iter()
    .map(|(model, id, chute_id, order)| Deployment {
        model_name: DEFAULT_MODEL.to_string(),
        litellm_params: LitellmParams {
            model: model.to_string(),
            api_base: Some(CHUTES_LLM_BASE.to_string()),
            api_key: Some(api_key.unwrap_or_default().to_string()),
        },
        model_info: ModelInfo {
            id: Some(id.to_string()),
            chute_id: Some(chute_id.to_string()),
            order: Some(order),
        },
    })
    .collect()
}

pub fn get_proxy_port(args_proxy_port: Option<u16>) -> u16 {
    args_proxy_port.unwrap_or_else(|| {
        env::var("LITELLM_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(4000)
    })
}

pub fn get_proxy_host(args_host: Option<String>) -> String {
    args_host.unwrap_or_else(|| env::var("LITELLM_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()))
}

pub fn get_config_path(args_config: Option<String>) -> String {
    args_config.unwrap_or_else(|| {
        env::var("LITELLM_CONFIG_PATH").unwrap_or_else(|_| "./litellm-config.yaml".to_string())
    })
}

pub fn is_ssl_enabled() -> bool {
    env::var("SSL")
        .unwrap_or_else(|_| "OFF".to_string())
        .to_uppercase() == "ON"
}

pub fn get_ssl_cert() -> String {
    env::var("SSL_CERT").unwrap_or_else(|_| "ssl/server.pem".to_string())
}

pub fn get_ssl_key() -> String {
    env::var("SSL_KEY").unwrap_or_else(|_| "ssl/server.key".to_string())
}
