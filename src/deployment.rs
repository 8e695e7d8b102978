use serde::Deserialize;

/// One entry of the `model_list` a router is configured with.
///
/// The field names are shared with LiteLLM-style YAML configs and must stay
/// stable: `model_info.chute_id`, `model_info.id`, `litellm_params.model`
/// and `model_name` are read by the selector.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct Deployment {
    #[serde(default)]
    pub model_name: String,
    #[serde(default)]
    pub litellm_params: LitellmParams,
    #[serde(default)]
    pub model_info: ModelInfo,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct LitellmParams {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ModelInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub chute_id: Option<String>,
    #[serde(default)]
    pub order: Option<u32>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl Deployment {
    /// Identifier used for utilization lookups.
    ///
    /// Priority: `model_info.chute_id`, then `model_info.id`, then the last
    /// path segment of `litellm_params.model`.
    pub fn chute_id(&self) -> Option<String> {
        if let Some(id) = non_empty(&self.model_info.chute_id) {
            return Some(id.to_string());
        }
        if let Some(id) = non_empty(&self.model_info.id) {
            return Some(id.to_string());
        }
        let model = self.litellm_params.model.as_str();
        if model.is_empty() {
            return None;
        }
        model
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
    }

    /// Model name sent upstream, without the provider prefix
    /// (`openai/zai-org/GLM-5-TEE` -> `zai-org/GLM-5-TEE`).
    pub fn upstream_model(&self) -> &str {
        let model = self.litellm_params.model.as_str();
        match model.split_once('/') {
            Some((_, rest)) if !rest.is_empty() => rest,
            _ => model,
        }
    }
}

#[cfg(test)]
pub(crate) fn deployment(
    model_name: &str,
    model: &str,
    id: Option<&str>,
    chute_id: Option<&str>,
) -> Deployment {
    Deployment {
        model_name: model_name.to_string(),
        litellm_params: LitellmParams {
            model: model.to_string(),
            api_base: Some("https://llm.chutes.ai/v1".to_string()),
            api_key: None,
        },
        model_info: ModelInfo {
            id: id.map(str::to_string),
            chute_id: chute_id.map(str::to_string),
            order: None,
        },
    }
}
