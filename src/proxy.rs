use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error, info, warn};
use pingora_core::upstreams::peer::HttpPeer;
use pingora_core::Result;
use pingora_http::{RequestHeader, ResponseHeader};
use pingora_proxy::{ProxyHttp, Session};
use reqwest::Url;
use std::sync::Arc;
use uuid::Uuid;

use crate::deployment::Deployment;
use crate::router::ModelRouter;

/// Header a client can use to pick the model group.
pub const MODEL_HEADER: &str = "x-model";

pub struct ChutesProxy {
    pub router: Arc<ModelRouter>,
    pub default_model: String,
    pub master_key: Option<String>,
    pub ssl_enabled: bool,
}

/// Per-request routing state.
#[derive(Default)]
pub struct RouteCtx {
    pub deployment: Option<Deployment>,
    pub upstream: Option<Upstream>,
    pub body: Vec<u8>,
    pub rewrite_body: bool,
}

/// Where a deployment's `api_base` points.
#[derive(Clone, Debug, PartialEq)]
pub struct Upstream {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    pub base_path: String,
}

impl Upstream {
    pub fn from_api_base(api_base: &str) -> Option<Self> {
        let url = Url::parse(api_base).ok()?;
        let host = url.host_str()?.to_string();
        let port = url.port_or_known_default()?;
        Some(Self {
            host,
            port,
            tls: url.scheme() == "https",
            base_path: url.path().trim_end_matches('/').to_string(),
        })
    }

    /// `/v1/chat/completions` against a `/v1` base stays `/v1/chat/completions`;
    /// against `/api/v1` it becomes `/api/v1/chat/completions`.
    pub fn rewrite_path(&self, path_and_query: &str) -> String {
        let rest = path_and_query.strip_prefix("/v1").unwrap_or(path_and_query);
        let rest = if rest.is_empty() || rest.starts_with('?') {
            format!("/{}", rest)
        } else {
            rest.to_string()
        };
        format!("{}{}", self.base_path, rest)
    }
}

/// Replaces the `model` field of a JSON request body. Non-JSON bodies pass
/// through untouched.
pub fn rewrite_model(body: &[u8], model: &str) -> Vec<u8> {
    let mut json: serde_json::Value = match serde_json::from_slice(body) {
        Ok(json) => json,
        Err(_) => return body.to_vec(),
    };
    match json.as_object_mut() {
        Some(object) => {
            object.insert("model".to_string(), serde_json::Value::String(model.to_string()));
            serde_json::to_vec(&json).unwrap_or_else(|_| body.to_vec())
        }
        None => body.to_vec(),
    }
}

impl ChutesProxy {
    fn authorized(&self, session: &Session) -> bool {
        let key = match &self.master_key {
            Some(key) => key,
            None => return true,
        };
        session
            .req_header()
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map_or(false, |token| token == key)
    }

    fn requested_model(&self, session: &Session) -> String {
        session
            .req_header()
            .headers
            .get(MODEL_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| self.default_model.clone())
    }
}

#[async_trait]
impl ProxyHttp for ChutesProxy {
    type CTX = RouteCtx;

    fn new_ctx(&self) -> Self::CTX {
        RouteCtx::default()
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        if !self.authorized(session) {
            warn!("🚫 Rejected request without a valid master key");
            let _ = session.respond_error(401).await;
            return Ok(true);
        }

        let model = self.requested_model(session);
        let deployment = match self.router.route(&model).await {
            Some(deployment) => deployment,
            None => {
                error!("🚨 No deployments available for {}", model);
                let _ = session.respond_error(503).await;
                return Ok(true);
            }
        };

        let api_base = deployment.litellm_params.api_base.as_deref().unwrap_or_default();
        let upstream = match Upstream::from_api_base(api_base) {
            Some(upstream) => upstream,
            None => {
                error!(
                    "🚨 Deployment {} has no usable api_base ({:?})",
                    deployment.model_name, api_base
                );
                let _ = session.respond_error(502).await;
                return Ok(true);
            }
        };

        if session.req_header().headers.get("X-Request-Id").is_none() {
            session
                .req_header_mut()
                .insert_header("X-Request-Id", Uuid::new_v4().to_string())?;
        }
        let proto = if self.ssl_enabled { "https" } else { "http" };
        session.req_header_mut().insert_header("X-Forwarded-Proto", proto)?;

        info!(
            "{} {} -> {} ({})",
            session.req_header().method,
            session.req_header().uri,
            deployment.upstream_model(),
            deployment.chute_id().unwrap_or_default()
        );

        ctx.rewrite_body = session.req_header().method == "POST";
        ctx.upstream = Some(upstream);
        ctx.deployment = Some(deployment);
        Ok(false)
    }

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        match &ctx.upstream {
            Some(upstream) => Ok(Box::new(HttpPeer::new(
                format!("{}:{}", upstream.host, upstream.port),
                upstream.tls,
                upstream.host.clone(),
            ))),
            None => {
                error!("🚨 No upstream selected for request");
                Err(pingora_core::Error::new_str("No deployment selected"))
            }
        }
    }

    async fn upstream_request_filter(
        &self,
        session: &mut Session,
        upstream_request: &mut RequestHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        let (deployment, upstream) = match (&ctx.deployment, &ctx.upstream) {
            (Some(deployment), Some(upstream)) => (deployment, upstream),
            _ => return Ok(()),
        };

        let path_and_query = session
            .req_header()
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());
        let path = upstream.rewrite_path(&path_and_query);
        upstream_request.set_uri(
            path.parse()
                .map_err(|_| pingora_core::Error::new_str("Invalid upstream path"))?,
        );

        upstream_request.insert_header("Host", upstream.host.clone())?;
        match deployment.litellm_params.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => {
                upstream_request.insert_header("Authorization", format!("Bearer {}", key))?
            }
            None => {
                upstream_request.remove_header("Authorization");
            }
        }

        if ctx.rewrite_body {
            upstream_request.remove_header("Content-Length");
            upstream_request.insert_header("Transfer-Encoding", "chunked")?;
        }
        Ok(())
    }

    async fn request_body_filter(
        &self,
        _session: &mut Session,
        body: &mut Option<Bytes>,
        end_of_stream: bool,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        if !ctx.rewrite_body {
            return Ok(());
        }
        if let Some(chunk) = body.take() {
            ctx.body.extend_from_slice(&chunk);
        }
        if end_of_stream {
            if let Some(deployment) = &ctx.deployment {
                let rewritten = rewrite_model(&ctx.body, deployment.upstream_model());
                debug!(
                    "Forwarding {} byte body to {}",
                    rewritten.len(),
                    deployment.upstream_model()
                );
                *body = Some(Bytes::from(rewritten));
            }
        }
        Ok(())
    }

    async fn response_filter(
        &self,
        _session: &mut Session,
        upstream_response: &mut ResponseHeader,
        ctx: &mut Self::CTX,
    ) -> Result<()> {
        if let Some(chute_id) = ctx.deployment.as_ref().and_then(Deployment::chute_id) {
            upstream_response.insert_header("X-Chute-Id", chute_id)?;
        }
        Ok(())
    }
}
