//! Quota-enforcing inference gateway.
//!
//! Claws never hold a real upstream credential. Each one is handed a proxy token and calls
//! `POST /llm/v1/messages`; the gateway resolves the token to a running deployment, applies
//! the tier's rolling-window and monthly limits, then forwards the body verbatim with the
//! gateway's own key. Upstream responses, errors included, are passed back unchanged.
//!
//! Usage is parsed from the response and written on a detached task, so accounting never
//! turns a successful inference call into a failure.
//!
//! Rejections use the upstream API's error envelope so agent SDKs surface them naturally:
//!
//! ```json
//! {"type": "error", "error": {"type": "rate_limit_error", "message": "..."}}
//! ```

pub mod quota;
pub mod retention;

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use crate::AppState;
use crate::db::errors::DbError;
use crate::db::handlers::UsageStore;
use crate::db::models::deployments::Tier;
use crate::db::models::usage::UsageCreateDBRequest;
use crate::metrics;
use crate::types::{ClawId, abbrev_uuid};

/// Header carrying the caller's proxy token, and the upstream key on the way out
pub const API_KEY_HEADER: &str = "x-api-key";
pub const API_VERSION_HEADER: &str = "anthropic-version";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Missing x-api-key header")]
    MissingToken,

    #[error("Invalid proxy token")]
    InvalidToken,

    #[error("Rate limit exceeded. Please wait before making more requests.")]
    RateLimited,

    #[error("Monthly token quota exceeded. Upgrade your plan or wait for next billing cycle.")]
    QuotaExceeded,

    #[error("Request body exceeds {limit} bytes")]
    RequestTooLarge { limit: usize },

    #[error("LLM proxy not configured")]
    NotConfigured,

    #[error("Failed to reach LLM upstream")]
    Upstream(#[source] reqwest::Error),

    #[error("Upstream response exceeds {limit} bytes")]
    ResponseTooLarge { limit: usize },

    #[error("Failed to check quota")]
    Store(#[from] DbError),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::MissingToken | GatewayError::InvalidToken => StatusCode::UNAUTHORIZED,
            GatewayError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::QuotaExceeded => StatusCode::FORBIDDEN,
            GatewayError::RequestTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::NotConfigured | GatewayError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Upstream(_) | GatewayError::ResponseTooLarge { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// `error.type` in the envelope
    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::MissingToken | GatewayError::InvalidToken => "authentication_error",
            GatewayError::RateLimited => "rate_limit_error",
            GatewayError::QuotaExceeded => "permission_error",
            GatewayError::RequestTooLarge { .. } => "request_too_large",
            GatewayError::NotConfigured
            | GatewayError::Upstream(_)
            | GatewayError::ResponseTooLarge { .. }
            | GatewayError::Store(_) => "api_error",
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            GatewayError::MissingToken | GatewayError::InvalidToken => "unauthenticated",
            GatewayError::RateLimited => "rate_limited",
            GatewayError::QuotaExceeded => "quota_exceeded",
            GatewayError::RequestTooLarge { .. } => "request_too_large",
            GatewayError::NotConfigured => "not_configured",
            GatewayError::Upstream(_) | GatewayError::ResponseTooLarge { .. } => "upstream_failure",
            GatewayError::Store(_) => "store_failure",
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match &self {
            GatewayError::NotConfigured | GatewayError::Store(_) => error!("Gateway error: {:#}", self),
            GatewayError::Upstream(e) => warn!("Gateway upstream failure: {}", e),
            GatewayError::ResponseTooLarge { .. } => warn!("Gateway error: {}", self),
            _ => debug!("Gateway rejected request: {}", self),
        }
        metrics::record_gateway_rejection(self.reason());

        let body = json!({
            "type": "error",
            "error": {
                "type": self.error_type(),
                "message": self.to_string(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct UsageCounts {
    #[serde(default)]
    input_tokens: i64,
    #[serde(default)]
    output_tokens: i64,
}

#[derive(Debug, Deserialize)]
struct UsageEnvelope {
    #[serde(default)]
    usage: Option<UsageCounts>,
    #[serde(default)]
    model: String,
}

/// Extract billable usage from an upstream response body.
///
/// Non-JSON bodies and responses reporting zero tokens (typically errors) yield `None`.
pub fn parse_usage(deployment_id: ClawId, body: &[u8]) -> Option<UsageCreateDBRequest> {
    let envelope: UsageEnvelope = serde_json::from_slice(body).ok()?;
    let usage = envelope.usage.unwrap_or_default();
    if usage.input_tokens == 0 && usage.output_tokens == 0 {
        return None;
    }
    Some(UsageCreateDBRequest {
        deployment_id,
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        model: envelope.model,
    })
}

async fn record_usage(usage: Arc<dyn UsageStore>, deployment_id: ClawId, tier: Tier, body: Bytes) {
    let Some(request) = parse_usage(deployment_id, &body) else {
        return;
    };
    let tokens = request.input_tokens + request.output_tokens;
    match usage.record(&request).await {
        Ok(_) => metrics::record_usage_written(tier.to_db_string(), tokens),
        Err(e) => {
            metrics::record_usage_write_failure();
            warn!(claw = %abbrev_uuid(&deployment_id), "Failed to record inference usage: {}", e);
        }
    }
}

async fn read_bounded(response: reqwest::Response, limit: usize) -> Result<Bytes, GatewayError> {
    let mut buffer = BytesMut::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(GatewayError::Upstream)?;
        if buffer.len() + chunk.len() > limit {
            return Err(GatewayError::ResponseTooLarge { limit });
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

/// `POST /llm/v1/messages`
#[instrument(skip_all, fields(claw = tracing::field::Empty))]
pub async fn proxy_messages(State(state): State<AppState>, headers: HeaderMap, body: Body) -> Result<Response, GatewayError> {
    let token = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or(GatewayError::MissingToken)?;

    let deployment = state
        .deployments
        .get_running_by_proxy_token(token)
        .await?
        .ok_or(GatewayError::InvalidToken)?;
    tracing::Span::current().record("claw", abbrev_uuid(&deployment.id));

    quota::enforce(state.usage.as_ref(), &deployment, Utc::now()).await?;

    let gateway = &state.config.gateway;
    let payload = axum::body::to_bytes(body, gateway.max_request_bytes)
        .await
        .map_err(|_| GatewayError::RequestTooLarge {
            limit: gateway.max_request_bytes,
        })?;

    let upstream_url = gateway.upstream_url.as_ref().ok_or(GatewayError::NotConfigured)?;
    let url = format!("{}/v1/messages", upstream_url.as_str().trim_end_matches('/'));

    let mut request = state
        .upstream
        .post(url)
        .timeout(gateway.timeout)
        .header(header::CONTENT_TYPE, "application/json")
        .header(API_KEY_HEADER, gateway.upstream_key.as_deref().unwrap_or_default())
        .body(payload);
    if let Some(version) = headers.get(API_VERSION_HEADER) {
        request = request.header(API_VERSION_HEADER, version.clone());
    }

    let response = request.send().await.map_err(GatewayError::Upstream)?;
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| header::HeaderValue::from_static("application/json"));
    let response_body = read_bounded(response, gateway.max_response_bytes).await?;

    metrics::record_gateway_forward(status.as_u16());
    info!(status = status.as_u16(), bytes = response_body.len(), "Forwarded inference call");

    tokio::spawn(record_usage(
        state.usage.clone(),
        deployment.id,
        deployment.tier,
        response_body.clone(),
    ));

    Ok((status, [(header::CONTENT_TYPE, content_type)], response_body).into_response())
}
