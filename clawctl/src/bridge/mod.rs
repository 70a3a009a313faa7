//! Client for the per-container bridge sidecar.
//!
//! Every claw runs a small HTTP service next to the agent. It accepts a chat turn either
//! synchronously (`POST /msg`) or as a Server-Sent-Event stream (`POST /msg/stream`).
//! The sidecar is addressed by container reference on a fixed internal port.

pub mod sse;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::config::BridgeConfig;
use crate::types::abbrev_container;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("bridge returned HTTP {0}")]
    Status(u16),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("no response from agent")]
    EmptyReply,
}

/// Request body shared by both endpoints
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BridgeRequest<'a> {
    pub user_id: &'a str,
    pub username: &'a str,
    pub text: &'a str,
    pub protocol: &'a str,
}

/// Reply to a synchronous turn
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BridgeReply {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub type ByteStream = BoxStream<'static, Result<Bytes, BridgeError>>;

#[async_trait]
pub trait Bridge: Send + Sync {
    /// Send one chat turn and wait for the agent's reply.
    ///
    /// A non-empty `error` or an empty `text` in the reply is a failure.
    async fn send(&self, container_ref: &str, user_id: &str, text: &str) -> Result<BridgeReply, BridgeError>;

    /// Open a streaming turn. The returned stream yields the raw `text/event-stream` body and
    /// is torn down when dropped.
    async fn stream(&self, container_ref: &str, user_id: &str, text: &str) -> Result<ByteStream, BridgeError>;
}

#[derive(Debug, Clone)]
pub struct HttpBridge {
    /// Bounded client for synchronous turns
    client: reqwest::Client,
    /// No client-side timeout; lifetime is governed by the caller
    stream_client: reqwest::Client,
    port: u16,
    protocol: String,
}

impl HttpBridge {
    pub fn new(config: &BridgeConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(config.timeout).build()?,
            stream_client: reqwest::Client::builder().build()?,
            port: config.port,
            protocol: config.protocol.clone(),
        })
    }

    pub fn base_url(&self, container_ref: &str) -> String {
        format!("http://{}:{}", container_ref, self.port)
    }

    fn request<'a>(&'a self, user_id: &'a str, text: &'a str) -> BridgeRequest<'a> {
        BridgeRequest {
            user_id,
            username: user_id,
            text,
            protocol: &self.protocol,
        }
    }
}

/// Validate a synchronous reply
pub fn into_result(reply: BridgeReply) -> Result<BridgeReply, BridgeError> {
    if let Some(error) = reply.error.as_deref()
        && !error.is_empty()
    {
        return Err(BridgeError::Agent(error.to_string()));
    }
    if reply.text.is_empty() {
        return Err(BridgeError::EmptyReply);
    }
    Ok(reply)
}

#[async_trait]
impl Bridge for HttpBridge {
    #[instrument(skip(self, text), fields(container = %abbrev_container(container_ref)), err)]
    async fn send(&self, container_ref: &str, user_id: &str, text: &str) -> Result<BridgeReply, BridgeError> {
        let response = self
            .client
            .post(format!("{}/msg", self.base_url(container_ref)))
            .json(&self.request(user_id, text))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BridgeError::Status(response.status().as_u16()));
        }

        into_result(response.json::<BridgeReply>().await?)
    }

    #[instrument(skip(self, text), fields(container = %abbrev_container(container_ref)), err)]
    async fn stream(&self, container_ref: &str, user_id: &str, text: &str) -> Result<ByteStream, BridgeError> {
        let response = self
            .stream_client
            .post(format!("{}/msg/stream", self.base_url(container_ref)))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&self.request(user_id, text))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BridgeError::Status(response.status().as_u16()));
        }

        Ok(response.bytes_stream().map(|chunk| chunk.map_err(BridgeError::from)).boxed())
    }
}
