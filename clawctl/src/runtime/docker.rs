//! [`ContainerRuntime`] backed by the Docker Engine HTTP API.

use super::{ContainerRuntime, LogsQuery, RuntimeError, archive, frames};
use crate::config::RuntimeConfig;
use crate::types::abbrev_container;
use async_trait::async_trait;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

const ENV_FILE_MODE: u32 = 0o644;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ExecCreated {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Clone)]
pub struct DockerRuntime {
    client: reqwest::Client,
    base_url: Url,
    api_version: Option<String>,
}

impl DockerRuntime {
    pub fn new(config: &RuntimeConfig) -> anyhow::Result<Self> {
        if config.docker_url.cannot_be_a_base() {
            anyhow::bail!("runtime.docker_url {} cannot be used as a base URL", config.docker_url);
        }

        let client = reqwest::Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            client,
            base_url: config.docker_url.clone(),
            api_version: config.api_version.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            if let Some(version) = &self.api_version {
                path.push(version);
            }
            path.extend(segments);
        }
        url
    }

    /// Map non-success responses onto [`RuntimeError`]
    async fn check(response: Response, container_ref: &str) -> Result<Response, RuntimeError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(RuntimeError::NotFound(container_ref.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or(body);
        Err(RuntimeError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    #[instrument(skip(self), fields(container = %abbrev_container(container_ref)), err)]
    async fn remove(&self, container_ref: &str) -> Result<(), RuntimeError> {
        let mut url = self.endpoint(&["containers", container_ref]);
        url.query_pairs_mut().append_pair("force", "true");

        let response = self.client.delete(url).send().await?;
        Self::check(response, container_ref).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(container = %abbrev_container(container_ref)), err)]
    async fn restart(&self, container_ref: &str, grace: Duration) -> Result<(), RuntimeError> {
        let mut url = self.endpoint(&["containers", container_ref, "restart"]);
        url.query_pairs_mut().append_pair("t", &grace.as_secs().to_string());

        let response = self.client.post(url).send().await?;
        Self::check(response, container_ref).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(container = %abbrev_container(container_ref)), err)]
    async fn exec(&self, container_ref: &str, cmd: &[&str]) -> Result<Vec<u8>, RuntimeError> {
        let create = self
            .client
            .post(self.endpoint(&["containers", container_ref, "exec"]))
            .json(&json!({
                "AttachStdout": true,
                "AttachStderr": true,
                "Tty": false,
                "Cmd": cmd,
            }))
            .send()
            .await?;
        let created: ExecCreated = Self::check(create, container_ref).await?.json().await?;
        debug!(exec_id = %created.id, "Created exec instance");

        let start = self
            .client
            .post(self.endpoint(&["exec", &created.id, "start"]))
            .json(&json!({ "Detach": false, "Tty": false }))
            .send()
            .await?;
        let raw = Self::check(start, container_ref).await?.bytes().await?;

        Ok(frames::demux(&raw))
    }

    #[instrument(skip(self, contents), fields(container = %abbrev_container(container_ref), bytes = contents.len()), err)]
    async fn copy_file_in(&self, container_ref: &str, dir: &str, file_name: &str, contents: &[u8]) -> Result<(), RuntimeError> {
        let tar = archive::single_file(file_name, contents, ENV_FILE_MODE, chrono::Utc::now().timestamp())?;

        let mut url = self.endpoint(&["containers", container_ref, "archive"]);
        url.query_pairs_mut().append_pair("path", dir);

        let response = self
            .client
            .put(url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-tar")
            .body(tar)
            .send()
            .await?;
        Self::check(response, container_ref).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(container = %abbrev_container(container_ref)), err)]
    async fn logs(&self, container_ref: &str, query: LogsQuery) -> Result<Vec<u8>, RuntimeError> {
        let mut url = self.endpoint(&["containers", container_ref, "logs"]);
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("stdout", "true")
                .append_pair("stderr", "true")
                .append_pair("tail", &query.tail.to_string());
            if let Some(since) = query.since {
                pairs.append_pair("since", &since.timestamp().to_string());
            }
        }

        let response = self.client.get(url).send().await?;
        let raw = Self::check(response, container_ref).await?.bytes().await?;

        Ok(frames::demux(&raw))
    }
}
