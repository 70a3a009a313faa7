//! Container runtime abstraction.
//!
//! The controller never schedules containers; it only needs a handful of operations against
//! containers that already exist. [`ContainerRuntime`] is the seam, and [`DockerRuntime`] talks
//! to the Docker Engine HTTP API. Exec and log output is demultiplexed inside the adapter (see
//! [`frames`]), so callers always receive plain bytes.

pub mod archive;
pub mod docker;
pub mod frames;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub use docker::DockerRuntime;

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("container {0} not found")]
    NotFound(String),

    #[error("runtime API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("runtime unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Archive(#[from] archive::ArchiveError),
}

/// Parameters for a log fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogsQuery {
    /// Number of trailing lines
    pub tail: u32,
    pub since: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Force-remove a container, killing it if running
    async fn remove(&self, container_ref: &str) -> Result<(), RuntimeError>;

    /// Restart, allowing `grace` for a clean stop before the container is killed
    async fn restart(&self, container_ref: &str, grace: Duration) -> Result<(), RuntimeError>;

    /// Run a command and capture its combined, demultiplexed output
    async fn exec(&self, container_ref: &str, cmd: &[&str]) -> Result<Vec<u8>, RuntimeError>;

    /// Write a single file into `dir` inside the container
    async fn copy_file_in(&self, container_ref: &str, dir: &str, file_name: &str, contents: &[u8]) -> Result<(), RuntimeError>;

    /// Fetch trailing log lines, demultiplexed
    async fn logs(&self, container_ref: &str, query: LogsQuery) -> Result<Vec<u8>, RuntimeError>;
}
