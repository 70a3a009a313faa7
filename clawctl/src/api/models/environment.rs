//! API models for per-claw environment, restart and logs.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Current env file contents. Values of sensitive keys are masked.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct EnvResponse {
    pub vars: BTreeMap<String, String>,
}

/// Replace the env file. Keys must be on the allow-list; empty values are dropped.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct EnvUpdate {
    pub vars: HashMap<String, String>,
    /// Restart the container after writing so the agent picks up the change
    #[serde(default)]
    pub restart: bool,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LogsQuery {
    /// Trailing lines, 1-1000 (default 200; larger values are clamped)
    pub tail: Option<u32>,
    /// Only lines emitted after this instant
    pub since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogsResponse {
    pub logs: String,
}
