//! Per-claw environment file, restarts and logs.
//!
//! The agent reads its settings from an env file inside the container. Owners may only set the
//! keys in [`ALLOWED_ENV_KEYS`]; secrets are masked whenever the file is read back.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument};

use crate::config::RuntimeConfig;
use crate::db::models::deployments::Deployment;
use crate::errors::{Error, Result};
use crate::runtime::{ContainerRuntime, LogsQuery};
use crate::types::abbrev_uuid;

/// Keys the sidecar actually reads. Nothing else may be written.
pub const ALLOWED_ENV_KEYS: &[&str] = &[
    "MODEL_PROVIDER",
    "ANTHROPIC_API_KEY",
    "ANTHROPIC_API_BASE",
    "ANTHROPIC_MODEL",
    "TELEGRAM_BOT",
    "TELEGRAM_CHAT_ID",
];

pub const DEFAULT_LOG_TAIL: u32 = 200;
pub const MAX_LOG_TAIL: u32 = 1000;

/// Parse `KEY=VALUE` lines. Blank lines, `#` comments and lines without a key are skipped.
pub fn parse_env_file(contents: &str) -> BTreeMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match line.split_once('=') {
            Some((key, value)) if !key.is_empty() => Some((key.to_string(), value.to_string())),
            _ => None,
        })
        .collect()
}

pub fn is_sensitive(key: &str) -> bool {
    let upper = key.to_ascii_uppercase();
    ["KEY", "TOKEN", "SECRET"].iter().any(|needle| upper.contains(needle))
}

/// `****` for short values, otherwise the first and last four characters around asterisks.
pub fn mask_value(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}{}{tail}", "*".repeat(chars.len() - 8))
}

pub fn mask_env(vars: BTreeMap<String, String>) -> BTreeMap<String, String> {
    vars.into_iter()
        .map(|(key, value)| {
            let value = if is_sensitive(&key) { mask_value(&value) } else { value };
            (key, value)
        })
        .collect()
}

/// Reject the whole map if any key is outside the allowlist or any value spans lines.
pub fn validate_env_keys(vars: &HashMap<String, String>) -> Result<()> {
    let sorted: BTreeMap<&String, &String> = vars.iter().collect();
    if let Some(key) = sorted.keys().find(|key| !ALLOWED_ENV_KEYS.contains(&key.as_str())) {
        return Err(Error::Unprocessable {
            message: format!("Environment variable \"{key}\" is not allowed"),
        });
    }
    // One variable per line
    if let Some((key, _)) = sorted.iter().find(|(_, value)| value.contains(['\n', '\r'])) {
        return Err(Error::Unprocessable {
            message: format!("Environment variable \"{key}\" must not contain line breaks"),
        });
    }
    Ok(())
}

/// Sorted `KEY=VALUE` lines, omitting empty values.
pub fn render_env_file(vars: &HashMap<String, String>) -> String {
    let sorted: BTreeMap<&String, &String> = vars.iter().filter(|(_, value)| !value.is_empty()).collect();
    sorted.into_iter().map(|(key, value)| format!("{key}={value}\n")).collect()
}

/// Clamp a requested tail into `1..=MAX_LOG_TAIL`, defaulting when absent or zero.
pub fn log_tail(requested: Option<u32>) -> u32 {
    match requested {
        None | Some(0) => DEFAULT_LOG_TAIL,
        Some(n) => n.min(MAX_LOG_TAIL),
    }
}

/// Drives environment and log operations for a deployment's container
#[derive(Clone)]
pub struct EnvironmentManager {
    runtime: Arc<dyn ContainerRuntime>,
    config: RuntimeConfig,
}

impl EnvironmentManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: RuntimeConfig) -> Self {
        Self { runtime, config }
    }

    fn container<'a>(&self, deployment: &'a Deployment) -> Result<&'a str> {
        if deployment.container_ref.is_empty() {
            return Err(Error::ContainerNotRunning {
                id: deployment.id.to_string(),
            });
        }
        Ok(&deployment.container_ref)
    }

    /// Current env vars with sensitive values masked
    #[instrument(skip_all, fields(claw = %abbrev_uuid(&deployment.id)), err)]
    pub async fn read_env(&self, deployment: &Deployment) -> Result<BTreeMap<String, String>> {
        let container = self.container(deployment)?;
        let path = self.config.env_path();
        let output = self.runtime.exec(container, &["cat", path.as_str()]).await?;
        Ok(mask_env(parse_env_file(&String::from_utf8_lossy(&output))))
    }

    /// Replace the env file, optionally restarting the container afterwards
    #[instrument(skip_all, fields(claw = %abbrev_uuid(&deployment.id), restart = restart), err)]
    pub async fn write_env(&self, deployment: &Deployment, vars: &HashMap<String, String>, restart: bool) -> Result<()> {
        let container = self.container(deployment)?;
        validate_env_keys(vars)?;

        let contents = render_env_file(vars);
        self.runtime
            .copy_file_in(container, &self.config.env_dir, &self.config.env_file, contents.as_bytes())
            .await?;
        info!(keys = vars.len(), "Wrote claw environment");

        if restart {
            self.restart(deployment).await?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(claw = %abbrev_uuid(&deployment.id)), err)]
    pub async fn restart(&self, deployment: &Deployment) -> Result<()> {
        let container = self.container(deployment)?;
        self.runtime.restart(container, self.config.restart_grace).await?;
        info!("Restarted claw container");
        Ok(())
    }

    #[instrument(skip_all, fields(claw = %abbrev_uuid(&deployment.id)), err)]
    pub async fn logs(&self, deployment: &Deployment, tail: Option<u32>, since: Option<DateTime<Utc>>) -> Result<String> {
        let container = self.container(deployment)?;
        let output = self
            .runtime
            .logs(
                container,
                LogsQuery {
                    tail: log_tail(tail),
                    since,
                },
            )
            .await?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }
}
