//! Store models for claw deployments.

use crate::types::{ClawId, OwnerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Queued,
    Provisioning,
    Running,
    Failed,
    Stopped,
}

impl DeploymentStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            DeploymentStatus::Queued => "queued",
            DeploymentStatus::Provisioning => "provisioning",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::Stopped => "stopped",
        }
    }

    pub fn from_db_string(s: &str) -> DeploymentStatus {
        match s {
            "queued" => DeploymentStatus::Queued,
            "provisioning" => DeploymentStatus::Provisioning,
            "running" => DeploymentStatus::Running,
            "stopped" => DeploymentStatus::Stopped,
            // Anything unrecognised is treated as a failed deployment so it never reaches the gateway
            _ => DeploymentStatus::Failed,
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// Service tier, which determines inference quota limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Lite,
    Pro,
    Max,
}

impl Tier {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Tier::Lite => "lite",
            Tier::Pro => "pro",
            Tier::Max => "max",
        }
    }

    /// Unknown tiers fall back to the lowest tier, never to something more generous.
    pub fn from_db_string(s: &str) -> Tier {
        s.parse().unwrap_or(Tier::Lite)
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lite" => Ok(Tier::Lite),
            "pro" => Ok(Tier::Pro),
            "max" => Ok(Tier::Max),
            other => Err(format!("Unknown tier \"{other}\". Expected one of: lite, pro, max")),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_db_string())
    }
}

/// A single claw deployment.
///
/// Writers follow read-then-write-whole-record semantics: load, mutate fields, then
/// [`save`](crate::db::handlers::DeploymentStore::save) the whole record back.
#[derive(Debug, Clone, PartialEq)]
pub struct Deployment {
    pub id: ClawId,
    pub owner_id: OwnerId,
    pub name: String,
    pub status: DeploymentStatus,
    /// Runtime-assigned container identifier; empty until provisioning succeeds
    pub container_ref: String,
    pub tier: Tier,
    pub is_public: bool,
    /// 0 disables heartbeats
    pub heartbeat_interval_minutes: i32,
    pub heartbeat_instruction: String,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// `None` means no trial enforcement applies
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub trial_warned: bool,
    pub paid: bool,
    pub proxy_token: String,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    pub fn is_running(&self) -> bool {
        self.status == DeploymentStatus::Running
    }

    pub fn has_container(&self) -> bool {
        !self.container_ref.is_empty()
    }
}

/// Request for creating a new deployment record
#[derive(Debug, Clone)]
pub struct DeploymentCreateDBRequest {
    pub owner_id: OwnerId,
    pub name: String,
    pub tier: Tier,
    pub proxy_token: String,
    pub trial_ends_at: Option<DateTime<Utc>>,
}

/// Raw row shape of the `claw_deployments` table
#[derive(Debug, Clone, FromRow)]
pub struct DeploymentRow {
    pub id: ClawId,
    pub owner_id: String,
    pub name: String,
    pub status: String,
    pub container_ref: String,
    pub tier: String,
    pub is_public: bool,
    pub heartbeat_interval_minutes: i32,
    pub heartbeat_instruction: String,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub trial_warned: bool,
    pub paid: bool,
    pub proxy_token: String,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DeploymentRow> for Deployment {
    fn from(row: DeploymentRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            name: row.name,
            status: DeploymentStatus::from_db_string(&row.status),
            container_ref: row.container_ref,
            tier: Tier::from_db_string(&row.tier),
            is_public: row.is_public,
            heartbeat_interval_minutes: row.heartbeat_interval_minutes,
            heartbeat_instruction: row.heartbeat_instruction,
            last_heartbeat_at: row.last_heartbeat_at,
            trial_ends_at: row.trial_ends_at,
            trial_warned: row.trial_warned,
            paid: row.paid,
            proxy_token: row.proxy_token,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tier_falls_back_to_lite() {
        assert_eq!(Tier::from_db_string("enterprise"), Tier::Lite);
        assert_eq!(Tier::from_db_string(""), Tier::Lite);
        assert_eq!(Tier::from_db_string("max"), Tier::Max);
    }

    #[test]
    fn test_strict_tier_parse_names_value() {
        let err = "gold".parse::<Tier>().unwrap_err();
        assert!(err.contains("gold"));
    }

    #[test]
    fn test_status_db_strings() {
        for status in [
            DeploymentStatus::Queued,
            DeploymentStatus::Provisioning,
            DeploymentStatus::Running,
            DeploymentStatus::Failed,
            DeploymentStatus::Stopped,
        ] {
            assert_eq!(DeploymentStatus::from_db_string(status.to_db_string()), status);
        }
        assert_eq!(DeploymentStatus::from_db_string("exploded"), DeploymentStatus::Failed);
    }
}
