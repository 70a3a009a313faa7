//! API request and response models for claw management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::deployments::{Deployment, DeploymentStatus, Tier};
use crate::errors::{Error, Result};
use crate::types::{ClawId, OwnerId};

pub const MAX_NAME_LEN: usize = 50;
pub const MAX_HEARTBEAT_INSTRUCTION_LEN: usize = 2000;
/// Heartbeat cadences an owner may pick, in minutes; 0 turns heartbeats off
pub const HEARTBEAT_INTERVALS: [i32; 6] = [0, 15, 30, 60, 360, 1440];

/// Request to deploy a new claw.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ClawCreate {
    /// Display name, 1-50 characters after trimming
    pub name: String,
    /// Service tier: `lite` (default), `pro` or `max`
    #[serde(default)]
    pub tier: Option<String>,
}

impl ClawCreate {
    /// Normalise and validate, returning the trimmed name and resolved tier
    pub fn validate(&self) -> Result<(String, Tier)> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(Error::Unprocessable {
                message: "Name is required".to_string(),
            });
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(Error::Unprocessable {
                message: format!("Name must be at most {MAX_NAME_LEN} characters"),
            });
        }

        let tier = match self.tier.as_deref().map(str::trim) {
            None | Some("") => Tier::default(),
            Some(tier) => tier.parse::<Tier>().map_err(|message| Error::Unprocessable { message })?,
        };

        Ok((name.to_string(), tier))
    }
}

/// Partial update of owner-editable settings. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct ClawUpdate {
    #[serde(default)]
    pub is_public: Option<bool>,
    /// Minutes between heartbeats: 0 (off), 15, 30, 60, 360 or 1440
    #[serde(default)]
    pub heartbeat_interval_minutes: Option<i32>,
    /// Sent with every heartbeat, at most 2000 characters
    #[serde(default)]
    pub heartbeat_instruction: Option<String>,
}

impl ClawUpdate {
    /// Validate every field, then apply them all. Nothing is applied if any field is invalid.
    pub fn apply(self, deployment: &mut Deployment) -> Result<()> {
        if let Some(interval) = self.heartbeat_interval_minutes
            && !HEARTBEAT_INTERVALS.contains(&interval)
        {
            return Err(Error::Unprocessable {
                message: format!("heartbeat_interval_minutes must be one of {HEARTBEAT_INTERVALS:?}, got {interval}"),
            });
        }
        if let Some(ref instruction) = self.heartbeat_instruction
            && instruction.chars().count() > MAX_HEARTBEAT_INSTRUCTION_LEN
        {
            return Err(Error::Unprocessable {
                message: format!("heartbeat_instruction must be at most {MAX_HEARTBEAT_INSTRUCTION_LEN} characters"),
            });
        }

        if let Some(is_public) = self.is_public {
            deployment.is_public = is_public;
        }
        if let Some(interval) = self.heartbeat_interval_minutes {
            deployment.heartbeat_interval_minutes = interval;
        }
        if let Some(instruction) = self.heartbeat_instruction {
            deployment.heartbeat_instruction = instruction;
        }
        Ok(())
    }
}

/// A claw as seen by its owner. The proxy token is never returned here.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClawResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ClawId,
    pub owner_id: OwnerId,
    pub name: String,
    #[schema(value_type = String, example = "running")]
    pub status: DeploymentStatus,
    #[schema(value_type = String, example = "lite")]
    pub tier: Tier,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub container_ref: String,
    pub is_public: bool,
    pub heartbeat_interval_minutes: i32,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub heartbeat_instruction: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trial_ends_at: Option<DateTime<Utc>>,
    pub paid: bool,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub error_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Deployment> for ClawResponse {
    fn from(d: Deployment) -> Self {
        Self {
            id: d.id,
            owner_id: d.owner_id,
            name: d.name,
            status: d.status,
            tier: d.tier,
            container_ref: d.container_ref,
            is_public: d.is_public,
            heartbeat_interval_minutes: d.heartbeat_interval_minutes,
            heartbeat_instruction: d.heartbeat_instruction,
            last_heartbeat_at: d.last_heartbeat_at,
            trial_ends_at: d.trial_ends_at,
            paid: d.paid,
            error_message: d.error_message,
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClawListResponse {
    pub claws: Vec<ClawResponse>,
    pub total: usize,
}
