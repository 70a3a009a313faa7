//! Models for the internal provisioner API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::models::deployments::{Deployment, DeploymentStatus, Tier};
use crate::errors::{Error, Result};
use crate::types::{ClawId, OwnerId};

/// A deployment waiting for a container. Carries the proxy token the container must be
/// started with.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PendingClaw {
    #[schema(value_type = String, format = "uuid")]
    pub id: ClawId,
    pub owner_id: OwnerId,
    pub name: String,
    #[schema(value_type = String, example = "lite")]
    pub tier: Tier,
    pub proxy_token: String,
    pub created_at: DateTime<Utc>,
}

impl From<Deployment> for PendingClaw {
    fn from(d: Deployment) -> Self {
        Self {
            id: d.id,
            owner_id: d.owner_id,
            name: d.name,
            tier: d.tier,
            proxy_token: d.proxy_token,
            created_at: d.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PendingClawsResponse {
    pub claws: Vec<PendingClaw>,
    pub total: usize,
}

/// Outcome of a provisioning attempt
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ProvisionResult {
    /// `running` or `failed`
    pub status: String,
    #[serde(default)]
    pub container_ref: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ProvisionResult {
    /// Apply the report to a deployment record.
    ///
    /// A `running` report must leave the record with a container reference.
    pub fn apply(self, deployment: &mut Deployment) -> Result<()> {
        let status = match self.status.as_str() {
            "running" => DeploymentStatus::Running,
            "failed" => DeploymentStatus::Failed,
            other => {
                return Err(Error::Unprocessable {
                    message: format!("Status must be 'running' or 'failed', got \"{other}\""),
                });
            }
        };

        let container_ref = self
            .container_ref
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| deployment.container_ref.clone());

        if status == DeploymentStatus::Running && container_ref.is_empty() {
            return Err(Error::Unprocessable {
                message: "A running claw must report its container_ref".to_string(),
            });
        }

        deployment.status = status;
        deployment.container_ref = container_ref;
        deployment.error_message = match status {
            DeploymentStatus::Running => String::new(),
            _ => self
                .error_message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| "Provisioning failed".to_string()),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::deployment_fixture;

    fn report(status: &str, container: Option<&str>, error: Option<&str>) -> ProvisionResult {
        ProvisionResult {
            status: status.to_string(),
            container_ref: container.map(str::to_string),
            error_message: error.map(str::to_string),
        }
    }

    #[test]
    fn test_running_sets_container_and_clears_error() {
        let mut d = deployment_fixture();
        d.error_message = "previous attempt failed".to_string();

        report("running", Some("claw-abc"), None).apply(&mut d).unwrap();

        assert_eq!(d.status, DeploymentStatus::Running);
        assert_eq!(d.container_ref, "claw-abc");
        assert_eq!(d.error_message, "");
    }

    #[test]
    fn test_running_without_container_rejected() {
        let mut d = deployment_fixture();
        assert!(report("running", None, None).apply(&mut d).is_err());
        assert!(report("running", Some("  "), None).apply(&mut d).is_err());
        assert_eq!(d.status, DeploymentStatus::Queued);
    }

    #[test]
    fn test_running_keeps_previously_stored_container() {
        let mut d = deployment_fixture();
        d.container_ref = "claw-existing".to_string();
        report("running", None, None).apply(&mut d).unwrap();
        assert_eq!(d.container_ref, "claw-existing");
    }

    #[test]
    fn test_failed_records_error() {
        let mut d = deployment_fixture();
        report("failed", None, Some("image pull failed")).apply(&mut d).unwrap();
        assert_eq!(d.status, DeploymentStatus::Failed);
        assert_eq!(d.error_message, "image pull failed");

        report("failed", None, None).apply(&mut d).unwrap();
        assert_eq!(d.error_message, "Provisioning failed");
    }

    #[test]
    fn test_other_statuses_rejected() {
        let mut d = deployment_fixture();
        for status in ["stopped", "queued", "RUNNING", ""] {
            assert!(matches!(
                report(status, Some("c"), None).apply(&mut d),
                Err(Error::Unprocessable { .. })
            ));
        }
    }
}
