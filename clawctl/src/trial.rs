//! Trial enforcement.
//!
//! Unpaid claws carry a `trial_ends_at` deadline. Shortly before it passes the agent and its
//! owner get a single warning; once it has passed the container is force-removed and the record
//! is kept as `stopped` so the owner can see what happened.
//!
//! Only `running` records are scanned, so re-running a tick after expiry is a no-op.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::bridge::Bridge;
use crate::config::TrialConfig;
use crate::db::errors::Result;
use crate::db::handlers::{DeploymentFilter, DeploymentStore, MessageStore};
use crate::db::models::deployments::{Deployment, DeploymentStatus};
use crate::db::models::messages::{MessageAuthor, MessageCreateDBRequest};
use crate::metrics;
use crate::runtime::ContainerRuntime;
use crate::types::abbrev_uuid;

/// Bridge user id trial notices are sent as
pub const SYSTEM_USER: &str = "system";

pub const EXPIRED_ERROR_MESSAGE: &str = "Trial expired — not paid";

const EXPIRY_NOTICE: &str = "[SYSTEM] Trial expired. This claw is being decommissioned.";
const EXPIRY_TRANSCRIPT: &str = "Trial expired. This claw has been stopped. Upgrade to redeploy.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialAction {
    Nothing,
    Warn,
    Expire,
}

/// Decide what a tick should do with one deployment
pub fn evaluate(deployment: &Deployment, now: DateTime<Utc>, warning_window: Duration) -> TrialAction {
    if deployment.paid {
        return TrialAction::Nothing;
    }
    let Some(ends_at) = deployment.trial_ends_at else {
        return TrialAction::Nothing;
    };

    let remaining = ends_at - now;
    if remaining <= Duration::zero() {
        TrialAction::Expire
    } else if remaining <= warning_window && !deployment.trial_warned {
        TrialAction::Warn
    } else {
        TrialAction::Nothing
    }
}

fn warning_notice(minutes: i64) -> String {
    format!("[SYSTEM] Your trial expires in {minutes} minutes. Your owner needs to upgrade to keep you running.")
}

fn warning_transcript(minutes: i64) -> String {
    format!("Trial expires in {minutes} minutes. Upgrade to keep this claw running.")
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TrialTick {
    pub warned: usize,
    pub expired: usize,
    pub missing_container: usize,
}

#[derive(Clone)]
pub struct TrialEnforcer {
    deployments: Arc<dyn DeploymentStore>,
    messages: Arc<dyn MessageStore>,
    bridge: Arc<dyn Bridge>,
    runtime: Arc<dyn ContainerRuntime>,
    config: TrialConfig,
}

impl TrialEnforcer {
    pub fn new(
        deployments: Arc<dyn DeploymentStore>,
        messages: Arc<dyn MessageStore>,
        bridge: Arc<dyn Bridge>,
        runtime: Arc<dyn ContainerRuntime>,
        config: TrialConfig,
    ) -> Self {
        Self {
            deployments,
            messages,
            bridge,
            runtime,
            config,
        }
    }

    fn warning_window(&self) -> Duration {
        Duration::from_std(self.config.warning_window).unwrap_or_else(|_| Duration::minutes(5))
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(tick = ?self.config.tick, "Starting trial enforcer");
        let mut interval = tokio::time::interval(self.config.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Trial enforcer shutting down");
                    break;
                }
                _ = interval.tick() => {
                    match self.tick(Utc::now()).await {
                        Ok(summary) if summary.warned + summary.expired > 0 => {
                            info!(warned = summary.warned, expired = summary.expired, "Trial tick complete");
                        }
                        Ok(_) => {}
                        Err(e) => error!("Trial tick failed: {}", e),
                    }
                }
            }
        }
    }

    #[instrument(skip(self), err)]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TrialTick> {
        let filter = DeploymentFilter::new(self.config.batch_size)
            .with_statuses(vec![DeploymentStatus::Running])
            .with_unpaid_trial(true);
        let candidates = self.deployments.scan(&filter).await?;
        let window = self.warning_window();

        let mut summary = TrialTick::default();
        for deployment in candidates {
            if !deployment.has_container() {
                warn!(
                    claw = %abbrev_uuid(&deployment.id),
                    "Running claw has no container reference, skipping trial check"
                );
                metrics::record_missing_container("trial");
                summary.missing_container += 1;
                continue;
            }

            match evaluate(&deployment, now, window) {
                TrialAction::Nothing => {}
                TrialAction::Warn => {
                    self.warn(deployment, window.num_minutes()).await;
                    summary.warned += 1;
                }
                TrialAction::Expire => {
                    self.expire(deployment).await;
                    summary.expired += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn warn(&self, mut deployment: Deployment, minutes: i64) {
        let claw = abbrev_uuid(&deployment.id);

        if let Err(e) = self
            .bridge
            .send(&deployment.container_ref, SYSTEM_USER, &warning_notice(minutes))
            .await
        {
            warn!(%claw, "Failed to deliver trial warning to agent: {}", e);
        }
        self.append_system_message(&deployment, warning_transcript(minutes)).await;

        deployment.trial_warned = true;
        match self.deployments.save(&deployment).await {
            Ok(_) => {
                metrics::record_trial_action("warned");
                info!(%claw, "Trial warning sent");
            }
            Err(e) => warn!(%claw, "Failed to set trial_warned: {}", e),
        }
    }

    async fn expire(&self, mut deployment: Deployment) {
        let claw = abbrev_uuid(&deployment.id);

        if let Err(e) = self.bridge.send(&deployment.container_ref, SYSTEM_USER, EXPIRY_NOTICE).await {
            debug!(%claw, "Expiry notice not delivered: {}", e);
        }
        self.append_system_message(&deployment, EXPIRY_TRANSCRIPT.to_string()).await;

        // Removal failure must not keep the record running
        if let Err(e) = self.runtime.remove(&deployment.container_ref).await {
            warn!(%claw, container = %deployment.container_ref, "Failed to remove expired container: {}", e);
        }

        deployment.status = DeploymentStatus::Stopped;
        deployment.error_message = EXPIRED_ERROR_MESSAGE.to_string();
        match self.deployments.save(&deployment).await {
            Ok(_) => {
                metrics::record_trial_action("expired");
                info!(%claw, "Trial expired, claw stopped");
            }
            Err(e) => error!(%claw, "Failed to mark expired claw as stopped: {}", e),
        }
    }

    async fn append_system_message(&self, deployment: &Deployment, body: String) {
        let request = MessageCreateDBRequest::new(deployment.id, MessageAuthor::System, body);
        if let Err(e) = self.messages.create(&request).await {
            warn!(claw = %abbrev_uuid(&deployment.id), "Failed to save trial notice: {}", e);
        }
    }
}
