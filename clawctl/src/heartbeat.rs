//! Heartbeat scheduler.
//!
//! Idle agents are woken on the cadence their owner picked. Each tick scans running deployments
//! with heartbeats enabled and sends a wake message to every one that is due. The agent answers
//! with [`HEARTBEAT_SENTINEL`] when it has nothing to say; anything else goes into the transcript.
//!
//! `last_heartbeat_at` is written on every attempt, successful or not, so a broken claw is
//! retried at its normal cadence instead of on every tick.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::bridge::Bridge;
use crate::config::HeartbeatConfig;
use crate::db::errors::Result;
use crate::db::handlers::{DeploymentFilter, DeploymentStore, MessageStore};
use crate::db::models::deployments::{Deployment, DeploymentStatus};
use crate::db::models::messages::{MessageAuthor, MessageCreateDBRequest};
use crate::metrics;
use crate::types::abbrev_uuid;

/// Reply meaning "nothing to report"; compared after trimming
pub const HEARTBEAT_SENTINEL: &str = "HEARTBEAT_OK";

/// Bridge user id heartbeats are sent as
pub const HEARTBEAT_USER: &str = "heartbeat";

const HEARTBEAT_PREFIX: &str = "[HEARTBEAT]";

pub fn is_due(deployment: &Deployment, now: DateTime<Utc>) -> bool {
    if deployment.heartbeat_interval_minutes <= 0 {
        return false;
    }
    match deployment.last_heartbeat_at {
        None => true,
        Some(last) => now - last >= Duration::minutes(deployment.heartbeat_interval_minutes as i64),
    }
}

pub fn wake_message(instruction: &str) -> String {
    let instruction = instruction.trim();
    if instruction.is_empty() {
        HEARTBEAT_PREFIX.to_string()
    } else {
        format!("{HEARTBEAT_PREFIX} {instruction}")
    }
}

pub fn is_sentinel(reply: &str) -> bool {
    reply.trim() == HEARTBEAT_SENTINEL
}

/// What one pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HeartbeatTick {
    pub sent: usize,
    pub replied: usize,
    pub quiet: usize,
    pub failed: usize,
    pub missing_container: usize,
}

#[derive(Clone)]
pub struct HeartbeatScheduler {
    deployments: Arc<dyn DeploymentStore>,
    messages: Arc<dyn MessageStore>,
    bridge: Arc<dyn Bridge>,
    config: HeartbeatConfig,
}

impl HeartbeatScheduler {
    pub fn new(
        deployments: Arc<dyn DeploymentStore>,
        messages: Arc<dyn MessageStore>,
        bridge: Arc<dyn Bridge>,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            deployments,
            messages,
            bridge,
            config,
        }
    }

    /// Tick until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        info!(tick = ?self.config.tick, "Starting heartbeat scheduler");
        let mut interval = tokio::time::interval(self.config.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; wait a full period before the first scan
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Heartbeat scheduler shutting down");
                    break;
                }
                _ = interval.tick() => {
                    match self.tick(Utc::now()).await {
                        Ok(summary) if summary.sent > 0 => debug!(?summary, "Heartbeat tick complete"),
                        Ok(_) => {}
                        Err(e) => error!("Heartbeat tick failed: {}", e),
                    }
                }
            }
        }
    }

    /// Run one full scan as of `now`
    #[instrument(skip(self), err)]
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<HeartbeatTick> {
        let filter = DeploymentFilter::new(self.config.batch_size)
            .with_statuses(vec![DeploymentStatus::Running])
            .with_heartbeat_enabled(true);
        let candidates = self.deployments.scan(&filter).await?;

        let mut summary = HeartbeatTick::default();
        for deployment in candidates {
            if !deployment.has_container() {
                warn!(
                    claw = %abbrev_uuid(&deployment.id),
                    "Running claw has no container reference, skipping heartbeat"
                );
                metrics::record_missing_container("heartbeat");
                summary.missing_container += 1;
                continue;
            }
            if !is_due(&deployment, now) {
                continue;
            }
            self.beat(deployment, now, &mut summary).await;
        }

        Ok(summary)
    }

    async fn beat(&self, mut deployment: Deployment, now: DateTime<Utc>, summary: &mut HeartbeatTick) {
        let claw = abbrev_uuid(&deployment.id);
        let message = wake_message(&deployment.heartbeat_instruction);
        summary.sent += 1;

        match self.bridge.send(&deployment.container_ref, HEARTBEAT_USER, &message).await {
            Ok(reply) if is_sentinel(&reply.text) => {
                debug!(%claw, "Heartbeat acknowledged with nothing to report");
                metrics::record_heartbeat("quiet");
                summary.quiet += 1;
            }
            Ok(reply) => {
                metrics::record_heartbeat("replied");
                summary.replied += 1;
                let request = MessageCreateDBRequest::new(deployment.id, MessageAuthor::Agent, reply.text);
                if let Err(e) = self.messages.create(&request).await {
                    warn!(%claw, "Failed to save heartbeat reply: {}", e);
                }
            }
            Err(e) => {
                warn!(%claw, "Heartbeat failed: {}", e);
                metrics::record_heartbeat("failed");
                summary.failed += 1;
            }
        }

        deployment.last_heartbeat_at = Some(now);
        if let Err(e) = self.deployments.save(&deployment).await {
            error!(%claw, "Failed to record heartbeat time: {}", e);
        }
    }
}
