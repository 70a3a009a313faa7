//! Periodic pruning of old usage records.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

use crate::config::UsageRetentionConfig;
use crate::db::errors::Result;
use crate::db::handlers::UsageStore;
use crate::metrics;

#[derive(Clone)]
pub struct UsageRetention {
    usage: Arc<dyn UsageStore>,
    config: UsageRetentionConfig,
}

impl UsageRetention {
    pub fn new(usage: Arc<dyn UsageStore>, config: UsageRetentionConfig) -> Self {
        Self { usage, config }
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::from_std(self.config.retention).unwrap_or_else(|_| Duration::days(90))
    }

    /// Delete records older than the retention period; returns how many went
    #[instrument(skip(self), err)]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u64> {
        let deleted = self.usage.delete_older_than(self.cutoff(now)).await?;
        metrics::record_usage_pruned(deleted);
        Ok(deleted)
    }

    /// Sweep immediately, then on every tick
    pub async fn run(self, shutdown: CancellationToken) {
        info!(tick = ?self.config.tick, retention = ?self.config.retention, "Starting usage retention sweep");
        let mut interval = tokio::time::interval(self.config.tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Usage retention sweep shutting down");
                    break;
                }
                _ = interval.tick() => {
                    match self.sweep(Utc::now()).await {
                        Ok(0) => {}
                        Ok(deleted) => info!(deleted, "Pruned old usage records"),
                        Err(e) => error!("Usage retention sweep failed: {}", e),
                    }
                }
            }
        }
    }
}
