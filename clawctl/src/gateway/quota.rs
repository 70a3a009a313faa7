//! Per-tier inference limits.

use chrono::{DateTime, Datelike, Duration, Utc};
use tracing::debug;

use super::GatewayError;
use crate::db::handlers::UsageStore;
use crate::db::models::deployments::{Deployment, Tier};
use crate::types::abbrev_uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    /// Input plus output tokens per calendar month (UTC)
    pub monthly_token_cap: i64,
    /// Requests allowed inside the rolling window
    pub window_request_count: i64,
    pub window_hours: i64,
}

pub const fn limits_for(tier: Tier) -> TierLimits {
    match tier {
        Tier::Lite => TierLimits {
            monthly_token_cap: 15_000_000,
            window_request_count: 100,
            window_hours: 5,
        },
        Tier::Pro => TierLimits {
            monthly_token_cap: 50_000_000,
            window_request_count: 300,
            window_hours: 5,
        },
        Tier::Max => TierLimits {
            monthly_token_cap: 150_000_000,
            window_request_count: 1000,
            window_hours: 5,
        },
    }
}

/// Midnight UTC on the first day of `now`'s month
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .with_day(1)
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|start| start.and_utc())
        .unwrap_or(now)
}

/// Check the rolling window first, then the monthly cap.
pub async fn enforce(usage: &dyn UsageStore, deployment: &Deployment, now: DateTime<Utc>) -> Result<(), GatewayError> {
    let limits = limits_for(deployment.tier);

    let window_start = now - Duration::hours(limits.window_hours);
    let recent = usage.count_since(deployment.id, window_start).await?;
    if recent >= limits.window_request_count {
        debug!(claw = %abbrev_uuid(&deployment.id), recent, "Rolling window exhausted");
        return Err(GatewayError::RateLimited);
    }

    let spent = usage.sum_tokens_since(deployment.id, month_start(now)).await?;
    if spent >= limits.monthly_token_cap {
        debug!(claw = %abbrev_uuid(&deployment.id), spent, "Monthly token cap reached");
        return Err(GatewayError::QuotaExceeded);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{InMemoryUsage, running_deployment};
    use chrono::TimeZone;

    #[test]
    fn test_tier_table() {
        assert_eq!(limits_for(Tier::Lite).monthly_token_cap, 15_000_000);
        assert_eq!(limits_for(Tier::Lite).window_request_count, 100);
        assert_eq!(limits_for(Tier::Pro).window_request_count, 300);
        assert_eq!(limits_for(Tier::Max).monthly_token_cap, 150_000_000);
        assert!([Tier::Lite, Tier::Pro, Tier::Max].iter().all(|t| limits_for(*t).window_hours == 5));
    }

    #[test]
    fn test_unknown_tier_gets_lowest_limits() {
        assert_eq!(limits_for(Tier::from_db_string("platinum")), limits_for(Tier::Lite));
    }

    #[test]
    fn test_month_start() {
        let now = Utc.with_ymd_and_hms(2026, 10, 16, 13, 45, 12).unwrap();
        assert_eq!(month_start(now), Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap());

        let first = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        assert_eq!(month_start(first), first);
    }

    #[tokio::test]
    async fn test_window_limit_is_inclusive() {
        let usage = InMemoryUsage::default();
        let d = running_deployment("claw-q");
        let now = Utc::now();
        for _ in 0..99 {
            usage.insert_at(d.id, 10, 10, now - Duration::minutes(30));
        }
        assert!(enforce(&usage, &d, now).await.is_ok());

        usage.insert_at(d.id, 10, 10, now - Duration::minutes(1));
        assert!(matches!(enforce(&usage, &d, now).await, Err(GatewayError::RateLimited)));
    }

    #[tokio::test]
    async fn test_window_reopens_when_oldest_ages_out() {
        let usage = InMemoryUsage::default();
        let d = running_deployment("claw-q");
        let now = Utc::now();
        usage.insert_at(d.id, 1, 1, now - Duration::hours(5) + Duration::minutes(1));
        for _ in 0..99 {
            usage.insert_at(d.id, 1, 1, now - Duration::hours(1));
        }
        assert!(matches!(enforce(&usage, &d, now).await, Err(GatewayError::RateLimited)));

        let later = now + Duration::minutes(2);
        assert!(enforce(&usage, &d, later).await.is_ok());
    }

    #[tokio::test]
    async fn test_window_ignores_old_requests() {
        let usage = InMemoryUsage::default();
        let d = running_deployment("claw-q");
        let now = Utc::now();
        for _ in 0..100 {
            usage.insert_at(d.id, 1, 1, now - Duration::hours(6));
        }
        assert!(enforce(&usage, &d, now).await.is_ok());
    }

    #[tokio::test]
    async fn test_monthly_cap() {
        let usage = InMemoryUsage::default();
        let d = running_deployment("claw-q");
        let now = Utc::now();
        usage.insert_at(d.id, 10_000_000, 4_999_999, now);
        assert!(enforce(&usage, &d, now).await.is_ok());

        usage.insert_at(d.id, 0, 1, now);
        assert!(matches!(enforce(&usage, &d, now).await, Err(GatewayError::QuotaExceeded)));
    }

    #[tokio::test]
    async fn test_previous_month_does_not_count() {
        let usage = InMemoryUsage::default();
        let d = running_deployment("claw-q");
        let now = Utc.with_ymd_and_hms(2026, 10, 2, 12, 0, 0).unwrap();
        usage.insert_at(d.id, 20_000_000, 0, Utc.with_ymd_and_hms(2026, 9, 30, 23, 0, 0).unwrap());
        assert!(enforce(&usage, &d, now).await.is_ok());
    }

    #[tokio::test]
    async fn test_limits_follow_tier() {
        let usage = InMemoryUsage::default();
        let mut d = running_deployment("claw-q");
        d.tier = Tier::Pro;
        let now = Utc::now();
        usage.insert_at(d.id, 20_000_000, 0, now);
        assert!(enforce(&usage, &d, now).await.is_ok());
    }
}
