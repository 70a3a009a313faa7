//! Store access for inference usage records.

use crate::db::{
    errors::Result,
    models::usage::{UsageCreateDBRequest, UsageRecord},
};
use crate::types::ClawId;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;

#[async_trait::async_trait]
pub trait UsageStore: Send + Sync {
    async fn record(&self, request: &UsageCreateDBRequest) -> Result<UsageRecord>;

    /// Number of records for a deployment created at or after `since`
    async fn count_since(&self, deployment_id: ClawId, since: DateTime<Utc>) -> Result<i64>;

    /// Sum of input and output tokens for a deployment created at or after `since`
    async fn sum_tokens_since(&self, deployment_id: ClawId, since: DateTime<Utc>) -> Result<i64>;

    /// Delete every record created before `cutoff`, returning how many were removed
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct PgUsage {
    db: PgPool,
}

impl PgUsage {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl UsageStore for PgUsage {
    #[instrument(skip(self, request), fields(claw = %crate::types::abbrev_uuid(&request.deployment_id)), err)]
    async fn record(&self, request: &UsageCreateDBRequest) -> Result<UsageRecord> {
        let record = sqlx::query_as::<_, UsageRecord>(
            r#"
            INSERT INTO claw_usage (id, deployment_id, input_tokens, output_tokens, model)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(request.deployment_id)
        .bind(request.input_tokens)
        .bind(request.output_tokens)
        .bind(&request.model)
        .fetch_one(&self.db)
        .await?;

        Ok(record)
    }

    #[instrument(skip(self), err)]
    async fn count_since(&self, deployment_id: ClawId, since: DateTime<Utc>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM claw_usage WHERE deployment_id = $1 AND created_at >= $2")
            .bind(deployment_id)
            .bind(since)
            .fetch_one(&self.db)
            .await?;

        Ok(count)
    }

    #[instrument(skip(self), err)]
    async fn sum_tokens_since(&self, deployment_id: ClawId, since: DateTime<Utc>) -> Result<i64> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(input_tokens + output_tokens), 0)::BIGINT FROM claw_usage WHERE deployment_id = $1 AND created_at >= $2",
        )
        .bind(deployment_id)
        .bind(since)
        .fetch_one(&self.db)
        .await?;

        Ok(total)
    }

    #[instrument(skip(self), err)]
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM claw_usage WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected())
    }
}
