//! Store access for transcript messages.

use crate::db::{
    errors::Result,
    models::messages::{ClawMessage, MessageCreateDBRequest, MessageRow},
};
use crate::types::ClawId;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;

/// Filter options for listing a deployment's messages. Results are newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageFilter {
    pub limit: i64,
    pub since: Option<DateTime<Utc>>,
}

impl MessageFilter {
    pub fn new(limit: i64) -> Self {
        Self { limit, since: None }
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }
}

#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    async fn create(&self, request: &MessageCreateDBRequest) -> Result<ClawMessage>;

    async fn list(&self, deployment_id: ClawId, filter: &MessageFilter) -> Result<Vec<ClawMessage>>;
}

#[derive(Debug, Clone)]
pub struct PgMessages {
    db: PgPool,
}

impl PgMessages {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl MessageStore for PgMessages {
    #[instrument(skip(self, request), fields(claw = %crate::types::abbrev_uuid(&request.deployment_id), author = request.author.to_db_string()), err)]
    async fn create(&self, request: &MessageCreateDBRequest) -> Result<ClawMessage> {
        let row = sqlx::query_as::<_, MessageRow>(
            r#"
            INSERT INTO claw_messages (id, deployment_id, author, body)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(request.deployment_id)
        .bind(request.author.to_db_string())
        .bind(&request.body)
        .fetch_one(&self.db)
        .await?;

        Ok(row.into())
    }

    #[instrument(skip(self), err)]
    async fn list(&self, deployment_id: ClawId, filter: &MessageFilter) -> Result<Vec<ClawMessage>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            r#"
            SELECT * FROM claw_messages
            WHERE deployment_id = $1 AND ($2::TIMESTAMPTZ IS NULL OR created_at > $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(deployment_id)
        .bind(filter.since)
        .bind(filter.limit)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
