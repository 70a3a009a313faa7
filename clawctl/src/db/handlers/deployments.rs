//! Store access for claw deployments.

use crate::db::{
    errors::Result,
    models::deployments::{Deployment, DeploymentCreateDBRequest, DeploymentRow, DeploymentStatus},
};
use crate::types::{ClawId, OwnerId};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, query_builder::QueryBuilder};
use tracing::instrument;

/// Filter options for listing deployments. Results are always newest first, ties broken by id.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentFilter {
    pub limit: i64,
    /// Keyset cursor: only records strictly after this `(created_at, id)` in listing order
    pub before: Option<(DateTime<Utc>, ClawId)>,
    pub statuses: Option<Vec<DeploymentStatus>>,
    pub owner_id: Option<OwnerId>,
    pub heartbeat_enabled: Option<bool>,
    /// `Some(true)` selects unpaid deployments that have a trial end set
    pub unpaid_trial: Option<bool>,
}

impl DeploymentFilter {
    pub fn new(limit: i64) -> Self {
        Self {
            limit,
            before: None,
            statuses: None,
            owner_id: None,
            heartbeat_enabled: None,
            unpaid_trial: None,
        }
    }

    pub fn with_statuses(mut self, statuses: Vec<DeploymentStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<OwnerId>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn with_heartbeat_enabled(mut self, enabled: bool) -> Self {
        self.heartbeat_enabled = Some(enabled);
        self
    }

    pub fn with_unpaid_trial(mut self, unpaid_trial: bool) -> Self {
        self.unpaid_trial = Some(unpaid_trial);
        self
    }

    /// Continue listing after `deployment`
    pub fn after(mut self, deployment: &Deployment) -> Self {
        self.before = Some((deployment.created_at, deployment.id));
        self
    }

    /// Evaluate the filter against an in-memory record, mirroring the SQL predicate.
    pub fn matches(&self, deployment: &Deployment) -> bool {
        if let Some(cursor) = self.before
            && (deployment.created_at, deployment.id) >= cursor
        {
            return false;
        }
        if let Some(ref statuses) = self.statuses
            && !statuses.contains(&deployment.status)
        {
            return false;
        }
        if let Some(ref owner_id) = self.owner_id
            && &deployment.owner_id != owner_id
        {
            return false;
        }
        if let Some(enabled) = self.heartbeat_enabled
            && (deployment.heartbeat_interval_minutes > 0) != enabled
        {
            return false;
        }
        if let Some(unpaid_trial) = self.unpaid_trial
            && (!deployment.paid && deployment.trial_ends_at.is_some()) != unpaid_trial
        {
            return false;
        }
        true
    }
}

/// Typed access to deployment records.
///
/// There are no cross-record transactions: every write replaces the whole record.
#[async_trait::async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Create a new deployment in `queued` status
    async fn create(&self, request: &DeploymentCreateDBRequest) -> Result<Deployment>;

    async fn get_by_id(&self, id: ClawId) -> Result<Option<Deployment>>;

    /// Look up a running deployment by its gateway proxy token
    async fn get_running_by_proxy_token(&self, proxy_token: &str) -> Result<Option<Deployment>>;

    async fn list(&self, filter: &DeploymentFilter) -> Result<Vec<Deployment>>;

    /// Every record matching `filter`, fetched in pages of `filter.limit`
    async fn scan(&self, filter: &DeploymentFilter) -> Result<Vec<Deployment>> {
        let mut all = Vec::new();
        let mut page_filter = filter.clone();
        loop {
            let page = self.list(&page_filter).await?;
            let full = filter.limit > 0 && page.len() as i64 >= filter.limit;
            let cursor = page.last().map(|last| page_filter.clone().after(last));
            all.extend(page);
            match cursor {
                Some(next) if full => page_filter = next,
                _ => return Ok(all),
            }
        }
    }

    /// Persist every mutable field of the record; returns the stored record with a fresh `updated_at`
    async fn save(&self, deployment: &Deployment) -> Result<Deployment>;

    async fn delete(&self, id: ClawId) -> Result<bool>;
}

/// PostgreSQL-backed deployment store
#[derive(Debug, Clone)]
pub struct PgDeployments {
    db: PgPool,
}

impl PgDeployments {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl DeploymentStore for PgDeployments {
    #[instrument(skip(self, request), fields(owner = %request.owner_id, tier = %request.tier), err)]
    async fn create(&self, request: &DeploymentCreateDBRequest) -> Result<Deployment> {
        let row = sqlx::query_as::<_, DeploymentRow>(
            r#"
            INSERT INTO claw_deployments (id, owner_id, name, status, tier, proxy_token, trial_ends_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(uuid::Uuid::new_v4())
        .bind(&request.owner_id)
        .bind(&request.name)
        .bind(DeploymentStatus::Queued.to_db_string())
        .bind(request.tier.to_db_string())
        .bind(&request.proxy_token)
        .bind(request.trial_ends_at)
        .fetch_one(&self.db)
        .await?;

        Ok(row.into())
    }

    #[instrument(skip(self), err)]
    async fn get_by_id(&self, id: ClawId) -> Result<Option<Deployment>> {
        let row = sqlx::query_as::<_, DeploymentRow>("SELECT * FROM claw_deployments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip_all, err)]
    async fn get_running_by_proxy_token(&self, proxy_token: &str) -> Result<Option<Deployment>> {
        let row = sqlx::query_as::<_, DeploymentRow>("SELECT * FROM claw_deployments WHERE proxy_token = $1 AND status = $2")
            .bind(proxy_token)
            .bind(DeploymentStatus::Running.to_db_string())
            .fetch_optional(&self.db)
            .await?;

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self), err)]
    async fn list(&self, filter: &DeploymentFilter) -> Result<Vec<Deployment>> {
        let mut query = QueryBuilder::new("SELECT * FROM claw_deployments WHERE 1=1");

        if let Some(ref statuses) = filter.statuses {
            let status_strings: Vec<String> = statuses.iter().map(|s| s.to_db_string().to_string()).collect();
            query.push(" AND status = ANY(");
            query.push_bind(status_strings);
            query.push(")");
        }

        if let Some(ref owner_id) = filter.owner_id {
            query.push(" AND owner_id = ");
            query.push_bind(owner_id.clone());
        }

        match filter.heartbeat_enabled {
            Some(true) => {
                query.push(" AND heartbeat_interval_minutes > 0");
            }
            Some(false) => {
                query.push(" AND heartbeat_interval_minutes = 0");
            }
            None => {}
        }

        match filter.unpaid_trial {
            Some(true) => {
                query.push(" AND paid = false AND trial_ends_at IS NOT NULL");
            }
            Some(false) => {
                query.push(" AND (paid = true OR trial_ends_at IS NULL)");
            }
            None => {}
        }

        if let Some((created_at, id)) = filter.before {
            query.push(" AND (created_at, id) < (");
            query.push_bind(created_at);
            query.push(", ");
            query.push_bind(id);
            query.push(")");
        }

        query.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        query.push_bind(filter.limit);

        let rows = query.build_query_as::<DeploymentRow>().fetch_all(&self.db).await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, deployment), fields(claw = %crate::types::abbrev_uuid(&deployment.id), status = %deployment.status), err)]
    async fn save(&self, deployment: &Deployment) -> Result<Deployment> {
        let row = sqlx::query_as::<_, DeploymentRow>(
            r#"
            UPDATE claw_deployments SET
                name = $2,
                status = $3,
                container_ref = $4,
                is_public = $5,
                heartbeat_interval_minutes = $6,
                heartbeat_instruction = $7,
                last_heartbeat_at = $8,
                trial_ends_at = $9,
                trial_warned = $10,
                paid = $11,
                error_message = $12,
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(deployment.id)
        .bind(&deployment.name)
        .bind(deployment.status.to_db_string())
        .bind(&deployment.container_ref)
        .bind(deployment.is_public)
        .bind(deployment.heartbeat_interval_minutes)
        .bind(&deployment.heartbeat_instruction)
        .bind(deployment.last_heartbeat_at)
        .bind(deployment.trial_ends_at)
        .bind(deployment.trial_warned)
        .bind(deployment.paid)
        .bind(&deployment.error_message)
        .fetch_one(&self.db)
        .await?;

        Ok(row.into())
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, id: ClawId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM claw_deployments WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
