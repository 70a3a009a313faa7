//! Store models for inference usage accounting.

use crate::types::{ClawId, UsageRecordId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// One upstream inference call. Append-only; removed only by the retention sweep.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct UsageRecord {
    pub id: UsageRecordId,
    pub deployment_id: ClawId,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn total_tokens(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UsageCreateDBRequest {
    pub deployment_id: ClawId,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub model: String,
}
