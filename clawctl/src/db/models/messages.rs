//! Store models for the conversation transcript shown to owners.

use crate::types::{ClawId, MessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Who wrote a transcript message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageAuthor {
    User,
    Agent,
    System,
}

impl MessageAuthor {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            MessageAuthor::User => "user",
            MessageAuthor::Agent => "agent",
            MessageAuthor::System => "system",
        }
    }

    pub fn from_db_string(s: &str) -> MessageAuthor {
        match s {
            "user" => MessageAuthor::User,
            "agent" => MessageAuthor::Agent,
            _ => MessageAuthor::System,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClawMessage {
    pub id: MessageId,
    pub deployment_id: ClawId,
    pub author: MessageAuthor,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageCreateDBRequest {
    pub deployment_id: ClawId,
    pub author: MessageAuthor,
    pub body: String,
}

impl MessageCreateDBRequest {
    pub fn new(deployment_id: ClawId, author: MessageAuthor, body: impl Into<String>) -> Self {
        Self {
            deployment_id,
            author,
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct MessageRow {
    pub id: MessageId,
    pub deployment_id: ClawId,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl From<MessageRow> for ClawMessage {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            deployment_id: row.deployment_id,
            author: MessageAuthor::from_db_string(&row.author),
            body: row.body,
            created_at: row.created_at,
        }
    }
}
