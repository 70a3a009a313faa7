//! API models for the claw conversation transcript.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::db::models::messages::{ClawMessage, MessageAuthor};
use crate::errors::{Error, Result};
use crate::types::MessageId;

pub const DEFAULT_MESSAGE_LIMIT: i64 = 50;
pub const MAX_MESSAGE_LIMIT: i64 = 200;
pub const MAX_MESSAGE_LEN: usize = 5000;

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct MessageListQuery {
    /// Only messages created strictly after this instant
    pub since: Option<DateTime<Utc>>,
    /// 1-200, default 50
    pub limit: Option<i64>,
}

impl MessageListQuery {
    pub fn limit(&self) -> Result<i64> {
        match self.limit {
            None => Ok(DEFAULT_MESSAGE_LIMIT),
            Some(limit) if (1..=MAX_MESSAGE_LIMIT).contains(&limit) => Ok(limit),
            Some(limit) => Err(Error::BadRequest {
                message: format!("limit must be between 1 and {MAX_MESSAGE_LIMIT}, got {limit}"),
            }),
        }
    }
}

/// A message sent by the owner to their claw
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct MessageCreate {
    /// 1-5000 characters
    pub body: String,
}

impl MessageCreate {
    pub fn validate(&self) -> Result<()> {
        if self.body.trim().is_empty() {
            return Err(Error::BadRequest {
                message: "body is required".to_string(),
            });
        }
        if self.body.chars().count() > MAX_MESSAGE_LEN {
            return Err(Error::BadRequest {
                message: format!("body must be at most {MAX_MESSAGE_LEN} characters"),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: MessageId,
    #[schema(value_type = String, example = "agent")]
    pub author: MessageAuthor,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl From<ClawMessage> for MessageResponse {
    fn from(m: ClawMessage) -> Self {
        Self {
            id: m.id,
            author: m.author,
            body: m.body,
            created_at: m.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MessageListResponse {
    /// Newest first
    pub messages: Vec<MessageResponse>,
}

/// Result of a synchronous turn
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SendMessageResponse {
    /// The agent's stored reply; absent if the reply could not be stored
    pub message: Option<MessageResponse>,
    /// ID of the owner's stored message, for de-duplicating optimistic UI state
    #[schema(value_type = String, format = "uuid")]
    pub user_message_id: MessageId,
    /// Intermediate agent events (tool calls etc.) from the turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[schema(value_type = Vec<Object>)]
    pub events: Vec<serde_json::Value>,
}
