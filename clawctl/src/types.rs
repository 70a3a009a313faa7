//! Common type definitions.
//!
//! All entity IDs are UUIDs wrapped in type aliases for readability:
//!
//! - [`ClawId`]: Deployment (claw) identifier
//! - [`MessageId`]: Conversation message identifier
//! - [`UsageRecordId`]: Inference usage record identifier
//!
//! Owner identities are opaque strings handed to us by the authenticating proxy.

use uuid::Uuid;

pub type ClawId = Uuid;
pub type MessageId = Uuid;
pub type UsageRecordId = Uuid;
pub type OwnerId = String;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// Abbreviate a container reference for logs. Docker IDs are 64 hex chars; names are kept whole.
pub fn abbrev_container(container_ref: &str) -> &str {
    if container_ref.len() == 64 && container_ref.chars().all(|c| c.is_ascii_hexdigit()) {
        &container_ref[..12]
    } else {
        container_ref
    }
}
