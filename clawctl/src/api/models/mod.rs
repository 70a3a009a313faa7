//! API request and response models.
//!
//! These are distinct from the store models in [`crate::db::models`] so the wire format can
//! hide fields such as the proxy token.

pub mod claws;
pub mod environment;
pub mod messages;
pub mod provisioning;
