use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::{debug, instrument};

use crate::{
    AppState,
    crypto::constant_time_eq,
    errors::{Error, Result},
};

pub const PROVISIONER_KEY_HEADER: &str = "x-provisioner-key";

/// Marker extractor for calls made by the provisioning service.
///
/// Rejects every request while `auth.provisioner_key` is unset.
#[derive(Debug, Clone, Copy)]
pub struct Provisioner;

impl FromRequestParts<AppState> for Provisioner {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let Some(expected) = state.config.auth.provisioner_key.as_deref() else {
            debug!("Provisioner key not configured, rejecting provisioner call");
            return Err(Error::Unauthenticated {
                message: Some("Provisioner access is disabled".to_string()),
            });
        };

        let presented = parts
            .headers
            .get(PROVISIONER_KEY_HEADER)
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default();

        if !presented.is_empty() && constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            Ok(Provisioner)
        } else {
            Err(Error::Unauthenticated {
                message: Some("Invalid provisioner key".to_string()),
            })
        }
    }
}
