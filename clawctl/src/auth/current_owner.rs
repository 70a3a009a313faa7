use axum::{extract::FromRequestParts, http::request::Parts};
use tracing::{instrument, trace};

use crate::{
    AppState,
    errors::{Error, Result},
    types::OwnerId,
};

/// The authenticated owner making the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentOwner {
    pub id: OwnerId,
}

impl FromRequestParts<AppState> for CurrentOwner {
    type Rejection = Error;

    #[instrument(skip(parts, state))]
    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let header_name = &state.config.auth.owner_header;
        let owner = parts
            .headers
            .get(header_name.as_str())
            .and_then(|h| h.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        match owner {
            Some(id) => {
                trace!(owner = id, "Resolved owner from header");
                Ok(CurrentOwner { id: id.to_string() })
            }
            None => Err(Error::Unauthenticated {
                message: Some(format!("Missing {header_name} header")),
            }),
        }
    }
}
