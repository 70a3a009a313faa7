//! OpenAPI documentation for the owner and provisioner APIs.
//!
//! Served as JSON at `/api/openapi.json` and rendered with Scalar at `/api/docs`. The inference
//! gateway is not described here; it mirrors the upstream inference API.

use utoipa::{
    Modify, OpenApi,
    openapi::security::{ApiKey, ApiKeyValue, SecurityScheme},
};

use crate::api;

/// Header-based security schemes for both surfaces.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.security_schemes.insert(
            "OwnerHeader".to_string(),
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                "x-claw-owner",
                "Owner identity, set by the authenticating proxy in front of the controller.",
            ))),
        );
        components.security_schemes.insert(
            "ProvisionerKey".to_string(),
            SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::with_description(
                "x-provisioner-key",
                "Shared secret held by the provisioning service.",
            ))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::claws::create_claw,
        api::handlers::claws::list_claws,
        api::handlers::claws::get_claw,
        api::handlers::claws::update_claw,
        api::handlers::claws::delete_claw,
        api::handlers::environment::get_env,
        api::handlers::environment::put_env,
        api::handlers::environment::restart_claw,
        api::handlers::environment::get_logs,
        api::handlers::messages::list_messages,
        api::handlers::messages::send_message,
        api::handlers::messages::stream_message,
    ),
    components(schemas(
        api::models::claws::ClawCreate,
        api::models::claws::ClawUpdate,
        api::models::claws::ClawResponse,
        api::models::claws::ClawListResponse,
        api::models::environment::EnvResponse,
        api::models::environment::EnvUpdate,
        api::models::environment::LogsResponse,
        api::models::messages::MessageCreate,
        api::models::messages::MessageResponse,
        api::models::messages::MessageListResponse,
        api::models::messages::SendMessageResponse,
    )),
    tags(
        (name = "claws", description = "Deploy and manage claws"),
        (name = "environment", description = "Container environment, restarts and logs"),
        (name = "messages", description = "Talk to a claw"),
    )
)]
pub struct OwnerApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::provisioning::list_pending,
        api::handlers::provisioning::report_result,
    ),
    components(schemas(
        api::models::provisioning::PendingClaw,
        api::models::provisioning::PendingClawsResponse,
        api::models::provisioning::ProvisionResult,
    )),
    tags((name = "provisioning", description = "Internal provisioner hand-off"))
)]
pub struct ProvisionerApi;

#[derive(OpenApi)]
#[openapi(
    info(title = "Claw Fleet Controller API", description = "Owner and provisioner endpoints of clawctl."),
    modifiers(&SecurityAddon),
    nest(
        (path = "/api/v1", api = OwnerApi),
        (path = "/internal/v1", api = ProvisionerApi),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_both_surfaces() {
        let json = ApiDoc::openapi().to_json().unwrap();
        assert!(json.contains("Claw Fleet Controller API"));
        assert!(json.contains("/api/v1/claws/{id}/messages/stream"));
        assert!(json.contains("/internal/v1/claws/pending"));
        assert!(json.contains("OwnerHeader"));
        assert!(json.contains("ProvisionerKey"));
    }
}
