//! Internal endpoints for the provisioning service.
//!
//! The provisioner polls for claws in `provisioning` status, starts a container for each,
//! then reports the outcome back here.

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::{info, instrument, warn};

use crate::{
    AppState,
    api::models::{
        claws::ClawResponse,
        provisioning::{PendingClaw, PendingClawsResponse, ProvisionResult},
    },
    auth::Provisioner,
    db::{handlers::DeploymentFilter, models::deployments::DeploymentStatus},
    errors::{Error, Result},
    types::{ClawId, abbrev_container, abbrev_uuid},
};

pub const PENDING_PAGE_SIZE: i64 = 50;

#[utoipa::path(
    get,
    path = "/claws/pending",
    tag = "provisioning",
    summary = "List claws awaiting a container",
    responses(
        (status = 200, description = "Claws in provisioning status, newest first", body = PendingClawsResponse),
        (status = 401, description = "Missing or invalid provisioner key"),
    ),
    security(("ProvisionerKey" = []))
)]
#[instrument(skip_all, err)]
pub async fn list_pending(State(state): State<AppState>, _: Provisioner) -> Result<Json<PendingClawsResponse>> {
    let claws: Vec<PendingClaw> = state
        .deployments
        .list(&DeploymentFilter::new(PENDING_PAGE_SIZE).with_statuses(vec![DeploymentStatus::Provisioning]))
        .await?
        .into_iter()
        .map(PendingClaw::from)
        .collect();

    Ok(Json(PendingClawsResponse {
        total: claws.len(),
        claws,
    }))
}

#[utoipa::path(
    post,
    path = "/claws/{id}/provision-result",
    tag = "provisioning",
    summary = "Report a provisioning outcome",
    params(("id" = uuid::Uuid, Path, description = "Claw ID")),
    request_body = ProvisionResult,
    responses(
        (status = 200, description = "Outcome recorded", body = ClawResponse),
        (status = 401, description = "Missing or invalid provisioner key"),
        (status = 404, description = "Unknown claw"),
        (status = 422, description = "Status is not running or failed"),
    ),
    security(("ProvisionerKey" = []))
)]
#[instrument(skip_all, fields(claw = %abbrev_uuid(&id)), err)]
pub async fn report_result(
    State(state): State<AppState>,
    _: Provisioner,
    Path(id): Path<ClawId>,
    Json(body): Json<ProvisionResult>,
) -> Result<Json<ClawResponse>> {
    let mut deployment = state.deployments.get_by_id(id).await?.ok_or_else(|| Error::NotFound {
        resource: "Claw".to_string(),
        id: id.to_string(),
    })?;

    body.apply(&mut deployment)?;
    let deployment = state.deployments.save(&deployment).await?;

    match deployment.status {
        DeploymentStatus::Running => info!(container = abbrev_container(&deployment.container_ref), "Claw is running"),
        _ => warn!(error = %deployment.error_message, "Claw provisioning failed"),
    }
    Ok(Json(deployment.into()))
}
