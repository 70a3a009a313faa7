use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::{
    AppState,
    api::models::claws::{ClawCreate, ClawListResponse, ClawResponse, ClawUpdate},
    auth::CurrentOwner,
    crypto::generate_proxy_token,
    db::{
        handlers::DeploymentFilter,
        models::deployments::{Deployment, DeploymentCreateDBRequest, DeploymentStatus},
    },
    errors::{Error, Result},
    types::{ClawId, abbrev_uuid},
};

pub const CLAW_PAGE_SIZE: i64 = 50;

/// Load a claw owned by the caller. Claws of other owners are reported as missing.
pub(crate) async fn load_owned(state: &AppState, owner: &CurrentOwner, id: ClawId) -> Result<Deployment> {
    match state.deployments.get_by_id(id).await? {
        Some(d) if d.owner_id == owner.id => Ok(d),
        _ => Err(Error::NotFound {
            resource: "Claw".to_string(),
            id: id.to_string(),
        }),
    }
}

#[utoipa::path(
    post,
    path = "/claws",
    tag = "claws",
    summary = "Deploy a claw",
    description = "Create a claw record and queue it for provisioning. Unpaid claws get a trial deadline when trials are enabled.",
    request_body = ClawCreate,
    responses(
        (status = 201, description = "Claw queued for provisioning", body = ClawResponse),
        (status = 401, description = "Missing owner identity"),
        (status = 422, description = "Invalid name or tier"),
    ),
    security(("OwnerHeader" = []))
)]
#[instrument(skip_all, fields(owner = %owner.id, claw = tracing::field::Empty), err)]
pub async fn create_claw(
    State(state): State<AppState>,
    owner: CurrentOwner,
    Json(body): Json<ClawCreate>,
) -> Result<(StatusCode, Json<ClawResponse>)> {
    let (name, tier) = body.validate()?;

    let trial_ends_at = if state.config.trials.enabled {
        let duration = chrono::Duration::from_std(state.config.trials.duration).map_err(|e| Error::Internal {
            operation: format!("compute trial deadline: {e}"),
        })?;
        Some(Utc::now() + duration)
    } else {
        None
    };

    let mut deployment = state
        .deployments
        .create(&DeploymentCreateDBRequest {
            owner_id: owner.id.clone(),
            name,
            tier,
            proxy_token: generate_proxy_token(),
            trial_ends_at,
        })
        .await?;
    tracing::Span::current().record("claw", abbrev_uuid(&deployment.id));

    // Hand the record over to the provisioner
    deployment.status = DeploymentStatus::Provisioning;
    let deployment = state.deployments.save(&deployment).await?;
    info!(tier = %deployment.tier, "Claw queued for provisioning");

    Ok((StatusCode::CREATED, Json(deployment.into())))
}

#[utoipa::path(
    get,
    path = "/claws",
    tag = "claws",
    summary = "List claws",
    description = "The caller's claws, newest first.",
    responses(
        (status = 200, description = "Claws owned by the caller", body = ClawListResponse),
        (status = 401, description = "Missing owner identity"),
    ),
    security(("OwnerHeader" = []))
)]
#[instrument(skip_all, fields(owner = %owner.id), err)]
pub async fn list_claws(State(state): State<AppState>, owner: CurrentOwner) -> Result<Json<ClawListResponse>> {
    let claws: Vec<ClawResponse> = state
        .deployments
        .list(&DeploymentFilter::new(CLAW_PAGE_SIZE).with_owner(owner.id))
        .await?
        .into_iter()
        .map(ClawResponse::from)
        .collect();

    Ok(Json(ClawListResponse {
        total: claws.len(),
        claws,
    }))
}

#[utoipa::path(
    get,
    path = "/claws/{id}",
    tag = "claws",
    summary = "Get a claw",
    params(("id" = uuid::Uuid, Path, description = "Claw ID")),
    responses(
        (status = 200, description = "Claw details", body = ClawResponse),
        (status = 404, description = "No such claw for this owner"),
    ),
    security(("OwnerHeader" = []))
)]
#[instrument(skip_all, fields(owner = %owner.id, claw = %abbrev_uuid(&id)), err)]
pub async fn get_claw(State(state): State<AppState>, owner: CurrentOwner, Path(id): Path<ClawId>) -> Result<Json<ClawResponse>> {
    Ok(Json(load_owned(&state, &owner, id).await?.into()))
}

#[utoipa::path(
    patch,
    path = "/claws/{id}",
    tag = "claws",
    summary = "Update claw settings",
    description = "Change visibility and heartbeat settings. Omitted fields are left as they are.",
    params(("id" = uuid::Uuid, Path, description = "Claw ID")),
    request_body = ClawUpdate,
    responses(
        (status = 200, description = "Updated claw", body = ClawResponse),
        (status = 404, description = "No such claw for this owner"),
        (status = 422, description = "Invalid heartbeat interval or instruction"),
    ),
    security(("OwnerHeader" = []))
)]
#[instrument(skip_all, fields(owner = %owner.id, claw = %abbrev_uuid(&id)), err)]
pub async fn update_claw(
    State(state): State<AppState>,
    owner: CurrentOwner,
    Path(id): Path<ClawId>,
    Json(body): Json<ClawUpdate>,
) -> Result<Json<ClawResponse>> {
    let mut deployment = load_owned(&state, &owner, id).await?;
    body.apply(&mut deployment)?;
    let deployment = state.deployments.save(&deployment).await?;
    Ok(Json(deployment.into()))
}

#[utoipa::path(
    delete,
    path = "/claws/{id}",
    tag = "claws",
    summary = "Delete a claw",
    description = "Remove the backing container (best effort) and delete the record.",
    params(("id" = uuid::Uuid, Path, description = "Claw ID")),
    responses(
        (status = 204, description = "Claw deleted"),
        (status = 404, description = "No such claw for this owner"),
    ),
    security(("OwnerHeader" = []))
)]
#[instrument(skip_all, fields(owner = %owner.id, claw = %abbrev_uuid(&id)), err)]
pub async fn delete_claw(State(state): State<AppState>, owner: CurrentOwner, Path(id): Path<ClawId>) -> Result<StatusCode> {
    let deployment = load_owned(&state, &owner, id).await?;

    if deployment.has_container()
        && let Err(e) = state.runtime.remove(&deployment.container_ref).await
    {
        warn!(error = %e, "Failed to remove claw container, deleting record anyway");
    }

    if !state.deployments.delete(deployment.id).await? {
        return Err(Error::NotFound {
            resource: "Claw".to_string(),
            id: id.to_string(),
        });
    }
    info!("Deleted claw");
    Ok(StatusCode::NO_CONTENT)
}
