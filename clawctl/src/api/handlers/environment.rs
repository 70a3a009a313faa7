use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use tracing::instrument;

use crate::{
    AppState,
    api::handlers::claws::load_owned,
    api::models::environment::{EnvResponse, EnvUpdate, LogsQuery, LogsResponse},
    auth::CurrentOwner,
    errors::Result,
    types::{ClawId, abbrev_uuid},
};

#[utoipa::path(
    get,
    path = "/claws/{id}/env",
    tag = "environment",
    summary = "Read claw environment",
    description = "Variables from the claw's env file. Values of secret-looking keys are masked.",
    params(("id" = uuid::Uuid, Path, description = "Claw ID")),
    responses(
        (status = 200, description = "Current variables", body = EnvResponse),
        (status = 404, description = "No such claw for this owner"),
        (status = 422, description = "Claw has no container"),
        (status = 502, description = "Container runtime error"),
    ),
    security(("OwnerHeader" = []))
)]
#[instrument(skip_all, fields(claw = %abbrev_uuid(&id)), err)]
pub async fn get_env(State(state): State<AppState>, owner: CurrentOwner, Path(id): Path<ClawId>) -> Result<Json<EnvResponse>> {
    let deployment = load_owned(&state, &owner, id).await?;
    let vars = state.environment().read_env(&deployment).await?;
    Ok(Json(EnvResponse { vars }))
}

#[utoipa::path(
    put,
    path = "/claws/{id}/env",
    tag = "environment",
    summary = "Replace claw environment",
    params(("id" = uuid::Uuid, Path, description = "Claw ID")),
    request_body = EnvUpdate,
    responses(
        (status = 204, description = "Environment written"),
        (status = 404, description = "No such claw for this owner"),
        (status = 422, description = "Key not allowed, or claw has no container"),
        (status = 502, description = "Container runtime error"),
    ),
    security(("OwnerHeader" = []))
)]
#[instrument(skip_all, fields(claw = %abbrev_uuid(&id)), err)]
pub async fn put_env(
    State(state): State<AppState>,
    owner: CurrentOwner,
    Path(id): Path<ClawId>,
    Json(body): Json<EnvUpdate>,
) -> Result<StatusCode> {
    let deployment = load_owned(&state, &owner, id).await?;
    state.environment().write_env(&deployment, &body.vars, body.restart).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/claws/{id}/restart",
    tag = "environment",
    summary = "Restart a claw",
    params(("id" = uuid::Uuid, Path, description = "Claw ID")),
    responses(
        (status = 204, description = "Container restarted"),
        (status = 404, description = "No such claw for this owner"),
        (status = 422, description = "Claw has no container"),
        (status = 502, description = "Container runtime error"),
    ),
    security(("OwnerHeader" = []))
)]
#[instrument(skip_all, fields(claw = %abbrev_uuid(&id)), err)]
pub async fn restart_claw(State(state): State<AppState>, owner: CurrentOwner, Path(id): Path<ClawId>) -> Result<StatusCode> {
    let deployment = load_owned(&state, &owner, id).await?;
    state.environment().restart(&deployment).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/claws/{id}/logs",
    tag = "environment",
    summary = "Fetch container logs",
    params(("id" = uuid::Uuid, Path, description = "Claw ID"), LogsQuery),
    responses(
        (status = 200, description = "Demultiplexed stdout and stderr", body = LogsResponse),
        (status = 404, description = "No such claw for this owner"),
        (status = 422, description = "Claw has no container"),
        (status = 502, description = "Container runtime error"),
    ),
    security(("OwnerHeader" = []))
)]
#[instrument(skip_all, fields(claw = %abbrev_uuid(&id)), err)]
pub async fn get_logs(
    State(state): State<AppState>,
    owner: CurrentOwner,
    Path(id): Path<ClawId>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<LogsResponse>> {
    let deployment = load_owned(&state, &owner, id).await?;
    let logs = state.environment().logs(&deployment, query.tail, query.since).await?;
    Ok(Json(LogsResponse { logs }))
}
