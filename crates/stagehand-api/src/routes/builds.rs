//! Build endpoints.
//!
//! Invoke and stop run on a spawned task with a child of the server's
//! shutdown token, so a client that disconnects mid-request cannot abandon
//! a half-applied claim.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use stagehand_core::artifact::BuildOutputs;
use stagehand_core::build::{BuildRequest, NewBuild};
use stagehand_core::ledger::PhaseLedger;
use stagehand_core::{BuildId, OwnerId, ProjectId};
use stagehand_scheduler::{InvokeRequest, OutputsReport, PhaseReport};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(register_build))
        .route("/in-progress", get(list_in_progress))
        .route("/in-queue", get(list_in_queue))
        .route("/{id}", get(get_build).delete(delete_build))
        .route("/{id}/invoke", post(invoke_build))
        .route("/{id}/stop", post(stop_build))
        .route("/{id}/ledger", get(get_ledger))
        .route("/{id}/phases", post(report_phase))
        .route("/{id}/outputs", get(get_outputs).post(record_outputs))
}

async fn register_build(
    State(state): State<AppState>,
    Json(req): Json<NewBuild>,
) -> Result<(StatusCode, Json<BuildRequest>), ApiError> {
    let build = state.tracker.register(&req).await?;
    Ok((StatusCode::CREATED, Json(build)))
}

async fn list_in_progress(
    State(state): State<AppState>,
) -> Result<Json<Vec<BuildRequest>>, ApiError> {
    Ok(Json(state.queries.in_progress().await?))
}

async fn list_in_queue(State(state): State<AppState>) -> Result<Json<Vec<BuildRequest>>, ApiError> {
    Ok(Json(state.queries.in_queue().await?))
}

async fn get_build(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
) -> Result<Json<BuildRequest>, ApiError> {
    Ok(Json(state.queries.build(id).await?))
}

async fn delete_build(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
) -> Result<StatusCode, ApiError> {
    state.tracker.soft_delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct InvokeBody {
    owner_id: OwnerId,
    project_id: ProjectId,
    #[serde(default)]
    send_notification: bool,
    #[serde(default)]
    rebuild: bool,
}

async fn invoke_build(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
    Json(body): Json<InvokeBody>,
) -> Result<Json<PhaseLedger>, ApiError> {
    let req = InvokeRequest {
        owner_id: body.owner_id,
        project_id: body.project_id,
        build_id: id,
        send_notification: body.send_notification,
        rebuild: body.rebuild,
    };
    let orchestrator = state.orchestrator.clone();
    let token = state.shutdown.child_token();
    let ledger = tokio::spawn(async move { orchestrator.invoke(req, &token).await }).await??;
    Ok(Json(ledger))
}

async fn stop_build(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
) -> Result<Json<BuildRequest>, ApiError> {
    let orchestrator = state.orchestrator.clone();
    let token = state.shutdown.child_token();
    let build = tokio::spawn(async move { orchestrator.stop_build(id, &token).await }).await??;
    Ok(Json(build))
}

async fn get_ledger(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
) -> Result<Json<PhaseLedger>, ApiError> {
    Ok(Json(state.queries.ledger(id).await?))
}

async fn report_phase(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
    Json(report): Json<PhaseReport>,
) -> Result<Json<PhaseLedger>, ApiError> {
    Ok(Json(state.tracker.report_phase(id, report).await?))
}

async fn get_outputs(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
) -> Result<Json<BuildOutputs>, ApiError> {
    Ok(Json(state.queries.outputs(id).await?))
}

async fn record_outputs(
    State(state): State<AppState>,
    Path(id): Path<BuildId>,
    Json(report): Json<OutputsReport>,
) -> Result<(StatusCode, Json<BuildOutputs>), ApiError> {
    let outputs = state.tracker.record_outputs(id, report).await?;
    Ok((StatusCode::CREATED, Json(outputs)))
}
