//! Per-owner build projections.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use stagehand_core::OwnerId;
use stagehand_core::build::BuildRequest;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{owner}/first-queued", get(first_queued))
        .route("/{owner}/latest-uploaded", get(latest_uploaded))
}

async fn first_queued(
    State(state): State<AppState>,
    Path(owner): Path<OwnerId>,
) -> Result<Json<BuildRequest>, ApiError> {
    state
        .queries
        .first_queued(owner)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no queued build for owner {}", owner)))
}

async fn latest_uploaded(
    State(state): State<AppState>,
    Path(owner): Path<OwnerId>,
) -> Result<Json<BuildRequest>, ApiError> {
    state
        .queries
        .latest_uploaded(owner)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no builds for owner {}", owner)))
}
