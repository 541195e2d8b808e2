//! Per-workspace propagation settings

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use namewright_api_types::PatchPropagationSettingsRequest;

use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::{settings_patch, settings_response};
use crate::infra::http::api::state::ApiState;

pub async fn get_settings(
    State(state): State<ApiState>,
    Path(workspace_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state.engine.propagation.settings(workspace_id).await?;
    Ok(Json(settings_response(settings)))
}

pub async fn patch_settings(
    State(state): State<ApiState>,
    Path(workspace_id): Path<i64>,
    Json(payload): Json<PatchPropagationSettingsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let settings = state
        .engine
        .propagation
        .update_settings(workspace_id, settings_patch(payload))
        .await?;
    Ok(Json(settings_response(settings)))
}
