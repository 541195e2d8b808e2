//! Ingestion of persistence-layer mutation signals

use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use namewright_api_types::MutationRequest;

use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::invalidation_response;
use crate::infra::http::api::state::ApiState;

pub async fn record_mutation(
    State(state): State<ApiState>,
    Json(payload): Json<MutationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .engine
        .trigger
        .record(
            payload.workspace_id,
            payload.op,
            payload.entity,
            payload.change,
        )
        .await?;
    Ok(Json(invalidation_response(outcome)))
}
