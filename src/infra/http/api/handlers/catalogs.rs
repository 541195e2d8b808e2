//! Cache-aside reads of derived catalog views

use axum::Json;
use axum::extract::{Path, State};
use axum::response::IntoResponse;

use crate::cache::CatalogKind;
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::state::ApiState;

pub async fn get_catalog(
    State(state): State<ApiState>,
    Path((kind, rule_id)): Path<(String, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let kind = kind
        .parse::<CatalogKind>()
        .map_err(|err| ApiError::bad_request("Unknown catalog kind", Some(err)))?;
    let view = state.engine.catalog.get(kind, rule_id).await?;
    Ok(Json(view))
}
