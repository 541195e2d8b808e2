//! Propagation job handlers

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use namewright_api_types::{
    ErrorListResponse, JobListQuery, JobListResponse, ResolveErrorResponse, RetryJobRequest,
    SubmitJobRequest,
};
use uuid::Uuid;

use crate::application::propagation::JobSubmission;
use crate::application::repos::JobQueryFilter;
use crate::infra::http::api::error::ApiError;
use crate::infra::http::api::models::{error_response, job_response};
use crate::infra::http::api::state::ApiState;

const DEFAULT_LIST_LIMIT: u32 = 50;
const MAX_LIST_LIMIT: u32 = 200;

pub async fn list_jobs(
    State(state): State<ApiState>,
    Query(query): Query<JobListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = JobQueryFilter {
        workspace_id: query.workspace_id,
        status: query.status,
        job_type: query.job_type,
        limit: Some(query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)),
    };

    let jobs = state.engine.propagation.list_jobs(&filter).await?;

    Ok(Json(JobListResponse {
        items: jobs.into_iter().map(job_response).collect(),
    }))
}

pub async fn submit_job(
    State(state): State<ApiState>,
    Json(payload): Json<SubmitJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .engine
        .propagation
        .submit(JobSubmission {
            workspace_id: payload.workspace_id,
            job_type: payload.job_type,
            source: payload.source,
            metadata: payload.metadata,
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(job_response(job))))
}

pub async fn get_job(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.engine.propagation.get_job(id).await?;
    Ok(Json(job_response(job)))
}

pub async fn retry_job(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RetryJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .engine
        .propagation
        .retry(id, payload.retry_failed_only)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(job_response(job))))
}

pub async fn cancel_job(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.engine.propagation.cancel(id).await?;
    Ok(Json(job_response(job)))
}

pub async fn approve_job(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.engine.propagation.approve(id).await?;
    Ok(Json(job_response(job)))
}

pub async fn list_job_errors(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let errors = state.engine.propagation.list_errors(id).await?;
    Ok(Json(ErrorListResponse {
        items: errors.into_iter().map(error_response).collect(),
    }))
}

pub async fn resolve_error(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let resolved = state.engine.propagation.resolve_error(id).await?;
    Ok(Json(ResolveErrorResponse { resolved }))
}
