pub mod error;
pub mod handlers;
pub mod models;
pub mod state;

pub use state::ApiState;

use axum::{
    Router,
    routing::{get, post},
};

pub fn build_api_router(state: ApiState) -> Router {
    Router::new()
        .route(
            "/api/v1/jobs",
            get(handlers::list_jobs).post(handlers::submit_job),
        )
        .route("/api/v1/jobs/{id}", get(handlers::get_job))
        .route("/api/v1/jobs/{id}/retry", post(handlers::retry_job))
        .route("/api/v1/jobs/{id}/cancel", post(handlers::cancel_job))
        .route("/api/v1/jobs/{id}/approve", post(handlers::approve_job))
        .route("/api/v1/jobs/{id}/errors", get(handlers::list_job_errors))
        .route("/api/v1/errors/{id}/resolve", post(handlers::resolve_error))
        .route(
            "/api/v1/workspaces/{id}/propagation-settings",
            get(handlers::get_settings).patch(handlers::patch_settings),
        )
        .route("/api/v1/mutations", post(handlers::record_mutation))
        .route(
            "/api/v1/catalogs/{kind}/{rule_id}",
            get(handlers::get_catalog),
        )
        .with_state(state)
}
