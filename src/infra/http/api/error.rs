use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use namewright_api_types::{ApiErrorBody, ApiErrorMessage};

use crate::application::catalog::CatalogError;
use crate::application::error::ErrorReport;
use crate::application::propagation::PropagationServiceError;
use crate::application::repos::RepoError;
use crate::cache::InvalidationError;

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const NOT_FOUND: &str = "not_found";
    pub const WORKSPACE_MISMATCH: &str = "workspace_mismatch";
    pub const SOURCE_MISMATCH: &str = "source_mismatch";
    pub const INVALID_TRANSITION: &str = "invalid_transition";
    pub const INVALID_SETTINGS: &str = "invalid_settings";
    pub const DUPLICATE: &str = "duplicate";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const INTEGRITY: &str = "integrity_error";
    pub const CONFLICT: &str = "conflict";
    pub const DB_TIMEOUT: &str = "db_timeout";
    pub const REPO: &str = "repo_error";
    pub const CACHE: &str = "cache_error";
    pub const CATALOG: &str = "catalog_error";
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
        }
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn not_found(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, hint)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Duplicate { constraint } => Self::new(
                StatusCode::CONFLICT,
                codes::DUPLICATE,
                "Duplicate record",
                Some(constraint),
            ),
            RepoError::NotFound => Self::not_found("Resource not found", None),
            RepoError::InvalidInput { message } => Self::new(
                StatusCode::BAD_REQUEST,
                codes::INVALID_INPUT,
                "Invalid input",
                Some(message),
            ),
            RepoError::Integrity { message } => Self::new(
                StatusCode::CONFLICT,
                codes::INTEGRITY,
                "Integrity constraint violated",
                Some(message),
            ),
            RepoError::Conflict { message } => Self::new(
                StatusCode::CONFLICT,
                codes::CONFLICT,
                "Concurrent modification",
                Some(message),
            ),
            RepoError::Timeout => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::DB_TIMEOUT,
                "Database timeout",
                None,
            ),
            RepoError::Persistence(message) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::REPO,
                "Persistence error",
                Some(message),
            ),
        }
    }
}

impl From<PropagationServiceError> for ApiError {
    fn from(err: PropagationServiceError) -> Self {
        let hint = Some(err.to_string());
        match err {
            PropagationServiceError::UnknownRule { .. }
            | PropagationServiceError::UnknownDimensionValue { .. }
            | PropagationServiceError::UnknownString { .. } => {
                Self::not_found("Source entity not found", hint)
            }
            PropagationServiceError::JobNotFound { .. } => Self::not_found("Job not found", hint),
            PropagationServiceError::ErrorNotFound { .. } => {
                Self::not_found("Propagation error not found", hint)
            }
            PropagationServiceError::WorkspaceMismatch { .. } => Self::new(
                StatusCode::BAD_REQUEST,
                codes::WORKSPACE_MISMATCH,
                "Source belongs to another workspace",
                hint,
            ),
            PropagationServiceError::SourceMismatch { .. } => Self::new(
                StatusCode::BAD_REQUEST,
                codes::SOURCE_MISMATCH,
                "Source does not fit job type",
                hint,
            ),
            PropagationServiceError::InvalidTransition { .. } => Self::new(
                StatusCode::CONFLICT,
                codes::INVALID_TRANSITION,
                "Job cannot make this transition",
                hint,
            ),
            PropagationServiceError::InvalidSettings { .. } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                codes::INVALID_SETTINGS,
                "Invalid propagation settings",
                hint,
            ),
            PropagationServiceError::Repo(repo) => repo.into(),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::RuleNotFound { .. } => {
                Self::not_found("Rule not found", Some(err.to_string()))
            }
            CatalogError::Repo(repo) => repo.into(),
            CatalogError::Serialization(inner) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::CATALOG,
                "Catalog entry could not be built",
                Some(inner.to_string()),
            ),
        }
    }
}

impl From<InvalidationError> for ApiError {
    fn from(err: InvalidationError) -> Self {
        match err {
            InvalidationError::Detection(repo) => repo.into(),
            InvalidationError::Cache(cache) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::CACHE,
                "Cache store unavailable",
                Some(cache.to_string()),
            ),
            InvalidationError::Propagation(propagation) => propagation.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = format!(
            "{}: {}",
            self.code,
            self.hint.as_deref().unwrap_or(self.message)
        );
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        ErrorReport::from_message("infra::http::api", self.status, detail).attach(&mut response);
        response
    }
}
