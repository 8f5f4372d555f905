//! Request-level errors and their HTTP mapping.

use axum::{
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::embedding::EmbedError;
use crate::fetch::FetchError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("article already exists: {key}")]
    AlreadyExists { key: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("a batch analysis is already running")]
    BatchInProgress,
}

impl AnalyzeError {
    /// Label for logs and the `analyze_errors_total` metric.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalyzeError::InvalidRequest(_) => "invalid_request",
            AnalyzeError::AlreadyExists { .. } => "already_exists",
            AnalyzeError::Fetch(_) => "fetch",
            AnalyzeError::Storage(_) => "storage",
            AnalyzeError::BatchInProgress => "batch_in_progress",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AnalyzeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AnalyzeError::AlreadyExists { .. } => StatusCode::CONFLICT,
            AnalyzeError::Fetch(_) => StatusCode::BAD_GATEWAY,
            AnalyzeError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
            AnalyzeError::BatchInProgress => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for AnalyzeError {
    fn into_response(self) -> Response {
        let body = match &self {
            AnalyzeError::AlreadyExists { key } => json!({
                "success": false,
                "error": "Article already exists",
                "already_exists": true,
                "key": key,
            }),
            other => json!({ "success": false, "error": other.to_string() }),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Errors from the listing and article management endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid query: {0}")]
    BadQuery(String),
    #[error("invalid request: {0}")]
    BadBody(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error(transparent)]
    Embedding(#[from] EmbedError),
}

impl From<QueryRejection> for ApiError {
    fn from(rej: QueryRejection) -> Self {
        ApiError::BadQuery(rej.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadQuery(_) | ApiError::BadBody(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Storage(_) | ApiError::Embedding(_) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (
            status,
            Json(json!({ "success": false, "error": self.to_string() })),
        )
            .into_response()
    }
}
