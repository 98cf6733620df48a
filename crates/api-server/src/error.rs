//! Maps domain errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use stratum_core::StratumError;
use tracing::error;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Handler error wrapping [`StratumError`].
#[derive(Debug)]
pub struct ApiError(pub StratumError);

impl From<StratumError> for ApiError {
    fn from(e: StratumError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            StratumError::NotFound { .. } => StatusCode::NOT_FOUND,
            StratumError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StratumError::InvalidTransition { .. }
            | StratumError::Ineligible(_)
            | StratumError::Conflict(_) => StatusCode::CONFLICT,
            StratumError::Serialization(_) => StatusCode::BAD_REQUEST,
            StratumError::Config(_) | StratumError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.0.code();
        metrics::counter!("stratum.api.errors", "code" => code).increment(1);

        // Internal details stay in the logs.
        let message = if status.is_server_error() {
            error!(error = %self.0, "Request failed");
            "Internal processing error".to_string()
        } else {
            self.0.to_string()
        };

        (
            status,
            Json(ErrorResponse {
                error: code.to_string(),
                message,
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
