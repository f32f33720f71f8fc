//! # Error Handling
//!
//! HTTP-edge error type and its conversion into JSON responses.
//!
//! ## Layers:
//! - **AnalysisError** (in `analysis`): typed failures of the pipeline,
//!   decoder, classifier and store
//! - **AppError** (here): what a handler returns; implements
//!   `ResponseError` so actix renders it directly
//! - **anyhow::Error**: process edge only (startup, config, model loading),
//!   converted to `AppError::Internal` when it reaches a handler
//!
//! ## JSON Response Format:
//! ```json
//! {
//!   "error": {
//!     "type": "clip_too_short",
//!     "message": "Audio is too short for analysis: 2.50s (one chunk needs 4.00s)",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```

use crate::analysis::AnalysisError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Errors returned by HTTP handlers.
///
/// ## Error Categories:
/// - **Internal / ConfigError**: server-side problems (500)
/// - **BadRequest / ValidationError**: the client sent something invalid (400)
/// - **NotFound**: requested resource doesn't exist (404)
/// - **PayloadTooLarge**: upload above `max_audio_bytes` (413)
/// - **ServiceUnavailable**: no model loaded or all analysis slots busy (503)
/// - **Analysis**: a pipeline failure; status depends on its kind
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    NotFound(String),
    ConfigError(String),
    ValidationError(String),
    PayloadTooLarge(String),
    ServiceUnavailable(String),
    Analysis(AnalysisError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::Analysis(err) => write!(f, "Analysis failed: {}", err),
        }
    }
}

impl AppError {
    /// Machine-readable error type used in the JSON body.
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal_error",
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::ConfigError(_) => "config_error",
            AppError::ValidationError(_) => "validation_error",
            AppError::PayloadTooLarge(_) => "payload_too_large",
            AppError::ServiceUnavailable(_) => "service_unavailable",
            AppError::Analysis(err) => err.kind(),
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Internal(msg)
            | AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::ConfigError(msg)
            | AppError::ValidationError(msg)
            | AppError::PayloadTooLarge(msg)
            | AppError::ServiceUnavailable(msg) => msg.clone(),
            AppError::Analysis(err) => err.to_string(),
        }
    }
}

/// Status code for each analysis failure kind.
pub fn analysis_status(err: &AnalysisError) -> StatusCode {
    match err {
        AnalysisError::Format(_) | AnalysisError::ClipTooShort { .. } => StatusCode::BAD_REQUEST,
        AnalysisError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        AnalysisError::FeatureExtraction { .. }
        | AnalysisError::Persistence(_)
        | AnalysisError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Build the standard JSON error body.
pub fn error_body(error_type: &str, message: &str) -> serde_json::Value {
    json!({
        "error": {
            "type": error_type,
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339()
        }
    })
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Analysis(err) => analysis_status(err),
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(error_body(self.error_type(), &self.message()))
    }
}

/// Pipeline failures keep their kind as the error type.
impl From<AnalysisError> for AppError {
    fn from(err: AnalysisError) -> Self {
        AppError::Analysis(err)
    }
}

/// Anything reaching a handler as `anyhow::Error` is a server-side problem.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors come from malformed client input.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Shorthand for handler results.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analysis_status_mapping() {
        let cases = [
            (AnalysisError::Format("bad".to_string()), StatusCode::BAD_REQUEST),
            (
                AnalysisError::ClipTooShort {
                    duration_seconds: 1.0,
                    chunk_seconds: 4.0,
                },
                StatusCode::BAD_REQUEST,
            ),
            (AnalysisError::ModelUnavailable("none".to_string()), StatusCode::SERVICE_UNAVAILABLE),
            (AnalysisError::Persistence("down".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).status_code(), status);
        }
    }

    #[test]
    fn test_analysis_kind_is_the_error_type() {
        let err = AppError::from(AnalysisError::ClipTooShort {
            duration_seconds: 2.5,
            chunk_seconds: 4.0,
        });
        assert_eq!(err.error_type(), "clip_too_short");
    }

    #[test]
    fn test_error_body_shape() {
        let body = error_body("not_found", "missing");
        assert_eq!(body["error"]["type"], "not_found");
        assert_eq!(body["error"]["message"], "missing");
        assert!(body["error"]["timestamp"].is_string());
    }
}
