use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::pipeline::models::PhaseTag;

/// Failure taxonomy for everything below the HTTP boundary.
///
/// Only `Fatal` is allowed to abort a request. The other variants are absorbed
/// by the agents (fallback or a failed `PhaseResult`) and never reach the
/// orchestrator as errors.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Timeout or transport failure after the invoker's retry policy ran out.
    #[error("transient call failure: {0}")]
    Transient(String),

    /// No backend configured, or the backend rejected the call outright.
    #[error("remote backend unavailable: {0}")]
    Unavailable(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Structured output parsed but is missing required fields.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("phase {phase} failed: {reason}")]
    Fatal { phase: PhaseTag, reason: String },
}

impl PipelineError {
    pub fn fatal(phase: PhaseTag, reason: impl Into<String>) -> Self {
        PipelineError::Fatal {
            phase,
            reason: reason.into(),
        }
    }

    /// True for errors that a phase-level fallback may absorb.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, PipelineError::Fatal { .. })
    }
}

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Analysis failed in phase {phase}: {message}")]
    PhaseFailed { phase: PhaseTag, message: String },

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Fatal { phase, reason } => AppError::PhaseFailed {
                phase,
                message: reason,
            },
            PipelineError::Validation(msg) => AppError::Validation(msg),
            other => AppError::Internal(anyhow::anyhow!(other)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::PhaseFailed { phase, message } => {
                tracing::error!("Analysis aborted in phase {phase}: {message}");
                (
                    StatusCode::BAD_GATEWAY,
                    "PHASE_FAILED",
                    format!("Analysis could not complete the {phase} phase: {message}"),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}
