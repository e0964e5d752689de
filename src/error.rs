//! Error taxonomy shared by every relay.
//!
//! Configuration errors are raised before any outbound call, upstream errors
//! carry the third party's response body back to the caller, and bad-request
//! errors cover multipart forms missing a required field.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// A relay was called but its upstream section is not configured.
    #[error("{0} not configured")]
    Configuration(&'static str),

    /// A third-party API answered with a non-2xx status or could not be reached.
    #[error("{context} failed: {body}")]
    Upstream {
        context: String,
        status: Option<u16>,
        body: String,
    },

    #[error("{0}")]
    BadRequest(String),
}

impl AppError {
    pub fn upstream(context: impl Into<String>, status: Option<u16>, body: impl Into<String>) -> Self {
        Self::Upstream {
            context: context.into(),
            status,
            body: body.into(),
        }
    }

    /// Wraps a transport-level reqwest failure (connect, timeout, body read).
    pub fn transport(context: impl Into<String>, err: reqwest::Error) -> Self {
        Self::Upstream {
            context: context.into(),
            status: err.status().map(|s| s.as_u16()),
            body: err.to_string(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match &self {
            Self::Configuration(service) => {
                tracing::error!(service, "relay called without configuration")
            }
            Self::Upstream {
                context, status, ..
            } => tracing::error!(%context, upstream_status = ?status, "upstream call failed"),
            Self::BadRequest(message) => tracing::debug!(%message, "rejected request"),
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Outcome of a write whose failure must never fail the enclosing operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestEffort {
    Written,
    /// Nothing to write (no rows survived shape checking, or the branch does not apply).
    Skipped,
    Failed(String),
}

impl BestEffort {
    pub fn from_result<T>(result: Result<T>) -> Self {
        match result {
            Ok(_) => Self::Written,
            Err(err) => Self::Failed(err.to_string()),
        }
    }

    /// Logs a failed outcome against `table`; other outcomes are silent.
    pub fn log(&self, table: &str, request_id: &str) {
        if let Self::Failed(reason) = self {
            tracing::warn!(table, request_id, %reason, "best-effort insert failed");
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}
