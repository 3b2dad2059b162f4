//! Response envelope and error to status mapping
//!
//! Every response, success or failure, has the shape
//! `{"result": <payload or null>, "error": "<message or empty>"}`.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use kvgate_store::{ErrorKind, StoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

/// Handler result type
pub type ApiResult = Result<Json<Envelope>, ApiError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub result: Value,
    pub error: String,
}

impl Envelope {
    pub fn ok(result: impl Into<Value>) -> Self {
        Self {
            result: result.into(),
            error: String::new(),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            result: Value::Null,
            error: message.into(),
        }
    }
}

/// Wrap a payload in a successful envelope
pub fn ok(result: impl Into<Value>) -> ApiResult {
    Ok(Json(Envelope::ok(result)))
}

/// HTTP layer errors
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Missing query parameter: {0}")]
    MissingParam(&'static str),

    #[error("Invalid query parameter {name}: {reason}")]
    InvalidParam { name: &'static str, reason: String },

    #[error("Invalid request body: {0}")]
    Body(String),
}

impl ApiError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Store(err) => match err.kind() {
                ErrorKind::InvalidKey
                | ErrorKind::EmptyKeyOrValue
                | ErrorKind::InvalidTtl
                | ErrorKind::UnsupportedType => 400,
                ErrorKind::NotFound => 404,
                ErrorKind::Conflict => 409,
                ErrorKind::Backend => 422,
                ErrorKind::BackendUnavailable => 503,
                // corrupt stored data is a server fault
                ErrorKind::MalformedElement
                | ErrorKind::PartialWrite
                | ErrorKind::Serialization => 500,
            },
            ApiError::MissingParam(_) | ApiError::InvalidParam { .. } => 400,
            ApiError::Body(_) => 422,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Body(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            debug!(status = status.as_u16(), error = %self, "Request rejected");
        }
        (status, Json(Envelope::err(self.to_string()))).into_response()
    }
}
