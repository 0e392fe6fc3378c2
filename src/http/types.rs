//! Response payloads and the per-request error type.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::jsonpath::PathError;
use crate::proxy::UpstreamError;

/// Body of `GET /healthcheck`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct HealthResponse {
    pub status: String,
}

/// Body of `GET /version`.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct VersionResponse {
    pub version: String,
}

/// Errors a dispatch handler turns into an error response.
///
/// Only the message reaches the client; the underlying cause is logged.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The request body is not valid JSON.
    #[error("wrong request body: {0}")]
    MalformedBody(String),
    /// The fixture key could not be resolved in the request body.
    #[error("error in finding the key: {0}")]
    KeyPath(#[source] PathError),
    /// The fixture value could not be resolved in the request body.
    #[error("error in finding the value: {0}")]
    ValuePath(#[source] PathError),
    /// Nothing is stored for the requested entity or key.
    #[error("value not found for key [{key}]")]
    NotFound { key: String },
    /// Forwarding to the upstream failed.
    #[error("error in proxying to URL")]
    Upstream(#[from] UpstreamError),
}

impl DispatchError {
    /// Get the status code reported to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MalformedBody(_) => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::KeyPath(_) | Self::ValuePath(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = self.status();
        error!(status = status.as_u16(), message = %self, cause = ?self, "handler error");
        (status, self.to_string()).into_response()
    }
}
