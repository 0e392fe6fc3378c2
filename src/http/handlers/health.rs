//! Health check and version handlers.

use axum::{extract::State, Json};

use crate::http::state::AppState;
use crate::http::types::{HealthResponse, VersionResponse};

/// Health check endpoint.
///
/// # Returns
///
/// Returns `{"status":"OK"}` while the server is up.
pub async fn healthcheck() -> Json<HealthResponse> {
    Json(HealthResponse { status: "OK".to_string() })
}

/// Version endpoint.
///
/// # Parameters
///
/// - `state` - Application state holding the version string
///
/// # Returns
///
/// Returns `{"version": <version>}`.
pub async fn version(State(state): State<AppState>) -> Json<VersionResponse> {
    Json(VersionResponse { version: state.version })
}
