//! Origin-validating CORS layer for endpoints with `allowCors`.

use std::sync::Arc;

use axum::http::{
    header::{self, HeaderName, HeaderValue},
    request::Parts,
    Method,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::debug;

/// Check an origin against the allowed list.
///
/// An origin is allowed when an entry is `*`, equals it, or is a suffix of it,
/// so allowing `example.com` also allows `api.example.com`.
pub fn origin_allowed(allowed: &[String], origin: &str) -> bool {
    allowed.iter().any(|entry| entry == "*" || origin == entry || origin.ends_with(entry.as_str()))
}

/// Build the CORS layer for one endpoint.
///
/// # Parameters
///
/// - `allowed` - Allowed origins as configured
///
/// # Returns
///
/// Returns a `CorsLayer` allowing credentials and the common methods and headers.
pub fn cors_layer(allowed: &[String]) -> CorsLayer {
    let allowed: Arc<[String]> = allowed.into();

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _parts: &Parts| {
            let ok = origin.to_str().is_ok_and(|origin| origin_allowed(&allowed, origin));
            if !ok {
                debug!(origin = ?origin, "CORS - not allowed origin");
            }
            ok
        }))
        .allow_methods([
            Method::OPTIONS,
            Method::HEAD,
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
        ])
        .allow_headers([
            header::ACCEPT,
            HeaderName::from_static("x-requested-with"),
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::ACCESS_CONTROL_MAX_AGE,
        ])
        .allow_credentials(true)
}
