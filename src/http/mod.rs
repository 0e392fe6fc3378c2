//! HTTP server serving the utility routes and the configured mock endpoints.

pub mod compiler;
pub mod cors;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod types;

pub use compiler::{compile_endpoints, EndpointError, RouteClaims, RoutePattern};
pub use routes::build_router;
pub use state::AppState;
