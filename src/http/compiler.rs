//! Compiles endpoint definitions into mounted routes.
//!
//! Path patterns translate as follows, first match wins:
//!
//! | pattern | mounted as |
//! |---|---|
//! | `/`, `*` or empty | catch-all: `/` and `/{*subpath}` |
//! | `/foo/*` | prefix: `/foo` and `/foo/{*subpath}` |
//! | `/foo/*/bar/*` | exact, wildcards become `{subpath-0}`, `{subpath-1}`, ... |
//! | anything else | exact |
//!
//! A definition that cannot be compiled is logged and skipped; the rest
//! are still mounted. Overlapping definitions are refused up front, the
//! earlier one wins.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::Request,
    http::Method,
    routing::{MethodFilter, MethodRouter},
    Router,
};
use thiserror::Error;
use tower_http::{cors::CorsLayer, services::ServeDir};
use tracing::{field, info, info_span, warn, Span};

use crate::config::Endpoint;
use crate::failure::FailureError;
use crate::http::cors::cors_layer;
use crate::http::handlers::dispatch::DispatchHandler;
use crate::http::state::AppState;
use crate::proxy::ProxyError;

/// Reasons an endpoint is skipped at compile time.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The replay file cannot be read.
    #[error("error in reading JSON file [{}]: {source}", path.display())]
    JsonFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The inline payload cannot be serialized.
    #[error("error in serializing inline JSON: {0}")]
    InlineJson(#[from] serde_json::Error),
    /// The status is not a valid HTTP status code.
    #[error("invalid status code {0}")]
    InvalidStatus(i64),
    /// The proxy target or the server address is invalid.
    #[error(transparent)]
    Proxy(#[from] ProxyError),
    /// The failure injection settings are invalid.
    #[error(transparent)]
    Failure(#[from] FailureError),
    /// The dynamic definition declares both or neither of `write` and `read`.
    #[error("dynamic endpoint must declare exactly one of `write` or `read`")]
    AmbiguousDynamic,
    /// None of the declared methods can be routed.
    #[error("no supported HTTP methods declared")]
    NoMethods,
    /// The router refused the route, e.g. because it overlaps an earlier one.
    #[error("route rejected: {0}")]
    Rejected(String),
}

/// How an endpoint path is mounted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePattern {
    /// Every path.
    CatchAll,
    /// The given path and everything below it.
    Prefix(String),
    /// Exactly the given route, possibly with captured parameters.
    Exact(String),
}

impl RoutePattern {
    /// Translate a configured path.
    ///
    /// # Parameters
    ///
    /// - `path` - Path as written in the mock file
    ///
    /// # Returns
    ///
    /// Returns the mounting pattern; paths are given a leading slash if missing.
    pub fn parse(path: &str) -> Self {
        if path.is_empty() || path == "/" || path == "*" {
            return Self::CatchAll;
        }

        let path = if path.starts_with('/') { path.to_string() } else { format!("/{path}") };

        if let Some(parent) = path.strip_suffix("/*") {
            return if parent.is_empty() { Self::CatchAll } else { Self::Prefix(parent.to_string()) };
        }

        if path.split('/').any(|segment| segment == "*") {
            let mut index = 0;
            let rewritten: Vec<String> = path
                .split('/')
                .map(|segment| {
                    if segment == "*" {
                        let param = format!("{{subpath-{index}}}");
                        index += 1;
                        param
                    } else {
                        segment.to_string()
                    }
                })
                .collect();
            return Self::Exact(rewritten.join("/"));
        }

        Self::Exact(path)
    }

    /// The router paths this pattern occupies.
    pub fn routes(&self) -> Vec<String> {
        match self {
            Self::CatchAll => vec!["/".to_string(), "/{*subpath}".to_string()],
            Self::Prefix(prefix) => vec![prefix.clone(), format!("{prefix}/{{*subpath}}")],
            Self::Exact(path) => vec![path.clone()],
        }
    }
}

/// Router paths already taken, with the methods taken on each.
///
/// axum panics when a method is routed twice on one path; checking claims
/// first turns the common overlaps into an ordinary skip.
#[derive(Debug, Default)]
pub struct RouteClaims {
    /// `None` means every method, as for static directories.
    routes: HashMap<String, Option<Vec<Method>>>,
}

impl RouteClaims {
    /// Claims for routes mounted outside the compiler, each answering `GET`.
    pub fn with_get_routes(paths: &[&str]) -> Self {
        let mut claims = Self::default();
        for path in paths {
            claims.claim(&[path.to_string()], Some([Method::GET].as_slice()));
        }
        claims
    }

    /// Check that none of `methods` is taken on any of `paths`.
    ///
    /// `None` asks for every method.
    pub fn check(&self, paths: &[String], methods: Option<&[Method]>) -> Result<(), EndpointError> {
        for path in paths {
            let overlap = match (self.routes.get(path), methods) {
                (None, _) => None,
                (Some(None), _) | (Some(Some(_)), None) => Some("any method".to_string()),
                (Some(Some(taken)), Some(wanted)) => {
                    wanted.iter().find(|method| taken.contains(method)).map(ToString::to_string)
                }
            };
            if let Some(method) = overlap {
                return Err(EndpointError::Rejected(format!(
                    "overlapping route [{path}] for {method}, already mounted by an earlier definition"
                )));
            }
        }
        Ok(())
    }

    fn claim(&mut self, paths: &[String], methods: Option<&[Method]>) {
        for path in paths {
            match methods {
                Some(methods) => {
                    if let Some(taken) = self.routes.entry(path.clone()).or_insert_with(|| Some(Vec::new())) {
                        taken.extend_from_slice(methods);
                    }
                }
                None => {
                    self.routes.insert(path.clone(), None);
                }
            }
        }
    }
}

/// Mount every endpoint on `router`.
///
/// Endpoints that fail to compile are logged and skipped.
///
/// # Parameters
///
/// - `router` - Router to mount onto
/// - `claims` - Routes already mounted on `router`
/// - `endpoints` - Endpoint definitions, in configuration order
/// - `state` - Compile context
///
/// # Returns
///
/// Returns the router with all compilable endpoints mounted.
pub fn compile_endpoints(
    router: Router,
    mut claims: RouteClaims,
    endpoints: &[Endpoint],
    state: &AppState,
) -> Router {
    endpoints.iter().fold(router, |router, endpoint| {
        let span = info_span!(
            "endpoint",
            path = %endpoint.path,
            methods = ?endpoint.methods,
            status = field::Empty,
        );
        let _entered = span.enter();

        match compile_endpoint(router.clone(), &mut claims, endpoint, state, span.clone()) {
            Ok(router) => {
                info!("setting up path");
                router
            }
            Err(err) => {
                warn!(error = %err, "error in setting up endpoint, skipping it");
                router
            }
        }
    })
}

fn compile_endpoint(
    router: Router,
    claims: &mut RouteClaims,
    endpoint: &Endpoint,
    state: &AppState,
    span: Span,
) -> Result<Router, EndpointError> {
    let pattern = RoutePattern::parse(&endpoint.path);
    let cors = (!endpoint.allow_cors.is_empty()).then(|| cors_layer(&endpoint.allow_cors));

    let routes = pattern.routes();

    if let Some(dir) = endpoint.static_dir.as_deref().filter(|dir| !dir.is_empty()) {
        claims.check(&routes, None)?;
        let router = mount_static(router, &pattern, ServeDir::new(state.resolve_path(dir)), cors)?;
        claims.claim(&routes, None);
        return Ok(router);
    }

    let handler = Arc::new(DispatchHandler::compile(endpoint, state, span)?);

    let mut method_router = MethodRouter::new();
    let mut mounted: Vec<Method> = Vec::new();
    for name in &endpoint.methods {
        let Ok(method) = Method::from_bytes(name.to_ascii_uppercase().as_bytes()) else {
            warn!(method = %name, "ignoring invalid HTTP method");
            continue;
        };
        if mounted.contains(&method) {
            continue;
        }
        let Ok(filter) = MethodFilter::try_from(method.clone()) else {
            warn!(method = %name, "ignoring unsupported HTTP method");
            continue;
        };

        let handler = handler.clone();
        method_router = method_router.on(filter, move |request: Request| handler.clone().dispatch(request));
        mounted.push(method);
    }

    if mounted.is_empty() {
        return Err(EndpointError::NoMethods);
    }
    claims.check(&routes, Some(mounted.as_slice()))?;

    let method_router = match cors {
        Some(cors) => method_router.layer(cors),
        None => method_router,
    };

    let router = routes.iter().try_fold(router, |router, path| {
        let method_router = method_router.clone();
        guarded(router, move |router| router.route(path, method_router))
    })?;
    claims.claim(&routes, Some(mounted.as_slice()));
    Ok(router)
}

fn mount_static(
    router: Router,
    pattern: &RoutePattern,
    files: ServeDir,
    cors: Option<CorsLayer>,
) -> Result<Router, EndpointError> {
    let mut service = Router::new().fallback_service(files);
    if let Some(cors) = cors {
        service = service.layer(cors);
    }

    let pattern = pattern.clone();
    guarded(router, move |router| match pattern {
        RoutePattern::CatchAll => router.fallback_service(service),
        RoutePattern::Prefix(path) | RoutePattern::Exact(path) => router.nest_service(&path, service),
    })
}

/// Apply a mounting step, turning the router's panics on malformed or
/// otherwise conflicting routes into an error.
///
/// The default panic hook still reports such a panic on stderr before it is
/// caught here.
fn guarded(router: Router, mount: impl FnOnce(Router) -> Router) -> Result<Router, EndpointError> {
    panic::catch_unwind(AssertUnwindSafe(move || mount(router))).map_err(|payload| {
        let reason = payload
            .downcast_ref::<String>()
            .cloned()
            .or_else(|| payload.downcast_ref::<&str>().map(|s| (*s).to_string()))
            .unwrap_or_else(|| "unknown reason".to_string());
        EndpointError::Rejected(format!("{reason} (router panic, reported on stderr)"))
    })
}
