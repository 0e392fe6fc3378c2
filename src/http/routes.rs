//! HTTP routing: utility routes plus the compiled mock endpoints.

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::config::Endpoint;
use crate::http::compiler::{compile_endpoints, RouteClaims};
use crate::http::handlers::{healthcheck, version};
use crate::http::state::AppState;

const HEALTHCHECK_PATH: &str = "/healthcheck";
const VERSION_PATH: &str = "/version";

/// Build the Axum router for one mock configuration.
///
/// `/healthcheck` and `/version` are mounted first, so an endpoint claiming
/// `GET` on either path is rejected and skipped.
///
/// # Parameters
///
/// - `state` - Compile context shared by all endpoints
/// - `endpoints` - Endpoint definitions from the mock file
///
/// # Returns
///
/// Returns the configured Axum `Router`.
pub fn build_router(state: AppState, endpoints: &[Endpoint]) -> Router {
    let router = Router::new()
        .route(HEALTHCHECK_PATH, get(healthcheck))
        .route(VERSION_PATH, get(version))
        .with_state(state.clone());
    let claims = RouteClaims::with_get_routes(&[HEALTHCHECK_PATH, VERSION_PATH]);

    compile_endpoints(router, claims, endpoints, &state).layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use axum::{
        extract::Request,
        http::{header, HeaderName, HeaderValue, StatusCode},
        response::IntoResponse,
        routing::get,
        Json, Router,
    };
    use axum_test::TestServer;
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    use super::*;
    use crate::config::MockConfig;

    fn endpoints(value: Value) -> Vec<Endpoint> {
        serde_json::from_value(value).expect("valid endpoint definitions")
    }

    fn server_with(state: AppState, value: Value) -> TestServer {
        TestServer::new(build_router(state, &endpoints(value))).expect("test server")
    }

    fn server(value: Value) -> TestServer {
        server_with(AppState::builder().build().expect("valid configuration"), value)
    }

    /// Serve `app` on an ephemeral local port and return its base URL.
    async fn spawn_upstream(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
        let addr = listener.local_addr().expect("upstream address");
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://{addr}")
    }

    /// Test the utility routes.
    #[tokio::test]
    async fn test_health_and_version() {
        let state = AppState::builder().with_version("1.4.2").build().expect("valid configuration");
        let server = server_with(state, json!([]));

        let response = server.get("/healthcheck").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Value>(), json!({"status": "OK"}));

        let response = server.get("/version").await;
        assert_eq!(response.json::<Value>(), json!({"version": "1.4.2"}));
    }

    /// Test inline payloads and custom statuses.
    #[tokio::test]
    async fn test_inline_json_and_status() {
        let server = server(json!([
            {"methods": ["GET"], "path": "/echo", "json": {"ok": true}},
            {"methods": ["post", "PUT"], "path": "/created", "status": 201},
        ]));

        let response = server.get("/echo").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.text(), r#"{"ok":true}"#);

        assert_eq!(server.post("/created").await.status_code(), StatusCode::CREATED);
        assert_eq!(server.put("/created").await.status_code(), StatusCode::CREATED);
        assert_eq!(server.get("/created").await.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(server.get("/unknown").await.status_code(), StatusCode::NOT_FOUND);
    }

    /// Test that a replay file is served and a missing one only skips its endpoint.
    #[tokio::test]
    async fn test_json_file_replay() {
        let dir = TempDir::new().expect("create temp dir");
        std::fs::write(dir.path().join("users.json"), r#"[{"id":"u1"}]"#).expect("write fixture");
        let state = AppState::builder().with_base_dir(dir.path()).build().expect("valid configuration");

        let server = server_with(
            state,
            json!([
                {"methods": ["GET"], "path": "/broken", "jsonPath": "missing.json"},
                {"methods": ["GET"], "path": "/users", "jsonPath": "users.json", "status": 206},
            ]),
        );

        let response = server.get("/users").await;
        assert_eq!(response.status_code(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.text(), r#"[{"id":"u1"}]"#);
        assert_eq!(server.get("/broken").await.status_code(), StatusCode::NOT_FOUND);
    }

    /// Test failure injection cadence through the router.
    #[tokio::test]
    async fn test_failure_cadence() {
        let server = server(json!([
            {"methods": ["GET"], "path": "/flaky", "json": {"ok": true},
             "errors": {"sample": 0.25, "statuses": [503]}},
        ]));

        let mut statuses = Vec::new();
        for _ in 0..8 {
            statuses.push(server.get("/flaky").await.status_code().as_u16());
        }
        assert_eq!(statuses, vec![200, 200, 200, 503, 200, 200, 200, 503]);
    }

    /// Test trailing and embedded wildcard paths.
    #[tokio::test]
    async fn test_wildcards() {
        let server = server(json!([
            {"methods": ["GET"], "path": "/foo/*", "status": 202},
            {"methods": ["GET"], "path": "/a/*/c", "status": 203},
        ]));

        assert_eq!(server.get("/foo").await.status_code(), StatusCode::ACCEPTED);
        assert_eq!(server.get("/foo/anything").await.status_code(), StatusCode::ACCEPTED);
        assert_eq!(server.get("/foo/bar/baz").await.status_code(), StatusCode::ACCEPTED);
        assert_eq!(server.get("/a/b/c").await.status_code(), StatusCode::NON_AUTHORITATIVE_INFORMATION);
        assert_eq!(server.get("/a/b/d").await.status_code(), StatusCode::NOT_FOUND);
    }

    /// Test dynamic fixtures written by one endpoint and read by others.
    #[tokio::test]
    async fn test_dynamic_fixtures() {
        let server = server(json!([
            {"methods": ["POST"], "path": "/users", "status": 201,
             "dynamic": {"write": {"json": {"name": "users", "key": "id", "value": "."}}}},
            {"methods": ["GET"], "path": "/users",
             "dynamic": {"read": {"json": {"name": "users"}}}},
            {"methods": ["GET"], "path": "/users/{id}",
             "dynamic": {"read": {"json": {"name": "users", "keyParam": "id"}}}},
        ]));

        assert_eq!(server.get("/users").await.status_code(), StatusCode::NOT_FOUND);

        let response = server.post("/users").json(&json!({"id": "u1", "name": "Ann"})).await;
        assert_eq!(response.status_code(), StatusCode::CREATED);

        let response = server.get("/users/u1").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Value>(), json!({"id": "u1", "name": "Ann"}));

        let response = server.get("/users").await;
        assert_eq!(response.json::<Value>(), json!({"u1": {"id": "u1", "name": "Ann"}}));

        let response = server.get("/users/u2").await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(response.text(), "value not found for key [u2]");

        let response = server.post("/users").text("not json").await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

        let response = server.post("/users").json(&json!({"name": "no id"})).await;
        assert_eq!(response.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    /// Test CORS headers for allowed and rejected origins.
    #[tokio::test]
    async fn test_cors() {
        let server = server(json!([
            {"methods": ["GET"], "path": "/cors", "json": {}, "allowCors": ["example.com"]},
        ]));
        let origin = |value: &'static str| (header::ORIGIN, HeaderValue::from_static(value));

        let (name, value) = origin("https://api.example.com");
        let response = server.get("/cors").add_header(name, value).await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&HeaderValue::from_static("https://api.example.com"))
        );
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS),
            Some(&HeaderValue::from_static("true"))
        );

        let (name, value) = origin("https://evil.test");
        let response = server.get("/cors").add_header(name, value).await;
        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    /// Test the configured delay is applied before responding.
    #[tokio::test]
    async fn test_delay() {
        let server = server(json!([{"methods": ["GET"], "path": "/slow", "delay": 50}]));

        let started = Instant::now();
        assert_eq!(server.get("/slow").await.status_code(), StatusCode::OK);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    /// Test that a delayed request does not hold up a concurrent one.
    #[tokio::test]
    async fn test_delay_does_not_block_siblings() {
        let server = server(json!([
            {"methods": ["GET"], "path": "/slow", "delay": 300},
            {"methods": ["GET"], "path": "/fast"},
        ]));

        let slow = async {
            let response = server.get("/slow").await;
            (response.status_code(), Instant::now())
        };
        let fast = async {
            let response = server.get("/fast").await;
            (response.status_code(), Instant::now())
        };
        let ((slow_status, slow_done), (fast_status, fast_done)) = tokio::join!(slow, fast);

        assert_eq!(slow_status, StatusCode::OK);
        assert_eq!(fast_status, StatusCode::OK);
        assert!(fast_done < slow_done);
    }

    /// Test that one malformed definition in a mock file leaves its neighbours served.
    #[tokio::test]
    async fn test_mock_file_with_malformed_endpoint() {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("mock.json");
        let content = json!({
            "endpoints": [
                {"methods": ["GET"], "path": "/good", "json": {"ok": true}},
                {"methods": ["GET"], "path": "/bad", "status": "teapot"},
                {"methods": ["GET"], "path": "/no-delay", "delay": -1, "status": 204},
            ]
        });
        std::fs::write(&path, content.to_string()).expect("write mock file");

        let mock = MockConfig::load_from_path(&path).expect("load mock");
        let state = AppState::builder().with_base_dir(mock.base_dir.clone()).build().expect("valid configuration");
        let server = TestServer::new(build_router(state, &mock.endpoints)).expect("test server");

        let response = server.get("/good").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.text(), r#"{"ok":true}"#);
        assert_eq!(server.get("/bad").await.status_code(), StatusCode::NOT_FOUND);

        let started = Instant::now();
        assert_eq!(server.get("/no-delay").await.status_code(), StatusCode::NO_CONTENT);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    /// Test that conflicting or malformed routes are skipped without affecting others.
    #[tokio::test]
    async fn test_rejected_routes_are_skipped() {
        let server = server(json!([
            {"methods": ["GET"], "path": "/dup", "status": 201},
            {"methods": ["GET"], "path": "/dup", "status": 202},
            {"methods": ["GET"], "path": "/healthcheck", "status": 500},
            {"methods": ["GET"], "path": "/legacy/:id"},
            {"methods": ["BREW"], "path": "/coffee"},
            {"methods": [], "path": "/none"},
            {"methods": ["GET"], "path": "/bad-status", "status": 1000},
            {"methods": ["GET"], "path": "/bad-proxy", "proxy": "not a url"},
            {"methods": ["GET"], "path": "/after", "status": 204},
        ]));

        assert_eq!(server.get("/dup").await.status_code(), StatusCode::CREATED);
        assert_eq!(server.get("/healthcheck").await.status_code(), StatusCode::OK);
        assert_eq!(server.get("/none").await.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(server.get("/bad-status").await.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(server.get("/bad-proxy").await.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(server.get("/after").await.status_code(), StatusCode::NO_CONTENT);
    }

    /// Test serving a static directory under a prefix.
    #[tokio::test]
    async fn test_static_dir() {
        let dir = TempDir::new().expect("create temp dir");
        std::fs::write(dir.path().join("hello.txt"), "hello").expect("write file");
        let state = AppState::builder().with_base_dir(dir.path()).build().expect("valid configuration");

        let server = server_with(state, json!([{"methods": ["GET"], "path": "/files/*", "static": "."}]));

        let response = server.get("/files/hello.txt").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.text(), "hello");
        assert_eq!(server.get("/files/missing.txt").await.status_code(), StatusCode::NOT_FOUND);
    }

    /// Test requests and responses pass through the proxy.
    #[tokio::test]
    async fn test_proxy_pass_through() {
        let upstream = spawn_upstream(Router::new().route(
            "/api/hello",
            get(|request: Request| async move {
                let host = request
                    .headers()
                    .get(header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                (
                    StatusCode::ACCEPTED,
                    [(HeaderName::from_static("x-upstream"), "yes")],
                    Json(json!({"host": host})),
                )
                    .into_response()
            }),
        ))
        .await;
        let upstream_authority = upstream.trim_start_matches("http://").to_string();

        let server = server(json!([{"methods": ["GET"], "path": "/api/*", "proxy": upstream}]));

        let response = server.get("/api/hello").await;
        assert_eq!(response.status_code(), StatusCode::ACCEPTED);
        assert_eq!(response.headers().get("x-upstream"), Some(&HeaderValue::from_static("yes")));
        assert_eq!(response.json::<Value>(), json!({"host": upstream_authority}));

        assert_eq!(server.get("/api/missing").await.status_code(), StatusCode::NOT_FOUND);
    }

    /// Test redirect locations and request queries are rewritten to the mock server.
    #[tokio::test]
    async fn test_proxy_rewrites_addresses() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
        let upstream = format!("http://{}", listener.local_addr().expect("upstream address"));
        let location = format!(
            "{upstream}/next?x={}",
            form_urlencoded::byte_serialize(format!("{upstream}/y").as_bytes()).collect::<String>()
        );
        let app = Router::new()
            .route(
                "/old",
                get(move || async move { (StatusCode::FOUND, [(header::LOCATION, location)]) }),
            )
            .route(
                "/echo",
                get(|request: Request| async move { request.uri().query().unwrap_or_default().to_string() }),
            );
        tokio::spawn(async move { axum::serve(listener, app).await });

        let server = server(json!([{"methods": ["GET"], "path": "/*", "proxy": upstream}]));

        let response = server.get("/old").await;
        assert_eq!(response.status_code(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(header::LOCATION).and_then(|v| v.to_str().ok()),
            Some("http://localhost:8080/next?x=http%3A%2F%2Flocalhost%3A8080%2Fy")
        );

        let response = server.get("/echo").add_query_param("cb", format!("{upstream}/done")).await;
        assert_eq!(response.text(), "cb=http%3A%2F%2Flocalhost%3A8080%2Fdone");

        let response = server.get("/echo").add_query_param("plain", "value").await;
        assert_eq!(response.text(), "plain=value");
    }

    /// Test an unreachable upstream yields a bad gateway.
    #[tokio::test]
    async fn test_proxy_unreachable_upstream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("address");
        drop(listener);

        let server = server(json!([{"methods": ["GET"], "path": "/down", "proxy": format!("http://{addr}")}]));

        let response = server.get("/down").await;
        assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.text(), "error in proxying to URL");
    }
}
