//! # API Mock Library
//!
//! A library for serving mock HTTP APIs described by a JSON or YAML file.
//!
//! Every endpoint definition is compiled into a route whose handler can:
//! - **Replay** a canned inline payload or a JSON file with a fixed status
//! - **Proxy** to a real upstream, rewriting its address in queries and redirects
//! - **Record and replay** values written by one endpoint and read by another
//! - **Inject failures** on every Nth request and delay responses
//! - **Serve static files** and answer CORS requests for allowed origins
//!
//! # Examples
//!
//! ```no_run
//! use api_mock_rs::{http::build_router, AppState, MockConfig};
//!
//! # async fn example() -> std::io::Result<()> {
//! let mock = MockConfig::load_from_path("mock.json")
//!     .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
//!
//! let state = AppState::builder()
//!     .with_listen_addr(":8080")
//!     .with_base_dir(mock.base_dir.clone())
//!     .build()?;
//! let app = build_router(state, &mock.endpoints);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod failure;
pub mod http;
pub mod jsonpath;
pub mod proxy;
pub mod store;
pub mod watch;

// Re-export commonly used types for convenience
pub use config::{Endpoint, MockConfig, ServerConfig};
pub use failure::FailureInjector;
pub use http::AppState;
pub use proxy::ReverseProxy;
pub use store::{FixtureStore, MemoryStore};
pub use watch::ConfigWatcher;
