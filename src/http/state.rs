//! Compile context threaded through endpoint compilation and handlers.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::DEFAULT_ADDR;
use crate::proxy::{local_base_url, upstream_client, UpstreamClient};
use crate::store::{FixtureStore, MemoryStore};

/// Everything endpoint compilation needs besides the endpoint list.
///
/// Passed explicitly to the compiler and cloned into the utility handlers;
/// there is no process-wide state.
#[derive(Clone)]
pub struct AppState {
    /// Version reported by `/version`
    pub version: String,
    /// The server's own listen address, used by reverse proxies
    pub listen_addr: String,
    /// Directory relative `jsonPath` and `static` entries resolve against
    pub base_dir: PathBuf,
    /// Fixture store shared by all dynamic endpoints
    pub store: Arc<dyn FixtureStore>,
    /// HTTP client shared by all reverse proxies
    pub client: UpstreamClient,
}

impl AppState {
    /// Get a builder for configuring application state step by step.
    ///
    /// # Returns
    ///
    /// Returns an `AppStateBuilder` for fluent configuration.
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }

    /// Resolve a configured path against the base directory.
    ///
    /// Absolute paths are returned unchanged.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        self.base_dir.join(path)
    }
}

/// Builder for constructing AppState with fluent interface.
#[derive(Default)]
pub struct AppStateBuilder {
    version: Option<String>,
    listen_addr: Option<String>,
    base_dir: Option<PathBuf>,
    store: Option<Arc<dyn FixtureStore>>,
}

impl AppStateBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the version reported by `/version`.
    ///
    /// # Parameters
    ///
    /// - `version` - Version string
    ///
    /// # Returns
    ///
    /// Returns the builder for method chaining.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Set the server's own listen address.
    ///
    /// # Parameters
    ///
    /// - `addr` - Listen address such as `:8080` or `127.0.0.1:8080`
    ///
    /// # Returns
    ///
    /// Returns the builder for method chaining.
    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    /// Set the directory relative file paths resolve against.
    ///
    /// # Parameters
    ///
    /// - `base_dir` - Usually the mock file's directory
    ///
    /// # Returns
    ///
    /// Returns the builder for method chaining.
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// Set the fixture store implementation.
    ///
    /// # Parameters
    ///
    /// - `store` - Store to share between dynamic endpoints
    ///
    /// # Returns
    ///
    /// Returns the builder for method chaining.
    pub fn with_store(mut self, store: Arc<dyn FixtureStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the final AppState with validation.
    ///
    /// # Returns
    ///
    /// Returns `Ok(AppState)` if valid.
    ///
    /// # Errors
    ///
    /// Returns error if the listen address cannot be turned into a base URL
    /// or the upstream client cannot be configured.
    pub fn build(self) -> io::Result<AppState> {
        let listen_addr = self.listen_addr.unwrap_or_else(|| DEFAULT_ADDR.to_string());
        local_base_url(&listen_addr).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid listen address [{listen_addr}]: {e}"),
            )
        })?;

        // Use defaults for optional values
        let version = self.version.unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
        let base_dir = self.base_dir.unwrap_or_else(|| PathBuf::from("."));
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));

        let client = upstream_client()?;

        Ok(AppState { version, listen_addr, base_dir, store, client })
    }
}
