//! Endpoint definitions and server settings loaded from disk.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Listen address used when no server configuration provides one.
pub const DEFAULT_ADDR: &str = ":8080";

/// Log level used when no server configuration provides one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Errors that can occur when loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error while reading a configuration file.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// JSON parsing error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    /// YAML parsing error.
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// The mock file: a list of endpoints and an optional port.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct MockConfig {
    /// Port overriding the one of the server address when within 1..=65535.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,
    /// Endpoint definitions, mounted in order.
    ///
    /// Entries that do not match the endpoint schema are logged and dropped
    /// without affecting the others.
    #[serde(default, deserialize_with = "deserialize_endpoints")]
    pub endpoints: Vec<Endpoint>,
    /// Directory the mock file was loaded from; relative file paths resolve against it.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// One declarative endpoint definition.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// HTTP methods this endpoint answers.
    #[serde(default)]
    pub methods: Vec<String>,
    /// Response status; values `<= 0` mean 200.
    #[serde(default)]
    pub status: i64,
    /// Route pattern, possibly with wildcard segments.
    #[serde(default)]
    pub path: String,
    /// Artificial latency in milliseconds; values `<= 0` mean none.
    #[serde(default)]
    pub delay: i64,
    /// File replayed verbatim, relative to the mock file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_path: Option<String>,
    /// Inline JSON payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<serde_json::Value>,
    /// Upstream URL to reverse-proxy to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Directory served instead of any other behavior.
    #[serde(default, rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,
    /// Failure injection settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Errors>,
    /// Permitted CORS origins.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_cors: Vec<String>,
    /// Fixture store wiring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<Dynamic>,
}

/// Failure injection settings of an endpoint.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct Errors {
    /// Inverse of the "every Nth request fails" rate, within (0, 1].
    #[serde(default)]
    pub sample: f64,
    /// Candidate forced status codes; invalid ones are ignored.
    #[serde(default)]
    pub statuses: Vec<i64>,
}

/// Dynamic read/write wiring of an endpoint.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct Dynamic {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write: Option<DynamicWrite>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<DynamicRead>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DynamicWrite {
    pub json: WriteSpec,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DynamicRead {
    pub json: ReadSpec,
}

/// Where a write takes its entity, key and value from.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WriteSpec {
    /// Entity name in the fixture store.
    pub name: String,
    /// Path to the key inside the request body.
    pub key: String,
    /// Path to the value inside the request body.
    pub value: String,
}

/// Where a read looks its fixtures up.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReadSpec {
    /// Entity name in the fixture store.
    pub name: String,
    /// Route parameter holding the key; absent means the whole entity table.
    #[serde(default, rename = "keyParam", skip_serializing_if = "Option::is_none")]
    pub key_param: Option<String>,
}

/// The active half of a [`Dynamic`] definition.
#[derive(Debug, Clone, PartialEq)]
pub enum DynamicSpec {
    Write(WriteSpec),
    Read(ReadSpec),
}

impl Dynamic {
    /// Get the single active sub-spec.
    ///
    /// # Returns
    ///
    /// Returns `None` when both or neither of `write` and `read` are set.
    pub fn spec(&self) -> Option<DynamicSpec> {
        match (&self.write, &self.read) {
            (Some(write), None) => Some(DynamicSpec::Write(write.json.clone())),
            (None, Some(read)) => Some(DynamicSpec::Read(read.json.clone())),
            _ => None,
        }
    }
}

impl MockConfig {
    /// Load endpoint definitions from a JSON or YAML file.
    ///
    /// Files ending in `.yaml` or `.yml` are parsed as YAML, everything else as JSON.
    ///
    /// # Parameters
    ///
    /// - `path` - Path to the mock file
    ///
    /// # Returns
    ///
    /// Returns `Ok(MockConfig)` with `base_dir` set to the file's directory, or
    /// `ConfigError` if the file cannot be read or parsed.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let txt = fs::read_to_string(path)?;
        let mut mock: Self = if is_yaml(path) {
            serde_yaml::from_str(&txt)?
        } else {
            serde_json::from_str(&txt)?
        };
        mock.base_dir = base_dir_of(path)?;
        Ok(mock)
    }

    /// An empty mock rooted next to `path`, used when the mock file cannot be loaded.
    pub fn empty_at(path: impl AsRef<Path>) -> Self {
        Self { base_dir: base_dir_of(path.as_ref()).unwrap_or_default(), ..Self::default() }
    }
}

/// Server settings: listen address and log level.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logger: LoggerSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServerSection {
    /// Listen address, `:port` meaning all interfaces.
    #[serde(default = "default_addr")]
    pub addr: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggerSection {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { addr: default_addr() }
    }
}

impl Default for LoggerSection {
    fn default() -> Self {
        Self { level: default_level() }
    }
}

impl ServerConfig {
    /// Load server settings from a YAML file.
    ///
    /// # Parameters
    ///
    /// - `path` - Path to the YAML server configuration
    ///
    /// # Returns
    ///
    /// Returns `Ok(ServerConfig)` with defaults for missing keys, or `ConfigError`
    /// if the file cannot be read or parsed.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let txt = fs::read_to_string(path)?;
        // An empty document deserializes to unit, not to an empty mapping.
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&txt)?)
    }

    /// Get the address to listen on, honouring the mock file's port override.
    ///
    /// # Parameters
    ///
    /// - `mock` - Loaded mock file
    ///
    /// # Returns
    ///
    /// Returns `:<port>` when the mock file sets a positive port, otherwise `server.addr`.
    pub fn listen_addr(&self, mock: &MockConfig) -> String {
        match mock.port.and_then(|port| u16::try_from(port).ok()) {
            Some(port) if port > 0 => format!(":{port}"),
            _ => self.server.addr.clone(),
        }
    }
}

/// Turn a listen address into something a socket can bind to.
///
/// `:8080` binds all interfaces, anything else is passed through.
pub fn bind_address(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    }
}

/// Decode endpoints one at a time so a malformed entry only loses itself.
fn deserialize_endpoints<'de, D>(deserializer: D) -> Result<Vec<Endpoint>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();

    Ok(raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| {
            let path = value.get("path").and_then(Value::as_str).unwrap_or_default().to_string();
            serde_json::from_value::<Endpoint>(value)
                .map_err(|e| warn!(index, path = %path, error = %e, "error in reading endpoint, skipping it"))
                .ok()
        })
        .collect())
}

fn default_addr() -> String {
    DEFAULT_ADDR.to_string()
}

fn default_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

fn base_dir_of(path: &Path) -> Result<PathBuf, std::io::Error> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    Ok(absolute.parent().map(Path::to_path_buf).unwrap_or_default())
}
