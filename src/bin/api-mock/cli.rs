//! Command-line interface definitions for the API mock server.

use std::path::PathBuf;

use clap::Parser;

/// Command-line arguments for the API mock server.
#[derive(Debug, Parser)]
#[command(name = "api-mock")]
#[command(
    author,
    version,
    about = "Configuration-driven HTTP mock server: canned JSON, file replay, proxying and failure injection"
)]
pub struct Cli {
    /// Path to the YAML server configuration (listen address, log level)
    #[arg(long, default_value = "_resources/config.yml")]
    pub config: PathBuf,

    /// Path to the mock file describing the endpoints (JSON, or YAML by extension)
    #[arg(long, default_value = "mock.json")]
    pub mock: PathBuf,

    /// Address to listen on, overriding both configuration files (e.g. :8080, 127.0.0.1:9000)
    #[arg(long)]
    pub listen: Option<String>,

    /// Log at debug level regardless of configuration
    #[arg(long, short)]
    pub verbose: bool,

    /// Restart with freshly loaded configuration whenever either file changes
    #[arg(long, short)]
    pub watch: bool,
}
