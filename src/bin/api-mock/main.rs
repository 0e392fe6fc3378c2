//! # API Mock Server CLI
//!
//! Command-line interface for the API mock server.
//!
//! Loads the server configuration and the mock file, compiles the endpoints
//! and serves them until interrupted. With `--watch`, a change to either file
//! shuts the server down gracefully and starts it again from scratch, with a
//! fresh fixture store and fresh failure counters.

use std::io;
use std::path::PathBuf;

use clap::Parser;
use tokio::{net::TcpListener, sync::mpsc::UnboundedReceiver, sync::oneshot};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use api_mock_rs::config::{bind_address, MockConfig, ServerConfig};
use api_mock_rs::http::{build_router, AppState};
use api_mock_rs::watch::ConfigWatcher;

mod cli;

use cli::Cli;

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = Cli::parse();

    // The log level comes from the server configuration, so report its
    // loading error only once logging is up.
    let loaded = ServerConfig::load_from_path(&cli.config);
    let level = match (&loaded, cli.verbose) {
        (_, true) => "debug".to_string(),
        (Ok(server), false) => server.logger.level.clone(),
        (Err(_), false) => api_mock_rs::config::DEFAULT_LOG_LEVEL.to_string(),
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    fmt().with_env_filter(env_filter).init();

    let mut server = loaded.unwrap_or_else(|e| {
        warn!(path = %cli.config.display(), error = %e, "cannot load server config, using defaults");
        ServerConfig::default()
    });

    loop {
        let mock = MockConfig::load_from_path(&cli.mock).unwrap_or_else(|e| {
            warn!(path = %cli.mock.display(), error = %e, "cannot load mock file, serving no endpoints");
            MockConfig::empty_at(&cli.mock)
        });

        let listen = cli.listen.clone().unwrap_or_else(|| server.listen_addr(&mock));
        let state = AppState::builder()
            .with_listen_addr(listen.clone())
            .with_base_dir(mock.base_dir.clone())
            .build()?;
        let app = build_router(state, &mock.endpoints);

        let listener = TcpListener::bind(bind_address(&listen)).await?;
        info!(addr = %listen, endpoints = mock.endpoints.len(), "starting api-mock");

        let (mut changes, _watcher) = if cli.watch {
            let (watcher, changes) = ConfigWatcher::new([cli.config.clone(), cli.mock.clone()]);
            (Some(changes), Some(watcher.run().map_err(io::Error::other)?))
        } else {
            (None, None)
        };

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let mut serving = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = stop_rx.await;
                })
                .await
        });

        tokio::select! {
            res = &mut serving => {
                return res.map_err(io::Error::other)?;
            }
            () = shutdown_signal() => {
                info!("shutdown signal received");
                let _ = stop_tx.send(());
                serving.await.map_err(io::Error::other)??;
                info!("api-mock stopped");
                return Ok(());
            }
            path = next_change(changes.as_mut()) => {
                info!(path = %path.display(), "config changed, restarting");
                let _ = stop_tx.send(());
                serving.await.map_err(io::Error::other)??;
            }
        }

        server = ServerConfig::load_from_path(&cli.config).unwrap_or_else(|e| {
            warn!(path = %cli.config.display(), error = %e, "cannot reload server config, using defaults");
            ServerConfig::default()
        });
        debug!(config = ?server, "server config reloaded");
    }
}

/// Wait for the next reported config change; never resolves without a watcher.
async fn next_change(changes: Option<&mut UnboundedReceiver<PathBuf>>) -> PathBuf {
    match changes {
        Some(changes) => match changes.recv().await {
            Some(path) => path,
            None => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

/// Wait for Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
