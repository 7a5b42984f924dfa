//! # Shardguard Entry Point
//!
//! External failover orchestrator for sharded in-memory database
//! clusters. Reads a YAML configuration, registers every configured
//! cluster with the coordinator and serves the HTTP read API plus the
//! Prometheus metrics endpoint until a shutdown signal arrives.
//!
//! ## Usage
//!
//! ```bash
//! # Run with a configuration file
//! shardguard -c /etc/shardguard/shardguard.yaml
//!
//! # Validate the configuration and exit
//! shardguard -c /etc/shardguard/shardguard.yaml --check
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use argh::FromArgs;

use shardguard_cli::config::Config;
use shardguard_cli::http::{self, ApiState};
use shardguard_client::TcpBackendFactory;
use shardguard_orchestrator::Coordinator;
use shardguard_storage::SqliteStorage;

/// shardguard - external failover orchestrator for sharded clusters
#[derive(FromArgs)]
struct Cli {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    config: String,

    /// validate the configuration and exit
    #[argh(switch)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load the configuration from {}", cli.config))?;

    if cli.check {
        println!("configuration ok: {}", cli.config);
        return Ok(());
    }

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting shardguard");

    let storage = Arc::new(
        SqliteStorage::open(config.storage_config())
            .await
            .context("failed to open the snapshot store")?,
    );

    let coordinator = Arc::new(Coordinator::new(
        storage.clone(),
        Arc::new(TcpBackendFactory),
    ));

    if config.clusters.is_empty() {
        tracing::warn!("no clusters are found in the configuration");
    }
    for (name, options) in &config.clusters {
        let (cluster_cfg, orchestration) = config.resolve(options);
        match coordinator.register_cluster(name, cluster_cfg, orchestration) {
            Ok(()) => tracing::info!(cluster = %name, "new cluster has been registered"),
            Err(err) => tracing::error!(cluster = %name, %err, "could not register the cluster"),
        }
    }

    let state = Arc::new(ApiState {
        coordinator: coordinator.clone(),
        storage,
    });
    let app = http::router(state);

    let addr: SocketAddr = config
        .listen
        .parse()
        .or_else(|_| format!("0.0.0.0{}", config.listen).parse())
        .with_context(|| format!("invalid listen address {}", config.listen))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    tracing::info!("shutting down shardguard");
    coordinator.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("received a shutdown signal");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_config_flag() {
        let cli = Cli::from_args(&["shardguard"], &["-c", "shardguard.yaml"]).unwrap();
        assert_eq!(cli.config, "shardguard.yaml");
        assert!(!cli.check);
    }

    #[test]
    fn test_cli_parse_check_flag() {
        let cli =
            Cli::from_args(&["shardguard"], &["-c", "shardguard.yaml", "--check"]).unwrap();
        assert!(cli.check);
    }

    #[test]
    fn test_cli_requires_config() {
        assert!(Cli::from_args(&["shardguard"], &[]).is_err());
    }
}
