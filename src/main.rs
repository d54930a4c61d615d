//! framechat - chat and file-transfer server
//!
//! Accepts framechat clients over TCP and gives the operator a stdin console.

mod console;

use framechat_server::metrics::{run_metrics_server, Metrics};
use framechat_server::{Config, Server, ServerConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if FRAMECHAT_CONFIG is set, then env overrides)
    let config_path = std::env::var("FRAMECHAT_CONFIG").ok();
    let config = match Config::load() {
        Ok(c) => {
            if let Some(path) = &config_path {
                tracing::info!("Loaded config from {}", path);
            }
            c
        }
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if config_path.is_some() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::warn!("Invalid environment configuration ({}), using defaults", e);
            Config::default()
        }
    };

    tracing::info!("Starting framechat server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    tracing::info!("  Max connections: {}", config.network.max_connections);
    tracing::info!("  Max payload: {} MB", config.limits.max_payload_mb);
    tracing::info!(
        "  Download directory: {}",
        config.attachments.download_dir.display()
    );

    let mut server_config = ServerConfig::from_config(&config);

    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new()?);
        server_config = server_config.with_metrics(metrics.clone());
        tracing::info!("  Metrics: http://{}/metrics", config.metrics.bind_addr);
        Some(metrics)
    } else {
        tracing::info!("  Metrics: disabled");
        None
    };

    let (server, mut events) = Server::new(server_config);
    let server = Arc::new(server);

    if let Some(metrics) = metrics {
        let addr = config.metrics.bind_addr;
        let shutdown = server.shutdown_signal();
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(addr, metrics, shutdown).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    // Print events for the operator
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("{}", console::format_event(&event));
        }
    });

    tokio::spawn(console::run(server.clone()));

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
