//! # Vulndash Server
//!
//! Queues container image scans, runs them on a worker pool through the
//! Trivy CLI, and serves job status and cached results over HTTP.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vulndash_core::TrivyScanner;
use vulndash_server::{
    infra::{app_state::AppState, config::Config, startup::Backends},
    routes,
    webhook::WebhookNotifier,
};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "vulndash-server")]
#[command(about = "Container vulnerability scan queue and dashboard API")]
struct Cli {
    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Redis connection URL; omit to run with an in-memory store
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Number of concurrent scan workers (overrides config)
    #[arg(short, long)]
    workers: Option<usize>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server_port = port;
        }
        if let Some(host) = self.host {
            config.server_host = host;
        }
        if let Some(url) = self.redis_url.filter(|url| !url.trim().is_empty()) {
            config.redis_url = Some(url);
        }
        if let Some(workers) = self.workers {
            config.engine.workers.workers = workers;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    cli.apply(&mut config);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Override via RUST_LOG.
                "info,vulndash_core=info,tower_http=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let backends = Backends::connect(&config).await?;

    let scanner = TrivyScanner::new(config.trivy.clone());
    match scanner.version().await {
        Ok(version) => info!(version = %version.version, "trivy available"),
        Err(err) => warn!(error = %err, "trivy version check failed; scans will fail until it is installed"),
    }

    let notifier = WebhookNotifier::new(config.webhook_timeout())
        .context("failed to build webhook client")?;

    let config = Arc::new(config);
    let state = AppState::new(
        Arc::clone(&config),
        backends,
        Arc::new(scanner),
        Some(Arc::new(notifier)),
    );
    state.workers.start().await?;

    let app = routes::create_app(state.clone());
    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!(address = %config.bind_address(), "vulndash server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("HTTP server stopped; draining workers");
    state.enqueuer.close();
    state.workers.stop().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
