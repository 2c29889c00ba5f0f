//! Stream highlight worker binary.

use std::net::SocketAddr;
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clipwatch_worker::{Collaborators, ProcessorConfig, ProcessorOrchestrator, ProcessorState};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    dotenvy::dotenv().ok();

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "clipwatch=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting clipwatch-worker");

    let config = match ProcessorConfig::from_env().and_then(|c| c.validate().map(|_| c)) {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        channel = %config.stream.channel,
        mode = %config.capture.buffer_mode,
        clip_length = ?config.clip.clip_length,
        "Processor config loaded"
    );

    if let Ok(addr) = std::env::var("CLIPWATCH_METRICS_ADDR") {
        match addr.parse::<SocketAddr>() {
            Ok(addr) => match PrometheusBuilder::new().with_http_listener(addr).install() {
                Ok(()) => info!(%addr, "Prometheus exporter listening"),
                Err(e) => warn!("Failed to install Prometheus exporter: {}", e),
            },
            Err(e) => warn!("Invalid CLIPWATCH_METRICS_ADDR {}: {}", addr, e),
        }
    }

    let state = Arc::new(ProcessorState::new());
    let collab = match Collaborators::production(&config, state.shutdown_signal()) {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to create collaborators: {}", e);
            std::process::exit(1);
        }
    };

    let processor = ProcessorOrchestrator::with_state(config, collab, state.clone());

    let signal_state = state.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal");
            signal_state.stop();
        }
    });

    if let Err(e) = processor.run().await {
        error!("Processor error: {}", e);
        std::process::exit(1);
    }

    info!("Worker shutdown complete");
}
