//! FT-transfer dispatch gateway binary.

use ft_dispatch_gateway::{create_router, AppState, Config};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting FT dispatch gateway");

    let config: Config = config::Config::builder()
        .add_source(config::File::with_name("gateway").required(false))
        .add_source(config::Environment::with_prefix("GATEWAY"))
        .build()
        .and_then(|c| c.try_deserialize())
        .unwrap_or_else(|e| {
            // Fall back only when no config exists; parsing errors fail hard.
            let err_str = format!("{e}");
            if err_str.contains("not found") || err_str.contains("missing field") {
                warn!(error = %e, "No config file found, using defaults");
                Config::default()
            } else {
                error!(error = %e, "FATAL: Config error — fix env vars or gateway.toml");
                std::process::exit(1);
            }
        });

    info!(
        network = %config.network_id,
        contract = %config.contract_id,
        node = %config.node_url,
        "Configuration loaded"
    );

    let bind_address = config.bind_address.clone();
    let state = match AppState::new(config).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "FATAL: bootstrap failed");
            std::process::exit(1);
        }
    };

    if let Err(e) = state.control.start().await {
        error!(error = %e, "FATAL: control plane failed to reach Running");
        std::process::exit(1);
    }
    info!(active_keys = state.keys.active_count(), "Gateway ready");

    let batch_handle = state.spawn_batch_loop();

    let probe_state = Arc::clone(&state);
    let probe_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(15));
        loop {
            ticker.tick().await;
            probe_state.control.probe().await;
        }
    });

    let app = create_router(state.clone());

    info!(address = %bind_address, "Listening");
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining in-flight transfers...");
    probe_handle.abort();
    state.control.shutdown().await;
    batch_handle.abort();

    info!("Gateway shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
