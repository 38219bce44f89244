use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use gamebook::booking::Booker;
use gamebook::config::Config;
use gamebook::dispatch::TracingDispatcher;
use gamebook::engine::Engine;
use gamebook::gate::InMemoryGate;
use gamebook::http::{self, AppState};
use gamebook::notify::NotifyHub;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    gamebook::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let gate = match &config.users_file {
        Some(path) => InMemoryGate::load(path)?,
        None => InMemoryGate::new(),
    };
    let engine = Arc::new(Engine::new(
        config.wal_path(),
        Arc::new(NotifyHub::new()),
        config.compact_threshold,
    )?);
    let booker = Arc::new(Booker::new(
        engine.clone(),
        Arc::new(gate),
        Arc::new(TracingDispatcher),
    ));
    let app = http::router(AppState {
        booker,
        request_timeout: config.request_timeout,
    });

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("gamebook listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  reservations: {}", engine.reservation_count());
    info!("  request_timeout: {:?}", config.request_timeout);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("gamebook stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM; axum then drains in-flight requests.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
    info!("shutdown signal received");
}
