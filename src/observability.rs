use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP commands and queries handled. Labels: operation, status.
pub const REQUESTS_TOTAL: &str = "gamebook_requests_total";

/// Histogram: availability computation latency in seconds.
pub const AVAILABILITY_QUERY_DURATION_SECONDS: &str = "gamebook_availability_query_duration_seconds";

// ── Ledger metrics ──────────────────────────────────────────────

/// Counter: reservations admitted.
pub const RESERVATIONS_CREATED_TOTAL: &str = "gamebook_reservations_created_total";

/// Counter: reservations cancelled.
pub const RESERVATIONS_CANCELLED_TOTAL: &str = "gamebook_reservations_cancelled_total";

/// Counter: admission attempts turned away. Labels: reason.
pub const ADMISSIONS_REJECTED_TOTAL: &str = "gamebook_admissions_rejected_total";

/// Counter: notification dispatches that failed (swallowed).
pub const NOTIFY_FAILURES_TOTAL: &str = "gamebook_notify_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "gamebook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "gamebook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
