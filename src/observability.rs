use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "courtcal_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "courtcal_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "courtcal_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "courtcal_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "courtcal_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "courtcal_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "courtcal_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "courtcal_wal_flush_batch_size";

// ── Scheduling outcomes ─────────────────────────────────────────

/// Counter: bookings and edits rejected because the window was taken.
pub const BOOKING_CONFLICTS_TOTAL: &str = "courtcal_booking_conflicts_total";

/// Counter: mutations refused because the case is closed.
pub const GATE_REJECTIONS_TOTAL: &str = "courtcal_gate_rejections_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), String> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("failed to install Prometheus metrics exporter: {e}"))?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertCourt { .. } => "insert_court",
        Command::SelectCourts { .. } => "select_courts",
        Command::InsertCase { .. } => "insert_case",
        Command::UpdateCase { .. } => "update_case",
        Command::SelectCase { .. } => "select_case",
        Command::InsertHearing { .. } => "insert_hearing",
        Command::UpdateHearing { .. } => "update_hearing",
        Command::DeleteHearing { .. } => "delete_hearing",
        Command::SelectHearings { .. } => "select_hearings",
        Command::SelectAvailableSlots { .. } => "select_available_slots",
    }
}
