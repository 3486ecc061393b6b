use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "roomledger_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "roomledger_query_duration_seconds";

/// Counter: admissions and transfers refused by room checks. Labels: reason.
pub const ADMISSION_REJECTIONS_TOTAL: &str = "roomledger_admission_rejections_total";

// ── Ledger health ───────────────────────────────────────────────

/// Counter: records committed to the journal but not fully applied to the
/// stores. Labels: event.
pub const CONSISTENCY_WARNINGS_TOTAL: &str = "roomledger_consistency_warnings_total";

/// Gauge: rooms whose counter disagrees with their assignments, as of the
/// last audit.
pub const ROOMS_DRIFTED: &str = "roomledger_rooms_drifted";

/// Counter: room counters rewritten by reconcile.
pub const RECONCILE_CORRECTIONS_TOTAL: &str = "roomledger_reconcile_corrections_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "roomledger_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "roomledger_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "roomledger_connections_rejected_total";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "roomledger_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (records per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "roomledger_journal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if port is None.
/// A failed install is logged and the server keeps running without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRoom { .. } => "insert_room",
        Command::UpdateRoom { .. } => "update_room",
        Command::InsertStudent { .. } => "insert_student",
        Command::UpdateStudent { .. } => "update_student",
        Command::SelectRooms { .. } => "select_rooms",
        Command::SelectStudents { .. } => "select_students",
        Command::SelectOccupancy => "select_occupancy",
        Command::SelectDrift => "select_drift",
        Command::Reconcile => "reconcile",
    }
}
