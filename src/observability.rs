use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "bunkd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "bunkd_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "bunkd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "bunkd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "bunkd_connections_rejected_total";

/// Gauge: number of active sites (loaded engines).
pub const TENANTS_ACTIVE: &str = "bunkd_tenants_active";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "bunkd_auth_failures_total";

/// Counter: pending requests lapsed by the reaper.
pub const REQUESTS_EXPIRED_TOTAL: &str = "bunkd_requests_expired_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bunkd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "bunkd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertBuilding { .. } => "insert_building",
        Command::InsertRoom { .. } => "insert_room",
        Command::InsertBed { .. } => "insert_bed",
        Command::SetBedMaintenance { .. } => "set_bed_maintenance",
        Command::SubmitRequest { .. } => "submit_request",
        Command::AddOccupants { .. } => "add_occupants",
        Command::StagePlacement { .. } => "stage_placement",
        Command::ApproveRequest { .. } => "approve_request",
        Command::RejectRequest { .. } => "reject_request",
        Command::CancelRequest { .. } => "cancel_request",
        Command::CheckIn { .. } => "check_in",
        Command::CheckOut { .. } => "check_out",
        Command::CancelOccupant { .. } => "cancel_occupant",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectTimeline { .. } => "select_timeline",
        Command::SelectFreeCounts { .. } => "select_free_counts",
        Command::SelectBuildings => "select_buildings",
        Command::SelectRooms { .. } => "select_rooms",
        Command::SelectBeds { .. } => "select_beds",
        Command::SelectRequests { .. } => "select_requests",
        Command::SelectOccupants { .. } => "select_occupants",
        Command::ScanTag { .. } => "scan_tag",
        Command::SelectManifest => "select_manifest",
    }
}
