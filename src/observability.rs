use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "rentdesk_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "rentdesk_query_duration_seconds";

/// Counter: booking checks that found overlapping live bookings.
pub const BOOKING_CONFLICTS_TOTAL: &str = "rentdesk_booking_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "rentdesk_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "rentdesk_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "rentdesk_connections_rejected_total";

/// Gauge: owner accounts with a loaded engine.
pub const OWNERS_ACTIVE: &str = "rentdesk_owners_active";

/// Counter: startup/auth failures. Labels: reason.
pub const AUTH_FAILURES_TOTAL: &str = "rentdesk_auth_failures_total";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertCar(_) => "insert_car",
        Command::UpdateCar { .. } => "update_car",
        Command::DeleteCar { .. } => "delete_car",
        Command::InsertBooking(_) => "insert_booking",
        Command::InsertBookingRequest(_) => "insert_booking_request",
        Command::UpdateBooking { .. } => "update_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::InsertExpense(_) => "insert_expense",
        Command::InsertUser { .. } => "insert_user",
        Command::SelectCars => "select_cars",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectExpenses => "select_expenses",
        Command::SelectMaintenance => "select_maintenance",
        Command::SelectSummary => "select_summary",
        Command::SelectConflicts { .. } => "select_conflicts",
        Command::SelectAvailableCars { .. } => "select_available_cars",
    }
}
