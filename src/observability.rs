use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: proposals run through the validator. Labels: outcome (valid, invalid, error).
pub const VALIDATIONS_TOTAL: &str = "roomsync_validations_total";

/// Counter: committed writes. Labels: op (insert, update, delete).
pub const BOOKINGS_WRITTEN_TOTAL: &str = "roomsync_bookings_written_total";

/// Counter: proposals skipped by the pre-commit gate in batch submissions.
pub const GATE_SKIPS_TOTAL: &str = "roomsync_gate_skips_total";

/// Counter: events fanned out. Labels: event.
pub const EVENTS_BROADCAST_TOTAL: &str = "roomsync_events_broadcast_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: open push channels.
pub const CHANNELS_ACTIVE: &str = "roomsync_channels_active";

/// Counter: channels removed after a failed write.
pub const CHANNELS_DROPPED_TOTAL: &str = "roomsync_channels_dropped_total";

/// Counter: heartbeat rounds written.
pub const HEARTBEATS_TOTAL: &str = "roomsync_heartbeats_total";

/// Counter: change-feed records lost because the relay fell behind.
pub const FEED_LAGGED_TOTAL: &str = "roomsync_feed_lagged_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
