use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::notify::Broadcaster;

/// Background task that writes a keepalive comment to every channel until cancelled.
pub async fn run_heartbeat(
    broadcaster: Arc<Broadcaster>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; new channels were just greeted.
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let alive = broadcaster.heartbeat();
                metrics::counter!(crate::observability::HEARTBEATS_TOTAL).increment(1);
                trace!("heartbeat written to {alive} channels");
            }
        }
    }
}
