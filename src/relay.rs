//! Turns store writes into `booking_change` broadcasts.
//!
//! Two origins feed the same path: the store's native change feed, and
//! explicit notifications from the write path. Both can fire for one write;
//! clients dedupe by booking id.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::model::{ChangeEvent, ChangeRecord};
use crate::notify::Broadcaster;
use crate::store::BookingStore;

pub const BOOKING_CHANGE: &str = "booking_change";

pub struct ChangeRelay {
    broadcaster: Arc<Broadcaster>,
    explicit: bool,
}

impl ChangeRelay {
    pub fn new(broadcaster: Arc<Broadcaster>, explicit: bool) -> Self {
        Self {
            broadcaster,
            explicit,
        }
    }

    /// Normalize and fan out one change. Returns channels reached.
    pub fn publish(&self, record: &ChangeRecord) -> usize {
        let event = ChangeEvent::from_record(record, Utc::now());
        self.broadcaster.broadcast(BOOKING_CHANGE, &event)
    }

    /// Called by the write path after a successful write. No-op when explicit notification is off.
    pub fn notify(&self, record: &ChangeRecord) {
        if self.explicit {
            self.publish(record);
        }
    }

    /// Forward the store's change feed until cancelled. `None` if the store has no feed.
    pub fn spawn_feed(
        self: &Arc<Self>,
        store: &dyn BookingStore,
        shutdown: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let mut rx = store.subscribe_changes()?;
        let relay = self.clone();
        info!("relaying native change feed");
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(record) => {
                            relay.publish(&record);
                        }
                        // Missed records are recovered by client polling.
                        Err(RecvError::Lagged(n)) => {
                            metrics::counter!(crate::observability::FEED_LAGGED_TOTAL).increment(n);
                            warn!("change feed lagged, {n} records skipped");
                        }
                        Err(RecvError::Closed) => {
                            info!("change feed closed");
                            break;
                        }
                    },
                }
            }
        }))
    }
}
