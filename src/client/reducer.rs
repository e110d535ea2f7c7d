//! Pure state machine behind the sync client. No I/O, no timers: inputs go
//! in, effects for the driver come out.

use std::time::Duration;

use tracing::{debug, warn};

use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStatus {
    #[default]
    Connecting,
    /// Stream open; polling slowed down as a safety net.
    Live,
    /// Stream down, polling fast, reconnect pending.
    Polling,
    /// Stream down and the last poll failed too. The only user-visible failure.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTimings {
    pub live_poll: Duration,
    pub fast_poll: Duration,
    pub reconnect: Duration,
    pub refresh_delay: Duration,
    /// A full fetch that takes longer than this counts as failed.
    pub fetch_timeout: Duration,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            live_poll: Duration::from_secs(30),
            fast_poll: Duration::from_secs(5),
            reconnect: Duration::from_secs(5),
            refresh_delay: Duration::from_millis(500),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// What the client currently believes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncView {
    pub status: SyncStatus,
    pub bookings: Vec<Booking>,
    pub schedule: Schedule,
}

#[derive(Debug)]
pub enum Input {
    StreamConnected,
    StreamFailed,
    Change(ChangeEvent),
    Snapshot {
        bookings: Vec<Booking>,
        schedule: Schedule,
    },
    FetchFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    FetchAll,
    SetPollCadence(Duration),
    ScheduleReconnect(Duration),
}

#[derive(Debug, Default)]
pub struct SyncState {
    view: SyncView,
    timings: SyncTimings,
}

impl SyncState {
    pub fn new(timings: SyncTimings) -> Self {
        Self {
            view: SyncView::default(),
            timings,
        }
    }

    pub fn view(&self) -> &SyncView {
        &self.view
    }

    pub fn status(&self) -> SyncStatus {
        self.view.status
    }

    /// Effects for a freshly started client: fetch everything, poll fast until the stream is up.
    pub fn start(&self) -> Vec<Effect> {
        vec![Effect::FetchAll, Effect::SetPollCadence(self.timings.fast_poll)]
    }

    pub fn handle(&mut self, input: Input) -> Vec<Effect> {
        match input {
            Input::StreamConnected => {
                let was = self.view.status;
                self.view.status = SyncStatus::Live;
                let mut effects = vec![Effect::SetPollCadence(self.timings.live_poll)];
                // Events sent while disconnected are gone; catch up once.
                if matches!(was, SyncStatus::Polling | SyncStatus::Error) {
                    effects.push(Effect::FetchAll);
                }
                effects
            }
            Input::StreamFailed => {
                if self.view.status != SyncStatus::Error {
                    self.view.status = SyncStatus::Polling;
                }
                vec![
                    Effect::SetPollCadence(self.timings.fast_poll),
                    Effect::ScheduleReconnect(self.timings.reconnect),
                ]
            }
            Input::Snapshot { bookings, schedule } => {
                self.view.bookings = bookings;
                self.view.schedule = schedule;
                if self.view.status == SyncStatus::Error {
                    self.view.status = SyncStatus::Polling;
                }
                Vec::new()
            }
            Input::FetchFailed => {
                if self.view.status == SyncStatus::Polling {
                    self.view.status = SyncStatus::Error;
                }
                Vec::new()
            }
            Input::Change(event) => self.apply(event),
        }
    }

    fn apply(&mut self, event: ChangeEvent) -> Vec<Effect> {
        let applied = match event.event_type {
            ChangeKind::Insert => event
                .new
                .and_then(|v| serde_json::from_value(v).ok())
                .map(|b| self.insert(b)),
            ChangeKind::Update => event.new.and_then(|v| self.update(v)),
            ChangeKind::Delete => event
                .old
                .and_then(|v| serde_json::from_value::<BookingKey>(v).ok())
                .map(|key| self.delete(key)),
        };
        if applied.is_some() {
            Vec::new()
        } else {
            warn!("{} event could not be applied locally, refetching", event.event_type.as_str());
            vec![Effect::FetchAll]
        }
    }

    /// Idempotent: the same booking may arrive from both notification paths.
    fn insert(&mut self, booking: Booking) {
        if self.view.bookings.iter().any(|b| b.booking_id == booking.booking_id) {
            debug!("duplicate insert for {} ignored", booking.booking_id);
            return;
        }
        if booking.status != BookingStatus::Rejected {
            let bucket = self.view.schedule.entry(booking.date.clone()).or_default();
            if !bucket.iter().any(|b| b.booking_id == booking.booking_id) {
                bucket.push(booking.clone());
                bucket.sort_by(schedule_order);
            }
        }
        self.view.bookings.push(booking);
    }

    /// `None` when the row is unknown locally or the payload is unusable.
    fn update(&mut self, new: serde_json::Value) -> Option<()> {
        let full = serde_json::from_value::<Booking>(new.clone()).ok();
        let patch: StatusPatch = serde_json::from_value(new).ok()?;
        let slot = self
            .view
            .bookings
            .iter_mut()
            .find(|b| b.booking_id == patch.booking_id)?;
        match full {
            Some(row) => *slot = row,
            None => slot.status = patch.status,
        }
        self.view.schedule = group_by_date(&self.view.bookings);
        Some(())
    }

    fn delete(&mut self, key: BookingKey) {
        self.view.bookings.retain(|b| b.booking_id != key.booking_id);
        let dates: Vec<String> = match key.date {
            Some(date) => vec![date],
            None => self.view.schedule.keys().cloned().collect(),
        };
        for date in dates {
            if let Some(bucket) = self.view.schedule.get_mut(&date) {
                bucket.retain(|b| b.booking_id != key.booking_id);
                if bucket.is_empty() {
                    self.view.schedule.remove(&date);
                }
            }
        }
    }
}
