use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{RwLock, broadcast};

use crate::model::*;
use crate::time::{OverlapPolicy, overlaps_with, to_minutes};

use super::{BookingStore, DeleteMatcher, StoreError};

const FEED_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DayKey {
    room_id: String,
    date: String,
}

impl DayKey {
    fn of(booking: &Booking) -> Self {
        Self {
            room_id: booking.room_id.clone(),
            date: booking.date.clone(),
        }
    }
}

/// All bookings of one room on one date, sorted by start time.
#[derive(Debug, Default)]
struct DaySchedule {
    bookings: Vec<Booking>,
}

fn start_key(b: &Booking) -> u32 {
    to_minutes(&b.start_time).unwrap_or(u32::MAX)
}

impl DaySchedule {
    fn insert(&mut self, booking: Booking) {
        let key = start_key(&booking);
        let pos = self.bookings.partition_point(|b| start_key(b) <= key);
        self.bookings.insert(pos, booking);
    }

    fn position(&self, id: &BookingId) -> Option<usize> {
        self.bookings.iter().position(|b| b.booking_id == *id)
    }

    /// First occupying booking whose range overlaps `candidate`.
    /// Unparseable bounds count as overlap.
    fn first_clash(&self, candidate: &Booking) -> Option<&Booking> {
        self.bookings.iter().find(|b| {
            b.status.occupies_slot()
                && overlaps_with(
                    OverlapPolicy::FailClosed,
                    &b.start_time,
                    &b.end_time,
                    &candidate.start_time,
                    &candidate.end_time,
                )
        })
    }
}

type SharedDay = Arc<RwLock<DaySchedule>>;

/// In-process booking store.
///
/// Rows are partitioned by `(room_id, date)`; each partition has its own lock,
/// so writes to different rooms or dates never contend. Inserting a row that
/// overlaps an occupying booking in the same partition is refused, which makes
/// the no-double-booking invariant hold even when two callers validated
/// concurrently.
pub struct MemoryStore {
    days: DashMap<DayKey, SharedDay>,
    /// Reverse lookup: booking id → partition.
    index: DashMap<BookingId, DayKey>,
    feed: Option<broadcast::Sender<ChangeRecord>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Store with a native change feed.
    pub fn new() -> Self {
        Self {
            days: DashMap::new(),
            index: DashMap::new(),
            feed: Some(broadcast::channel(FEED_CAPACITY).0),
        }
    }

    /// Store without a change feed; change events must come from the write path.
    pub fn without_feed() -> Self {
        Self {
            days: DashMap::new(),
            index: DashMap::new(),
            feed: None,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn day(&self, key: &DayKey) -> Option<SharedDay> {
        self.days.get(key).map(|e| e.value().clone())
    }

    fn day_or_create(&self, key: DayKey) -> SharedDay {
        self.days.entry(key).or_default().value().clone()
    }

    /// Snapshot of partition handles so no map guard is held across an await.
    fn all_days(&self) -> Vec<SharedDay> {
        self.days.iter().map(|e| e.value().clone()).collect()
    }

    /// Drop an empty partition. Skipped while any caller still holds a handle
    /// to it, since that caller may be about to insert.
    fn prune(&self, key: &DayKey) {
        self.days.remove_if(key, |_, day| {
            Arc::strong_count(day) == 1 && day.try_read().is_ok_and(|g| g.bookings.is_empty())
        });
    }

    fn publish(&self, record: ChangeRecord) {
        if let Some(feed) = &self.feed {
            // No subscribers is fine.
            let _ = feed.send(record);
        }
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn query_bookings(
        &self,
        room_id: &str,
        date: &str,
        exclude_status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, StoreError> {
        let key = DayKey {
            room_id: room_id.to_string(),
            date: date.to_string(),
        };
        let Some(day) = self.day(&key) else {
            return Ok(Vec::new());
        };
        let guard = day.read().await;
        Ok(guard
            .bookings
            .iter()
            .filter(|b| exclude_status != Some(b.status))
            .cloned()
            .collect())
    }

    async fn list_bookings(&self) -> Result<Vec<Booking>, StoreError> {
        let mut all = Vec::with_capacity(self.len());
        for day in self.all_days() {
            let guard = day.read().await;
            all.extend(guard.bookings.iter().cloned());
        }
        all.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| schedule_order(a, b)));
        Ok(all)
    }

    async fn get_booking(&self, id: &BookingId) -> Result<Option<Booking>, StoreError> {
        let Some(key) = self.index.get(id).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        let Some(day) = self.day(&key) else {
            return Ok(None);
        };
        let guard = day.read().await;
        Ok(guard.position(id).map(|pos| guard.bookings[pos].clone()))
    }

    async fn insert_booking(&self, booking: Booking) -> Result<(), StoreError> {
        if self.index.contains_key(&booking.booking_id) {
            return Err(StoreError::AlreadyExists(booking.booking_id));
        }
        let key = DayKey::of(&booking);
        let day = self.day_or_create(key.clone());
        let mut guard = day.write().await;

        if booking.status.occupies_slot()
            && let Some(existing) = guard.first_clash(&booking)
        {
            return Err(StoreError::Overlap(existing.booking_id.clone()));
        }

        self.index.insert(booking.booking_id.clone(), key);
        guard.insert(booking.clone());
        // Published under the partition lock so the feed sees writes in commit order.
        self.publish(ChangeRecord::inserted(booking));
        Ok(())
    }

    async fn update_booking_status(
        &self,
        id: &BookingId,
        status: BookingStatus,
    ) -> Result<(Booking, Booking), StoreError> {
        let key = self
            .index
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let day = self.day(&key).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let mut guard = day.write().await;
        let pos = guard.position(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;

        let old = guard.bookings[pos].clone();
        if !old.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id: id.clone(),
                from: old.status,
                to: status,
            });
        }
        guard.bookings[pos].status = status;
        let new = guard.bookings[pos].clone();
        self.publish(ChangeRecord::updated(old.clone(), new.clone()));
        Ok((old, new))
    }

    async fn delete_bookings(&self, matcher: &DeleteMatcher) -> Result<Vec<Booking>, StoreError> {
        if matcher.is_empty() {
            return Err(StoreError::Unavailable("refusing unbounded delete".into()));
        }

        let keys: Vec<DayKey> = if let Some(id) = &matcher.booking_id {
            self.index.get(id).map(|e| e.value().clone()).into_iter().collect()
        } else if let (Some(room_id), Some(date)) = (&matcher.room_id, &matcher.date) {
            vec![DayKey {
                room_id: room_id.clone(),
                date: date.clone(),
            }]
        } else {
            self.days.iter().map(|e| e.key().clone()).collect()
        };

        let mut deleted = Vec::new();
        for key in keys {
            let Some(day) = self.day(&key) else {
                continue;
            };
            let mut guard = day.write().await;
            let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut guard.bookings)
                .into_iter()
                .partition(|b| matcher.matches(b));
            guard.bookings = kept;
            for b in &gone {
                self.index.remove(&b.booking_id);
                self.publish(ChangeRecord::deleted(b.clone()));
            }
            deleted.extend(gone);
            drop(guard);
            drop(day);
            self.prune(&key);
        }
        Ok(deleted)
    }

    fn subscribe_changes(&self) -> Option<broadcast::Receiver<ChangeRecord>> {
        self.feed.as_ref().map(|tx| tx.subscribe())
    }
}
