mod memory;
mod rooms;

pub use memory::MemoryStore;
pub use rooms::StaticRoomRegistry;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound(BookingId),
    AlreadyExists(BookingId),
    /// Storage-level exclusion: the row would overlap an occupying booking.
    Overlap(BookingId),
    InvalidTransition {
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
    },
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "booking not found: {id}"),
            StoreError::AlreadyExists(id) => write!(f, "booking already exists: {id}"),
            StoreError::Overlap(id) => write!(f, "slot already taken by booking {id}"),
            StoreError::InvalidTransition { id, from, to } => {
                write!(f, "booking {id} cannot move from {from} to {to}")
            }
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Selects rows for deletion. Unset fields match everything; at least one must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteMatcher {
    pub booking_id: Option<BookingId>,
    pub room_id: Option<String>,
    pub date: Option<String>,
}

impl DeleteMatcher {
    pub fn room_and_date(room_id: &str, date: &str) -> Self {
        Self {
            booking_id: None,
            room_id: Some(room_id.to_string()),
            date: Some(date.to_string()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.booking_id.is_none() && self.room_id.is_none() && self.date.is_none()
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        self.booking_id.as_ref().is_none_or(|id| *id == booking.booking_id)
            && self.room_id.as_ref().is_none_or(|r| *r == booking.room_id)
            && self.date.as_ref().is_none_or(|d| *d == booking.date)
    }
}

/// Transactional row store holding bookings.
#[async_trait]
pub trait BookingStore: Send + Sync {
    /// Bookings for one room and date, excluding `exclude_status` when given,
    /// ordered by start time.
    async fn query_bookings(
        &self,
        room_id: &str,
        date: &str,
        exclude_status: Option<BookingStatus>,
    ) -> Result<Vec<Booking>, StoreError>;

    /// Every booking, ordered by `(date, start_time, created_at, booking_id)`.
    async fn list_bookings(&self) -> Result<Vec<Booking>, StoreError>;

    async fn get_booking(&self, id: &BookingId) -> Result<Option<Booking>, StoreError>;

    async fn insert_booking(&self, booking: Booking) -> Result<(), StoreError>;

    /// Moves a booking along an allowed status transition, atomically with the
    /// check. Returns `(old, new)` rows.
    async fn update_booking_status(
        &self,
        id: &BookingId,
        status: BookingStatus,
    ) -> Result<(Booking, Booking), StoreError>;

    /// Returns the deleted rows.
    async fn delete_bookings(&self, matcher: &DeleteMatcher) -> Result<Vec<Booking>, StoreError>;

    /// Native change feed, if the store has one.
    fn subscribe_changes(&self) -> Option<broadcast::Receiver<ChangeRecord>> {
        None
    }
}

/// Reference data for rooms, owned outside this crate.
#[async_trait]
pub trait RoomRegistry: Send + Sync {
    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError>;

    async fn contains_room(&self, room_id: &str) -> Result<bool, StoreError> {
        Ok(self.list_rooms().await?.iter().any(|r| r.room_id == room_id))
    }
}
