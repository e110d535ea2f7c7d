use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Opaque booking identifier. Short alphanumeric token, immutable once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookingId(String);

impl BookingId {
    /// Ten characters of Crockford base32 from the random half of a fresh ULID.
    pub fn generate() -> Self {
        let raw = Ulid::new().to_string();
        Self(raw[raw.len() - 10..].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BookingId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for BookingId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
}

impl BookingStatus {
    /// Pending and approved bookings occupy their slot; rejected ones are soft-deleted markers.
    pub fn occupies_slot(self) -> bool {
        !matches!(self, BookingStatus::Rejected)
    }

    /// Only `Pending` may move, and only to `Approved` or `Rejected`.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Pending, BookingStatus::Approved)
                | (BookingStatus::Pending, BookingStatus::Rejected)
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Approved => "approved",
            BookingStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerRole {
    #[default]
    Student,
    Teacher,
    Admin,
}

impl OwnerRole {
    /// Students need an admin's approval; staff bookings are approved on creation.
    pub fn initial_status(self) -> BookingStatus {
        match self {
            OwnerRole::Student => BookingStatus::Pending,
            OwnerRole::Teacher | OwnerRole::Admin => BookingStatus::Approved,
        }
    }
}

impl fmt::Display for OwnerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OwnerRole::Student => "student",
            OwnerRole::Teacher => "teacher",
            OwnerRole::Admin => "admin",
        };
        f.write_str(s)
    }
}

/// A reservation of a room for one date and a half-open `[start_time, end_time)` range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub booking_id: BookingId,
    pub room_id: String,
    /// ISO `YYYY-MM-DD`, naive local date.
    pub date: String,
    /// `HH:MM`
    pub start_time: String,
    /// `HH:MM`
    pub end_time: String,
    pub status: BookingStatus,
    pub owner_role: OwnerRole,
    pub created_at: DateTime<Utc>,
}

/// Bookings grouped by ISO date.
pub type Schedule = BTreeMap<String, Vec<Booking>>;

/// Order within a date: start time, then creation, then id.
pub fn schedule_order(a: &Booking, b: &Booking) -> std::cmp::Ordering {
    let start = |x: &Booking| crate::time::to_minutes(&x.start_time).unwrap_or(u32::MAX);
    start(a)
        .cmp(&start(b))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.booking_id.cmp(&b.booking_id))
}

/// Group occupying bookings by date. Rejected bookings are left out.
pub fn group_by_date<'a>(bookings: impl IntoIterator<Item = &'a Booking>) -> Schedule {
    let mut schedule = Schedule::new();
    for b in bookings.into_iter().filter(|b| b.status.occupies_slot()) {
        schedule.entry(b.date.clone()).or_default().push(b.clone());
    }
    for bucket in schedule.values_mut() {
        bucket.sort_by(schedule_order);
    }
    schedule
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub room_id: String,
    pub name: String,
    pub capacity: u32,
    #[serde(default)]
    pub features: Vec<String>,
}

/// Unvalidated candidate booking. Every field is optional because the producer is untrusted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    #[serde(default)]
    pub room_id: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

impl Proposal {
    pub fn new(room_id: &str, date: &str, start_time: &str, end_time: &str) -> Self {
        Self {
            room_id: Some(room_id.to_string()),
            date: Some(date.to_string()),
            start_time: Some(start_time.to_string()),
            end_time: Some(end_time.to_string()),
        }
    }
}

// ── Change events ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }
}

/// A row-level change as reported by the store's native feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub new: Option<Booking>,
    pub old: Option<Booking>,
}

impl ChangeRecord {
    pub fn inserted(booking: Booking) -> Self {
        Self {
            kind: ChangeKind::Insert,
            new: Some(booking),
            old: None,
        }
    }

    pub fn updated(old: Booking, new: Booking) -> Self {
        Self {
            kind: ChangeKind::Update,
            new: Some(new),
            old: Some(old),
        }
    }

    pub fn deleted(old: Booking) -> Self {
        Self {
            kind: ChangeKind::Delete,
            new: None,
            old: Some(old),
        }
    }
}

/// Wire form of a `booking_change` event.
///
/// `new`/`old` stay untyped JSON: receivers must cope with partial rows (an
/// `UPDATE` is only guaranteed to carry `bookingId` and `status`, a `DELETE`
/// only `bookingId` and `date`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub event_type: ChangeKind,
    #[serde(default)]
    pub new: Option<serde_json::Value>,
    #[serde(default)]
    pub old: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn from_record(record: &ChangeRecord, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type: record.kind,
            new: record.new.as_ref().and_then(|b| serde_json::to_value(b).ok()),
            old: record.old.as_ref().and_then(|b| serde_json::to_value(b).ok()),
            timestamp,
        }
    }
}

/// Minimal `UPDATE` payload: enough to patch local state.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPatch {
    pub booking_id: BookingId,
    pub status: BookingStatus,
}

/// Minimal `DELETE` payload: enough to locate the removed row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingKey {
    pub booking_id: BookingId,
    #[serde(default)]
    pub date: Option<String>,
}
