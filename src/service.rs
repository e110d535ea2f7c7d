//! The write path: every mutation validates, commits, then notifies.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::limits::MAX_BATCH_SIZE;
use crate::model::*;
use crate::observability::{BOOKINGS_WRITTEN_TOTAL, GATE_SKIPS_TOTAL};
use crate::relay::ChangeRelay;
use crate::store::{BookingStore, DeleteMatcher, RoomRegistry, StoreError};
use crate::validator::{ValidationOutcome, Validator};

#[derive(Debug)]
pub enum ServiceError {
    /// A booking rule failed, or availability could not be confirmed.
    Invalid(ValidationOutcome),
    UnknownRoom(String),
    MissingField(&'static str),
    NotFound(BookingId),
    InvalidTransition {
        id: BookingId,
        from: BookingStatus,
        to: BookingStatus,
    },
    /// Another write took the slot between validation and commit.
    SlotTaken(BookingId),
    BatchTooLarge(usize),
    Store(StoreError),
}

impl ServiceError {
    /// True when the caller should retry later rather than change the request.
    pub fn is_infrastructure(&self) -> bool {
        match self {
            ServiceError::Invalid(outcome) => outcome.infrastructure_failure,
            ServiceError::Store(_) => true,
            _ => false,
        }
    }

    /// Human-readable reasons for batch results.
    pub fn reasons(&self) -> Vec<String> {
        match self {
            ServiceError::Invalid(outcome) => outcome.reasons.clone(),
            other => vec![other.to_string()],
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceError::Invalid(outcome) => {
                write!(f, "booking rejected: {}", outcome.reasons.join("; "))
            }
            ServiceError::UnknownRoom(room) => write!(f, "unknown room: {room}"),
            ServiceError::MissingField(field) => write!(f, "missing field: {field}"),
            ServiceError::NotFound(id) => write!(f, "booking not found: {id}"),
            ServiceError::InvalidTransition { id, from, to } => {
                write!(f, "booking {id} is {from} and cannot become {to}")
            }
            ServiceError::SlotTaken(id) => {
                write!(f, "slot was taken by booking {id} before the write committed")
            }
            ServiceError::BatchTooLarge(n) => {
                write!(f, "batch of {n} exceeds the limit of {MAX_BATCH_SIZE}")
            }
            ServiceError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<StoreError> for ServiceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => ServiceError::NotFound(id),
            StoreError::Overlap(id) => ServiceError::SlotTaken(id),
            StoreError::InvalidTransition { id, from, to } => {
                ServiceError::InvalidTransition { id, from, to }
            }
            other => ServiceError::Store(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Created,
    Rejected,
    Error,
}

/// Result for one entry of a batch submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub index: usize,
    pub proposal: Proposal,
    pub status: EntryStatus,
    pub booking: Option<Booking>,
    pub reasons: Vec<String>,
    pub conflicts: Vec<Booking>,
}

pub struct BookingService {
    store: Arc<dyn BookingStore>,
    rooms: Arc<dyn RoomRegistry>,
    validator: Validator,
    relay: Arc<ChangeRelay>,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn BookingStore>,
        rooms: Arc<dyn RoomRegistry>,
        validator: Validator,
        relay: Arc<ChangeRelay>,
    ) -> Self {
        Self {
            store,
            rooms,
            validator,
            relay,
        }
    }

    // ── Reads ────────────────────────────────────────────────

    pub async fn list(&self) -> Result<Vec<Booking>, ServiceError> {
        Ok(self.store.list_bookings().await?)
    }

    pub async fn schedule(&self) -> Result<Schedule, ServiceError> {
        let bookings = self.store.list_bookings().await?;
        Ok(group_by_date(&bookings))
    }

    pub async fn rooms(&self) -> Result<Vec<Room>, ServiceError> {
        Ok(self.rooms.list_rooms().await?)
    }

    /// Dry run: the rules without a write.
    pub async fn validate(&self, proposal: &Proposal) -> ValidationOutcome {
        self.validator.validate(proposal).await
    }

    /// Dry run for several proposals, e.g. to preview a chat request before confirming it.
    pub async fn preview(&self, proposals: &[Proposal]) -> Vec<ValidationOutcome> {
        let mut out = Vec::with_capacity(proposals.len());
        for p in proposals {
            out.push(self.validator.validate(p).await);
        }
        out
    }

    // ── Writes ───────────────────────────────────────────────

    pub async fn create(
        &self,
        proposal: &Proposal,
        role: OwnerRole,
    ) -> Result<Booking, ServiceError> {
        self.create_at(proposal, role, chrono::Local::now().date_naive())
            .await
    }

    /// The pre-commit gate, then the room check, then the insert. The gate
    /// runs here regardless of any earlier validation, because another booking
    /// may have landed since.
    pub async fn create_at(
        &self,
        proposal: &Proposal,
        role: OwnerRole,
        today: NaiveDate,
    ) -> Result<Booking, ServiceError> {
        let outcome = self.validator.validate_at(proposal, today).await;
        let slot = match outcome.slot.clone() {
            Some(slot) if outcome.valid => slot,
            _ => return Err(ServiceError::Invalid(outcome)),
        };
        if !self.rooms.contains_room(&slot.room_id).await? {
            return Err(ServiceError::UnknownRoom(slot.room_id));
        }

        let booking = Booking {
            booking_id: BookingId::generate(),
            room_id: slot.room_id,
            date: slot.date,
            start_time: slot.start_time,
            end_time: slot.end_time,
            status: role.initial_status(),
            owner_role: role,
            created_at: Utc::now(),
        };
        self.store.insert_booking(booking.clone()).await?;

        metrics::counter!(BOOKINGS_WRITTEN_TOTAL, "op" => "insert").increment(1);
        info!(
            "booking {} created: {} {} {}-{} ({})",
            booking.booking_id,
            booking.room_id,
            booking.date,
            booking.start_time,
            booking.end_time,
            booking.status
        );
        self.relay.notify(&ChangeRecord::inserted(booking.clone()));
        Ok(booking)
    }

    /// Each entry is gated and written on its own; a failing entry is logged and
    /// skipped, and the rest still go through.
    pub async fn submit_batch(
        &self,
        proposals: Vec<Proposal>,
        role: OwnerRole,
    ) -> Result<Vec<BatchEntry>, ServiceError> {
        self.submit_batch_at(proposals, role, chrono::Local::now().date_naive())
            .await
    }

    pub async fn submit_batch_at(
        &self,
        proposals: Vec<Proposal>,
        role: OwnerRole,
        today: NaiveDate,
    ) -> Result<Vec<BatchEntry>, ServiceError> {
        if proposals.len() > MAX_BATCH_SIZE {
            return Err(ServiceError::BatchTooLarge(proposals.len()));
        }
        let mut entries = Vec::with_capacity(proposals.len());
        for (index, proposal) in proposals.into_iter().enumerate() {
            let entry = match self.create_at(&proposal, role, today).await {
                Ok(booking) => BatchEntry {
                    index,
                    proposal,
                    status: EntryStatus::Created,
                    booking: Some(booking),
                    reasons: Vec::new(),
                    conflicts: Vec::new(),
                },
                Err(e) => {
                    warn!("skipping batch entry {index}: {e}");
                    metrics::counter!(GATE_SKIPS_TOTAL).increment(1);
                    let status = if e.is_infrastructure() {
                        EntryStatus::Error
                    } else {
                        EntryStatus::Rejected
                    };
                    let conflicts = match &e {
                        ServiceError::Invalid(outcome) => outcome.conflicts.clone(),
                        _ => Vec::new(),
                    };
                    BatchEntry {
                        index,
                        proposal,
                        status,
                        booking: None,
                        reasons: e.reasons(),
                        conflicts,
                    }
                }
            };
            entries.push(entry);
        }
        Ok(entries)
    }

    pub async fn approve(&self, id: &BookingId) -> Result<Booking, ServiceError> {
        self.set_status(id, BookingStatus::Approved).await
    }

    pub async fn reject(&self, id: &BookingId) -> Result<Booking, ServiceError> {
        self.set_status(id, BookingStatus::Rejected).await
    }

    async fn set_status(
        &self,
        id: &BookingId,
        status: BookingStatus,
    ) -> Result<Booking, ServiceError> {
        let (old, new) = self.store.update_booking_status(id, status).await?;
        metrics::counter!(BOOKINGS_WRITTEN_TOTAL, "op" => "update").increment(1);
        info!("booking {id}: {} -> {}", old.status, new.status);
        self.relay.notify(&ChangeRecord::updated(old, new.clone()));
        Ok(new)
    }

    /// Cancel every booking of a room on a date. Returns the removed rows.
    pub async fn cancel(&self, room_id: &str, date: &str) -> Result<Vec<Booking>, ServiceError> {
        let room_id = room_id.trim();
        let date = date.trim();
        if room_id.is_empty() {
            return Err(ServiceError::MissingField("roomId"));
        }
        if date.is_empty() {
            return Err(ServiceError::MissingField("date"));
        }
        let deleted = self
            .store
            .delete_bookings(&DeleteMatcher::room_and_date(room_id, date))
            .await?;
        metrics::counter!(BOOKINGS_WRITTEN_TOTAL, "op" => "delete")
            .increment(deleted.len() as u64);
        info!("cancelled {} bookings for {room_id} on {date}", deleted.len());
        for b in &deleted {
            self.relay.notify(&ChangeRecord::deleted(b.clone()));
        }
        Ok(deleted)
    }
}
