//! Deterministic booking rules. Every write passes through here, whatever produced the proposal.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};

use crate::limits::*;
use crate::model::*;
use crate::store::BookingStore;
use crate::time::{OverlapPolicy, format_minutes, overlaps_with, to_minutes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationRules {
    /// Minutes since midnight.
    pub opening: u32,
    /// Minutes since midnight.
    pub closing: u32,
    pub max_duration: u32,
    pub overlap_policy: OverlapPolicy,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            opening: OPENING_MINUTES,
            closing: CLOSING_MINUTES,
            max_duration: MAX_DURATION_MINUTES,
            overlap_policy: OverlapPolicy::FailOpen,
        }
    }
}

/// A proposal that passed the static rules, with trimmed fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub room_id: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub valid: bool,
    pub conflicts: Vec<Booking>,
    pub reasons: Vec<String>,
    /// Set when availability could not be confirmed because the store failed.
    pub infrastructure_failure: bool,
    #[serde(skip)]
    pub slot: Option<Slot>,
}

impl ValidationOutcome {
    fn rejected(reason: String) -> Self {
        Self {
            valid: false,
            conflicts: Vec::new(),
            reasons: vec![reason],
            infrastructure_failure: false,
            slot: None,
        }
    }
}

pub struct Validator {
    store: Arc<dyn BookingStore>,
    rules: ValidationRules,
}

impl Validator {
    pub fn new(store: Arc<dyn BookingStore>, rules: ValidationRules) -> Self {
        Self { store, rules }
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    /// Validate against today's local date.
    pub async fn validate(&self, proposal: &Proposal) -> ValidationOutcome {
        self.validate_at(proposal, chrono::Local::now().date_naive()).await
    }

    /// Rules run in order and the first failure short-circuits. The static
    /// rules gate the store query so malformed input never reaches storage.
    pub async fn validate_at(&self, proposal: &Proposal, today: NaiveDate) -> ValidationOutcome {
        let outcome = match self.check_static(proposal, today) {
            Ok(slot) => self.check_conflicts(slot).await,
            Err(reason) => {
                debug!("proposal rejected: {reason}");
                ValidationOutcome::rejected(reason)
            }
        };
        let label = if outcome.valid {
            "valid"
        } else if outcome.infrastructure_failure {
            "error"
        } else {
            "invalid"
        };
        metrics::counter!(crate::observability::VALIDATIONS_TOTAL, "outcome" => label).increment(1);
        outcome
    }

    /// Rules 1-5: no I/O.
    fn check_static(&self, proposal: &Proposal, today: NaiveDate) -> Result<Slot, String> {
        let field = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let fields = [
            ("roomId", field(&proposal.room_id)),
            ("date", field(&proposal.date)),
            ("startTime", field(&proposal.start_time)),
            ("endTime", field(&proposal.end_time)),
        ];
        let missing: Vec<&str> = fields
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(name, _)| *name)
            .collect();
        let [(_, Some(room_id)), (_, Some(date)), (_, Some(start_time)), (_, Some(end_time))] =
            fields
        else {
            return Err(format!("missing fields: {}", missing.join(", ")));
        };
        if room_id.len() > MAX_ROOM_ID_LEN {
            return Err("room id too long".into());
        }

        let (start, end) = match (to_minutes(&start_time), to_minutes(&end_time)) {
            (Some(s), Some(e)) if s < e => (s, e),
            _ => {
                return Err(format!(
                    "start time {start_time} must be before end time {end_time}"
                ));
            }
        };

        // Only canonical ISO dates, so string comparison and storage keys agree.
        let day = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .ok()
            .filter(|d| d.format("%Y-%m-%d").to_string() == date)
            .ok_or_else(|| format!("invalid date {date}: expected YYYY-MM-DD"))?;
        if day < today {
            return Err(format!(
                "cannot book a past date: {date} is before {}",
                today.format("%Y-%m-%d")
            ));
        }

        if start < self.rules.opening || end > self.rules.closing {
            return Err(format!(
                "outside operating hours: bookings must fall between {} and {} (requested {start_time}-{end_time})",
                format_minutes(self.rules.opening),
                format_minutes(self.rules.closing),
            ));
        }

        let duration = end - start;
        if duration > self.rules.max_duration {
            return Err(format!(
                "duration of {duration} minutes exceeds the maximum of {} minutes",
                self.rules.max_duration
            ));
        }

        Ok(Slot {
            room_id,
            date,
            start_time: format_minutes(start),
            end_time: format_minutes(end),
        })
    }

    /// Rule 6: the only rule that touches storage. Fails closed.
    async fn check_conflicts(&self, slot: Slot) -> ValidationOutcome {
        let existing = match self
            .store
            .query_bookings(&slot.room_id, &slot.date, Some(BookingStatus::Rejected))
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                warn!(room = %slot.room_id, date = %slot.date, "availability check failed: {e}");
                let mut outcome =
                    ValidationOutcome::rejected(format!("unable to verify availability: {e}"));
                outcome.infrastructure_failure = true;
                return outcome;
            }
        };

        let mut conflicts = Vec::new();
        let mut reasons = Vec::new();
        for booking in existing {
            if !booking.status.occupies_slot() {
                continue;
            }
            if overlaps_with(
                self.rules.overlap_policy,
                &slot.start_time,
                &slot.end_time,
                &booking.start_time,
                &booking.end_time,
            ) {
                reasons.push(format!(
                    "conflicts with booking {} ({}-{}, {}, booked by {})",
                    booking.booking_id,
                    booking.start_time,
                    booking.end_time,
                    booking.status,
                    booking.owner_role
                ));
                conflicts.push(booking);
            }
        }

        ValidationOutcome {
            valid: conflicts.is_empty(),
            conflicts,
            reasons,
            infrastructure_failure: false,
            slot: Some(slot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DeleteMatcher, MemoryStore, StoreError};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn existing(start: &str, end: &str, status: BookingStatus) -> Booking {
        Booking {
            booking_id: BookingId::generate(),
            room_id: "CSIS-101".into(),
            date: "2026-03-05".into(),
            start_time: start.into(),
            end_time: end.into(),
            status,
            owner_role: OwnerRole::Teacher,
            created_at: Utc::now(),
        }
    }

    async fn validator_with(rows: Vec<Booking>) -> Validator {
        let store = Arc::new(MemoryStore::new());
        for b in rows {
            store.insert_booking(b).await.unwrap();
        }
        Validator::new(store, ValidationRules::default())
    }

    /// Store that fails every call and counts queries.
    #[derive(Default)]
    struct BrokenStore {
        queries: AtomicUsize,
    }

    #[async_trait]
    impl BookingStore for BrokenStore {
        async fn query_bookings(
            &self,
            _: &str,
            _: &str,
            _: Option<BookingStatus>,
        ) -> Result<Vec<Booking>, StoreError> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn list_bookings(&self) -> Result<Vec<Booking>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn get_booking(&self, _: &BookingId) -> Result<Option<Booking>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn insert_booking(&self, _: Booking) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn update_booking_status(
            &self,
            _: &BookingId,
            _: BookingStatus,
        ) -> Result<(Booking, Booking), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
        async fn delete_bookings(&self, _: &DeleteMatcher) -> Result<Vec<Booking>, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn scenario_a_free_room() {
        let v = validator_with(vec![]).await;
        let out = v
            .validate_at(&Proposal::new("CSIS-101", "2026-03-05", "09:00", "11:00"), today())
            .await;
        assert!(out.valid);
        assert!(out.conflicts.is_empty());
        assert!(out.reasons.is_empty());
        assert_eq!(out.slot.unwrap().room_id, "CSIS-101");
    }

    #[tokio::test]
    async fn slot_times_are_zero_padded() {
        let v = validator_with(vec![]).await;
        let out = v
            .validate_at(&Proposal::new("CSIS-101", "2026-03-05", "8:00", "9:30"), today())
            .await;
        assert!(out.valid, "{:?}", out.reasons);
        let slot = out.slot.unwrap();
        assert_eq!(slot.start_time, "08:00");
        assert_eq!(slot.end_time, "09:30");
    }

    #[tokio::test]
    async fn scenario_b_overlap_conflicts() {
        let held = existing("09:00", "11:00", BookingStatus::Approved);
        let v = validator_with(vec![held.clone()]).await;
        let out = v
            .validate_at(&Proposal::new("CSIS-101", "2026-03-05", "10:00", "12:00"), today())
            .await;
        assert!(!out.valid);
        assert_eq!(out.conflicts, vec![held.clone()]);
        assert_eq!(out.reasons.len(), 1);
        let reason = &out.reasons[0];
        assert!(reason.contains(held.booking_id.as_str()));
        assert!(reason.contains("09:00-11:00"));
        assert!(reason.contains("approved"));
        assert!(reason.contains("teacher"));
        assert!(!out.infrastructure_failure);
    }

    #[tokio::test]
    async fn scenario_c_touching_edge_is_free() {
        let v = validator_with(vec![existing("09:00", "11:00", BookingStatus::Approved)]).await;
        let out = v
            .validate_at(&Proposal::new("CSIS-101", "2026-03-05", "11:00", "13:00"), today())
            .await;
        assert!(out.valid, "{:?}", out.reasons);
    }

    #[tokio::test]
    async fn scenario_d_after_closing() {
        let v = validator_with(vec![]).await;
        let out = v
            .validate_at(&Proposal::new("CSIS-101", "2026-03-05", "23:00", "23:30"), today())
            .await;
        assert!(!out.valid);
        assert!(out.reasons[0].contains("operating hours"));
        assert!(out.reasons[0].contains("22:00"));
    }

    #[tokio::test]
    async fn scenario_e_past_date() {
        let v = validator_with(vec![]).await;
        let out = v
            .validate_at(&Proposal::new("CSIS-101", "2026-02-28", "09:00", "10:00"), today())
            .await;
        assert!(!out.valid);
        assert!(out.reasons[0].contains("past"));
    }

    #[tokio::test]
    async fn today_is_not_past() {
        let v = validator_with(vec![]).await;
        let out = v
            .validate_at(&Proposal::new("CSIS-101", "2026-03-01", "09:00", "10:00"), today())
            .await;
        assert!(out.valid);
    }

    #[tokio::test]
    async fn rejected_bookings_never_conflict() {
        let v = validator_with(vec![existing("09:00", "11:00", BookingStatus::Rejected)]).await;
        let out = v
            .validate_at(&Proposal::new("CSIS-101", "2026-03-05", "09:00", "11:00"), today())
            .await;
        assert!(out.valid);
        assert!(out.conflicts.is_empty());
    }

    #[tokio::test]
    async fn pending_bookings_do_conflict() {
        let held = existing("09:00", "11:00", BookingStatus::Pending);
        let v = validator_with(vec![held]).await;
        let out = v
            .validate_at(&Proposal::new("CSIS-101", "2026-03-05", "08:00", "09:30"), today())
            .await;
        assert!(!out.valid);
        assert!(out.reasons[0].contains("pending"));
    }

    #[tokio::test]
    async fn every_overlapping_booking_is_reported() {
        let a = existing("08:00", "09:00", BookingStatus::Approved);
        let b = existing("10:00", "11:00", BookingStatus::Pending);
        let c = existing("13:00", "14:00", BookingStatus::Approved);
        let v = validator_with(vec![a.clone(), b.clone(), c]).await;
        let out = v
            .validate_at(&Proposal::new("CSIS-101", "2026-03-05", "08:30", "12:00"), today())
            .await;
        assert_eq!(out.conflicts, vec![a, b]);
        assert_eq!(out.reasons.len(), 2);
    }

    #[tokio::test]
    async fn missing_fields_listed() {
        let v = validator_with(vec![]).await;
        let p = Proposal {
            room_id: Some("CSIS-101".into()),
            date: None,
            start_time: Some("  ".into()),
            end_time: Some("10:00".into()),
        };
        let out = v.validate_at(&p, today()).await;
        assert!(!out.valid);
        assert_eq!(out.reasons, vec!["missing fields: date, startTime".to_string()]);
    }

    #[tokio::test]
    async fn ordering_reason_names_both_times() {
        let v = validator_with(vec![]).await;
        for (s, e) in [("11:00", "09:00"), ("10:00", "10:00"), ("9am", "10:00")] {
            let out = v
                .validate_at(&Proposal::new("CSIS-101", "2026-03-05", s, e), today())
                .await;
            assert!(!out.valid);
            assert_eq!(out.reasons.len(), 1);
            assert!(out.reasons[0].contains(s) && out.reasons[0].contains(e), "{:?}", out.reasons);
        }
    }

    #[tokio::test]
    async fn malformed_date_rejected_before_query() {
        let store = Arc::new(BrokenStore::default());
        let v = Validator::new(store.clone(), ValidationRules::default());
        for date in ["tomorrow", "2026-3-5", "2026-02-30", "9999-99-99"] {
            let out = v
                .validate_at(&Proposal::new("CSIS-101", date, "09:00", "10:00"), today())
                .await;
            assert!(!out.valid);
            assert!(out.reasons[0].contains("invalid date"), "{date}: {:?}", out.reasons);
        }
        assert_eq!(store.queries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn opening_and_duration_limits() {
        let v = validator_with(vec![]).await;
        let early = v
            .validate_at(&Proposal::new("CSIS-101", "2026-03-05", "06:30", "08:00"), today())
            .await;
        assert!(early.reasons[0].contains("operating hours"));

        let edge = v
            .validate_at(&Proposal::new("CSIS-101", "2026-03-05", "18:00", "22:00"), today())
            .await;
        assert!(edge.valid, "{:?}", edge.reasons);

        let long = v
            .validate_at(&Proposal::new("CSIS-101", "2026-03-05", "08:00", "12:01"), today())
            .await;
        assert!(!long.valid);
        assert!(long.reasons[0].contains("241 minutes"));
    }

    #[tokio::test]
    async fn first_failing_rule_wins() {
        // Past date, out of hours and too long at once: only the date reason appears.
        let v = validator_with(vec![]).await;
        let out = v
            .validate_at(&Proposal::new("CSIS-101", "2020-01-01", "05:00", "23:00"), today())
            .await;
        assert_eq!(out.reasons.len(), 1);
        assert!(out.reasons[0].contains("past"));
    }

    #[tokio::test]
    async fn store_failure_fails_closed() {
        let store = Arc::new(BrokenStore::default());
        let v = Validator::new(store.clone(), ValidationRules::default());
        let out = v
            .validate_at(&Proposal::new("CSIS-101", "2026-03-05", "09:00", "10:00"), today())
            .await;
        assert!(!out.valid);
        assert!(out.infrastructure_failure);
        assert!(out.reasons[0].contains("unable to verify availability"));
        assert_eq!(store.queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn custom_rules_apply() {
        let store = Arc::new(MemoryStore::new());
        let rules = ValidationRules {
            opening: 8 * 60,
            closing: 18 * 60,
            max_duration: 60,
            overlap_policy: OverlapPolicy::FailClosed,
        };
        let v = Validator::new(store, rules);
        let out = v
            .validate_at(&Proposal::new("CSIS-101", "2026-03-05", "07:30", "08:00"), today())
            .await;
        assert!(out.reasons[0].contains("08:00 and 18:00"));
        let out = v
            .validate_at(&Proposal::new("CSIS-101", "2026-03-05", "09:00", "10:30"), today())
            .await;
        assert!(out.reasons[0].contains("maximum of 60"));
    }

    #[tokio::test]
    async fn accepted_writes_never_overlap() {
        let store = Arc::new(MemoryStore::new());
        let v = Validator::new(store.clone(), ValidationRules::default());

        // Deterministic pseudo-random slots between 07:00 and 22:00.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        let mut next = |bound: u64| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed % bound
        };
        for _ in 0..300 {
            let start = 7 * 60 + (next(56) as u32) * 15;
            let end = (start + 15 + (next(16) as u32) * 15).min(22 * 60);
            if start >= end {
                continue;
            }
            let p = Proposal::new(
                "CSIS-101",
                "2026-03-05",
                &format_minutes(start),
                &format_minutes(end),
            );
            let out = v.validate_at(&p, today()).await;
            if out.valid {
                let slot = out.slot.unwrap();
                let status = if next(2) == 0 {
                    BookingStatus::Pending
                } else {
                    BookingStatus::Approved
                };
                store
                    .insert_booking(Booking {
                        booking_id: BookingId::generate(),
                        room_id: slot.room_id,
                        date: slot.date,
                        start_time: slot.start_time,
                        end_time: slot.end_time,
                        status,
                        owner_role: OwnerRole::Student,
                        created_at: Utc::now(),
                    })
                    .await
                    .unwrap();
            }
        }

        let rows = store.query_bookings("CSIS-101", "2026-03-05", None).await.unwrap();
        assert!(!rows.is_empty());
        for (i, a) in rows.iter().enumerate() {
            for b in &rows[i + 1..] {
                assert!(
                    !crate::time::overlaps(&a.start_time, &a.end_time, &b.start_time, &b.end_time),
                    "{a:?} overlaps {b:?}"
                );
            }
        }
    }
}
