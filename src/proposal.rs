//! Untrusted sources of booking candidates.
//!
//! Whatever produces proposals (a language model, a form, a parser) is
//! treated as unreliable: its output only ever reaches storage through the
//! validator.

use chrono::{Days, NaiveDate};

use crate::model::Proposal;
use crate::time::to_minutes;

pub trait ProposalSource: Send + Sync {
    /// Extract zero or more candidates from a chat message. Empty means "no proposal".
    fn propose(&self, message: &str) -> Vec<Proposal>;
}

/// Recognises plain requests such as `book CSIS-101 on 2026-03-05 from 09:00 to 11:00`,
/// one per line or `;`-separated. Partial requests yield partial proposals.
#[derive(Debug, Clone, Default)]
pub struct LineProposalSource {
    today: Option<NaiveDate>,
}

impl LineProposalSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin "today"/"tomorrow" to a fixed date.
    pub fn with_today(today: NaiveDate) -> Self {
        Self { today: Some(today) }
    }

    fn today(&self) -> NaiveDate {
        self.today
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    fn parse_request(&self, request: &str) -> Option<Proposal> {
        let mut proposal = Proposal::default();
        let mut times = Vec::new();
        let mut intent = false;

        for raw in request.split_whitespace() {
            let token = raw.trim_matches(|c: char| matches!(c, ',' | '.' | '!' | '?' | '(' | ')'));
            let lower = token.to_ascii_lowercase();
            match lower.as_str() {
                "book" | "reserve" | "booking" | "schedule" => {
                    intent = true;
                    continue;
                }
                "today" => {
                    proposal.date.get_or_insert_with(|| iso(self.today()));
                    continue;
                }
                "tomorrow" => {
                    if let Some(d) = self.today().checked_add_days(Days::new(1)) {
                        proposal.date.get_or_insert_with(|| iso(d));
                    }
                    continue;
                }
                _ => {}
            }

            if let Some((a, b)) = token.split_once('-')
                && to_minutes(a).is_some()
                && to_minutes(b).is_some()
            {
                times.push(a.to_string());
                times.push(b.to_string());
            } else if to_minutes(token).is_some() {
                times.push(token.to_string());
            } else if looks_like_date(token) {
                proposal.date.get_or_insert_with(|| token.to_string());
            } else if looks_like_room(token) {
                proposal.room_id.get_or_insert_with(|| token.to_ascii_uppercase());
            }
        }

        let mut times = times.into_iter();
        proposal.start_time = times.next();
        proposal.end_time = times.next();

        let found_any = proposal.room_id.is_some()
            || proposal.date.is_some()
            || proposal.start_time.is_some();
        if (intent || proposal.room_id.is_some()) && found_any {
            Some(proposal)
        } else {
            None
        }
    }
}

impl ProposalSource for LineProposalSource {
    fn propose(&self, message: &str) -> Vec<Proposal> {
        message
            .split(['\n', ';'])
            .filter_map(|line| self.parse_request(line))
            .collect()
    }
}

fn iso(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

/// `YYYY-MM-DD` shape; calendar validity is the validator's call.
fn looks_like_date(token: &str) -> bool {
    let b = token.as_bytes();
    b.len() == 10
        && b[4] == b'-'
        && b[7] == b'-'
        && b.iter()
            .enumerate()
            .all(|(i, c)| i == 4 || i == 7 || c.is_ascii_digit())
}

/// Letters, a dash, then digits: `CSIS-101`.
fn looks_like_room(token: &str) -> bool {
    let Some((prefix, number)) = token.split_once('-') else {
        return false;
    };
    !prefix.is_empty()
        && !number.is_empty()
        && prefix.chars().all(|c| c.is_ascii_alphabetic())
        && number.chars().all(|c| c.is_ascii_digit())
}
