//! Minute-of-day parsing and half-open range overlap.

use std::fmt;
use std::str::FromStr;

/// Parse `"HH:MM"` into minutes since midnight. `None` means "cannot evaluate".
pub fn to_minutes(hhmm: &str) -> Option<u32> {
    let (h, m) = hhmm.trim().split_once(':')?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return None;
    }
    if !h.bytes().all(|b| b.is_ascii_digit()) || !m.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hours: u32 = h.parse().ok()?;
    let minutes: u32 = m.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Render minutes since midnight as `HH:MM`.
pub fn format_minutes(minutes: u32) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// What to answer when a bound cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverlapPolicy {
    /// Unparseable bounds never overlap.
    #[default]
    FailOpen,
    /// Unparseable bounds always overlap.
    FailClosed,
}

impl FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "fail-open" | "fail_open" => Ok(OverlapPolicy::FailOpen),
            "closed" | "fail-closed" | "fail_closed" => Ok(OverlapPolicy::FailClosed),
            other => Err(format!("unknown overlap policy: {other}")),
        }
    }
}

impl fmt::Display for OverlapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlapPolicy::FailOpen => f.write_str("fail-open"),
            OverlapPolicy::FailClosed => f.write_str("fail-closed"),
        }
    }
}

/// `[start_a, end_a)` and `[start_b, end_b)` share at least one minute.
/// Back-to-back ranges do not overlap. Fails open on unparseable input.
pub fn overlaps(start_a: &str, end_a: &str, start_b: &str, end_b: &str) -> bool {
    overlaps_with(OverlapPolicy::FailOpen, start_a, end_a, start_b, end_b)
}

pub fn overlaps_with(
    policy: OverlapPolicy,
    start_a: &str,
    end_a: &str,
    start_b: &str,
    end_b: &str,
) -> bool {
    match (
        to_minutes(start_a),
        to_minutes(end_a),
        to_minutes(start_b),
        to_minutes(end_b),
    ) {
        (Some(sa), Some(ea), Some(sb), Some(eb)) => sa < eb && sb < ea,
        _ => policy == OverlapPolicy::FailClosed,
    }
}
