//! Default booking rules and hard input limits.

/// Earliest permitted start, minutes since midnight (07:00).
pub const OPENING_MINUTES: u32 = 7 * 60;

/// Latest permitted end, minutes since midnight (22:00).
pub const CLOSING_MINUTES: u32 = 22 * 60;

/// Longest single booking, in minutes.
pub const MAX_DURATION_MINUTES: u32 = 240;

/// Entries accepted in one batch submission.
pub const MAX_BATCH_SIZE: usize = 50;

pub const MAX_ROOM_ID_LEN: usize = 64;

/// Chat messages longer than this are not handed to the proposal source.
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Buffered frames per push channel before the client counts as stalled.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

pub const DEFAULT_HEARTBEAT_SECS: u64 = 25;
