//! Client-side sync: keeps a local copy of bookings and the schedule current
//! from the event stream, falling back to polling while the stream is down.

mod driver;
mod http;
mod reducer;

use std::io;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::model::{Booking, Schedule};
use crate::sse::SseFrame;

pub use driver::{SyncClient, SyncHandle};
pub use http::HttpBookingApi;
pub use reducer::{Effect, Input, SyncState, SyncStatus, SyncTimings, SyncView};

pub type FrameStream = BoxStream<'static, Result<SseFrame, ClientError>>;

#[derive(Debug)]
pub enum ClientError {
    Http(reqwest::Error),
    Status { status: u16, body: String },
    Stream(io::Error),
    Decode(serde_json::Error),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Http(e) => write!(f, "request failed: {e}"),
            ClientError::Status { status, body } => write!(f, "server returned {status}: {body}"),
            ClientError::Stream(e) => write!(f, "event stream error: {e}"),
            ClientError::Decode(e) => write!(f, "malformed payload: {e}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Http(e) => Some(e),
            ClientError::Stream(e) => Some(e),
            ClientError::Decode(e) => Some(e),
            ClientError::Status { .. } => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        ClientError::Http(e)
    }
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Stream(e)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e)
    }
}

/// Transport used by the sync client.
#[async_trait]
pub trait BookingApi: Send + Sync + 'static {
    async fn fetch_bookings(&self) -> Result<Vec<Booking>, ClientError>;

    async fn fetch_schedule(&self) -> Result<Schedule, ClientError>;

    /// Open the event stream. The returned stream ends or errors when the connection drops.
    async fn open_stream(&self) -> Result<FrameStream, ClientError>;
}
