//! HTTP surface: fetch and mutation endpoints plus the event stream.

mod bookings;
mod error;
mod events;

use std::sync::Arc;

use axum::Router;

use crate::notify::Broadcaster;
use crate::proposal::ProposalSource;
use crate::service::BookingService;

pub use bookings::{BatchResponse, ChatResponse};
pub use error::{ApiError, ApiJson};

/// Shared handler state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BookingService>,
    pub broadcaster: Arc<Broadcaster>,
    pub proposals: Arc<dyn ProposalSource>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(bookings::router())
        .merge(events::router())
        .with_state(state)
}
