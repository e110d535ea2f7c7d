//! Fetch and mutation endpoints.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::http::{ApiError, ApiJson, AppState};
use crate::limits::MAX_MESSAGE_LEN;
use crate::model::*;
use crate::service::{BatchEntry, EntryStatus};
use crate::validator::ValidationOutcome;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/rooms", get(list_rooms))
        .route("/api/bookings", get(list_bookings).post(create_booking).delete(cancel_bookings))
        .route("/api/schedule", get(schedule))
        .route("/api/bookings/validate", post(validate))
        .route("/api/bookings/batch", post(submit_batch))
        .route("/api/bookings/{id}/approve", post(approve))
        .route("/api/bookings/{id}/reject", post(reject))
        .route("/api/chat", post(chat))
}

/// GET /api/rooms
async fn list_rooms(State(state): State<AppState>) -> Result<Json<Vec<Room>>, ApiError> {
    Ok(Json(state.service.rooms().await?))
}

/// GET /api/bookings
async fn list_bookings(State(state): State<AppState>) -> Result<Json<Vec<Booking>>, ApiError> {
    Ok(Json(state.service.list().await?))
}

/// GET /api/schedule
async fn schedule(State(state): State<AppState>) -> Result<Json<Schedule>, ApiError> {
    Ok(Json(state.service.schedule().await?))
}

/// POST /api/bookings/validate - dry run, always 200
async fn validate(
    State(state): State<AppState>,
    ApiJson(proposal): ApiJson<Proposal>,
) -> Json<ValidationOutcome> {
    Json(state.service.validate(&proposal).await)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    #[serde(flatten)]
    pub proposal: Proposal,
    #[serde(default)]
    pub owner_role: OwnerRole,
}

/// POST /api/bookings
async fn create_booking(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateRequest>,
) -> Result<(StatusCode, Json<Booking>), ApiError> {
    let booking = state.service.create(&req.proposal, req.owner_role).await?;
    Ok((StatusCode::CREATED, Json(booking)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub proposals: Vec<Proposal>,
    #[serde(default)]
    pub owner_role: OwnerRole,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub created: usize,
    pub skipped: usize,
    pub results: Vec<BatchEntry>,
}

impl BatchResponse {
    fn new(results: Vec<BatchEntry>) -> Self {
        let created = results
            .iter()
            .filter(|e| e.status == EntryStatus::Created)
            .count();
        Self {
            created,
            skipped: results.len() - created,
            results,
        }
    }
}

/// POST /api/bookings/batch
async fn submit_batch(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<BatchRequest>,
) -> Result<Json<BatchResponse>, ApiError> {
    let results = state.service.submit_batch(req.proposals, req.owner_role).await?;
    Ok(Json(BatchResponse::new(results)))
}

/// POST /api/bookings/{id}/approve
async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Booking>, ApiError> {
    Ok(Json(state.service.approve(&BookingId::from(id)).await?))
}

/// POST /api/bookings/{id}/reject
async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Booking>, ApiError> {
    Ok(Json(state.service.reject(&BookingId::from(id)).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelQuery {
    pub room_id: Option<String>,
    pub date: Option<String>,
}

/// DELETE /api/bookings?roomId=&date=
async fn cancel_bookings(
    State(state): State<AppState>,
    Query(q): Query<CancelQuery>,
) -> Result<Json<Vec<Booking>>, ApiError> {
    let room_id = q.room_id.unwrap_or_default();
    let date = q.date.unwrap_or_default();
    Ok(Json(state.service.cancel(&room_id, &date).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub owner_role: OwnerRole,
    /// Write the proposals instead of only previewing them.
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub reply: String,
    pub proposals: Vec<Proposal>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub preview: Vec<ValidationOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchResponse>,
}

/// POST /api/chat
///
/// The proposal source is untrusted: its output is previewed through the
/// validator, and on `confirm` submitted through the gated batch path.
async fn chat(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    if req.message.len() > MAX_MESSAGE_LEN {
        return Err(ApiError::BadRequest(format!(
            "message exceeds {MAX_MESSAGE_LEN} bytes"
        )));
    }
    let proposals = state.proposals.propose(&req.message);
    if proposals.is_empty() {
        return Ok(Json(ChatResponse {
            reply: "No booking request found. \
                    Try: book CSIS-101 on 2026-03-05 from 09:00 to 11:00"
                .into(),
            proposals,
            preview: Vec::new(),
            batch: None,
        }));
    }

    if !req.confirm {
        let preview = state.service.preview(&proposals).await;
        let ok = preview.iter().filter(|o| o.valid).count();
        return Ok(Json(ChatResponse {
            reply: format!(
                "{ok} of {} requests can be booked; confirm to submit",
                proposals.len()
            ),
            proposals,
            preview,
            batch: None,
        }));
    }

    let results = state
        .service
        .submit_batch(proposals.clone(), req.owner_role)
        .await?;
    let batch = BatchResponse::new(results);
    Ok(Json(ChatResponse {
        reply: format!("{} booked, {} skipped", batch.created, batch.skipped),
        proposals,
        preview: Vec::new(),
        batch: Some(batch),
    }))
}
