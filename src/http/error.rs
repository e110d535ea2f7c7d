use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::warn;

use crate::service::ServiceError;

/// Error returned by every handler. Always rendered as a JSON body with an `error` field.
#[derive(Debug)]
pub enum ApiError {
    Service(ServiceError),
    BadRequest(String),
    /// The request body was not the JSON the handler expects.
    Body(JsonRejection),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Body(rejection) => rejection.status(),
            ApiError::Service(e) => match e {
                _ if e.is_infrastructure() => StatusCode::SERVICE_UNAVAILABLE,
                ServiceError::Invalid(_)
                | ServiceError::UnknownRoom(_)
                | ServiceError::MissingField(_)
                | ServiceError::BatchTooLarge(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
                ServiceError::InvalidTransition { .. } | ServiceError::SlotTaken(_) => {
                    StatusCode::CONFLICT
                }
                ServiceError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        ApiError::Service(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("request failed: {}", self.message());
        }
        let body = match &self {
            // Validation failures carry the whole outcome so callers see every conflict.
            ApiError::Service(ServiceError::Invalid(outcome)) => {
                let mut body = serde_json::to_value(outcome).unwrap_or_else(|_| json!({}));
                body["error"] = json!(self.message());
                body
            }
            _ => json!({ "error": self.message() }),
        };
        (status, Json(body)).into_response()
    }
}

/// `Json` whose rejection is rendered like every other [`ApiError`].
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(ApiError::Body(rejection)),
        }
    }
}

impl ApiError {
    fn message(&self) -> String {
        match self {
            ApiError::Service(e) => e.to_string(),
            ApiError::BadRequest(m) => m.clone(),
            ApiError::Body(rejection) => rejection.body_text(),
        }
    }
}
