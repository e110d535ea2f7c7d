use std::io;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Response, header};
use serde::de::DeserializeOwned;
use tokio_util::codec::FramedRead;
use tokio_util::io::StreamReader;

use super::{BookingApi, ClientError, FrameStream};
use crate::model::{Booking, Schedule};
use crate::sse::SseCodec;

/// Upper bound for one snapshot request. The event stream has none.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// [`BookingApi`] over the server's HTTP endpoints.
#[derive(Debug, Clone)]
pub struct HttpBookingApi {
    client: Client,
    base_url: String,
}

impl HttpBookingApi {
    /// `base_url` such as `http://127.0.0.1:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let resp = self
            .client
            .get(self.url(path))
            .timeout(FETCH_TIMEOUT)
            .send()
            .await?;
        let resp = checked(resp).await?;
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

async fn checked(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl BookingApi for HttpBookingApi {
    async fn fetch_bookings(&self) -> Result<Vec<Booking>, ClientError> {
        self.get_json("/api/bookings").await
    }

    async fn fetch_schedule(&self) -> Result<Schedule, ClientError> {
        self.get_json("/api/schedule").await
    }

    async fn open_stream(&self) -> Result<FrameStream, ClientError> {
        let resp = self
            .client
            .get(self.url("/api/events"))
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let resp = checked(resp).await?;
        let body = resp.bytes_stream().map_err(io::Error::other);
        let frames = FramedRead::new(StreamReader::new(body), SseCodec::default());
        Ok(frames.map_err(ClientError::Stream).boxed())
    }
}
