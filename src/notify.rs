use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::observability::{CHANNELS_ACTIVE, CHANNELS_DROPPED_TOTAL, EVENTS_BROADCAST_TOTAL};
use crate::sse::SseFrame;

pub type ChannelId = Ulid;

/// Registry of open push channels. Every broadcast goes to every channel.
///
/// A channel is the sending half of a bounded queue drained by one HTTP
/// response. Writes never wait: a channel that is closed or full is dropped
/// from the registry during the write that noticed it.
pub struct Broadcaster {
    channels: DashMap<ChannelId, mpsc::Sender<Bytes>>,
    capacity: usize,
}

impl Broadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Add a channel and greet it, and only it, with a `connected` event.
    pub fn register(&self, tx: mpsc::Sender<Bytes>) -> ChannelId {
        let id = Ulid::new();
        let hello = serde_json::json!({ "timestamp": Utc::now() });
        let frame = SseFrame::event("connected", hello.to_string()).to_bytes();
        if tx.try_send(frame).is_err() {
            debug!("channel {id} closed before registration");
            return id;
        }
        self.channels.insert(id, tx);
        metrics::gauge!(CHANNELS_ACTIVE).set(self.channels.len() as f64);
        info!("channel {id} registered ({} open)", self.channels.len());
        id
    }

    pub fn unregister(&self, id: &ChannelId) -> bool {
        let removed = self.channels.remove(id).is_some();
        if removed {
            metrics::gauge!(CHANNELS_ACTIVE).set(self.channels.len() as f64);
            info!("channel {id} unregistered ({} open)", self.channels.len());
        }
        removed
    }

    /// Open a channel whose receiving side unregisters itself when dropped.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.register(tx);
        Subscription {
            id,
            rx,
            broadcaster: self.clone(),
        }
    }

    /// Serialize `payload` as an `event_type` event and write it to every channel.
    /// Object payloads without a `timestamp` get one. Returns how many channels took it.
    pub fn broadcast<T: Serialize>(&self, event_type: &str, payload: &T) -> usize {
        let mut data = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!("dropping unserializable {event_type} event: {e}");
                return 0;
            }
        };
        if let Some(obj) = data.as_object_mut() {
            obj.entry("timestamp")
                .or_insert_with(|| serde_json::json!(Utc::now()));
        }
        let frame = SseFrame::event(event_type, data.to_string()).to_bytes();
        let delivered = self.write_all(frame);
        metrics::counter!(EVENTS_BROADCAST_TOTAL, "event" => event_type.to_string()).increment(1);
        debug!("{event_type} delivered to {delivered} channels");
        delivered
    }

    /// Keepalive comment for every channel.
    pub fn heartbeat(&self) -> usize {
        self.write_all(SseFrame::heartbeat().to_bytes())
    }

    /// Drop every channel; their streams end once buffered frames drain.
    pub fn close_all(&self) -> usize {
        let n = self.channels.len();
        self.channels.clear();
        metrics::gauge!(CHANNELS_ACTIVE).set(0.0);
        info!("closed {n} channels");
        n
    }

    /// Writes go to a snapshot of the registry so concurrent register and
    /// unregister calls never disturb the iteration.
    fn write_all(&self, frame: Bytes) -> usize {
        let snapshot: Vec<(ChannelId, mpsc::Sender<Bytes>)> = self
            .channels
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();

        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, tx) in snapshot {
            match tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!("channel {id} stalled, dropping it");
                    dead.push(id);
                }
                Err(TrySendError::Closed(_)) => dead.push(id),
            }
        }

        for id in &dead {
            if self.channels.remove(id).is_some() {
                metrics::counter!(CHANNELS_DROPPED_TOTAL).increment(1);
                debug!("channel {id} removed after failed write");
            }
        }
        if !dead.is_empty() {
            metrics::gauge!(CHANNELS_ACTIVE).set(self.channels.len() as f64);
        }
        delivered
    }
}

/// Receiving side of one registered channel, usable as an HTTP body stream.
pub struct Subscription {
    id: ChannelId,
    rx: mpsc::Receiver<Bytes>,
    broadcaster: Arc<Broadcaster>,
}

impl Subscription {
    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

impl Stream for Subscription {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broadcaster.unregister(&self.id);
    }
}
