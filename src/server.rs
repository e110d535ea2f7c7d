//! Wires the store, validator, relay and broadcaster together and owns the
//! background tasks.

use std::sync::Arc;

use axum::Router;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::heartbeat::run_heartbeat;
use crate::http::{self, AppState};
use crate::notify::Broadcaster;
use crate::proposal::{LineProposalSource, ProposalSource};
use crate::relay::ChangeRelay;
use crate::service::BookingService;
use crate::store::{BookingStore, MemoryStore, RoomRegistry, StaticRoomRegistry};
use crate::validator::Validator;

pub struct Server {
    state: AppState,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    /// Build with the bundled in-memory store and the rooms named by `cfg`.
    pub fn start(cfg: &Config) -> std::io::Result<Self> {
        let rooms = match &cfg.rooms_file {
            Some(path) => StaticRoomRegistry::from_file(path)?,
            None => StaticRoomRegistry::default(),
        };
        info!("{} rooms loaded", rooms.len());
        let store = if cfg.native_feed {
            MemoryStore::new()
        } else {
            MemoryStore::without_feed()
        };
        Ok(Self::with_parts(
            cfg,
            Arc::new(store),
            Arc::new(rooms),
            Arc::new(LineProposalSource::new()),
        ))
    }

    /// Build around caller-supplied collaborators and spawn the background tasks.
    /// Must be called inside a tokio runtime.
    pub fn with_parts(
        cfg: &Config,
        store: Arc<dyn BookingStore>,
        rooms: Arc<dyn RoomRegistry>,
        proposals: Arc<dyn ProposalSource>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let broadcaster = Arc::new(Broadcaster::new(cfg.channel_capacity));
        let relay = Arc::new(ChangeRelay::new(broadcaster.clone(), cfg.explicit_notify));
        let mut tasks = Vec::new();

        if cfg.native_feed {
            match relay.spawn_feed(store.as_ref(), shutdown.child_token()) {
                Some(task) => tasks.push(task),
                None => info!("store has no change feed, relying on explicit notification"),
            }
        }
        tasks.push(tokio::spawn(run_heartbeat(
            broadcaster.clone(),
            cfg.heartbeat,
            shutdown.child_token(),
        )));

        // Dropping the senders ends every open event stream, which lets a
        // graceful HTTP shutdown finish.
        tasks.push(tokio::spawn({
            let broadcaster = broadcaster.clone();
            let stop = shutdown.clone();
            async move {
                stop.cancelled().await;
                broadcaster.close_all();
            }
        }));

        let validator = Validator::new(store.clone(), cfg.rules);
        let service = Arc::new(BookingService::new(store, rooms, validator, relay));
        Self {
            state: AppState {
                service,
                broadcaster,
                proposals,
            },
            shutdown,
            tasks,
        }
    }

    pub fn router(&self) -> Router {
        http::router(self.state.clone())
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Cancelling this token stops the background tasks and ends every open event stream.
    pub fn stop_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel, then wait for the background tasks to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            let _ = task.await;
        }
        info!("background tasks stopped");
    }
}
