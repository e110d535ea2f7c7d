//! Runs a [`SyncState`] against a [`BookingApi`]: owns the stream, the poll
//! timer, reconnect backoff and refresh requests. Everything happens on one
//! task so the state is never mutated concurrently. A snapshot fetch is polled
//! alongside the stream, so a slow fetch never holds back change events.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::reducer::{Effect, Input, SyncState, SyncStatus, SyncTimings, SyncView};
use super::{BookingApi, ClientError, FrameStream};
use crate::model::ChangeEvent;
use crate::relay::BOOKING_CHANGE;
use crate::sse::SseFrame;

pub struct SyncClient;

impl SyncClient {
    /// Start syncing in a background task.
    pub fn spawn<A: BookingApi>(api: Arc<A>, timings: SyncTimings) -> SyncHandle {
        let (view_tx, view_rx) = watch::channel(SyncView::default());
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(api, timings, view_tx, refresh_rx, cancel.clone()));
        SyncHandle {
            view: view_rx,
            refresh: refresh_tx,
            cancel,
            task,
        }
    }
}

pub struct SyncHandle {
    view: watch::Receiver<SyncView>,
    refresh: mpsc::Sender<()>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub fn view(&self) -> SyncView {
        self.view.borrow().clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.view.borrow().status
    }

    /// A receiver that wakes on every view change.
    pub fn watch(&self) -> watch::Receiver<SyncView> {
        self.view.clone()
    }

    /// Wait until `pred` holds for the current view.
    pub async fn wait_for(&mut self, pred: impl FnMut(&SyncView) -> bool) -> SyncView {
        let seen = self.view.wait_for(pred).await.map(|view| view.clone());
        seen.unwrap_or_else(|_| self.view())
    }

    /// Ask for a full fetch shortly. Requests made while one is pending collapse into it.
    pub fn trigger_refresh(&self) {
        let _ = self.refresh.try_send(());
    }

    /// Stop the task; drops the stream connection and every timer.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

enum Wake {
    Cancelled,
    Poll,
    RefreshRequested,
    RefreshDue,
    Reconnect,
    Frame(Option<Result<SseFrame, ClientError>>),
    Fetched(Input),
}

async fn run<A: BookingApi>(
    api: Arc<A>,
    timings: SyncTimings,
    view_tx: watch::Sender<SyncView>,
    mut refresh_rx: mpsc::Receiver<()>,
    cancel: CancellationToken,
) {
    let mut state = SyncState::new(timings);
    let mut effects: VecDeque<Effect> = state.start().into();
    let mut stream: Option<FrameStream> = None;
    let mut fetch: Option<BoxFuture<'static, Input>> = None;
    let mut poll = poll_every(timings.fast_poll);
    let mut reconnect_at = Some(Instant::now());
    let mut refresh_at: Option<Instant> = None;

    loop {
        while let Some(effect) = effects.pop_front() {
            match effect {
                // One fetch at a time; a request made while one runs joins it.
                Effect::FetchAll => {
                    if fetch.is_none() {
                        fetch = Some(fetch_all(api.clone(), timings.fetch_timeout).boxed());
                    }
                }
                Effect::SetPollCadence(period) => {
                    if poll.period() != period {
                        debug!("poll cadence now {period:?}");
                        poll = poll_every(period);
                    }
                }
                Effect::ScheduleReconnect(delay) => reconnect_at = Some(Instant::now() + delay),
            }
        }

        let wake = tokio::select! {
            _ = cancel.cancelled() => Wake::Cancelled,
            _ = poll.tick() => Wake::Poll,
            // The handle was dropped without a shutdown: nobody is watching.
            msg = refresh_rx.recv() => match msg {
                Some(()) => Wake::RefreshRequested,
                None => Wake::Cancelled,
            },
            _ = sleep_until(refresh_at) => Wake::RefreshDue,
            _ = sleep_until(reconnect_at), if stream.is_none() => Wake::Reconnect,
            frame = next_frame(&mut stream), if stream.is_some() => Wake::Frame(frame),
            input = finish_fetch(&mut fetch), if fetch.is_some() => Wake::Fetched(input),
        };

        match wake {
            Wake::Cancelled => break,
            Wake::Poll => effects.push_back(Effect::FetchAll),
            Wake::RefreshRequested => {
                refresh_at.get_or_insert_with(|| Instant::now() + timings.refresh_delay);
            }
            Wake::RefreshDue => {
                refresh_at = None;
                effects.push_back(Effect::FetchAll);
            }
            Wake::Fetched(input) => {
                fetch = None;
                effects.extend(state.handle(input));
                publish(&view_tx, &state);
            }
            Wake::Reconnect => {
                reconnect_at = None;
                let opened = tokio::select! {
                    _ = cancel.cancelled() => break,
                    opened = api.open_stream() => opened,
                };
                match opened {
                    // Live once the server greets us.
                    Ok(s) => stream = Some(s),
                    Err(e) => {
                        warn!("event stream unavailable: {e}");
                        effects.extend(state.handle(Input::StreamFailed));
                        publish(&view_tx, &state);
                    }
                }
            }
            Wake::Frame(frame) => {
                let input = match frame {
                    Some(Ok(SseFrame::Event { event, data })) => on_event(&event, &data),
                    Some(Ok(SseFrame::Comment(_))) => None,
                    Some(Err(e)) => {
                        warn!("event stream failed: {e}");
                        stream = None;
                        Some(Input::StreamFailed)
                    }
                    None => {
                        info!("event stream closed by server");
                        stream = None;
                        Some(Input::StreamFailed)
                    }
                };
                if let Some(input) = input {
                    effects.extend(state.handle(input));
                    publish(&view_tx, &state);
                }
            }
        }
    }
    debug!("sync task stopped");
}

fn on_event(event: &str, data: &str) -> Option<Input> {
    match event {
        "connected" => Some(Input::StreamConnected),
        BOOKING_CHANGE => match serde_json::from_str::<ChangeEvent>(data) {
            Ok(change) => Some(Input::Change(change)),
            Err(e) => {
                warn!("unreadable {BOOKING_CHANGE} event: {e}");
                None
            }
        },
        other => {
            debug!("ignoring {other} event");
            None
        }
    }
}

async fn fetch_all<A: BookingApi>(api: Arc<A>, limit: Duration) -> Input {
    let both = async { tokio::try_join!(api.fetch_bookings(), api.fetch_schedule()) };
    match tokio::time::timeout(limit, both).await {
        Ok(Ok((bookings, schedule))) => Input::Snapshot { bookings, schedule },
        Ok(Err(e)) => {
            warn!("fetch failed: {e}");
            Input::FetchFailed
        }
        Err(_) => {
            warn!("fetch timed out after {limit:?}");
            Input::FetchFailed
        }
    }
}

fn publish(tx: &watch::Sender<SyncView>, state: &SyncState) {
    tx.send_if_modified(|view| {
        if *view != *state.view() {
            *view = state.view().clone();
            true
        } else {
            false
        }
    });
}

fn poll_every(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn finish_fetch(fetch: &mut Option<BoxFuture<'static, Input>>) -> Input {
    match fetch {
        Some(f) => f.await,
        None => std::future::pending().await,
    }
}

async fn next_frame(stream: &mut Option<FrameStream>) -> Option<Result<SseFrame, ClientError>> {
    match stream {
        Some(s) => s.next().await,
        None => std::future::pending().await,
    }
}
