use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use roomsync::client::{
    BookingApi, HttpBookingApi, SyncClient, SyncHandle, SyncStatus, SyncTimings, SyncView,
};
use roomsync::config::Config;
use roomsync::model::BookingStatus;
use roomsync::server::Server;
use roomsync::sse::SseFrame;

// ── Test infrastructure ──────────────────────────────────────

async fn start_test_server() -> (SocketAddr, Server) {
    start_with(Config::default()).await
}

async fn start_with(cfg: Config) -> (SocketAddr, Server) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Server::start(&cfg).unwrap();
    let app = server.router();
    let stop = server.stop_token();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(stop.cancelled_owned())
            .await;
    });
    (addr, server)
}

fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

fn fast_timings() -> SyncTimings {
    SyncTimings {
        live_poll: Duration::from_secs(30),
        fast_poll: Duration::from_millis(200),
        reconnect: Duration::from_millis(200),
        refresh_delay: Duration::from_millis(50),
        fetch_timeout: Duration::from_secs(2),
    }
}

fn spawn_client(addr: SocketAddr) -> SyncHandle {
    let api = Arc::new(HttpBookingApi::new(format!("http://{addr}")));
    SyncClient::spawn(api, fast_timings())
}

async fn wait_view(handle: &mut SyncHandle, pred: impl FnMut(&SyncView) -> bool) -> SyncView {
    tokio::time::timeout(Duration::from_secs(5), handle.wait_for(pred))
        .await
        .expect("view did not converge")
}

async fn create(http: &reqwest::Client, addr: SocketAddr, body: Value) -> (StatusCode, Value) {
    let resp = http
        .post(url(addr, "/api/bookings"))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

async fn get_json<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    addr: SocketAddr,
    path: &str,
) -> T {
    http.get(url(addr, path))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

fn slot(start: &str, end: &str) -> Value {
    json!({
        "roomId": "CSIS-101",
        "date": "2099-03-05",
        "startTime": start,
        "endTime": end,
    })
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn stream_greets_then_carries_changes() {
    let (addr, _server) = start_test_server().await;
    let http = reqwest::Client::new();
    let api = HttpBookingApi::new(format!("http://{addr}"));

    let mut frames = api.open_stream().await.unwrap();
    let first = frames.next().await.unwrap().unwrap();
    let SseFrame::Event { event, data } = first else {
        panic!("expected connected event");
    };
    assert_eq!(event, "connected");
    assert!(serde_json::from_str::<Value>(&data).unwrap()["timestamp"].is_string());

    let (status, booking) = create(&http, addr, slot("09:00", "11:00")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booking["status"], "pending");

    // Native feed and explicit notify both fire for one write.
    for _ in 0..2 {
        let frame = tokio::time::timeout(Duration::from_secs(2), frames.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let SseFrame::Event { event, data } = frame else {
            panic!("expected booking_change");
        };
        assert_eq!(event, "booking_change");
        let change: Value = serde_json::from_str(&data).unwrap();
        assert_eq!(change["eventType"], "INSERT");
        assert_eq!(change["new"]["bookingId"], booking["bookingId"]);
    }
}

#[tokio::test]
async fn two_clients_converge_on_a_new_booking() {
    let (addr, _server) = start_test_server().await;
    let http = reqwest::Client::new();

    let mut a = spawn_client(addr);
    let mut b = spawn_client(addr);
    wait_view(&mut a, |v| v.status == SyncStatus::Live).await;
    wait_view(&mut b, |v| v.status == SyncStatus::Live).await;

    let (status, booking) = create(
        &http,
        addr,
        json!({
            "roomId": "CSIS-201",
            "date": "2099-03-05",
            "startTime": "13:00",
            "endTime": "14:00",
            "ownerRole": "teacher",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booking["status"], "approved");

    let va = wait_view(&mut a, |v| v.bookings.len() == 1).await;
    let vb = wait_view(&mut b, |v| v.bookings.len() == 1).await;
    assert_eq!(va.bookings, vb.bookings);
    assert_eq!(va.schedule["2099-03-05"].len(), 1);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn approve_and_cancel_reach_clients() {
    let (addr, _server) = start_test_server().await;
    let http = reqwest::Client::new();
    let mut client = spawn_client(addr);
    wait_view(&mut client, |v| v.status == SyncStatus::Live).await;

    let (_, booking) = create(&http, addr, slot("09:00", "10:00")).await;
    let id = booking["bookingId"].as_str().unwrap().to_string();
    wait_view(&mut client, |v| v.bookings.len() == 1).await;

    let resp = http
        .post(url(addr, &format!("/api/bookings/{id}/approve")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let view = wait_view(&mut client, |v| {
        v.bookings.first().is_some_and(|b| b.status == BookingStatus::Approved)
    })
    .await;
    assert_eq!(view.schedule["2099-03-05"].len(), 1);

    // Approved bookings cannot be rejected.
    let resp = http
        .post(url(addr, &format!("/api/bookings/{id}/reject")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = http
        .delete(url(addr, "/api/bookings?roomId=CSIS-101&date=2099-03-05"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let deleted: Vec<Value> = resp.json().await.unwrap();
    assert_eq!(deleted.len(), 1);

    let view = wait_view(&mut client, |v| v.bookings.is_empty()).await;
    assert!(view.schedule.is_empty());
    client.shutdown().await;
}

#[tokio::test]
async fn conflicting_create_is_rejected_with_reasons() {
    let (addr, _server) = start_test_server().await;
    let http = reqwest::Client::new();

    let (status, first) = create(&http, addr, slot("09:00", "11:00")).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = create(&http, addr, slot("10:00", "12:00")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["valid"], false);
    assert_eq!(body["conflicts"][0]["bookingId"], first["bookingId"]);
    assert!(body["reasons"][0].as_str().unwrap().contains("conflicts with booking"));

    // Touching ranges are fine.
    let (status, _) = create(&http, addr, slot("11:00", "12:00")).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = create(
        &http,
        addr,
        json!({
            "roomId": "NOPE-9",
            "date": "2099-03-05",
            "startTime": "09:00",
            "endTime": "10:00",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("unknown room"));

    let (status, body) = create(&http, addr, json!({ "roomId": "CSIS-101", "startTime": 5 })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].is_string());

    // Incomplete proposals report the missing fields even for an unknown room.
    let (status, body) = create(&http, addr, json!({ "roomId": "NOPE-9" })).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["reasons"][0], "missing fields: date, startTime, endTime");
}

#[tokio::test]
async fn validate_is_a_dry_run() {
    let (addr, _server) = start_test_server().await;
    let http = reqwest::Client::new();

    let resp = http
        .post(url(addr, "/api/bookings/validate"))
        .json(&slot("06:00", "08:00"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let outcome: Value = resp.json().await.unwrap();
    assert_eq!(outcome["valid"], false);
    assert!(outcome["reasons"][0].as_str().unwrap().contains("outside operating hours"));

    let bookings: Vec<Value> = http
        .get(url(addr, "/api/bookings"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(bookings.is_empty());
}

#[tokio::test]
async fn batch_and_chat_skip_bad_entries() {
    let (addr, _server) = start_test_server().await;
    let http = reqwest::Client::new();

    let resp = http
        .post(url(addr, "/api/bookings/batch"))
        .json(&json!({
            "proposals": [
                slot("09:00", "10:00"),
                slot("09:30", "10:30"),
                { "roomId": "CSIS-101" },
                slot("10:00", "11:00"),
            ],
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let batch: Value = resp.json().await.unwrap();
    assert_eq!(batch["created"], 2);
    assert_eq!(batch["skipped"], 2);
    assert_eq!(batch["results"][1]["status"], "rejected");
    assert_eq!(batch["results"][2]["reasons"][0], "missing fields: date, startTime, endTime");

    // Preview first, nothing written.
    let message = "book CSIS-102 on 2099-04-01 from 09:00 to 10:00\n\
                   book CSIS-102 on 2099-04-01 from 09:30 to 11:00";
    let preview: Value = http
        .post(url(addr, "/api/chat"))
        .json(&json!({ "message": message }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(preview["proposals"].as_array().unwrap().len(), 2);
    assert_eq!(preview["preview"][0]["valid"], true);
    assert!(preview.get("batch").is_none());

    // Confirmed: the second one collides with the first once it is written.
    let confirmed: Value = http
        .post(url(addr, "/api/chat"))
        .json(&json!({ "message": message, "confirm": true, "ownerRole": "admin" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(confirmed["batch"]["created"], 1);
    assert_eq!(confirmed["batch"]["results"][0]["booking"]["status"], "approved");
    assert_eq!(confirmed["batch"]["results"][1]["status"], "rejected");

    let schedule: Value = http
        .get(url(addr, "/api/schedule"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(schedule["2099-03-05"].as_array().unwrap().len(), 2);
    assert_eq!(schedule["2099-04-01"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn rooms_and_health() {
    let (addr, _server) = start_test_server().await;
    let http = reqwest::Client::new();

    let rooms: Vec<Value> = get_json(&http, addr, "/api/rooms").await;
    assert!(rooms.iter().any(|r| r["roomId"] == "CSIS-101"));

    let health: Value = get_json(&http, addr, "/health").await;
    assert_eq!(health["status"], "ok");
}

#[tokio::test]
async fn shutdown_ends_streams_and_client_falls_back() {
    let (addr, server) = start_with(Config {
        native_feed: false,
        ..Config::default()
    })
    .await;
    let mut client = spawn_client(addr);
    wait_view(&mut client, |v| v.status == SyncStatus::Live).await;

    server.shutdown().await;
    let view = wait_view(&mut client, |v| {
        matches!(v.status, SyncStatus::Polling | SyncStatus::Error)
    })
    .await;
    assert_ne!(view.status, SyncStatus::Live);
    client.shutdown().await;
}
