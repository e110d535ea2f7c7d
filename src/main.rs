use std::future::IntoFuture;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use roomsync::config::Config;
use roomsync::server::Server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cfg = Config::from_env()?;
    roomsync::observability::init(cfg.metrics_port)?;

    let server = Server::start(&cfg)?;
    let addr = cfg.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("roomsync listening on http://{addr}");
    info!("  heartbeat: {:?}", cfg.heartbeat);
    info!("  overlap policy: {}", cfg.rules.overlap_policy);
    info!(
        "  change sources: native feed {}, explicit notify {}",
        if cfg.native_feed { "on" } else { "off" },
        if cfg.explicit_notify { "on" } else { "off" }
    );
    let metrics = cfg
        .metrics_port
        .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"));
    info!("  metrics: {metrics}");

    // On SIGTERM or ctrl-c close every event stream, then let in-flight requests finish.
    let stop = server.stop_token();
    tokio::spawn({
        let stop = stop.clone();
        async move {
            wait_for_signal().await;
            info!("shutdown signal received, closing event streams");
            stop.cancel();
        }
    });

    let serve = axum::serve(listener, server.router())
        .with_graceful_shutdown(stop.clone().cancelled_owned())
        .into_future();
    tokio::pin!(serve);
    let drain_deadline = async {
        stop.cancelled().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
    };

    tokio::select! {
        result = &mut serve => result?,
        _ = drain_deadline => warn!("drain timeout, dropping remaining connections"),
    }

    server.shutdown().await;
    info!("roomsync stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("failed to register SIGTERM handler: {e}");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
