//! Opens the two standard channels against a live endpoint and logs what arrives.
//!
//! Demonstrates:
//! 1. Connecting named channels that share one base address
//! 2. Sending a subscription once a channel is open
//! 3. Following the aggregate status as transitions are issued
//!
//! Run with:
//! ```sh
//! WS_ENDPOINT=wss://stream.example.com WS_TOKEN=... RUST_LOG=info,realtime_transport=debug \
//!     cargo run --example channels
//! ```

use std::env;
use std::time::Duration;

use futures::StreamExt as _;
use realtime_transport::ws::{Callbacks, Config, SendOutcome, TransportManager};
use serde_json::json;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let endpoint = env::var("WS_ENDPOINT").unwrap_or_else(|_| "wss://echo.websocket.org".to_owned());
    let token = env::var("WS_TOKEN").unwrap_or_default();
    let base = format!("{endpoint}?token={token}");

    let manager = TransportManager::new(Config::default());

    let mut transitions = Box::pin(manager.status().transitions());
    tokio::spawn(async move {
        while let Some(transition) = transitions.next().await {
            match transition {
                Ok(transition) => info!(%transition, "status"),
                Err(e) => warn!(error = %e, "status stream ended"),
            }
        }
    });

    for channel in ["marketdata", "connect"] {
        manager.connect(
            channel,
            &base,
            "",
            Callbacks::new()
                .with_connect(|channel| info!(channel, "open"))
                .with_disconnect(|channel| info!(channel, "closed"))
                .with_message(|channel, payload| info!(channel, ?payload, "message"))
                .with_error(|channel, error| warn!(channel, %error, "error")),
        )?;
    }

    let opened = timeout(Duration::from_secs(10), async {
        while !manager.is_connected("marketdata") {
            sleep(Duration::from_millis(100)).await;
        }
    })
    .await;
    if opened.is_err() {
        warn!("marketdata did not open within 10s");
    }

    match manager.send("marketdata", &json!({"action": "subscribe", "symbols": ["EURUSD"]}))? {
        SendOutcome::Sent => info!("subscription sent"),
        outcome => warn!(?outcome, "subscription not sent"),
    }

    sleep(Duration::from_secs(30)).await;

    info!(status = ?manager.status_snapshot(), channels = ?manager.channels());
    manager.shutdown().await;

    Ok(())
}
