//! Feeds host lifecycle states from stdin into a [`LifecycleMonitor`].
//!
//! Type `active`, `background` or `inactive` (one per line) to simulate the host
//! app moving between foreground and background. Stop the server to watch the
//! channel back off and go dormant, then type `active` to re-arm it.
//!
//! Run with:
//! ```sh
//! WS_ENDPOINT=ws://127.0.0.1:9000 RUST_LOG=debug cargo run --example lifecycle
//! ```

use std::env;
use std::str::FromStr as _;

use futures::channel::mpsc;
use realtime_transport::ws::{AppState, Config, LifecycleMonitor, TransportManager};
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let endpoint = env::var("WS_ENDPOINT").unwrap_or_else(|_| "ws://127.0.0.1:9000".to_owned());

    let manager = TransportManager::new(Config::default());
    manager.connect("marketdata", &endpoint, "", ())?;

    let (tx, rx) = mpsc::unbounded::<AppState>();
    let monitor = LifecycleMonitor::spawn(manager.clone(), rx);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match AppState::from_str(line.trim()) {
            Ok(state) => {
                info!(%state, "Reporting app state");
                if tx.unbounded_send(state).is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "Ignoring input"),
        }
        info!(channel = ?manager.channel("marketdata"), "Current channel");
    }

    monitor.stop().await;
    manager.shutdown().await;

    Ok(())
}
