//! Named, self-healing WebSocket channels.
//!
//! # Architecture
//!
//! - [`TransportManager`]: keyed set of channels; connect/disconnect/send/status
//! - [`ChannelHandler`]: consumer hooks (open, close, message, error), with
//!   [`Callbacks`] as a closure-backed implementation
//! - [`StatusBroadcast`]: shared aggregate status, written only by the manager
//! - [`LifecycleMonitor`]: reconnect sweep when the host app returns to the foreground
//! - [`Connector`]: how sockets are opened
//!
//! # Example
//!
//! ```no_run
//! use realtime_transport::ws::{AppState, Callbacks, Config, TransportManager};
//!
//! # async fn example(token: &str) -> realtime_transport::Result<()> {
//! let manager = TransportManager::new(Config::default());
//! let base = format!("wss://stream.example.com?token={token}");
//!
//! manager.connect("marketdata", &base, "", Callbacks::new())?;
//! manager.connect("connect", &base, "&feed=account", ())?;
//!
//! // Later, when the host reports that the app is back in front:
//! manager.handle_app_state(AppState::Active);
//!
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod lifecycle;
pub mod manager;
pub mod payload;
pub mod status;
pub mod traits;

pub use config::{Config, ReconnectConfig};
pub use connection::{ChannelPhase, ChannelSnapshot};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use lifecycle::{AppState, LifecycleMonitor};
pub use manager::{SendOutcome, TransportManager};
pub use payload::Payload;
pub use status::{Status, StatusBroadcast, Transition};
pub use traits::*;
