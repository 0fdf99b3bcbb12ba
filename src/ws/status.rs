//! Process-wide connection status shared by every channel.
//!
//! The [`TransportManager`](super::TransportManager) is the only writer. Consumers
//! read a [`Status`] snapshot, wait for changes on a [`watch::Receiver`], or follow
//! the ordered [`Transition`] stream.

#![expect(
    clippy::module_name_repetitions,
    reason = "StatusBroadcast names what it broadcasts"
)]

use async_stream::try_stream;
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};

use super::error::WsError;
use super::payload::Payload;
use crate::Result;

/// Broadcast channel capacity for transition events.
const TRANSITION_CAPACITY: usize = 1024;

/// Aggregate connection status across all channels.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub connected: bool,
    pub connecting: bool,
    pub last_error: Option<String>,
    pub last_message: Option<Payload>,
    pub live_connection_count: usize,
}

/// A discrete change applied to [`Status`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Transition {
    Connecting,
    Connected,
    Disconnected,
    Error(String),
    MessageReceived(Payload),
    ClearError,
    IncrementCount,
    DecrementCount,
}

impl Status {
    /// Fold one transition into the status.
    pub fn apply(&mut self, transition: &Transition) {
        match transition {
            Transition::Connecting => {
                self.connecting = true;
                self.last_error = None;
            }
            Transition::Connected => {
                self.connected = true;
                self.connecting = false;
                self.last_error = None;
            }
            Transition::Disconnected => {
                self.connected = false;
                self.connecting = false;
            }
            Transition::Error(message) => {
                self.connected = false;
                self.connecting = false;
                self.last_error = Some(message.clone());
            }
            Transition::MessageReceived(payload) => {
                self.last_message = Some(payload.clone());
            }
            Transition::ClearError => {
                self.last_error = None;
            }
            Transition::IncrementCount => {
                self.live_connection_count = self.live_connection_count.saturating_add(1);
            }
            Transition::DecrementCount => {
                self.live_connection_count = self.live_connection_count.saturating_sub(1);
            }
        }
    }
}

/// Shared, observable [`Status`].
///
/// Transitions are serialized by the watch channel's internal lock, so no
/// update is lost when several channels report at once.
#[derive(Debug)]
pub struct StatusBroadcast {
    state_tx: watch::Sender<Status>,
    transition_tx: broadcast::Sender<Transition>,
}

impl Default for StatusBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBroadcast {
    #[must_use]
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(Status::default());
        let (transition_tx, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            state_tx,
            transition_tx,
        }
    }

    pub(crate) fn apply(&self, transition: Transition) {
        #[cfg(feature = "tracing")]
        tracing::trace!(%transition, "Applying status transition");

        // The event is sent while the state lock is held so the stream order
        // matches the order in which transitions were folded in.
        self.state_tx.send_modify(|status| {
            status.apply(&transition);
            _ = self.transition_tx.send(transition.clone());
        });
    }

    /// Current status.
    #[must_use]
    pub fn snapshot(&self) -> Status {
        self.state_tx.borrow().clone()
    }

    /// Receiver that is notified after every transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.state_tx.subscribe()
    }

    /// Ordered stream of transitions issued from now on.
    ///
    /// A subscriber that falls more than the channel capacity behind receives a
    /// [`WsError::Lagged`] error, after which the stream ends.
    pub fn transitions(&self) -> impl Stream<Item = Result<Transition>> + use<> {
        let mut rx = self.transition_tx.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(transition) => yield transition,
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Status stream lagged, missed {n} transitions");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}
