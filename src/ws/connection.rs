use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use futures::{SinkExt as _, StreamExt as _};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use super::config::Config;
use super::error::WsError;
use super::payload::Payload;
use super::status::{StatusBroadcast, Transition};
use super::traits::{ChannelHandler, Connector, WsStream};

/// How long a locally requested close waits for the close frame to be written.
const CLOSE_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Where a channel is in its connect/reconnect cycle.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    /// Created, first attempt not started yet
    Idle,
    /// Connect attempt in flight
    Connecting,
    /// Socket is open
    Open {
        /// When the socket opened
        since: Instant,
    },
    /// Socket closed or attempt failed; a reconnect is scheduled
    Closed {
        /// Delay of the pending reconnect timer
        retry_in: Duration,
    },
    /// Reconnect budget spent; waiting for an explicit connect or a resume sweep
    Dormant,
}

impl ChannelPhase {
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open { .. })
    }

    #[must_use]
    pub const fn is_connecting(self) -> bool {
        matches!(self, Self::Idle | Self::Connecting)
    }
}

/// Per-channel state published by the channel task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChannelState {
    pub(crate) phase: ChannelPhase,
    pub(crate) attempt_count: u32,
}

/// Read-only view of a channel.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub id: String,
    pub endpoint: String,
    pub phase: ChannelPhase,
    /// Reconnect attempts since the last successful open
    pub attempt_count: u32,
    pub attempt_limit: u32,
    pub auto_reconnect: bool,
}

/// The manager's record for one channel.
///
/// The socket itself is owned by the channel task; the record holds the handles
/// needed to reach it: the outbound queue, the published state, the task's
/// cancellation token and its join handle.
pub(crate) struct ConnectionRecord {
    pub(crate) id: String,
    pub(crate) base_address: String,
    pub(crate) path_suffix: String,
    pub(crate) handler: Arc<dyn ChannelHandler>,
    pub(crate) attempt_limit: u32,
    /// Distinguishes this record from any earlier one stored under the same id
    pub(crate) generation: u64,
    state_rx: watch::Receiver<ChannelState>,
    sender_tx: mpsc::UnboundedSender<String>,
    token: CancellationToken,
    pub(crate) task: Option<JoinHandle<()>>,
}

impl ConnectionRecord {
    /// Create the record and start its channel task.
    ///
    /// When `previous` is given, the task waits for that task to finish before the
    /// first attempt, so the old socket is closed before a new one opens.
    pub(crate) fn spawn(
        spec: ChannelSpec,
        config: &Config,
        connector: Arc<dyn Connector>,
        status: Arc<StatusBroadcast>,
        token: CancellationToken,
        generation: u64,
        previous: Option<JoinHandle<()>>,
    ) -> Self {
        let (sender_tx, sender_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState {
            phase: ChannelPhase::Idle,
            attempt_count: 0,
        });

        let driver = ChannelDriver {
            id: spec.id.clone(),
            endpoint: spec.endpoint(),
            config: config.clone(),
            connector,
            handler: Arc::clone(&spec.handler),
            status,
            state_tx,
            token: token.clone(),
        };
        let task = tokio::spawn(driver.run(sender_rx, previous));

        Self {
            id: spec.id,
            base_address: spec.base_address,
            path_suffix: spec.path_suffix,
            handler: spec.handler,
            attempt_limit: config.reconnect.max_attempts,
            generation,
            state_rx,
            sender_tx,
            token,
            task: Some(task),
        }
    }

    pub(crate) fn phase(&self) -> ChannelPhase {
        self.state_rx.borrow().phase
    }

    pub(crate) fn is_open(&self) -> bool {
        self.phase().is_open()
    }

    pub(crate) fn auto_reconnect(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Stop the channel: no further attempts, pending timer cancelled, open
    /// socket closed by the task.
    pub(crate) fn cancel(&self) {
        self.token.cancel();
    }

    /// Hand a frame to the channel task. Fails when the task has exited.
    pub(crate) fn enqueue(&self, frame: String) -> bool {
        self.sender_tx.send(frame).is_ok()
    }

    pub(crate) fn snapshot(&self) -> ChannelSnapshot {
        let state = *self.state_rx.borrow();
        ChannelSnapshot {
            id: self.id.clone(),
            endpoint: format!("{}{}", self.base_address, self.path_suffix),
            phase: state.phase,
            attempt_count: state.attempt_count,
            attempt_limit: self.attempt_limit,
            auto_reconnect: self.auto_reconnect(),
        }
    }
}

/// Everything needed to (re)create a channel.
#[derive(Clone)]
pub(crate) struct ChannelSpec {
    pub(crate) id: String,
    pub(crate) base_address: String,
    pub(crate) path_suffix: String,
    pub(crate) handler: Arc<dyn ChannelHandler>,
}

impl ChannelSpec {
    pub(crate) fn endpoint(&self) -> String {
        format!("{}{}", self.base_address, self.path_suffix)
    }
}

impl From<&ConnectionRecord> for ChannelSpec {
    fn from(record: &ConnectionRecord) -> Self {
        Self {
            id: record.id.clone(),
            base_address: record.base_address.clone(),
            path_suffix: record.path_suffix.clone(),
            handler: Arc::clone(&record.handler),
        }
    }
}

/// Why an open session ended.
enum SessionEnd {
    /// Disconnect, replacement or teardown
    Cancelled,
    /// Remote close, stream end or I/O error
    Failed(WsError),
}

/// Single owner of one channel's socket and reconnect timer.
struct ChannelDriver {
    id: String,
    endpoint: String,
    config: Config,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn ChannelHandler>,
    status: Arc<StatusBroadcast>,
    state_tx: watch::Sender<ChannelState>,
    token: CancellationToken,
}

impl ChannelDriver {
    /// Connect loop with bounded exponential-backoff reconnection.
    async fn run(
        self,
        mut sender_rx: mpsc::UnboundedReceiver<String>,
        previous: Option<JoinHandle<()>>,
    ) {
        if let Some(previous) = previous {
            tokio::select! {
                biased;
                () = self.token.cancelled() => return,
                _ = previous => {}
            }
        }

        let mut attempts = 0_u32;
        let mut backoff: ExponentialBackoff = self.config.reconnect.clone().into();

        loop {
            if self.token.is_cancelled() {
                break;
            }

            self.publish(ChannelPhase::Connecting, attempts);
            self.status.apply(Transition::Connecting);

            #[cfg(feature = "tracing")]
            tracing::debug!(channel = %self.id, endpoint = %self.endpoint, attempts, "Connecting");

            let attempt = tokio::select! {
                biased;
                () = self.token.cancelled() => {
                    // Settle the Connecting issued above; no socket was opened.
                    self.status.apply(Transition::Disconnected);
                    break;
                }
                result = timeout(self.config.connect_timeout, self.connector.connect(&self.endpoint)) => {
                    result.unwrap_or(Err(WsError::Timeout))
                }
            };

            match attempt {
                Ok(ws_stream) => {
                    attempts = 0;
                    backoff.reset();
                    // A send that raced the previous session's end may still be queued.
                    self.discard_unsent(&mut sender_rx);
                    self.publish(
                        ChannelPhase::Open {
                            since: Instant::now(),
                        },
                        attempts,
                    );
                    self.status.apply(Transition::Connected);
                    self.status.apply(Transition::IncrementCount);

                    #[cfg(feature = "tracing")]
                    tracing::debug!(channel = %self.id, "Connected");

                    self.handler.on_connect(&self.id);

                    let end = self.handle_connection(ws_stream, &mut sender_rx).await;
                    self.discard_unsent(&mut sender_rx);

                    match end {
                        SessionEnd::Cancelled => {
                            self.closed();
                            break;
                        }
                        SessionEnd::Failed(error) => {
                            self.failed(&error);
                            self.closed();
                        }
                    }
                }
                Err(error) => self.failed(&error),
            }

            if attempts >= self.config.reconnect.max_attempts {
                let error = WsError::ReconnectExhausted { attempts };

                #[cfg(feature = "tracing")]
                tracing::error!(channel = %self.id, attempts, "Max reconnection attempts reached");

                self.publish(ChannelPhase::Dormant, attempts);
                self.status.apply(Transition::Error(format!("{}: {error}", self.id)));
                self.handler.on_error(&self.id, &error);
                break;
            }

            attempts = attempts.saturating_add(1);
            let delay = backoff
                .next_backoff()
                .unwrap_or(self.config.reconnect.max_backoff);
            self.publish(ChannelPhase::Closed { retry_in: delay }, attempts);

            #[cfg(feature = "tracing")]
            tracing::debug!(
                channel = %self.id,
                attempt = attempts,
                limit = self.config.reconnect.max_attempts,
                delay_ms = delay.as_millis(),
                "Scheduling reconnect"
            );

            tokio::select! {
                biased;
                () = self.token.cancelled() => break,
                () = sleep(delay) => {}
            }
        }
    }

    /// Pump one open socket until it ends or the channel is cancelled.
    async fn handle_connection(
        &self,
        ws_stream: WsStream,
        sender_rx: &mut mpsc::UnboundedReceiver<String>,
    ) -> SessionEnd {
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                biased;

                () = self.token.cancelled() => {
                    _ = timeout(CLOSE_GRACE_PERIOD, write.send(Message::Close(None))).await;
                    return SessionEnd::Cancelled;
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()),
                        Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                            Ok(text) => self.dispatch(text),
                            Err(e) => {
                                #[cfg(feature = "tracing")]
                                tracing::warn!(channel = %self.id, error = %e, "Skipping non UTF-8 binary frame");
                                #[cfg(not(feature = "tracing"))]
                                let _ = &e;
                            }
                        },
                        Some(Ok(Message::Close(_))) | None => {
                            return SessionEnd::Failed(WsError::ConnectionClosed);
                        }
                        Some(Err(e)) => return SessionEnd::Failed(WsError::Connection(e)),
                        Some(Ok(_)) => {
                            // Ping/pong are answered by tungstenite.
                        }
                    }
                }

                Some(text) = sender_rx.recv() => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(channel = %self.id, %text, "Sending frame");

                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        return SessionEnd::Failed(WsError::Connection(e));
                    }
                }
            }
        }
    }

    fn dispatch(&self, text: &str) {
        let payload = Payload::from_frame(text);

        #[cfg(feature = "tracing")]
        tracing::trace!(channel = %self.id, ?payload, "Received frame");

        self.handler.on_message(&self.id, &payload);
        self.status.apply(Transition::MessageReceived(payload));
    }

    /// Frames queued for a session that has ended are dropped, never replayed.
    fn discard_unsent(&self, sender_rx: &mut mpsc::UnboundedReceiver<String>) {
        while let Ok(text) = sender_rx.try_recv() {
            #[cfg(feature = "tracing")]
            tracing::warn!(channel = %self.id, %text, "Dropping unsent frame, socket closed");
            #[cfg(not(feature = "tracing"))]
            let _ = &text;
        }
    }

    fn failed(&self, error: &WsError) {
        #[cfg(feature = "tracing")]
        tracing::warn!(channel = %self.id, %error, "Transport failure");

        self.status
            .apply(Transition::Error(format!("{}: {error}", self.id)));
        self.handler.on_error(&self.id, error);
    }

    /// Bookkeeping for a socket that was open and no longer is.
    fn closed(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!(channel = %self.id, "Disconnected");

        self.status.apply(Transition::Disconnected);
        self.status.apply(Transition::DecrementCount);
        self.handler.on_disconnect(&self.id);
    }

    fn publish(&self, phase: ChannelPhase, attempt_count: u32) {
        _ = self.state_tx.send(ChannelState {
            phase,
            attempt_count,
        });
    }
}
