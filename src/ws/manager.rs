#![expect(
    clippy::module_name_repetitions,
    reason = "TransportManager is the crate's primary entry point and keeps its full name"
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::config::Config;
use super::connection::{ChannelSnapshot, ChannelSpec, ConnectionRecord};
use super::error::WsError;
use super::lifecycle::AppState;
use super::payload::to_frame;
use super::status::{Status, StatusBroadcast, Transition};
use super::traits::{ChannelHandler, Connector, TungsteniteConnector};
use crate::Result;
use crate::error::Error;

/// What happened to a frame handed to [`TransportManager::send`].
#[non_exhaustive]
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued on the open socket
    Sent,
    /// Channel unknown or not open; the frame was discarded
    Dropped,
}

/// Owns every named channel and the shared [`StatusBroadcast`].
///
/// Each channel runs on its own task, so operations on different channels never
/// wait on each other. The manager is cheap to clone; all clones share the same
/// channels. When the last clone is dropped every channel is cancelled.
///
/// Must be used from within a tokio runtime.
///
/// # Example
///
/// ```no_run
/// use realtime_transport::ws::{Callbacks, Config, TransportManager};
///
/// # async fn example() -> realtime_transport::Result<()> {
/// let manager = TransportManager::new(Config::default());
///
/// manager.connect(
///     "marketdata",
///     "wss://stream.example.com?token=abc",
///     "",
///     Callbacks::new().with_message(|channel, payload| {
///         println!("{channel}: {payload:?}");
///     }),
/// )?;
///
/// let _outcome = manager.send("marketdata", &serde_json::json!({"subscribe": "EURUSD"}))?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TransportManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: Config,
    connector: Arc<dyn Connector>,
    records: DashMap<String, ConnectionRecord>,
    status: Arc<StatusBroadcast>,
    /// Parent of every channel token
    shutdown: CancellationToken,
    next_generation: AtomicU64,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl Default for TransportManager {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl TransportManager {
    /// Create a manager that opens sockets with [`TungsteniteConnector`].
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_connector(config, TungsteniteConnector)
    }

    /// Create a manager with a custom [`Connector`].
    #[must_use]
    pub fn with_connector<C: Connector>(config: Config, connector: C) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                config,
                connector: Arc::new(connector),
                records: DashMap::new(),
                status: Arc::new(StatusBroadcast::new()),
                shutdown: CancellationToken::new(),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Open (or reopen) the channel `id` on `base_address + path_suffix`.
    ///
    /// An existing channel with the same id is cancelled and its socket closed
    /// before the new one connects. The outcome is reported through `handler`
    /// and the [`StatusBroadcast`]; an `Err` is returned only when the request is
    /// rejected up front (empty id or an endpoint that is not `ws://`/`wss://`).
    pub fn connect<H: ChannelHandler>(
        &self,
        id: &str,
        base_address: &str,
        path_suffix: &str,
        handler: H,
    ) -> Result<()> {
        self.open(ChannelSpec {
            id: id.to_owned(),
            base_address: base_address.to_owned(),
            path_suffix: path_suffix.to_owned(),
            handler: Arc::new(handler),
        })
    }

    fn open(&self, spec: ChannelSpec) -> Result<()> {
        if spec.id.is_empty() {
            return Err(Error::validation("channel id must not be empty"));
        }
        validate_endpoint(&spec.endpoint())?;

        match self.inner.records.entry(spec.id.clone()) {
            Entry::Occupied(mut entry) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(channel = %spec.id, "Replacing existing channel");

                let previous = entry.get_mut();
                previous.cancel();
                let previous_task = previous.task.take();

                drop(entry.insert(self.spawn_record(spec, previous_task)));
            }
            Entry::Vacant(entry) => {
                entry.insert(self.spawn_record(spec, None));
            }
        }

        Ok(())
    }

    /// Start a channel task for `spec`. Must be called with the map entry for
    /// `spec.id` held, so no other operation on that id interleaves.
    fn spawn_record(
        &self,
        spec: ChannelSpec,
        previous: Option<JoinHandle<()>>,
    ) -> ConnectionRecord {
        let inner = &self.inner;
        ConnectionRecord::spawn(
            spec,
            &inner.config,
            Arc::clone(&inner.connector),
            Arc::clone(&inner.status),
            inner.shutdown.child_token(),
            inner.next_generation.fetch_add(1, Ordering::Relaxed),
            previous,
        )
    }

    /// Close the channel `id` for good: no reconnects, pending timer cancelled,
    /// socket closed, record removed. Unknown ids are ignored.
    pub fn disconnect(&self, id: &str) {
        drop(self.remove(id));
    }

    fn remove(&self, id: &str) -> Option<JoinHandle<()>> {
        let (_, mut record) = self.inner.records.remove(id)?;
        record.cancel();

        #[cfg(feature = "tracing")]
        tracing::debug!(channel = %id, "Channel disconnected and cleaned up");

        record.task.take()
    }

    /// Send `payload` on channel `id`.
    ///
    /// Strings are sent verbatim, anything else as JSON. When the channel is
    /// unknown or not open the frame is dropped and [`SendOutcome::Dropped`]
    /// returned; nothing is queued for later. `Err` means `payload` could not be
    /// serialized.
    pub fn send<P: Serialize + ?Sized>(&self, id: &str, payload: &P) -> Result<SendOutcome> {
        let Some(record) = self.inner.records.get(id) else {
            #[cfg(feature = "tracing")]
            tracing::warn!(channel = %id, "Unknown channel, dropping message");
            return Ok(SendOutcome::Dropped);
        };

        if !record.is_open() {
            #[cfg(feature = "tracing")]
            tracing::warn!(channel = %id, "Channel is not connected, dropping message");
            return Ok(SendOutcome::Dropped);
        }

        let frame = to_frame(payload)?;
        if record.enqueue(frame) {
            Ok(SendOutcome::Sent)
        } else {
            #[cfg(feature = "tracing")]
            tracing::warn!(channel = %id, "Channel task has stopped, dropping message");
            Ok(SendOutcome::Dropped)
        }
    }

    /// Whether channel `id` has an open socket.
    #[must_use]
    pub fn is_connected(&self, id: &str) -> bool {
        self.inner
            .records
            .get(id)
            .is_some_and(|record| record.is_open())
    }

    /// Snapshot of channel `id`.
    #[must_use]
    pub fn channel(&self, id: &str) -> Option<ChannelSnapshot> {
        self.inner.records.get(id).map(|record| record.snapshot())
    }

    /// Ids of all channels currently held.
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        self.inner
            .records
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// The shared status. Read-only for consumers.
    #[must_use]
    pub fn status(&self) -> &StatusBroadcast {
        &self.inner.status
    }

    /// Shorthand for `status().snapshot()`.
    #[must_use]
    pub fn status_snapshot(&self) -> Status {
        self.inner.status.snapshot()
    }

    /// Acknowledge the last reported error.
    pub fn clear_error(&self) {
        self.inner.status.apply(Transition::ClearError);
    }

    /// React to a host lifecycle change. Returns how many channels were reconnected.
    ///
    /// On [`AppState::Active`] every channel that still wants to reconnect and is
    /// neither connecting nor open is reopened immediately with fresh counters,
    /// skipping any pending backoff. Other states leave connections untouched.
    pub fn handle_app_state(&self, state: AppState) -> usize {
        match state {
            AppState::Active => self.resume(),
            AppState::Background | AppState::Inactive => {
                #[cfg(feature = "tracing")]
                tracing::debug!(%state, "App left foreground, channels remain connected");
                0
            }
        }
    }

    fn resume(&self) -> usize {
        // Collect first: reopening takes the map's write lock.
        let candidates: Vec<(String, u64)> = self
            .inner
            .records
            .iter()
            .filter(|entry| Self::needs_resume(entry.value()))
            .map(|entry| (entry.key().clone(), entry.value().generation))
            .collect();

        let mut reopened = 0;
        for (id, generation) in candidates {
            if self.reopen(&id, generation) {
                reopened += 1;
            }
        }

        reopened
    }

    fn needs_resume(record: &ConnectionRecord) -> bool {
        let phase = record.phase();
        record.auto_reconnect() && !phase.is_connecting() && !phase.is_open()
    }

    /// Reopen `id` with fresh counters, but only if it still holds the record
    /// seen by the sweep and that record still needs it. A concurrent
    /// `disconnect` or `connect` on the same id wins.
    fn reopen(&self, id: &str, generation: u64) -> bool {
        let Entry::Occupied(mut entry) = self.inner.records.entry(id.to_owned()) else {
            return false;
        };

        let record = entry.get_mut();
        if record.generation != generation || !Self::needs_resume(record) {
            return false;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(channel = %id, "Reconnecting channel, app became active");

        let spec = ChannelSpec::from(&*record);
        record.cancel();
        let previous_task = record.task.take();

        drop(entry.insert(self.spawn_record(spec, previous_task)));
        true
    }

    /// Disconnect every channel and wait for their sockets to close.
    pub async fn shutdown(&self) {
        let tasks: Vec<JoinHandle<()>> = self
            .channels()
            .iter()
            .filter_map(|id| self.remove(id))
            .collect();

        for task in tasks {
            _ = task.await;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Transport manager shut down");
    }
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    let url = Url::parse(endpoint)?;
    match url.scheme() {
        "ws" | "wss" => Ok(()),
        _ => Err(WsError::InvalidEndpoint(endpoint.to_owned()).into()),
    }
}
