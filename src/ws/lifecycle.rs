//! Host application foreground/background tracking.

#![expect(
    clippy::module_name_repetitions,
    reason = "LifecycleMonitor reads better than Monitor at call sites"
)]

use std::str::FromStr;

use futures::{Stream, StreamExt as _};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::manager::TransportManager;
use crate::error::Error;

/// Host application state, as reported by the mobile platform.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum AppState {
    /// In the foreground and receiving events
    Active,
    /// Not visible
    Background,
    /// Transitioning between the two (e.g. an incoming call overlay)
    Inactive,
}

impl FromStr for AppState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "background" => Ok(Self::Background),
            "inactive" => Ok(Self::Inactive),
            other => Err(Error::validation(format!("unknown app state: {other}"))),
        }
    }
}

/// Feeds host lifecycle changes into a [`TransportManager`].
///
/// Only changes are acted upon: repeated reports of the same state are ignored.
/// Moving to the foreground triggers a reconnect sweep; moving to the background
/// leaves every connection open.
///
/// The monitor stops when the event stream ends, when [`stop`](Self::stop) is
/// called, or when it is dropped.
#[derive(Debug)]
pub struct LifecycleMonitor {
    task: JoinHandle<()>,
    guard: DropGuard,
}

impl LifecycleMonitor {
    pub fn spawn<S>(manager: TransportManager, events: S) -> Self
    where
        S: Stream<Item = AppState> + Send + 'static,
    {
        let token = CancellationToken::new();
        let task = tokio::spawn(Self::watch(manager, events, token.clone()));

        Self {
            task,
            guard: token.drop_guard(),
        }
    }

    async fn watch<S>(manager: TransportManager, events: S, token: CancellationToken)
    where
        S: Stream<Item = AppState> + Send + 'static,
    {
        let mut events = std::pin::pin!(events);
        let mut previous: Option<AppState> = None;

        loop {
            let state = tokio::select! {
                biased;
                () = token.cancelled() => break,
                next = events.next() => match next {
                    Some(state) => state,
                    None => break,
                },
            };

            if previous == Some(state) {
                continue;
            }
            previous = Some(state);

            #[cfg(feature = "tracing")]
            tracing::debug!(%state, "App state changed");

            let reopened = manager.handle_app_state(state);

            #[cfg(feature = "tracing")]
            tracing::debug!(%state, reopened, "Lifecycle change handled");
            #[cfg(not(feature = "tracing"))]
            let _ = reopened;
        }
    }

    /// Whether the monitor task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop watching and wait for the task to exit.
    pub async fn stop(self) {
        let Self { task, guard } = self;
        drop(guard);
        _ = task.await;
    }
}
