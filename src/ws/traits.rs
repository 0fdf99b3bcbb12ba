//! Seams between the transport manager and the code around it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::error::WsError;
use super::payload::Payload;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Consumer hooks for a channel.
///
/// Every method has a no-op default, so implementors only override the events
/// they care about. `()` is the handler that ignores everything.
///
/// Hooks run on the channel's task and should return quickly.
pub trait ChannelHandler: Send + Sync + 'static {
    /// The socket for `channel` opened.
    fn on_connect(&self, channel: &str) {
        let _ = channel;
    }

    /// A previously open socket for `channel` closed, for any reason.
    fn on_disconnect(&self, channel: &str) {
        let _ = channel;
    }

    /// A frame arrived on `channel`.
    fn on_message(&self, channel: &str, payload: &Payload) {
        let _ = (channel, payload);
    }

    /// A connect attempt failed, an open socket dropped unexpectedly, or the
    /// reconnect budget ran out.
    ///
    /// When the failure that spends the budget arrives, this fires twice in a
    /// row: first with the transport error itself, then with
    /// [`WsError::ReconnectExhausted`].
    fn on_error(&self, channel: &str, error: &WsError) {
        let _ = (channel, error);
    }
}

impl ChannelHandler for () {}

impl<H: ChannelHandler + ?Sized> ChannelHandler for Arc<H> {
    fn on_connect(&self, channel: &str) {
        (**self).on_connect(channel);
    }

    fn on_disconnect(&self, channel: &str) {
        (**self).on_disconnect(channel);
    }

    fn on_message(&self, channel: &str, payload: &Payload) {
        (**self).on_message(channel, payload);
    }

    fn on_error(&self, channel: &str, error: &WsError) {
        (**self).on_error(channel, error);
    }
}

type EventHook = Box<dyn Fn(&str) + Send + Sync>;
type MessageHook = Box<dyn Fn(&str, &Payload) + Send + Sync>;
type ErrorHook = Box<dyn Fn(&str, &WsError) + Send + Sync>;

/// Closure-backed [`ChannelHandler`] with four optional slots.
///
/// ```
/// use realtime_transport::ws::Callbacks;
///
/// let callbacks = Callbacks::new()
///     .with_connect(|channel| println!("{channel} up"))
///     .with_message(|channel, payload| println!("{channel}: {payload:?}"));
/// # let _ = callbacks;
/// ```
#[derive(Default)]
pub struct Callbacks {
    connect: Option<EventHook>,
    disconnect: Option<EventHook>,
    message: Option<MessageHook>,
    error: Option<ErrorHook>,
}

impl Callbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_connect<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.connect = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn with_disconnect<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.disconnect = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn with_message<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &Payload) + Send + Sync + 'static,
    {
        self.message = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn with_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &WsError) + Send + Sync + 'static,
    {
        self.error = Some(Box::new(hook));
        self
    }
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("connect", &self.connect.is_some())
            .field("disconnect", &self.disconnect.is_some())
            .field("message", &self.message.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}

impl ChannelHandler for Callbacks {
    fn on_connect(&self, channel: &str) {
        if let Some(hook) = &self.connect {
            hook(channel);
        }
    }

    fn on_disconnect(&self, channel: &str) {
        if let Some(hook) = &self.disconnect {
            hook(channel);
        }
    }

    fn on_message(&self, channel: &str, payload: &Payload) {
        if let Some(hook) = &self.message {
            hook(channel, payload);
        }
    }

    fn on_error(&self, channel: &str, error: &WsError) {
        if let Some(hook) = &self.error {
            hook(channel, error);
        }
    }
}

/// Opens the socket for a channel.
///
/// The manager calls this once per connect attempt and applies its own
/// timeout around it.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &str) -> Result<WsStream, WsError>;
}

/// [`Connector`] backed by `tokio_tungstenite::connect_async`.
///
/// `wss://` endpoints use rustls with the platform's native roots and the
/// `ring` provider.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, endpoint: &str) -> Result<WsStream, WsError> {
        // Fails harmlessly when a provider is already installed.
        _ = rustls::crypto::ring::default_provider().install_default();

        let (stream, _response) = connect_async(endpoint).await.map_err(WsError::Connection)?;
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    #[test]
    fn unit_handler_ignores_everything() {
        ().on_connect("a");
        ().on_message("a", &Payload::Json(json!(1)));
        ().on_error("a", &WsError::ConnectionClosed);
        ().on_disconnect("a");
    }

    #[test]
    fn callbacks_invoke_only_registered_slots() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let connect_log = Arc::clone(&seen);
        let message_log = Arc::clone(&seen);

        let callbacks = Callbacks::new()
            .with_connect(move |channel| {
                connect_log.lock().unwrap().push(format!("connect:{channel}"));
            })
            .with_message(move |channel, payload| {
                message_log
                    .lock()
                    .unwrap()
                    .push(format!("message:{channel}:{}", payload.as_text().unwrap_or("json")));
            });

        callbacks.on_connect("marketdata");
        callbacks.on_message("marketdata", &Payload::Text("tick".to_owned()));
        callbacks.on_disconnect("marketdata");
        callbacks.on_error("marketdata", &WsError::Timeout);

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["connect:marketdata", "message:marketdata:tick"]
        );
    }

    #[test]
    fn shared_handler_forwards_through_arc() {
        let seen = Arc::new(Mutex::new(0_u32));
        let counter = Arc::clone(&seen);
        let handler: Arc<dyn ChannelHandler> = Arc::new(Callbacks::new().with_disconnect(move |_| {
            *counter.lock().unwrap() += 1;
        }));

        handler.on_disconnect("a");
        Arc::clone(&handler).on_disconnect("b");

        assert_eq!(*seen.lock().unwrap(), 2);
    }

    #[test]
    fn callbacks_debug_shows_registered_slots() {
        let callbacks = Callbacks::new().with_error(|_, _| {});

        assert_eq!(
            format!("{callbacks:?}"),
            "Callbacks { connect: false, disconnect: false, message: false, error: true }"
        );
    }
}
