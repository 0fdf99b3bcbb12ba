#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Each test binary uses a different subset of the helpers"
)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt as _, StreamExt as _};
use realtime_transport::ws::{
    ChannelHandler, ChannelPhase, Config, Connector, Payload, TransportManager, WsError, WsStream,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

pub const WAIT: Duration = Duration::from_secs(5);

/// What the mock server saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Handshake completed for the given request URI
    Accepted(String),
    /// A client socket ended
    Closed,
}

/// Mock WebSocket server that records connections and can drop or refuse them.
pub struct MockWsServer {
    addr: SocketAddr,
    /// Broadcast messages to ALL connected clients
    message_tx: broadcast::Sender<String>,
    /// Close every connected client from the server side
    kick_tx: broadcast::Sender<()>,
    /// Text frames received from clients
    received_rx: mpsc::UnboundedReceiver<String>,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
    refusing: Arc<AtomicBool>,
    accepted: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (message_tx, _) = broadcast::channel::<String>(100);
        let (kick_tx, _) = broadcast::channel::<()>(16);
        let (received_tx, received_rx) = mpsc::unbounded_channel::<String>();
        let (events_tx, events_rx) = mpsc::unbounded_channel::<ServerEvent>();
        let refusing = Arc::new(AtomicBool::new(false));
        let accepted = Arc::new(AtomicUsize::new(0));
        let live = Arc::new(AtomicUsize::new(0));
        let max_live = Arc::new(AtomicUsize::new(0));

        let broadcast_tx = message_tx.clone();
        let kick = kick_tx.clone();
        let refuse = Arc::clone(&refusing);
        let accepted_count = Arc::clone(&accepted);
        let live_count = Arc::clone(&live);
        let max_live_count = Arc::clone(&max_live);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                if refuse.load(Ordering::SeqCst) {
                    // Dropping the TCP stream makes the client handshake fail.
                    drop(stream);
                    continue;
                }

                // Subscribe before the handshake so nothing sent after the client
                // sees the socket open is missed.
                let mut msg_rx = broadcast_tx.subscribe();
                let mut kick_rx = kick.subscribe();

                let uri_tx = events_tx.clone();
                let callback =
                    move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        drop(uri_tx.send(ServerEvent::Accepted(req.uri().to_string())));
                        Ok(resp)
                    };

                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                else {
                    continue;
                };

                accepted_count.fetch_add(1, Ordering::SeqCst);
                let now_live = live_count.fetch_add(1, Ordering::SeqCst) + 1;
                max_live_count.fetch_max(now_live, Ordering::SeqCst);

                let (mut write, mut read) = ws_stream.split();
                let received = received_tx.clone();
                let events = events_tx.clone();
                let live_conn = Arc::clone(&live_count);

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(received.send(text.to_string()));
                                    }
                                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                                    Some(Ok(_)) => {}
                                }
                            }
                            msg = msg_rx.recv() => {
                                match msg {
                                    Ok(text) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(_) => break,
                                }
                            }
                            _ = kick_rx.recv() => {
                                drop(write.send(Message::Close(None)).await);
                                break;
                            }
                        }
                    }

                    live_conn.fetch_sub(1, Ordering::SeqCst);
                    drop(events.send(ServerEvent::Closed));
                });
            }
        });

        Self {
            addr,
            message_tx,
            kick_tx,
            received_rx,
            events_rx,
            refusing,
            accepted,
            live,
            max_live,
        }
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Send a message to all connected clients.
    pub fn send(&self, message: &str) {
        drop(self.message_tx.send(message.to_owned()));
    }

    /// Close every client socket from the server side.
    pub fn disconnect_all(&self) {
        drop(self.kick_tx.send(()));
    }

    /// Drop new TCP connections before the WebSocket handshake.
    pub fn refuse(&self) {
        self.refusing.store(true, Ordering::SeqCst);
    }

    pub fn allow(&self) {
        self.refusing.store(false, Ordering::SeqCst);
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    /// Receive the next text frame sent by a client.
    pub async fn recv(&mut self) -> Option<String> {
        timeout(Duration::from_secs(2), self.received_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next accept/close event.
    pub async fn next_event(&mut self) -> ServerEvent {
        timeout(WAIT, self.events_rx.recv())
            .await
            .expect("timed out waiting for server event")
            .expect("server stopped")
    }
}

/// An address nothing listens on.
pub async fn closed_endpoint() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{addr}/")
}

/// Callback observed by a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connect(String),
    Disconnect(String),
    Message(String, Payload),
    Error(String, String),
}

/// [`ChannelHandler`] that forwards every callback to an [`EventLog`].
#[derive(Clone)]
pub struct Recorder {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelHandler for Recorder {
    fn on_connect(&self, channel: &str) {
        drop(self.tx.send(Event::Connect(channel.to_owned())));
    }

    fn on_disconnect(&self, channel: &str) {
        drop(self.tx.send(Event::Disconnect(channel.to_owned())));
    }

    fn on_message(&self, channel: &str, payload: &Payload) {
        drop(self.tx.send(Event::Message(channel.to_owned(), payload.clone())));
    }

    fn on_error(&self, channel: &str, error: &WsError) {
        drop(self.tx.send(Event::Error(channel.to_owned(), error.to_string())));
    }
}

pub struct EventLog {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventLog {
    pub async fn next(&mut self) -> Event {
        timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for callback")
            .expect("recorder dropped")
    }

    /// Assert that no callback fires within `window`.
    pub async fn assert_quiet(&mut self, window: Duration) {
        if let Ok(Some(event)) = timeout(window, self.rx.recv()).await {
            panic!("unexpected callback: {event:?}");
        }
    }
}

pub fn recorder() -> (Recorder, EventLog) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Recorder { tx }, EventLog { rx })
}

/// Fast reconnects so tests finish quickly.
pub fn config() -> Config {
    let mut config = Config::default();
    config.reconnect.max_attempts = 5;
    config.reconnect.initial_backoff = Duration::from_millis(50);
    config.reconnect.max_backoff = Duration::from_millis(200);
    config.connect_timeout = Duration::from_secs(2);
    config
}

/// Poll until channel `id` reaches a phase matching `predicate`.
pub async fn wait_for_phase<F>(manager: &TransportManager, id: &str, predicate: F)
where
    F: Fn(ChannelPhase) -> bool,
{
    timeout(WAIT, async {
        loop {
            if manager
                .channel(id)
                .is_some_and(|snapshot| predicate(snapshot.phase))
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for channel phase");
}

/// Records when each attempt starts and then fails it.
#[derive(Clone, Default)]
pub struct FailingConnector {
    attempts: Arc<Mutex<Vec<Instant>>>,
    /// Never resolve, so the attempt ends by timeout or cancellation
    hang: bool,
}

impl FailingConnector {
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn gaps_ms(&self) -> Vec<u128> {
        self.attempts()
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis())
            .collect()
    }
}

#[async_trait]
impl Connector for FailingConnector {
    async fn connect(&self, _endpoint: &str) -> Result<WsStream, WsError> {
        self.attempts.lock().unwrap().push(Instant::now());
        if self.hang {
            std::future::pending::<()>().await;
        }
        Err(WsError::ConnectionClosed)
    }
}
