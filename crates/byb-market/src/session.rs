//! One duplex WebSocket session.
//!
//! `WireSession` owns a connection's lifecycle: TLS connect, inbound
//! message dispatch, outbound text sends, and a `connected` flag flipped
//! on open and on close/error. Market and trade sessions share this
//! machinery and differ only in their [`SessionHandler`].
//!
//! Fragmented inbound frames are reassembled by the transport:
//! tungstenite buffers continuation frames per connection and its stream
//! yields only complete `Text`/`Binary` messages (`Message::Frame` is a
//! send-only variant), so handlers always see whole payloads.
//!
//! Outbound sends are queued on a channel, so callers may enqueue
//! (subscriptions, auth) before the socket is established; the queue is
//! drained once connected. Connect failures are fatal for the session —
//! there is no automatic reconnect; the error propagates to the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::Message, Error as WsError},
};
use tracing::{debug, info, warn};

/// Session failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("websocket connect failed: {0}")]
    Connect(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    #[error("stream ended unexpectedly")]
    StreamEnded,

    #[error("session is shut down")]
    Closed,
}

/// Per-session message sink. Each assembled inbound payload is handed to
/// `on_message`; `on_open` fires once the socket is established.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    async fn on_open(&self) {}
    async fn on_message(&self, text: &str);
}

/// Cloneable handle for writing to the session.
#[derive(Debug, Clone)]
pub struct SessionSender {
    tx: mpsc::UnboundedSender<String>,
}

impl SessionSender {
    /// Queue a single text frame for sending.
    pub fn send_text(&self, text: String) -> Result<(), SessionError> {
        self.tx.send(text).map_err(|_| SessionError::Closed)
    }
}

/// One duplex session over TLS.
pub struct WireSession {
    url: String,
    connected: Arc<AtomicBool>,
    outbound_rx: mpsc::UnboundedReceiver<String>,
}

impl WireSession {
    /// Build a session for `url`. Returns the session and its sender.
    pub fn new(url: impl Into<String>) -> (Self, SessionSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                url: url.into(),
                connected: Arc::new(AtomicBool::new(false)),
                outbound_rx: rx,
            },
            SessionSender { tx },
        )
    }

    /// Shared view of the connected flag.
    pub fn connected_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.connected)
    }

    /// Service the transport until the peer closes, an error occurs, or a
    /// shutdown signal arrives.
    pub async fn run<H: SessionHandler>(
        mut self,
        handler: Arc<H>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), SessionError> {
        info!(url = %self.url, "connecting websocket");
        let (ws, _response) = connect_async(&self.url)
            .await
            .map_err(|e| SessionError::Connect(e.to_string()))?;

        self.connected.store(true, Ordering::Release);
        info!(url = %self.url, "websocket connected");
        handler.on_open().await;

        let (mut write, mut read) = ws.split();

        loop {
            tokio::select! {
                Some(text) = self.outbound_rx.recv() => {
                    write.send(Message::Text(text)).await?;
                }

                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => handler.on_message(&text).await,
                    Some(Ok(Message::Binary(bytes))) => {
                        match String::from_utf8(bytes) {
                            Ok(text) => handler.on_message(&text).await,
                            Err(_) => debug!("dropping non-utf8 binary frame"),
                        }
                    }
                    // Send-only variant; the read side yields complete
                    // messages.
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        warn!(url = %self.url, ?frame, "websocket closed by peer");
                        self.connected.store(false, Ordering::Release);
                        return Err(SessionError::StreamEnded);
                    }
                    Some(Err(e)) => {
                        self.connected.store(false, Ordering::Release);
                        return Err(SessionError::WebSocket(e));
                    }
                    None => {
                        self.connected.store(false, Ordering::Release);
                        return Err(SessionError::StreamEnded);
                    }
                },

                _ = shutdown.recv() => {
                    info!(url = %self.url, "session shutdown");
                    self.connected.store(false, Ordering::Release);
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
            }
        }
    }
}
