//! Private trade session: HMAC-authenticated login, order create/cancel,
//! and correlation of acks and execution reports back to client IDs.
//!
//! The client ID is echoed as both `reqId` and `orderLinkId`, so every
//! response can be correlated even when venue-side IDs are unknown.
//! Lifecycle updates are delivered as [`OrderUpdate`] values over a
//! channel; the strategy loop drains them before each tick, so callbacks
//! never race the tick on engine state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use byb_common::types::{OrderStatus, OrderUpdate, Side};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use byb_market::session::{SessionError, SessionHandler, SessionSender, WireSession};

/// Auth signature validity window added to the current time.
const AUTH_EXPIRES_WINDOW_MS: i64 = 10_000;

/// Venue API credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

/// `HMAC_SHA256(api_secret, "GET/realtime" || expires_ms)` as lowercase hex.
pub fn sign_auth(api_secret: &str, expires_ms: i64) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(api_secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(format!("GET/realtime{expires_ms}").as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// A create request as the strategy sees it.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub qty: f64,
    pub price: f64,
    pub client_id: String,
    /// PostOnly when true, IOC taker mode otherwise.
    pub post_only: bool,
}

/// Order-entry seam between the strategy engine and the venue. The live
/// implementation is [`TradeHandle`]; tests substitute a recorder.
pub trait OrderGateway: Send + Sync {
    fn place_order(&self, request: &OrderRequest) -> Result<(), SessionError>;
    fn cancel_order(&self, symbol: &str, client_id: &str) -> Result<(), SessionError>;
}

/// Cloneable order-entry handle bound to a running trade session.
#[derive(Debug, Clone)]
pub struct TradeHandle {
    sender: SessionSender,
    recv_window_ms: u64,
}

fn request_header(recv_window_ms: u64) -> serde_json::Value {
    json!({
        "X-BAPI-TIMESTAMP": Utc::now().timestamp_millis().to_string(),
        "X-BAPI-RECV-WINDOW": recv_window_ms.to_string(),
    })
}

fn create_payload(request: &OrderRequest, recv_window_ms: u64) -> String {
    let time_in_force = if request.post_only { "PostOnly" } else { "IOC" };
    json!({
        "reqId": request.client_id,
        "header": request_header(recv_window_ms),
        "op": "order.create",
        "args": [{
            "symbol": request.symbol,
            "side": request.side.as_str(),
            "orderType": "Limit",
            "qty": request.qty.to_string(),
            "price": request.price.to_string(),
            "category": "linear",
            "timeInForce": time_in_force,
            "orderLinkId": request.client_id,
        }],
    })
    .to_string()
}

fn cancel_payload(symbol: &str, client_id: &str, recv_window_ms: u64) -> String {
    json!({
        "reqId": client_id,
        "header": request_header(recv_window_ms),
        "op": "order.cancel",
        "args": [{
            "symbol": symbol,
            "category": "linear",
            "orderLinkId": client_id,
        }],
    })
    .to_string()
}

impl OrderGateway for TradeHandle {
    fn place_order(&self, request: &OrderRequest) -> Result<(), SessionError> {
        debug!(
            symbol = %request.symbol,
            side = %request.side,
            price = request.price,
            qty = request.qty,
            client_id = %request.client_id,
            post_only = request.post_only,
            "sending order.create"
        );
        self.sender
            .send_text(create_payload(request, self.recv_window_ms))
    }

    fn cancel_order(&self, symbol: &str, client_id: &str) -> Result<(), SessionError> {
        debug!(symbol, client_id, "sending order.cancel");
        self.sender
            .send_text(cancel_payload(symbol, client_id, self.recv_window_ms))
    }
}

/// Any inbound frame on the private stream.
#[derive(Debug, Deserialize)]
struct PrivateMessage {
    #[serde(default)]
    op: Option<String>,
    #[serde(default, rename = "retCode")]
    ret_code: Option<i64>,
    #[serde(default, rename = "retMsg")]
    ret_msg: Option<String>,
    #[serde(default, rename = "reqId")]
    req_id: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// One item of an execution or order-stream payload.
#[derive(Debug, Deserialize)]
struct StreamItem {
    #[serde(default, rename = "orderLinkId")]
    order_link_id: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default, rename = "orderStatus")]
    order_status: Option<String>,
}

/// Message handler for the private stream.
pub struct TradeSessionHandler {
    credentials: Option<Credentials>,
    sender: SessionSender,
    updates_tx: mpsc::UnboundedSender<OrderUpdate>,
    authenticated: AtomicBool,
}

impl TradeSessionHandler {
    fn emit(&self, client_id: String, status: OrderStatus, symbol: String) {
        if self
            .updates_tx
            .send(OrderUpdate {
                client_id,
                status,
                symbol,
            })
            .is_err()
        {
            debug!("order update receiver dropped");
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    fn handle_stream_items(&self, data: &serde_json::Value, default_status: Option<OrderStatus>) {
        let Some(items) = data.as_array() else {
            return;
        };
        for item in items {
            let parsed: StreamItem = match serde_json::from_value(item.clone()) {
                Ok(p) => p,
                Err(e) => {
                    debug!(error = %e, "skipping malformed stream item");
                    continue;
                }
            };
            let Some(client_id) = parsed.order_link_id.filter(|id| !id.is_empty()) else {
                continue;
            };
            let status = match default_status {
                Some(status) => Some(status),
                None => parsed.order_status.as_deref().and_then(OrderStatus::parse),
            };
            let Some(status) = status else {
                debug!(status = ?parsed.order_status, "ignoring unmapped order status");
                continue;
            };
            self.emit(client_id, status, parsed.symbol.unwrap_or_default());
        }
    }

    fn handle_op(&self, msg: &PrivateMessage, op: &str) {
        let ok = msg.ret_code == Some(0);
        match op {
            "auth" => {
                self.authenticated.store(ok, Ordering::Release);
                if ok {
                    info!("trade session authenticated");
                } else {
                    warn!(ret_msg = ?msg.ret_msg, "authentication rejected");
                }
            }
            "order.create" => {
                let data_id = msg
                    .data
                    .as_ref()
                    .and_then(|d| d.get("orderLinkId"))
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                let symbol = msg
                    .data
                    .as_ref()
                    .and_then(|d| d.get("symbol"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                if ok {
                    let Some(client_id) = data_id.or_else(|| msg.req_id.clone()) else {
                        warn!("create ack without correlation id");
                        return;
                    };
                    self.emit(client_id, OrderStatus::New, symbol);
                } else {
                    warn!(ret_msg = ?msg.ret_msg, req_id = ?msg.req_id, "order rejected");
                    let Some(client_id) = msg.req_id.clone().or(data_id) else {
                        return;
                    };
                    self.emit(client_id, OrderStatus::Rejected, symbol);
                }
            }
            "order.cancel" => {
                // Cancellation effects surface via the order stream.
                if ok {
                    debug!(req_id = ?msg.req_id, "cancel accepted");
                } else {
                    warn!(ret_msg = ?msg.ret_msg, req_id = ?msg.req_id, "cancel rejected");
                    if let Some(client_id) = msg.req_id.clone() {
                        self.emit(client_id, OrderStatus::Rejected, String::new());
                    }
                }
            }
            "subscribe" => debug!(ok, "private subscription ack"),
            other => debug!(op = other, "ignoring private op"),
        }
    }
}

#[async_trait]
impl SessionHandler for TradeSessionHandler {
    async fn on_open(&self) {
        let Some(creds) = self.credentials.as_ref() else {
            warn!("no credentials configured; trade session stays unauthenticated");
            return;
        };
        let expires_ms = Utc::now().timestamp_millis() + AUTH_EXPIRES_WINDOW_MS;
        let signature = sign_auth(&creds.api_secret, expires_ms);
        let auth = json!({
            "op": "auth",
            "args": [creds.api_key, expires_ms, signature],
        });
        if self.sender.send_text(auth.to_string()).is_err() {
            warn!("failed to queue auth request");
            return;
        }
        // Execution reports and order-status changes arrive as topics.
        let sub = json!({ "op": "subscribe", "args": ["execution", "order"] });
        if self.sender.send_text(sub.to_string()).is_err() {
            warn!("failed to queue private topic subscription");
        }
    }

    async fn on_message(&self, text: &str) {
        let msg: PrivateMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "skipping unparsable private frame");
                return;
            }
        };

        if let Some(topic) = msg.topic.as_deref() {
            match topic {
                "execution" => {
                    if let Some(data) = msg.data.as_ref() {
                        self.handle_stream_items(data, Some(OrderStatus::Filled));
                    }
                }
                "order" => {
                    if let Some(data) = msg.data.as_ref() {
                        self.handle_stream_items(data, None);
                    }
                }
                other => debug!(topic = other, "ignoring private topic"),
            }
            return;
        }

        if let Some(op) = msg.op.clone() {
            self.handle_op(&msg, &op);
        }
    }
}

/// The private trade session: a [`WireSession`] specialized with a
/// [`TradeSessionHandler`].
pub struct TradeSession {
    session: WireSession,
    handler: Arc<TradeSessionHandler>,
}

impl TradeSession {
    /// Build the session. Returns the session, the order-entry handle,
    /// and the receiver of order lifecycle updates.
    pub fn new(
        url: impl Into<String>,
        credentials: Option<Credentials>,
        recv_window_ms: u64,
    ) -> (Self, TradeHandle, mpsc::UnboundedReceiver<OrderUpdate>) {
        let (session, sender) = WireSession::new(url);
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let handler = Arc::new(TradeSessionHandler {
            credentials,
            sender: sender.clone(),
            updates_tx,
            authenticated: AtomicBool::new(false),
        });
        let handle = TradeHandle {
            sender,
            recv_window_ms,
        };
        (Self { session, handler }, handle, updates_rx)
    }

    pub fn handler(&self) -> Arc<TradeSessionHandler> {
        Arc::clone(&self.handler)
    }

    pub async fn run(self, shutdown: broadcast::Receiver<()>) -> Result<(), SessionError> {
        self.session.run(self.handler, shutdown).await
    }
}
