//! Public market session: depth subscriptions in, IPC snapshots out.
//!
//! The message handler applies delta semantics: a diff that carries only
//! one side leaves the other side of the book untouched, so resting
//! snapshots are never erased by a one-sided update.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use byb_common::ipc::IpcPublisher;
use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::depth::MAX_DEPTH_LEVELS;
use crate::registry::{BookRegistry, SubscriptionSet};
use crate::session::{SessionError, SessionHandler, SessionSender, WireSession};
use crate::wire::{depth_topic_symbol, parse_levels, PublicMessage, SubscribeRequest};

const PARSE_WARN_INTERVAL: Duration = Duration::from_secs(5);

/// Counters for the feed's periodic stats line.
#[derive(Debug, Default)]
pub struct FeedStats {
    pub messages_received: AtomicU64,
    pub snapshots_published: AtomicU64,
    pub parse_errors: AtomicU64,
}

/// Message handler for the public depth stream.
pub struct MarketFeedHandler {
    books: Arc<BookRegistry>,
    publisher: Arc<IpcPublisher>,
    stats: FeedStats,
    last_parse_warn: Mutex<Option<Instant>>,
}

impl MarketFeedHandler {
    pub fn new(books: Arc<BookRegistry>, publisher: Arc<IpcPublisher>) -> Self {
        Self {
            books,
            publisher,
            stats: FeedStats::default(),
            last_parse_warn: Mutex::new(None),
        }
    }

    pub fn stats(&self) -> &FeedStats {
        &self.stats
    }

    fn warn_parse_error(&self, err: &serde_json::Error) {
        self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
        let mut last = self.last_parse_warn.lock();
        let due = last
            .map(|t| t.elapsed() >= PARSE_WARN_INTERVAL)
            .unwrap_or(true);
        if due {
            warn!(error = %err, "skipping unparsable frame");
            *last = Some(Instant::now());
        }
    }

    /// Apply one depth diff and publish the resulting snapshot.
    async fn handle_depth(&self, msg: &PublicMessage) {
        let Some(topic) = msg.topic.as_deref() else {
            return;
        };
        let Some(symbol) = depth_topic_symbol(topic) else {
            return;
        };
        let Some(data) = msg.data.as_ref() else {
            debug!(topic, "depth message without data");
            return;
        };

        let bids = parse_levels(&data.b);
        let asks = parse_levels(&data.a);
        if bids.is_empty() && asks.is_empty() {
            return;
        }

        let book = self.books.get_or_create(symbol);
        // Delta semantics: an empty side in the diff leaves that side of
        // the book unchanged.
        if !bids.is_empty() {
            book.update_bids(&bids);
        }
        if !asks.is_empty() {
            book.update_asks(&asks);
        }
        book.bump_update();

        let timestamp_ns = Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64;
        let top_bids = book.snapshot_bids(MAX_DEPTH_LEVELS);
        let top_asks = book.snapshot_asks(MAX_DEPTH_LEVELS);
        match self
            .publisher
            .publish_snapshot(timestamp_ns, &top_bids, &top_asks, symbol)
            .await
        {
            Ok(outcome) if outcome.is_accepted() => {
                self.stats
                    .snapshots_published
                    .fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {}
            Err(e) => warn!(symbol, error = %e, "snapshot encode failed"),
        }
    }
}

#[async_trait]
impl SessionHandler for MarketFeedHandler {
    async fn on_message(&self, text: &str) {
        let msg: PublicMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                self.warn_parse_error(&e);
                return;
            }
        };
        self.stats.messages_received.fetch_add(1, Ordering::Relaxed);

        // Subscription acknowledgement.
        if let Some(success) = msg.success {
            if success {
                info!("subscription confirmed");
            } else {
                warn!(ret_msg = ?msg.ret_msg, "subscription failed");
            }
            return;
        }

        self.handle_depth(&msg).await;
    }
}

/// The public market session: a [`WireSession`] specialized with a
/// [`MarketFeedHandler`].
pub struct MarketSession {
    session: WireSession,
    sender: SessionSender,
    handler: Arc<MarketFeedHandler>,
    subscriptions: Arc<SubscriptionSet>,
    books: Arc<BookRegistry>,
}

impl MarketSession {
    pub fn new(
        url: impl Into<String>,
        books: Arc<BookRegistry>,
        subscriptions: Arc<SubscriptionSet>,
        publisher: Arc<IpcPublisher>,
    ) -> Self {
        let (session, sender) = WireSession::new(url);
        let handler = Arc::new(MarketFeedHandler::new(Arc::clone(&books), publisher));
        Self {
            session,
            sender,
            handler,
            subscriptions,
            books,
        }
    }

    /// Subscribe to the depth topic for `symbol`: ensures the depth book
    /// exists, emits the subscribe request, and marks the symbol in the
    /// subscription set. Idempotent.
    pub fn subscribe(&self, symbol: &str) -> Result<(), SessionError> {
        if !self.subscriptions.add(symbol) {
            debug!(symbol, "already subscribed");
            return Ok(());
        }
        self.books.get_or_create(symbol);

        let request = SubscribeRequest::depth(symbol);
        // SubscribeRequest serialization cannot fail; guard anyway.
        let text = serde_json::to_string(&request)
            .map_err(|e| SessionError::Connect(e.to_string()))?;
        self.sender.send_text(text)?;
        info!(symbol, "depth subscription queued");
        Ok(())
    }

    /// Shared handler, for reading feed statistics after `run` starts.
    pub fn handler(&self) -> Arc<MarketFeedHandler> {
        Arc::clone(&self.handler)
    }

    /// Service the session until shutdown or transport failure.
    pub async fn run(
        self,
        shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Result<(), SessionError> {
        self.session.run(self.handler, shutdown).await
    }
}
