//! Publisher over the shared log, plus the in-process order recovery
//! buffer.
//!
//! The two sides of `publish_order` are independent by design: the record
//! is stored into the recovery buffer before the transport offer, so a
//! refused offer never loses the order.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::codec::{CodecError, Encoder};
use crate::types::{OrderRecord, PriceLevel};

use super::log::{Offer, SharedLog};
use super::IpcError;

/// Configuration for one publisher (one stream on one channel).
#[derive(Debug, Clone)]
pub struct IpcPublisherConfig {
    /// Channel URI, e.g. `ipc:///dev/shm/byb`. The part after `ipc://`
    /// is the filesystem prefix for the stream's log file.
    pub channel: String,
    /// Stream identifier within the channel.
    pub stream_id: i32,
    /// Ring capacity in bytes.
    pub capacity: usize,
    /// Attempts to map the log before `init` gives up.
    pub init_retries: u32,
    /// Extra offer attempts on `BackPressured` / `NotConnected`.
    pub offer_retries: u32,
    /// Sleep between offer attempts.
    pub retry_delay: Duration,
}

impl Default for IpcPublisherConfig {
    fn default() -> Self {
        Self {
            channel: "ipc:///dev/shm/byb".to_string(),
            stream_id: 1001,
            capacity: 1 << 20,
            init_retries: 100,
            offer_retries: 3,
            retry_delay: Duration::from_millis(1),
        }
    }
}

impl IpcPublisherConfig {
    /// Filesystem path of this stream's log file.
    pub fn log_path(&self) -> PathBuf {
        let base = self
            .channel
            .strip_prefix("ipc://")
            .unwrap_or(self.channel.as_str());
        PathBuf::from(format!("{base}-{}.log", self.stream_id))
    }
}

/// Single-writer publisher handle for one `(channel, stream_id)`.
pub struct IpcPublisher {
    cfg: IpcPublisherConfig,
    log: Option<SharedLog>,
    encoder: Mutex<Encoder>,
    orders: Mutex<HashMap<String, OrderRecord>>,
    messages_sent: AtomicU64,
    offer_failures: AtomicU64,
}

impl IpcPublisher {
    /// Create an uninitialized publisher. Offers fail as `NotConnected`
    /// until `init` succeeds; the recovery buffer works regardless.
    pub fn new(cfg: IpcPublisherConfig) -> Self {
        Self {
            cfg,
            log: None,
            encoder: Mutex::new(Encoder::new()),
            orders: Mutex::new(HashMap::new()),
            messages_sent: AtomicU64::new(0),
            offer_failures: AtomicU64::new(0),
        }
    }

    /// Connect to the transport: create the stream's log file, retrying a
    /// bounded number of times.
    pub fn init(&mut self) -> Result<(), IpcError> {
        let path = self.cfg.log_path();
        let mut last_err: Option<IpcError> = None;
        for _ in 0..self.cfg.init_retries.max(1) {
            match SharedLog::create(&path, self.cfg.capacity) {
                Ok(log) => {
                    if log.consumer_count() == 0 {
                        warn!(
                            channel = %self.cfg.channel,
                            stream_id = self.cfg.stream_id,
                            "publication ready, no subscribers attached yet"
                        );
                    }
                    info!(
                        channel = %self.cfg.channel,
                        stream_id = self.cfg.stream_id,
                        path = %path.display(),
                        "ipc publisher ready"
                    );
                    self.log = Some(log);
                    return Ok(());
                }
                Err(e) => {
                    last_err = Some(e);
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
        }
        match last_err {
            Some(e) => Err(e),
            None => Err(IpcError::Unavailable(self.cfg.init_retries)),
        }
    }

    pub fn stream_id(&self) -> i32 {
        self.cfg.stream_id
    }

    pub fn is_connected(&self) -> bool {
        self.log
            .as_ref()
            .map(|l| l.consumer_count() > 0)
            .unwrap_or(false)
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    pub fn offer_failures(&self) -> u64 {
        self.offer_failures.load(Ordering::Relaxed)
    }

    /// Offer a payload, retrying transient refusals a bounded number of
    /// times. Terminal refusals are counted and dropped.
    pub async fn offer(&self, payload: &[u8]) -> Offer {
        let Some(log) = self.log.as_ref() else {
            self.offer_failures.fetch_add(1, Ordering::Relaxed);
            return Offer::NotConnected;
        };

        let mut outcome = log.offer(payload);
        for _ in 0..self.cfg.offer_retries {
            match outcome {
                Offer::Accepted => break,
                Offer::BackPressured | Offer::NotConnected => {
                    tokio::time::sleep(self.cfg.retry_delay).await;
                    outcome = log.offer(payload);
                }
                Offer::TooLarge => break,
            }
        }

        if outcome.is_accepted() {
            self.messages_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.offer_failures.fetch_add(1, Ordering::Relaxed);
            debug!(stream_id = self.cfg.stream_id, ?outcome, "offer dropped");
        }
        outcome
    }

    /// Encode and offer an order-book snapshot.
    pub async fn publish_snapshot(
        &self,
        timestamp_ns: u64,
        bids: &[PriceLevel],
        asks: &[PriceLevel],
        symbol: &str,
    ) -> Result<Offer, CodecError> {
        let payload = {
            let mut enc = self.encoder.lock();
            enc.encode_orderbook_snapshot(timestamp_ns, bids, asks, symbol)?;
            enc.data().to_vec()
        };
        Ok(self.offer(&payload).await)
    }

    /// Encode and offer a trade signal.
    pub async fn publish_signal(
        &self,
        timestamp_ns: u64,
        action: u8,
        price: f64,
        qty: f64,
        symbol: &str,
    ) -> Result<Offer, CodecError> {
        let payload = {
            let mut enc = self.encoder.lock();
            enc.encode_trade_signal(timestamp_ns, action, price, qty, symbol)?;
            enc.data().to_vec()
        };
        Ok(self.offer(&payload).await)
    }

    /// Encode an order record onto the log and store it into the recovery
    /// buffer. The buffer save happens first and unconditionally: a
    /// transport refusal must not lose the record.
    pub async fn publish_order(&self, record: &OrderRecord) -> Result<Offer, CodecError> {
        self.orders
            .lock()
            .insert(record.symbol().to_string(), *record);

        let payload = {
            let mut enc = self.encoder.lock();
            enc.encode_order(
                record.timestamp_ns,
                record.order_id(),
                record.symbol(),
                record.side_str(),
                record.price,
                record.quantity,
                record.is_active,
            )?;
            enc.data().to_vec()
        };
        Ok(self.offer(&payload).await)
    }

    /// Whether the recovery buffer holds an active record for `symbol`.
    pub fn has_order(&self, symbol: &str) -> bool {
        self.orders
            .lock()
            .get(symbol)
            .map(|r| r.is_active)
            .unwrap_or(false)
    }

    pub fn get_order(&self, symbol: &str) -> Option<OrderRecord> {
        self.orders.lock().get(symbol).copied()
    }

    /// Soft delete: marks the record inactive but retains the entry.
    pub fn remove_order(&self, symbol: &str) {
        if let Some(rec) = self.orders.lock().get_mut(symbol) {
            rec.is_active = false;
        }
    }

    pub fn update_order(&self, symbol: &str, record: OrderRecord) {
        self.orders.lock().insert(symbol.to_string(), record);
    }

    pub fn all_orders(&self) -> Vec<OrderRecord> {
        self.orders.lock().values().copied().collect()
    }

    /// Periodic transport housekeeping; driven from the service task.
    pub fn service(&self) {
        if let Some(log) = self.log.as_ref() {
            if let Err(e) = log.service() {
                debug!(stream_id = self.cfg.stream_id, error = %e, "log flush failed");
            }
        }
    }
}
