//! The Martingale-chaser engine: one instance per traded symbol.
//!
//! Driven from two directions that never race each other: the tick loop
//! (one pass every cycle) and order-lifecycle callbacks, which the loop
//! drains before each tick. Transitions:
//!
//! ```text
//! Idle  --entry signal-----> Placing       (maker entry sent)
//! Placing  --"New"---------> Working
//! Placing  --timeout-------> (cancel resent, timer reset)
//! Placing  --"Rejected"----> Idle
//! Working  --"Filled"------> InPosition    (profit exit posted)
//! Working  --drift/stale---> Cancelling
//! Cancelling --"Cancelled"-> Idle
//! Cancelling --"Rejected"--> InPosition    (cancel lost the race)
//! InPosition --stop-loss---> Placing       (aggressive close, reversal armed)
//! InPosition --exit fill---> Idle | Recovering
//! Recovering --tick--------> Idle          (stake doubled, direction flipped)
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use byb_common::ipc::IpcPublisher;
use byb_common::types::{OrderRecord, OrderStatus, OrderUpdate, Side};
use byb_market::registry::{BookRegistry, SubscriptionSet};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::config::StrategyConfig;
use crate::ids::next_client_id;
use crate::trade::{OrderGateway, OrderRequest};

use super::risk::{pnl_dollars, pnl_pct, MartingaleParams};
use super::state::{AtomicBotState, BotState};

/// Heartbeat and rate-limited-warning cadence.
const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(5);
/// Fractional buffer crossed through the book when closing aggressively.
const CLOSE_CROSS_BUFFER: f64 = 0.001;

/// Engine tunables. Percentages are fractions of price.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub base_quantity: f64,
    pub max_martingale_steps: u32,
    pub profit_target_pct: f64,
    pub stop_loss_pct: f64,
    /// Offset from the same-side best when posting a maker entry.
    pub entry_offset: f64,
    /// Top-of-book drift that triggers a chase re-quote.
    pub chase_threshold: f64,
    /// Grace before a working order may be chased.
    pub chase_grace: Duration,
    /// Unconditional cancel for a working order.
    pub working_timeout: Duration,
    /// Cancel timer in Placing/Cancelling.
    pub order_timeout: Duration,
    /// Settle delay before managing a fresh position.
    pub settle_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&StrategyConfig::default())
    }
}

impl From<&StrategyConfig> for EngineConfig {
    fn from(cfg: &StrategyConfig) -> Self {
        Self {
            base_quantity: cfg.base_quantity,
            max_martingale_steps: cfg.max_martingale_steps,
            profit_target_pct: cfg.profit_target_pct,
            stop_loss_pct: cfg.stop_loss_pct,
            entry_offset: cfg.entry_offset,
            chase_threshold: cfg.chase_threshold,
            chase_grace: Duration::from_millis(cfg.chase_grace_ms),
            working_timeout: Duration::from_millis(cfg.working_timeout_ms),
            order_timeout: Duration::from_millis(cfg.order_timeout_ms),
            settle_delay: Duration::from_millis(cfg.settle_delay_ms),
        }
    }
}

/// Running win/loss statistics.
#[derive(Debug, Default, Clone)]
pub struct EngineStats {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub total_profit: f64,
    pub cumulative_loss: f64,
}

/// Per-symbol strategy engine.
pub struct StrategyEngine<G: OrderGateway> {
    symbol: String,
    cfg: EngineConfig,
    gateway: G,
    books: Arc<BookRegistry>,
    subscriptions: Arc<SubscriptionSet>,
    publisher: Arc<IpcPublisher>,

    state: AtomicBotState,
    risk: MartingaleParams,
    stats: EngineStats,

    entry_id: Option<String>,
    exit_id: Option<String>,
    active_order_price: f64,
    entry_price: f64,
    position_filled: bool,
    waiting_for_close: bool,
    trigger_reverse: bool,
    hard_reset_pending: bool,

    state_entry: Instant,
    position_entry: Instant,
    last_status_log: Instant,
    last_invalid_log: Option<Instant>,
    last_pnl_pct: f64,
    last_pnl_dollars: f64,
}

impl<G: OrderGateway> StrategyEngine<G> {
    pub fn new(
        symbol: impl Into<String>,
        cfg: EngineConfig,
        gateway: G,
        books: Arc<BookRegistry>,
        subscriptions: Arc<SubscriptionSet>,
        publisher: Arc<IpcPublisher>,
    ) -> Self {
        let symbol = symbol.into();
        let risk = MartingaleParams::new(
            cfg.base_quantity,
            cfg.max_martingale_steps,
            cfg.profit_target_pct,
            cfg.stop_loss_pct,
        );
        let now = Instant::now();
        let mut engine = Self {
            symbol,
            cfg,
            gateway,
            books,
            subscriptions,
            publisher,
            state: AtomicBotState::default(),
            risk,
            stats: EngineStats::default(),
            entry_id: None,
            exit_id: None,
            active_order_price: 0.0,
            entry_price: 0.0,
            position_filled: false,
            waiting_for_close: false,
            trigger_reverse: false,
            hard_reset_pending: false,
            state_entry: now,
            position_entry: now,
            last_status_log: now,
            last_invalid_log: None,
            last_pnl_pct: 0.0,
            last_pnl_dollars: 0.0,
        };
        engine.reconcile_on_startup();
        engine
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn state(&self) -> BotState {
        self.state.load()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn risk(&self) -> &MartingaleParams {
        &self.risk
    }

    /// Hydrate from the recovery buffer: an active record resumes the
    /// engine as in-position with the recorded side, price, quantity, and
    /// the recorded client ID as the exit reference. Advisory only —
    /// fills that happened while the process was down reconcile via
    /// later execution reports.
    fn reconcile_on_startup(&mut self) {
        let Some(record) = self.publisher.get_order(&self.symbol) else {
            return;
        };
        if !record.is_active {
            return;
        }
        info!(
            symbol = %self.symbol,
            order_id = record.order_id(),
            side = record.side_str(),
            price = record.price,
            qty = record.quantity,
            "recovering active position from buffer"
        );
        self.entry_price = record.price;
        self.risk.current_quantity = record.quantity;
        self.risk.is_short = record.side() == Some(Side::Sell);
        self.exit_id = Some(record.order_id().to_string());
        self.position_filled = true;
        self.position_entry = Instant::now();
        self.set_state(BotState::InPosition);
    }

    fn set_state(&mut self, state: BotState) {
        self.state.store(state);
        self.state_entry = Instant::now();
    }

    fn now_ns() -> u64 {
        Utc::now().timestamp_nanos_opt().unwrap_or(0) as u64
    }

    /// The client ID of whichever order is currently in flight.
    fn in_flight_id(&self) -> Option<String> {
        if self.waiting_for_close {
            self.exit_id.clone()
        } else {
            self.entry_id.clone().or_else(|| self.exit_id.clone())
        }
    }

    /// Market-data gate: symbol subscribed, book present, both tops
    /// positive, and an uncrossed market. Violations pause the cycle
    /// with rate-limited logging.
    fn validate_market_data(&mut self) -> Option<(f64, f64)> {
        if !self.subscriptions.contains(&self.symbol) {
            return None;
        }
        let book = self.books.get(&self.symbol)?;
        let (bid, _bid_qty) = book.best_bid()?;
        let (ask, _ask_qty) = book.best_ask()?;
        if bid >= ask {
            let due = self
                .last_invalid_log
                .map(|t| t.elapsed() >= STATUS_LOG_INTERVAL)
                .unwrap_or(true);
            if due {
                warn!(symbol = %self.symbol, bid, ask, "crossed market, pausing");
                self.last_invalid_log = Some(Instant::now());
            }
            return None;
        }
        Some((bid, ask))
    }

    fn heartbeat(&mut self) {
        if self.last_status_log.elapsed() < STATUS_LOG_INTERVAL {
            return;
        }
        self.last_status_log = Instant::now();
        if self.position_filled {
            info!(
                symbol = %self.symbol,
                state = %self.state.load(),
                pnl_pct = self.last_pnl_pct * 100.0,
                pnl_dollars = self.last_pnl_dollars,
                step = self.risk.step,
                "status"
            );
        } else {
            info!(
                symbol = %self.symbol,
                state = %self.state.load(),
                qty = self.risk.current_quantity,
                step = self.risk.step,
                "status"
            );
        }
    }

    /// One strategy cycle.
    pub async fn tick(&mut self) {
        let Some((bid, ask)) = self.validate_market_data() else {
            return;
        };
        self.heartbeat();

        match self.state.load() {
            BotState::Idle => {
                if !self.waiting_for_close {
                    self.evaluate_entry(bid, ask).await;
                }
            }
            BotState::Placing | BotState::Cancelling => self.handle_timeout(),
            BotState::Working => self.monitor_working_order(bid, ask),
            BotState::InPosition => self.manage_open_position(bid, ask).await,
            BotState::Recovering => self.apply_martingale_recovery(),
        }
    }

    /// Maker entry just inside our side of the book, clamped so buys stay
    /// strictly below the best ask and sells strictly above the best bid.
    async fn evaluate_entry(&mut self, bid: f64, ask: f64) {
        let offset = self.cfg.entry_offset;
        let side = if self.risk.is_short {
            Side::Sell
        } else {
            Side::Buy
        };
        let mut price = match side {
            Side::Buy => bid - offset,
            Side::Sell => ask + offset,
        };
        match side {
            Side::Buy if price >= ask => price = ask - offset,
            Side::Sell if price <= bid => price = bid + offset,
            _ => {}
        }

        let client_id = next_client_id();
        let qty = self.risk.current_quantity;
        info!(
            symbol = %self.symbol,
            side = %side,
            price,
            qty,
            step = self.risk.step,
            "opening position"
        );

        self.entry_id = Some(client_id.clone());
        self.active_order_price = price;
        self.entry_price = price;
        self.position_filled = false;
        self.set_state(BotState::Placing);

        let request = OrderRequest {
            symbol: self.symbol.clone(),
            side,
            qty,
            price,
            client_id: client_id.clone(),
            post_only: true,
        };
        if let Err(e) = self.gateway.place_order(&request) {
            warn!(symbol = %self.symbol, error = %e, "entry send failed");
            self.entry_id = None;
            self.set_state(BotState::Idle);
            return;
        }

        let ts = Self::now_ns();
        if let Err(e) = self
            .publisher
            .publish_signal(ts, side.wire_code(), price, qty, &self.symbol)
            .await
        {
            warn!(error = %e, "signal encode failed");
        }
        match OrderRecord::new(&client_id, &self.symbol, side, price, qty, ts) {
            Ok(record) => {
                if let Err(e) = self.publisher.publish_order(&record).await {
                    warn!(error = %e, "order record encode failed");
                }
            }
            Err(e) => warn!(error = %e, "order record too wide for the buffer"),
        }
    }

    /// In Placing/Cancelling: re-send the cancel once the timeout lapses
    /// and reset the timer. The state does not change until an ack lands.
    fn handle_timeout(&mut self) {
        if self.state_entry.elapsed() < self.cfg.order_timeout {
            return;
        }
        let Some(client_id) = self.in_flight_id() else {
            self.set_state(BotState::Idle);
            return;
        };
        warn!(symbol = %self.symbol, client_id = %client_id, "ack timeout, cancelling");
        if let Err(e) = self.gateway.cancel_order(&self.symbol, &client_id) {
            warn!(error = %e, "cancel send failed");
        }
        self.state_entry = Instant::now();
    }

    /// Chase logic for a resting entry: after the grace period, cancel
    /// when the top of book has drifted past our level, or
    /// unconditionally once the working time limit lapses.
    fn monitor_working_order(&mut self, bid: f64, ask: f64) {
        let elapsed = self.state_entry.elapsed();
        if elapsed < self.cfg.chase_grace {
            return;
        }

        let drifted = if self.risk.is_short {
            ask < self.active_order_price - self.cfg.chase_threshold
        } else {
            bid > self.active_order_price + self.cfg.chase_threshold
        };
        let expired = elapsed >= self.cfg.working_timeout;
        if !drifted && !expired {
            return;
        }

        let Some(client_id) = self.in_flight_id() else {
            return;
        };
        info!(
            symbol = %self.symbol,
            bid,
            ask,
            resting = self.active_order_price,
            expired,
            "market moved away, cancelling to re-quote"
        );
        if let Err(e) = self.gateway.cancel_order(&self.symbol, &client_id) {
            warn!(error = %e, "cancel send failed");
        }
        self.set_state(BotState::Cancelling);
    }

    /// Stop-loss management of an open position. Profit-taking is
    /// realized when the resting exit fills, not here.
    async fn manage_open_position(&mut self, bid: f64, ask: f64) {
        if !self.position_filled {
            return;
        }
        if self.position_entry.elapsed() < self.cfg.settle_delay {
            return;
        }

        // A cancelled or rejected exit leaves the position uncovered;
        // repost the profit order.
        if self.exit_id.is_none() && !self.waiting_for_close {
            self.post_profit_exit().await;
        }

        let current = if self.risk.is_short { ask } else { bid };
        let pct = pnl_pct(self.entry_price, current, self.risk.is_short);
        self.last_pnl_pct = pct;
        self.last_pnl_dollars = pnl_dollars(pct, self.entry_price, self.risk.current_quantity);

        if pct <= -self.risk.stop_pct {
            self.trigger_stop(bid, ask).await;
        }
    }

    /// Stop breached: book the loss, arm the reversal (or the hard reset
    /// at the step cap), cancel the resting exit, and cross the book to
    /// close.
    async fn trigger_stop(&mut self, bid: f64, ask: f64) {
        warn!(
            symbol = %self.symbol,
            pnl_pct = self.last_pnl_pct * 100.0,
            pnl_dollars = self.last_pnl_dollars,
            step = self.risk.step,
            "stop loss breached, closing"
        );

        self.stats.total_trades += 1;
        self.stats.total_profit += self.last_pnl_dollars;
        if self.risk.can_double() {
            self.stats.cumulative_loss += self.last_pnl_dollars.abs();
            self.trigger_reverse = true;
        } else {
            self.hard_reset_pending = true;
        }

        if let Some(exit) = self.exit_id.take() {
            if let Err(e) = self.gateway.cancel_order(&self.symbol, &exit) {
                warn!(error = %e, "exit cancel send failed");
            }
        }

        let side = if self.risk.is_short {
            Side::Buy
        } else {
            Side::Sell
        };
        let price = if self.risk.is_short {
            ask * (1.0 + CLOSE_CROSS_BUFFER)
        } else {
            bid * (1.0 - CLOSE_CROSS_BUFFER)
        };
        let client_id = next_client_id();
        info!(symbol = %self.symbol, side = %side, price, "closing position");

        self.exit_id = Some(client_id.clone());
        self.active_order_price = price;
        self.waiting_for_close = true;
        self.set_state(BotState::Placing);

        let request = OrderRequest {
            symbol: self.symbol.clone(),
            side,
            qty: self.risk.current_quantity,
            price,
            client_id,
            post_only: false,
        };
        if let Err(e) = self.gateway.place_order(&request) {
            warn!(error = %e, "close send failed");
        }
        self.publisher.remove_order(&self.symbol);
    }

    /// Post the resting profit exit at `entry × (1 ± profit_pct)` and
    /// republish the recovery record keyed by the exit's client ID.
    async fn post_profit_exit(&mut self) {
        let position_side = if self.risk.is_short {
            Side::Sell
        } else {
            Side::Buy
        };
        let exit_side = position_side.flipped();
        let price = if self.risk.is_short {
            self.entry_price * (1.0 - self.risk.profit_pct)
        } else {
            self.entry_price * (1.0 + self.risk.profit_pct)
        };
        let client_id = next_client_id();
        info!(
            symbol = %self.symbol,
            side = %exit_side,
            price,
            "posting profit exit"
        );

        self.exit_id = Some(client_id.clone());
        let request = OrderRequest {
            symbol: self.symbol.clone(),
            side: exit_side,
            qty: self.risk.current_quantity,
            price,
            client_id: client_id.clone(),
            post_only: true,
        };
        if let Err(e) = self.gateway.place_order(&request) {
            warn!(error = %e, "exit send failed");
            self.exit_id = None;
            return;
        }

        // The recovery record carries the position's side and entry
        // price with the exit ID as the reference a restarted engine
        // needs.
        match OrderRecord::new(
            &client_id,
            &self.symbol,
            position_side,
            self.entry_price,
            self.risk.current_quantity,
            Self::now_ns(),
        ) {
            Ok(record) => {
                if let Err(e) = self.publisher.publish_order(&record).await {
                    warn!(error = %e, "order record encode failed");
                }
            }
            Err(e) => warn!(error = %e, "order record too wide for the buffer"),
        }
    }

    /// Recovering tick: double, flip, count the step, re-enter.
    fn apply_martingale_recovery(&mut self) {
        self.risk.apply_loss();
        self.trigger_reverse = false;
        info!(
            symbol = %self.symbol,
            step = self.risk.step,
            qty = self.risk.current_quantity,
            is_short = self.risk.is_short,
            "martingale step, reversing"
        );
        self.set_state(BotState::Idle);
    }

    /// Order-lifecycle callback. Runs on the strategy task, never
    /// concurrently with `tick`.
    pub async fn on_order_update(&mut self, update: &OrderUpdate) {
        if !update.symbol.is_empty() && update.symbol != self.symbol {
            return;
        }
        let is_entry = self.entry_id.as_deref() == Some(update.client_id.as_str());
        let is_exit = self.exit_id.as_deref() == Some(update.client_id.as_str());
        if !is_entry && !is_exit {
            return;
        }
        debug!(
            symbol = %self.symbol,
            client_id = %update.client_id,
            status = %update.status,
            is_entry,
            "order update"
        );

        match update.status {
            OrderStatus::New => {
                if self.state.load() == BotState::Placing {
                    self.set_state(BotState::Working);
                }
            }
            OrderStatus::Filled => {
                if is_entry {
                    self.on_entry_filled().await;
                } else {
                    self.on_exit_filled();
                }
            }
            OrderStatus::Cancelled => {
                if is_entry {
                    info!(symbol = %self.symbol, "entry cancelled, re-evaluating");
                    self.entry_id = None;
                    self.set_state(BotState::Idle);
                } else {
                    info!(symbol = %self.symbol, "exit cancelled, position uncovered");
                    self.exit_id = None;
                    self.waiting_for_close = false;
                    self.set_state(BotState::InPosition);
                }
            }
            OrderStatus::Rejected => {
                if self.state.load() == BotState::Cancelling && is_entry {
                    // The cancel raced a fill and lost: the order is in
                    // fact filled, so pick up the position.
                    warn!(symbol = %self.symbol, "cancel rejected, treating entry as filled");
                    self.on_entry_filled().await;
                } else if is_exit {
                    warn!(symbol = %self.symbol, "exit rejected, position uncovered");
                    self.exit_id = None;
                    self.waiting_for_close = false;
                    self.set_state(BotState::InPosition);
                } else {
                    warn!(symbol = %self.symbol, "entry rejected, resetting");
                    self.entry_id = None;
                    self.set_state(BotState::Idle);
                }
            }
        }
    }

    async fn on_entry_filled(&mut self) {
        info!(
            symbol = %self.symbol,
            entry = self.entry_price,
            qty = self.risk.current_quantity,
            "entry filled, monitoring position"
        );
        self.entry_id = None;
        self.position_filled = true;
        self.position_entry = Instant::now();
        self.set_state(BotState::InPosition);
        self.post_profit_exit().await;
    }

    fn on_exit_filled(&mut self) {
        self.exit_id = None;
        self.position_filled = false;
        self.waiting_for_close = false;
        self.publisher.remove_order(&self.symbol);

        if self.trigger_reverse {
            info!(symbol = %self.symbol, "loss exit filled, entering recovery");
            self.set_state(BotState::Recovering);
        } else if self.hard_reset_pending {
            self.hard_reset_pending = false;
            self.risk.hard_reset();
            self.stats.cumulative_loss = 0.0;
            warn!(symbol = %self.symbol, "max martingale steps, hard reset");
            self.log_statistics();
            self.set_state(BotState::Idle);
        } else {
            self.last_pnl_pct = self.risk.profit_pct;
            self.last_pnl_dollars = pnl_dollars(
                self.risk.profit_pct,
                self.entry_price,
                self.risk.current_quantity,
            );
            self.stats.total_trades += 1;
            self.stats.winning_trades += 1;
            self.stats.total_profit += self.last_pnl_dollars;
            self.stats.cumulative_loss = 0.0;
            self.risk.reset_on_win();
            info!(
                symbol = %self.symbol,
                profit = self.last_pnl_dollars,
                "target hit, profit booked"
            );
            self.log_statistics();
            self.set_state(BotState::Idle);
        }
    }

    pub fn log_statistics(&self) {
        info!(
            symbol = %self.symbol,
            wins = self.stats.winning_trades,
            trades = self.stats.total_trades,
            total_pnl = self.stats.total_profit,
            "statistics"
        );
    }
}

/// Drive the engine: drain pending order updates, tick, sleep. Updates
/// are always handled before the tick on the same task, so callbacks can
/// never race a cycle.
pub async fn run_strategy_loop<G: OrderGateway>(
    mut engine: StrategyEngine<G>,
    mut updates: mpsc::UnboundedReceiver<OrderUpdate>,
    tick_interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!(symbol = %engine.symbol(), "strategy loop started");
    loop {
        while let Ok(update) = updates.try_recv() {
            engine.on_order_update(&update).await;
        }
        engine.tick().await;
        tokio::select! {
            _ = tokio::time::sleep(tick_interval) => {}
            _ = shutdown.recv() => break,
        }
    }
    engine.log_statistics();
    info!(symbol = %engine.symbol(), "strategy loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use byb_common::ipc::IpcPublisherConfig;
    use byb_common::types::PriceLevel;
    use byb_market::depth::DepthBook;
    use byb_market::session::SessionError;
    use parking_lot::Mutex;

    #[derive(Debug, Clone)]
    enum Call {
        Place(OrderRequest),
        Cancel { client_id: String },
    }

    /// Gateway that records every call for assertions.
    #[derive(Default)]
    struct RecordingGateway {
        calls: Mutex<Vec<Call>>,
    }

    impl RecordingGateway {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        fn last_place(&self) -> OrderRequest {
            self.calls()
                .into_iter()
                .rev()
                .find_map(|c| match c {
                    Call::Place(req) => Some(req),
                    _ => None,
                })
                .expect("no order placed")
        }

        fn cancels(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    Call::Cancel { client_id } => Some(client_id),
                    _ => None,
                })
                .collect()
        }
    }

    impl OrderGateway for Arc<RecordingGateway> {
        fn place_order(&self, request: &OrderRequest) -> Result<(), SessionError> {
            self.calls.lock().push(Call::Place(request.clone()));
            Ok(())
        }

        fn cancel_order(&self, _symbol: &str, client_id: &str) -> Result<(), SessionError> {
            self.calls.lock().push(Call::Cancel {
                client_id: client_id.to_string(),
            });
            Ok(())
        }
    }

    struct Fixture {
        engine: StrategyEngine<Arc<RecordingGateway>>,
        gateway: Arc<RecordingGateway>,
        book: Arc<DepthBook>,
        publisher: Arc<IpcPublisher>,
    }

    fn fixture_with(symbol: &str, cfg: EngineConfig) -> Fixture {
        let books = Arc::new(BookRegistry::new());
        let subs = Arc::new(SubscriptionSet::new());
        subs.add(symbol);
        let book = books.get_or_create(symbol);
        // Publisher left uninitialized: the recovery buffer works, log
        // offers are refused, which is fine for engine tests.
        let publisher = Arc::new(IpcPublisher::new(IpcPublisherConfig::default()));
        let gateway = Arc::new(RecordingGateway::default());
        let engine = StrategyEngine::new(
            symbol,
            cfg,
            Arc::clone(&gateway),
            books,
            subs,
            Arc::clone(&publisher),
        );
        Fixture {
            engine,
            gateway,
            book,
            publisher,
        }
    }

    fn fixture(symbol: &str) -> Fixture {
        fixture_with(symbol, EngineConfig::default())
    }

    fn set_book(book: &DepthBook, bid: f64, ask: f64) {
        book.update_bids(&[PriceLevel::new(bid, 1.0)]);
        book.update_asks(&[PriceLevel::new(ask, 1.0)]);
        book.bump_update();
    }

    fn update(client_id: &str, status: OrderStatus, symbol: &str) -> OrderUpdate {
        OrderUpdate {
            client_id: client_id.to_string(),
            status,
            symbol: symbol.to_string(),
        }
    }

    fn backdate(instant: &mut Instant, by: Duration) {
        *instant = Instant::now() - by;
    }

    #[tokio::test]
    async fn test_scenario_happy_long_cycle() {
        let mut f = fixture("BTCUSDT");
        set_book(&f.book, 60000.0, 60005.0);

        // Idle tick: maker entry posted just below the best bid.
        f.engine.tick().await;
        assert_eq!(f.engine.state(), BotState::Placing);
        let entry = f.gateway.last_place();
        assert_eq!(entry.side, Side::Buy);
        assert!(entry.post_only);
        assert!((entry.price - 59999.9).abs() < 1e-6);
        assert_eq!(entry.qty, f.engine.risk.base_quantity);
        assert!(entry.price < 60005.0);
        // Entry record lands in the recovery buffer.
        assert!(f.publisher.has_order("BTCUSDT"));

        // Venue acks, then fills the entry.
        f.engine
            .on_order_update(&update(&entry.client_id, OrderStatus::New, "BTCUSDT"))
            .await;
        assert_eq!(f.engine.state(), BotState::Working);

        f.engine
            .on_order_update(&update(&entry.client_id, OrderStatus::Filled, "BTCUSDT"))
            .await;
        assert_eq!(f.engine.state(), BotState::InPosition);

        // A PostOnly exit rests at entry * (1 + profit_pct).
        let exit = f.gateway.last_place();
        assert_eq!(exit.side, Side::Sell);
        assert!(exit.post_only);
        assert!((exit.price - entry.price * 1.001).abs() < 1e-6);

        // Exit fills: the cycle books a win and resets.
        f.engine
            .on_order_update(&update(&exit.client_id, OrderStatus::Filled, "BTCUSDT"))
            .await;
        assert_eq!(f.engine.state(), BotState::Idle);
        assert_eq!(f.engine.stats().total_trades, 1);
        assert_eq!(f.engine.stats().winning_trades, 1);
        assert_eq!(f.engine.risk().current_quantity, f.engine.risk().base_quantity);
        assert!(!f.publisher.has_order("BTCUSDT"));
    }

    #[tokio::test]
    async fn test_scenario_stop_loss_reversal() {
        let mut f = fixture("BTCUSDT");
        // Long 0.01 @ 60000 with a resting exit.
        f.engine.entry_price = 60000.0;
        f.engine.risk.current_quantity = 0.01;
        f.engine.position_filled = true;
        f.engine.exit_id = Some("EXIT_A".to_string());
        f.engine.set_state(BotState::InPosition);
        backdate(&mut f.engine.position_entry, Duration::from_secs(1));

        // Best bid drops 0.05%: stop fires.
        set_book(&f.book, 59969.9, 59970.5);
        f.engine.tick().await;

        assert_eq!(f.engine.state(), BotState::Placing);
        assert!(f.engine.waiting_for_close);
        assert_eq!(f.gateway.cancels(), vec!["EXIT_A".to_string()]);
        let close = f.gateway.last_place();
        assert_eq!(close.side, Side::Sell);
        assert!(!close.post_only);
        assert!((close.price - 59969.9 * 0.999).abs() < 1e-6);

        // Close fills: Recovering, then the Martingale applies.
        f.engine
            .on_order_update(&update(&close.client_id, OrderStatus::Filled, "BTCUSDT"))
            .await;
        assert_eq!(f.engine.state(), BotState::Recovering);

        f.engine.tick().await;
        assert_eq!(f.engine.state(), BotState::Idle);
        assert!((f.engine.risk().current_quantity - 0.02).abs() < 1e-12);
        assert!(f.engine.risk().is_short);
        assert_eq!(f.engine.risk().step, 1);

        // Next tick enters short above the best ask.
        f.engine.tick().await;
        let reentry = f.gateway.last_place();
        assert_eq!(reentry.side, Side::Sell);
        assert!((reentry.price - (59970.5 + 0.1)).abs() < 1e-6);
        assert!(reentry.price > 59969.9);
    }

    /// Drive one full losing cycle from Idle.
    async fn lose_once(f: &mut Fixture) {
        let entry_price = 60000.0;
        f.engine.entry_price = entry_price;
        f.engine.position_filled = true;
        f.engine.exit_id = Some(next_client_id());
        f.engine.set_state(BotState::InPosition);
        backdate(&mut f.engine.position_entry, Duration::from_secs(1));

        if f.engine.risk.is_short {
            set_book(&f.book, entry_price * 1.0019, entry_price * 1.002);
        } else {
            set_book(&f.book, entry_price * 0.998, entry_price * 0.9981);
        }
        f.engine.tick().await;
        assert_eq!(f.engine.state(), BotState::Placing, "close not sent");

        let close = f.gateway.last_place();
        f.engine
            .on_order_update(&update(&close.client_id, OrderStatus::Filled, "BTCUSDT"))
            .await;
        // Below the cap the fill lands in Recovering and the next tick
        // doubles; at the cap the hard reset already applied on the fill.
        if f.engine.state() == BotState::Recovering {
            f.engine.tick().await;
        }
    }

    #[tokio::test]
    async fn test_scenario_martingale_cap_resets() {
        let cfg = EngineConfig {
            base_quantity: 0.01,
            max_martingale_steps: 2,
            ..EngineConfig::default()
        };
        let mut f = fixture_with("BTCUSDT", cfg);

        lose_once(&mut f).await;
        assert_eq!(f.engine.risk().step, 1);
        assert!((f.engine.risk().current_quantity - 0.02).abs() < 1e-12);

        lose_once(&mut f).await;
        assert_eq!(f.engine.risk().step, 2);
        assert!((f.engine.risk().current_quantity - 0.04).abs() < 1e-12);

        // Third loss breaches the cap: no doubling, hard reset to base.
        lose_once(&mut f).await;
        assert_eq!(f.engine.risk().step, 0);
        assert_eq!(f.engine.risk().current_quantity, 0.01);
        assert_eq!(f.engine.stats().cumulative_loss, 0.0);
        assert_eq!(f.engine.state(), BotState::Idle);
    }

    #[tokio::test]
    async fn test_scenario_chase_after_grace() {
        let mut f = fixture("BTCUSDT");
        set_book(&f.book, 59999.1, 60004.0);
        f.engine.tick().await;
        let entry = f.gateway.last_place();
        assert!((entry.price - 59999.0).abs() < 1e-6);

        f.engine
            .on_order_update(&update(&entry.client_id, OrderStatus::New, "BTCUSDT"))
            .await;
        assert_eq!(f.engine.state(), BotState::Working);

        // Market runs away, but the grace window holds the order.
        set_book(&f.book, 60004.0, 60008.0);
        f.engine.tick().await;
        assert!(f.gateway.cancels().is_empty());
        assert_eq!(f.engine.state(), BotState::Working);

        // After the grace, the drift triggers a cancel.
        backdate(&mut f.engine.state_entry, Duration::from_millis(600));
        f.engine.tick().await;
        assert_eq!(f.engine.state(), BotState::Cancelling);
        assert_eq!(f.gateway.cancels(), vec![entry.client_id.clone()]);

        // Cancel ack returns to Idle; the next tick re-quotes at the new
        // top of book.
        f.engine
            .on_order_update(&update(&entry.client_id, OrderStatus::Cancelled, "BTCUSDT"))
            .await;
        assert_eq!(f.engine.state(), BotState::Idle);
        f.engine.tick().await;
        let requote = f.gateway.last_place();
        assert!((requote.price - 60003.9).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_working_timeout_cancels_unconditionally() {
        let mut f = fixture("BTCUSDT");
        set_book(&f.book, 60000.0, 60005.0);
        f.engine.tick().await;
        let entry = f.gateway.last_place();
        f.engine
            .on_order_update(&update(&entry.client_id, OrderStatus::New, "BTCUSDT"))
            .await;

        // No drift at all, but the 10s limit lapses.
        backdate(&mut f.engine.state_entry, Duration::from_secs(11));
        f.engine.tick().await;
        assert_eq!(f.engine.state(), BotState::Cancelling);
        assert_eq!(f.gateway.cancels().len(), 1);
    }

    #[tokio::test]
    async fn test_scenario_recovery_hydration() {
        let books = Arc::new(BookRegistry::new());
        let subs = Arc::new(SubscriptionSet::new());
        subs.add("SOLUSDT");
        books.get_or_create("SOLUSDT");
        let publisher = Arc::new(IpcPublisher::new(IpcPublisherConfig::default()));
        let record =
            OrderRecord::new("BOT_77", "SOLUSDT", Side::Sell, 150.0, 0.04, 1).unwrap();
        publisher.publish_order(&record).await.unwrap();

        let gateway = Arc::new(RecordingGateway::default());
        let engine = StrategyEngine::new(
            "SOLUSDT",
            EngineConfig::default(),
            Arc::clone(&gateway),
            books,
            subs,
            publisher,
        );

        assert_eq!(engine.state(), BotState::InPosition);
        assert_eq!(engine.entry_price, 150.0);
        assert_eq!(engine.risk().current_quantity, 0.04);
        assert!(engine.risk().is_short);
        assert_eq!(engine.exit_id.as_deref(), Some("BOT_77"));
        assert!(engine.position_filled);
    }

    #[tokio::test]
    async fn test_inactive_record_is_not_hydrated() {
        let publisher = Arc::new(IpcPublisher::new(IpcPublisherConfig::default()));
        let record = OrderRecord::new("BOT_78", "SOLUSDT", Side::Buy, 150.0, 0.04, 1).unwrap();
        publisher.publish_order(&record).await.unwrap();
        publisher.remove_order("SOLUSDT");

        let books = Arc::new(BookRegistry::new());
        let subs = Arc::new(SubscriptionSet::new());
        let gateway = Arc::new(RecordingGateway::default());
        let engine = StrategyEngine::new(
            "SOLUSDT",
            EngineConfig::default(),
            gateway,
            books,
            subs,
            publisher,
        );
        assert_eq!(engine.state(), BotState::Idle);
    }

    #[tokio::test]
    async fn test_rejected_entry_returns_to_idle() {
        let mut f = fixture("BTCUSDT");
        set_book(&f.book, 60000.0, 60005.0);
        f.engine.tick().await;
        let entry = f.gateway.last_place();

        f.engine
            .on_order_update(&update(&entry.client_id, OrderStatus::Rejected, "BTCUSDT"))
            .await;
        assert_eq!(f.engine.state(), BotState::Idle);
        assert!(f.engine.entry_id.is_none());
    }

    #[tokio::test]
    async fn test_cancel_rejected_in_cancelling_picks_up_position() {
        let mut f = fixture("BTCUSDT");
        set_book(&f.book, 60000.0, 60005.0);
        f.engine.tick().await;
        let entry = f.gateway.last_place();
        f.engine
            .on_order_update(&update(&entry.client_id, OrderStatus::New, "BTCUSDT"))
            .await;

        backdate(&mut f.engine.state_entry, Duration::from_secs(11));
        f.engine.tick().await;
        assert_eq!(f.engine.state(), BotState::Cancelling);

        // The cancel lost the race: the venue rejects it because the
        // order already filled.
        f.engine
            .on_order_update(&update(&entry.client_id, OrderStatus::Rejected, "BTCUSDT"))
            .await;
        assert_eq!(f.engine.state(), BotState::InPosition);
        assert!(f.engine.position_filled);
        // A profit exit was posted for the picked-up position.
        let exit = f.gateway.last_place();
        assert_eq!(exit.side, Side::Sell);
        assert!(exit.post_only);
    }

    #[tokio::test]
    async fn test_placing_timeout_resends_cancel_without_transition() {
        let mut f = fixture("BTCUSDT");
        set_book(&f.book, 60000.0, 60005.0);
        f.engine.tick().await;
        assert_eq!(f.engine.state(), BotState::Placing);

        backdate(&mut f.engine.state_entry, Duration::from_secs(6));
        f.engine.tick().await;
        assert_eq!(f.engine.state(), BotState::Placing);
        assert_eq!(f.gateway.cancels().len(), 1);

        // Timer was reset: the next tick does not double-send.
        f.engine.tick().await;
        assert_eq!(f.gateway.cancels().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_exit_is_reposted() {
        let mut f = fixture("BTCUSDT");
        set_book(&f.book, 60000.0, 60005.0);
        f.engine.entry_price = 60000.0;
        f.engine.position_filled = true;
        f.engine.exit_id = Some("EXIT_B".to_string());
        f.engine.set_state(BotState::InPosition);

        f.engine
            .on_order_update(&update("EXIT_B", OrderStatus::Cancelled, "BTCUSDT"))
            .await;
        assert_eq!(f.engine.state(), BotState::InPosition);
        assert!(f.engine.exit_id.is_none());

        backdate(&mut f.engine.position_entry, Duration::from_secs(1));
        f.engine.tick().await;
        let exit = f.gateway.last_place();
        assert_eq!(exit.side, Side::Sell);
        assert!((exit.price - 60000.0 * 1.001).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_crossed_market_pauses_trading() {
        let mut f = fixture("BTCUSDT");
        f.book.update_bids(&[PriceLevel::new(60005.0, 1.0)]);
        f.book.update_asks(&[PriceLevel::new(60000.0, 1.0)]);

        f.engine.tick().await;
        assert_eq!(f.engine.state(), BotState::Idle);
        assert!(f.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_book_pauses_trading() {
        let mut f = fixture("BTCUSDT");
        f.book.update_bids(&[PriceLevel::new(60000.0, 1.0)]);
        // No asks published.
        f.engine.tick().await;
        assert!(f.gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_updates_for_other_symbols_are_ignored() {
        let mut f = fixture("BTCUSDT");
        set_book(&f.book, 60000.0, 60005.0);
        f.engine.tick().await;
        let entry = f.gateway.last_place();

        f.engine
            .on_order_update(&update(&entry.client_id, OrderStatus::Filled, "ETHUSDT"))
            .await;
        assert_eq!(f.engine.state(), BotState::Placing);

        f.engine
            .on_order_update(&update("SOMEONE_ELSE", OrderStatus::Filled, "BTCUSDT"))
            .await;
        assert_eq!(f.engine.state(), BotState::Placing);
    }

    #[tokio::test]
    async fn test_settle_delay_holds_stop_loss() {
        let mut f = fixture("BTCUSDT");
        f.engine.entry_price = 60000.0;
        f.engine.position_filled = true;
        f.engine.exit_id = Some("EXIT_C".to_string());
        f.engine.set_state(BotState::InPosition);
        // Position entered just now: even a breached stop must wait for
        // the settle delay.
        set_book(&f.book, 59000.0, 59001.0);
        f.engine.tick().await;
        assert_eq!(f.engine.state(), BotState::InPosition);
        assert!(f.gateway.calls().is_empty());
    }
}
