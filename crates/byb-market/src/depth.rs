//! Lock-free top-of-book depth store.
//!
//! Fixed-capacity bid/ask ladders with a single feed-parser writer per
//! side and any number of reader threads. Levels are stored as f64 bit
//! patterns in atomics; the per-side `count` store with release ordering
//! is the publication point, and readers acquire it before touching the
//! ladder. The feed delivers already-sorted top-K replacements, so no
//! ordering is enforced within the arrays.
//!
//! Nothing here allocates on the write path and no operation can fail.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use byb_common::types::PriceLevel;

/// Ladder capacity per side.
pub const MAX_DEPTH_LEVELS: usize = 10;

#[derive(Debug, Default)]
struct AtomicLevel {
    price_bits: AtomicU64,
    qty_bits: AtomicU64,
}

impl AtomicLevel {
    fn store(&self, level: PriceLevel) {
        self.price_bits
            .store(level.price.to_bits(), Ordering::Relaxed);
        self.qty_bits.store(level.qty.to_bits(), Ordering::Relaxed);
    }

    fn load(&self) -> PriceLevel {
        PriceLevel {
            price: f64::from_bits(self.price_bits.load(Ordering::Relaxed)),
            qty: f64::from_bits(self.qty_bits.load(Ordering::Relaxed)),
        }
    }
}

/// Per-symbol depth book.
#[derive(Debug)]
pub struct DepthBook {
    bids: [AtomicLevel; MAX_DEPTH_LEVELS],
    asks: [AtomicLevel; MAX_DEPTH_LEVELS],
    bid_count: AtomicUsize,
    ask_count: AtomicUsize,
    update_id: AtomicU64,
}

impl Default for DepthBook {
    fn default() -> Self {
        Self::new()
    }
}

impl DepthBook {
    pub fn new() -> Self {
        Self {
            bids: std::array::from_fn(|_| AtomicLevel::default()),
            asks: std::array::from_fn(|_| AtomicLevel::default()),
            bid_count: AtomicUsize::new(0),
            ask_count: AtomicUsize::new(0),
            update_id: AtomicU64::new(0),
        }
    }

    /// Replace the bid ladder with at most [`MAX_DEPTH_LEVELS`] levels.
    /// The count store with release ordering publishes the new data.
    pub fn update_bids(&self, levels: &[PriceLevel]) {
        let count = levels.len().min(MAX_DEPTH_LEVELS);
        for (slot, level) in self.bids.iter().zip(levels.iter().take(count)) {
            slot.store(*level);
        }
        self.bid_count.store(count, Ordering::Release);
    }

    /// Replace the ask ladder; see [`DepthBook::update_bids`].
    pub fn update_asks(&self, levels: &[PriceLevel]) {
        let count = levels.len().min(MAX_DEPTH_LEVELS);
        for (slot, level) in self.asks.iter().zip(levels.iter().take(count)) {
            slot.store(*level);
        }
        self.ask_count.store(count, Ordering::Release);
    }

    /// Best bid as `(price, qty)`, or `None` when the side is empty or the
    /// top level is non-positive.
    pub fn best_bid(&self) -> Option<(f64, f64)> {
        if self.bid_count.load(Ordering::Acquire) == 0 {
            return None;
        }
        let level = self.bids[0].load();
        (level.price > 0.0 && level.qty > 0.0).then_some((level.price, level.qty))
    }

    /// Best ask as `(price, qty)`; same emptiness rules as `best_bid`.
    pub fn best_ask(&self) -> Option<(f64, f64)> {
        if self.ask_count.load(Ordering::Acquire) == 0 {
            return None;
        }
        let level = self.asks[0].load();
        (level.price > 0.0 && level.qty > 0.0).then_some((level.price, level.qty))
    }

    /// Midpoint of the best bid and ask, only while a strictly positive
    /// spread exists.
    pub fn fair_price(&self) -> Option<f64> {
        let (bid, _) = self.best_bid()?;
        let (ask, _) = self.best_ask()?;
        (bid < ask).then_some((bid + ask) / 2.0)
    }

    /// Copy up to `max_levels` bid levels for slow-path consumers.
    pub fn snapshot_bids(&self, max_levels: usize) -> Vec<PriceLevel> {
        let count = self.bid_count.load(Ordering::Acquire).min(max_levels);
        self.bids[..count].iter().map(AtomicLevel::load).collect()
    }

    /// Copy up to `max_levels` ask levels for slow-path consumers.
    pub fn snapshot_asks(&self, max_levels: usize) -> Vec<PriceLevel> {
        let count = self.ask_count.load(Ordering::Acquire).min(max_levels);
        self.asks[..count].iter().map(AtomicLevel::load).collect()
    }

    /// Bump the monotone update counter after a mutation is applied.
    pub fn bump_update(&self) {
        self.update_id.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value of the update counter, for staleness detection.
    pub fn update_count(&self) -> u64 {
        self.update_id.load(Ordering::Relaxed)
    }
}
