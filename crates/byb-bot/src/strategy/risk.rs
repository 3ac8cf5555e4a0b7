//! Martingale sizing and PnL math.
//!
//! On a loss the stake doubles and the direction flips, intending to
//! recover prior losses on a single win. The step counter is bounded:
//! at the cap the next transition resets to base size instead of
//! doubling, so exposure growth cannot run unbounded.

/// Martingale risk parameters and current sizing state.
#[derive(Debug, Clone)]
pub struct MartingaleParams {
    /// Stake after a win or hard reset.
    pub base_quantity: f64,
    /// Stake for the next entry.
    pub current_quantity: f64,
    /// Consecutive losses absorbed so far.
    pub step: u32,
    /// Doubling stops once `step` reaches this bound.
    pub max_step: u32,
    /// Profit target as a fraction of entry price.
    pub profit_pct: f64,
    /// Stop-loss magnitude as a fraction of entry price.
    pub stop_pct: f64,
    /// Current direction; flipped on each reversal.
    pub is_short: bool,
}

impl MartingaleParams {
    pub fn new(base_quantity: f64, max_step: u32, profit_pct: f64, stop_pct: f64) -> Self {
        Self {
            base_quantity,
            current_quantity: base_quantity,
            step: 0,
            max_step,
            profit_pct,
            stop_pct,
            is_short: false,
        }
    }

    /// Whether another doubling is allowed before the cap.
    pub fn can_double(&self) -> bool {
        self.step < self.max_step
    }

    /// Absorb a loss: double the stake, flip direction, count the step.
    pub fn apply_loss(&mut self) {
        self.step += 1;
        self.current_quantity *= 2.0;
        self.is_short = !self.is_short;
    }

    /// A win clears the progression.
    pub fn reset_on_win(&mut self) {
        self.step = 0;
        self.current_quantity = self.base_quantity;
    }

    /// Cap breached: back to base size without doubling.
    pub fn hard_reset(&mut self) {
        self.step = 0;
        self.current_quantity = self.base_quantity;
    }
}

/// Signed PnL fraction for a position entered at `entry`, marked at
/// `current`. Long positions gain as price rises; shorts as it falls.
pub fn pnl_pct(entry: f64, current: f64, is_short: bool) -> f64 {
    if entry <= 0.0 {
        return 0.0;
    }
    if is_short {
        (entry - current) / entry
    } else {
        (current - entry) / entry
    }
}

/// Dollar PnL for a given fraction, entry price, and quantity.
pub fn pnl_dollars(pct: f64, entry: f64, quantity: f64) -> f64 {
    pct * entry * quantity
}
