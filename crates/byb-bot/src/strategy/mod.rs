//! Strategy engine: a six-state lifecycle per traded symbol.
//!
//! - `state`: the bot state enum held as a single atomic
//! - `risk`: Martingale sizing and PnL math
//! - `engine`: the tick/callback state machine driving the trade session

mod engine;
mod risk;
mod state;

pub use engine::{run_strategy_loop, EngineConfig, EngineStats, StrategyEngine};
pub use risk::{pnl_dollars, pnl_pct, MartingaleParams};
pub use state::{AtomicBotState, BotState};
