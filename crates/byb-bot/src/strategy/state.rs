//! Bot lifecycle state, held as a single atomic with release-store /
//! acquire-load semantics so monitoring threads can observe it without
//! locking.

use std::sync::atomic::{AtomicU8, Ordering};

/// The six states of the trading lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BotState {
    Idle = 0,
    Placing = 1,
    Working = 2,
    InPosition = 3,
    Cancelling = 4,
    Recovering = 5,
}

impl BotState {
    fn from_u8(value: u8) -> BotState {
        match value {
            1 => BotState::Placing,
            2 => BotState::Working,
            3 => BotState::InPosition,
            4 => BotState::Cancelling,
            5 => BotState::Recovering,
            _ => BotState::Idle,
        }
    }
}

impl std::fmt::Display for BotState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BotState::Idle => "Idle",
            BotState::Placing => "Placing",
            BotState::Working => "Working",
            BotState::InPosition => "InPosition",
            BotState::Cancelling => "Cancelling",
            BotState::Recovering => "Recovering",
        };
        f.write_str(name)
    }
}

/// Atomic holder for [`BotState`].
#[derive(Debug)]
pub struct AtomicBotState(AtomicU8);

impl AtomicBotState {
    pub fn new(state: BotState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> BotState {
        BotState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: BotState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

impl Default for AtomicBotState {
    fn default() -> Self {
        Self::new(BotState::Idle)
    }
}
