//! Configuration for byb-bot.
//!
//! Loaded from a TOML file, then layered with environment variables
//! (credentials) and CLI overrides. Unset API keys disable authenticated
//! operations; market data continues without them.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::trade::Credentials;

/// Environment variable holding the API key.
pub const ENV_API_KEY: &str = "BYBIT_API_KEY";
/// Environment variable holding the API secret.
pub const ENV_API_SECRET: &str = "BYBIT_API_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    pub market: MarketConfig,
    pub trading: TradingConfig,
    pub ipc: IpcConfig,
    pub strategy: StrategyConfig,

    /// Venue credentials; populated from the environment, never from the
    /// config file.
    #[serde(skip)]
    pub credentials: Option<Credentials>,
}

/// Public market-data session settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    /// Public linear-perpetuals stream URL.
    pub ws_url: String,
    /// Symbols to subscribe on startup.
    pub symbols: Vec<String>,
}

/// Private trade session and engine enablement.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Master switch; `false` runs market data and IPC only.
    pub enabled: bool,
    /// Private order-entry stream URL.
    pub ws_url: String,
    /// Symbol the strategy engine trades.
    pub symbol: String,
    /// Venue receive window for order requests (milliseconds).
    pub recv_window_ms: u64,
}

/// Shared-memory IPC settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    pub enabled: bool,
    /// Channel URI; each stream maps to `<path>-<stream_id>.log`.
    pub channel: String,
    /// Stream carrying order-book snapshots.
    pub orderbook_stream_id: i32,
    /// Stream carrying trade signals and order records.
    pub signal_stream_id: i32,
    /// Ring capacity per stream, in bytes.
    pub capacity_bytes: usize,
}

/// Strategy parameters. Percentages are fractions (0.001 = 0.1%).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub base_quantity: f64,
    pub max_martingale_steps: u32,
    pub profit_target_pct: f64,
    pub stop_loss_pct: f64,
    /// Offset from the same-side best when posting a maker entry.
    pub entry_offset: f64,
    /// Top-of-book drift that triggers a chase re-quote.
    pub chase_threshold: f64,
    /// Grace before a working order may be chased (milliseconds).
    pub chase_grace_ms: u64,
    /// Unconditional cancel for a working order (milliseconds).
    pub working_timeout_ms: u64,
    /// Cancel timer in Placing/Cancelling (milliseconds).
    pub order_timeout_ms: u64,
    /// Settle delay before managing a fresh position (milliseconds).
    pub settle_delay_ms: u64,
    /// Sleep between strategy cycles (microseconds).
    pub tick_interval_us: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            market: MarketConfig::default(),
            trading: TradingConfig::default(),
            ipc: IpcConfig::default(),
            strategy: StrategyConfig::default(),
            credentials: None,
        }
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://stream.bybit.com/v5/public/linear".to_string(),
            symbols: vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string(),
                "SOLUSDT".to_string(),
            ],
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ws_url: "wss://stream.bybit.com/v5/trade".to_string(),
            symbol: "BTCUSDT".to_string(),
            recv_window_ms: 5000,
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: "ipc:///dev/shm/byb".to_string(),
            orderbook_stream_id: 1001,
            signal_stream_id: 1002,
            capacity_bytes: 1 << 20,
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            base_quantity: 0.001,
            max_martingale_steps: 6,
            profit_target_pct: 0.001,
            stop_loss_pct: 0.0005,
            entry_offset: 0.1,
            chase_threshold: 0.05,
            chase_grace_ms: 500,
            working_timeout_ms: 10_000,
            order_timeout_ms: 5_000,
            settle_delay_ms: 500,
            tick_interval_us: 500,
        }
    }
}

impl BotConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }

    /// Pull credentials from the environment. Missing keys leave
    /// authenticated operations disabled.
    pub fn apply_env_overrides(&mut self) {
        let key = std::env::var(ENV_API_KEY).ok().filter(|k| !k.is_empty());
        let secret = std::env::var(ENV_API_SECRET).ok().filter(|s| !s.is_empty());
        if let (Some(api_key), Some(api_secret)) = (key, secret) {
            self.credentials = Some(Credentials {
                api_key,
                api_secret,
            });
        }
    }

    /// CLI overrides for the traded symbol and subscriptions.
    pub fn apply_cli_overrides(&mut self, symbols: Option<Vec<String>>, trade_symbol: Option<String>) {
        if let Some(symbols) = symbols {
            if !symbols.is_empty() {
                self.market.symbols = symbols;
            }
        }
        if let Some(symbol) = trade_symbol {
            self.trading.symbol = symbol;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.market.symbols.is_empty() {
            return Err(ConfigError::Invalid("no market symbols configured".into()));
        }
        let s = &self.strategy;
        if s.base_quantity <= 0.0 {
            return Err(ConfigError::Invalid("base_quantity must be positive".into()));
        }
        if s.profit_target_pct <= 0.0 || s.stop_loss_pct <= 0.0 {
            return Err(ConfigError::Invalid(
                "profit_target_pct and stop_loss_pct must be positive".into(),
            ));
        }
        if self.trading.enabled && !self.market.symbols.contains(&self.trading.symbol) {
            return Err(ConfigError::Invalid(format!(
                "trading symbol {} is not among market symbols",
                self.trading.symbol
            )));
        }
        Ok(())
    }
}
