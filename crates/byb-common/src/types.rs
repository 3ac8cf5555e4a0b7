//! Core domain types shared across the engine.
//!
//! Prices and quantities are `f64` end to end: the venue feed delivers
//! decimal strings that are parsed once at the edge, and the wire codec
//! and shared-memory record layout both mandate IEEE-754 doubles.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The venue's wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "Buy",
            Side::Sell => "Sell",
        }
    }

    /// Opposite side (used when closing a position).
    pub fn flipped(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// One-byte action code for the signal encoding (0 = buy, 1 = sell).
    pub fn wire_code(&self) -> u8 {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }

    pub fn from_wire_code(code: u8) -> Option<Side> {
        match code {
            0 => Some(Side::Buy),
            1 => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::str::FromStr for Side {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Buy" => Ok(Side::Buy),
            "Sell" => Ok(Side::Sell),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order lifecycle status as reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    New,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "New",
            OrderStatus::Filled => "Filled",
            OrderStatus::Cancelled => "Cancelled",
            OrderStatus::Rejected => "Rejected",
        }
    }

    /// Parse a venue status string. Unknown statuses map to `None` so the
    /// caller can skip them instead of guessing.
    pub fn parse(s: &str) -> Option<OrderStatus> {
        match s {
            "New" => Some(OrderStatus::New),
            "Filled" => Some(OrderStatus::Filled),
            "Cancelled" => Some(OrderStatus::Cancelled),
            "Rejected" => Some(OrderStatus::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One level of the book: a (price, quantity) pair.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PriceLevel {
    pub price: f64,
    pub qty: f64,
}

impl PriceLevel {
    pub fn new(price: f64, qty: f64) -> Self {
        Self { price, qty }
    }
}

/// An order-lifecycle update delivered from the trade session to the
/// strategy engine: `(client_id, status, symbol)`.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub client_id: String,
    pub status: OrderStatus,
    pub symbol: String,
}

/// Maximum client order ID length in an [`OrderRecord`].
pub const ORDER_ID_CAP: usize = 64;
/// Maximum symbol length in an [`OrderRecord`].
pub const SYMBOL_CAP: usize = 16;
/// Maximum side-string length in an [`OrderRecord`].
pub const SIDE_CAP: usize = 8;

/// Errors building an [`OrderRecord`].
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("{field} is {len} bytes, exceeds the {cap}-byte record field")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        cap: usize,
    },
}

/// Transport-side record of an active order.
///
/// Strings are fixed-width NUL-padded byte arrays, not heap strings: the
/// record layout must be shareable with IPC peers that cannot follow
/// pointers. The strategy keeps its own richer view of the same order;
/// this struct exists only for the recovery buffer and the wire.
#[derive(Debug, Clone, Copy)]
pub struct OrderRecord {
    order_id: [u8; ORDER_ID_CAP],
    symbol: [u8; SYMBOL_CAP],
    side: [u8; SIDE_CAP],
    pub price: f64,
    pub quantity: f64,
    pub timestamp_ns: u64,
    pub is_active: bool,
}

impl OrderRecord {
    pub fn new(
        order_id: &str,
        symbol: &str,
        side: Side,
        price: f64,
        quantity: f64,
        timestamp_ns: u64,
    ) -> Result<Self, RecordError> {
        Ok(Self {
            order_id: pack("order_id", order_id)?,
            symbol: pack("symbol", symbol)?,
            side: pack("side", side.as_str())?,
            price,
            quantity,
            timestamp_ns,
            is_active: true,
        })
    }

    pub fn order_id(&self) -> &str {
        unpack(&self.order_id)
    }

    pub fn symbol(&self) -> &str {
        unpack(&self.symbol)
    }

    pub fn side_str(&self) -> &str {
        unpack(&self.side)
    }

    pub fn side(&self) -> Option<Side> {
        self.side_str().parse().ok()
    }
}

fn pack<const N: usize>(field: &'static str, value: &str) -> Result<[u8; N], RecordError> {
    let bytes = value.as_bytes();
    if bytes.len() > N {
        return Err(RecordError::FieldTooLong {
            field,
            len: bytes.len(),
            cap: N,
        });
    }
    let mut out = [0u8; N];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

fn unpack(bytes: &[u8]) -> &str {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    // Only ever packed from &str, so this cannot fail.
    std::str::from_utf8(&bytes[..end]).unwrap_or("")
}
