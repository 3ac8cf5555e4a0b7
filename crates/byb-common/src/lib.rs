//! Shared foundation for the byb trading engine.
//!
//! This crate is the leaf dependency of the workspace. It holds what both
//! the market-data side and the trading side need to agree on:
//!
//! - `types`: order sides, statuses, price levels, and the fixed-width
//!   order record shared with IPC peers
//! - `codec`: the compact little-endian wire encoding for snapshots,
//!   signals, and order records
//! - `ipc`: the single-writer shared-memory log and the publisher that
//!   offers encoded payloads onto it

pub mod codec;
pub mod ipc;
pub mod types;

pub use codec::{
    decode, CodecError, DecodedMessage, Encoder, MessageHeader, OrderMessage, SignalMessage,
    SnapshotMessage, SCHEMA_ID, SCHEMA_VERSION, TEMPLATE_ORDER, TEMPLATE_ORDERBOOK_SNAPSHOT,
    TEMPLATE_TRADE_SIGNAL,
};
pub use ipc::{IpcError, IpcPublisher, IpcPublisherConfig, Offer, SharedLog};
pub use types::{OrderRecord, OrderStatus, OrderUpdate, PriceLevel, RecordError, Side};
