//! Market-data side of the byb trading engine.
//!
//! - `depth`: lock-free top-of-book depth store, single writer per side,
//!   any number of readers
//! - `registry`: symbol → depth book mapping and the subscription set
//! - `session`: one duplex WebSocket session shared by market and trade
//! - `feed`: the public market session — subscribe, parse depth diffs,
//!   apply to the books, publish snapshots over IPC
//! - `wire`: serde types for the venue's public stream

pub mod depth;
pub mod feed;
pub mod registry;
pub mod session;
pub mod wire;

pub use depth::{DepthBook, MAX_DEPTH_LEVELS};
pub use feed::{FeedStats, MarketFeedHandler, MarketSession};
pub use registry::{BookRegistry, SubscriptionSet};
pub use session::{SessionError, SessionHandler, SessionSender, WireSession};
