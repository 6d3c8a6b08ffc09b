//! # Atlas Book
//!
//! Price-time priority limit order book for a single instrument.
//!
//! ## Design
//! - Dense price-indexed level array, O(1) level lookup
//! - Non-empty levels threaded into per-side doubly linked chains
//! - FIFO queues within each level (time priority)
//! - Integer prices and sizes; the only float is the reported average fill price

pub mod book;
pub mod depth;
pub mod level;
pub mod order;
pub mod units;

pub use book::{
    BookConfig, ConfigError, FillReport, OrderBook, OrderStatus, RejectReason, Submit,
    MAX_FILLS_PER_ORDER,
};
pub use depth::{L1Data, L2Data, LevelSnapshot};
pub use level::Level;
pub use order::{Fill, LimitOrder, OrderId, OrderState, Side};
pub use units::{Notional, Price, Size};
