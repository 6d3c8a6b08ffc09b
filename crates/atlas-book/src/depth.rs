//! Market-data snapshots (L1 and L2).

use crate::units::{Price, Size};

/// Aggregate view of one price level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelSnapshot {
    /// Level price.
    pub price: Price,
    /// Total resting size at the level.
    pub total_size: Size,
}

/// Best bid and offer. `None` when a side is empty.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct L1Data {
    /// Highest bid level.
    pub best_bid: Option<LevelSnapshot>,
    /// Lowest offer level.
    pub best_offer: Option<LevelSnapshot>,
}

/// Full-depth snapshot of both sides.
///
/// Bids are ordered by decreasing price, offers by increasing price, so
/// index 0 of each vector is that side's best level.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct L2Data {
    /// All non-empty bid levels, best first.
    pub bids: Vec<LevelSnapshot>,
    /// All non-empty offer levels, best first.
    pub offers: Vec<LevelSnapshot>,
}
