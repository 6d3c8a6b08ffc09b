//! The order book.
//!
//! Levels live in a dense array indexed by `price / increment`, so level
//! lookup on order entry is O(1). Non-empty levels on each side are threaded
//! into a doubly linked chain through that array, which makes the crossing
//! walk and the L2 walk O(k) in the number of populated levels with no
//! scanning over empty prices.

use core::fmt;

use ahash::AHashMap;
use arrayvec::ArrayVec;

use crate::depth::{L1Data, L2Data, LevelSnapshot};
use crate::level::Level;
use crate::order::{Fill, LimitOrder, OrderId, OrderState, Side};
use crate::units::{Notional, Price, Size};

/// Maximum fills reported per submission; further executions still occur but
/// are not individually reported.
pub const MAX_FILLS_PER_ORDER: usize = 64;

/// Bounded execution report produced while an incoming order crosses.
pub type FillReport = ArrayVec<Fill, MAX_FILLS_PER_ORDER>;

/// Why an operation was rejected. Rejections never mutate the book.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    /// Price above `max_price`.
    PriceOutOfRange,
    /// Price not on the configured increment grid.
    PriceOffIncrement,
    /// Zero size.
    InvalidSize,
    /// Amend target size does not exceed what has already filled.
    SizeBelowFilled,
    /// No order with this id was ever accepted.
    UnknownOrder,
    /// The order exists but has fully filled.
    OrderDone,
}

/// Outcome of a successful submission.
#[derive(Clone, Debug, PartialEq)]
pub enum Submit {
    /// Fully executed on entry; nothing rests.
    Filled {
        order_id: OrderId,
        fills: FillReport,
    },
    /// Partially executed; the remainder rests at the limit price.
    Partial {
        order_id: OrderId,
        resting: Size,
        fills: FillReport,
    },
    /// No executions; the whole order rests.
    Resting { order_id: OrderId },
}

impl Submit {
    /// Id assigned to the submitted order.
    #[inline]
    pub fn order_id(&self) -> OrderId {
        match *self {
            Submit::Filled { order_id, .. }
            | Submit::Partial { order_id, .. }
            | Submit::Resting { order_id } => order_id,
        }
    }
}

/// Lifecycle state of an order id.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OrderStatus {
    /// Resting with possible partial fills.
    Active(OrderState),
    /// Fully filled; final state retained.
    Done(OrderState),
    /// Never seen, or cancelled.
    Unknown,
}

/// Price-grid configuration for a book.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BookConfig {
    /// Highest representable price.
    pub max_price: Price,
    /// Spacing of the price grid.
    pub increment: Price,
}

/// Returned when a configuration cannot describe a valid price grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// `increment` is zero.
    ZeroIncrement,
    /// `max_price` is not a multiple of `increment`.
    UnalignedMaxPrice,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroIncrement => f.write_str("increment must be positive"),
            ConfigError::UnalignedMaxPrice => f.write_str("max_price must be divisible by increment"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// A price-time priority limit order book for a single instrument.
pub struct OrderBook {
    max_price: u64,
    increment: u64,
    /// Dense level array; slot `i` is price `i * increment`.
    levels: Box<[Level]>,
    /// Lowest non-empty bid level.
    first_bid: Option<u32>,
    /// Highest non-empty bid level (best bid).
    last_bid: Option<u32>,
    /// Highest non-empty offer level.
    first_offer: Option<u32>,
    /// Lowest non-empty offer level (best offer).
    last_offer: Option<u32>,
    active: AHashMap<OrderId, LimitOrder>,
    /// Final state of fully filled orders. Cancelled orders are not kept.
    done: AHashMap<OrderId, OrderState>,
    next_order_id: u64,
}

impl OrderBook {
    /// Create a book from a validated configuration.
    pub fn with_config(config: BookConfig) -> Result<Self, ConfigError> {
        let BookConfig { max_price, increment } = config;
        if increment.is_zero() {
            return Err(ConfigError::ZeroIncrement);
        }
        if max_price.as_raw() % increment.as_raw() != 0 {
            return Err(ConfigError::UnalignedMaxPrice);
        }

        let slots = (max_price.as_raw() / increment.as_raw() + 1) as usize;
        let mut levels = Vec::with_capacity(slots);
        levels.resize_with(slots, Level::default);

        Ok(Self {
            max_price: max_price.as_raw(),
            increment: increment.as_raw(),
            levels: levels.into_boxed_slice(),
            first_bid: None,
            last_bid: None,
            first_offer: None,
            last_offer: None,
            active: AHashMap::new(),
            done: AHashMap::new(),
            next_order_id: 1,
        })
    }

    /// Create a book covering prices `0..=max_price` on the given increment.
    ///
    /// # Panics
    /// Panics if `increment` is zero or does not divide `max_price`; use
    /// [`OrderBook::with_config`] to handle those cases as errors.
    pub fn new(max_price: Price, increment: Price) -> Self {
        match Self::with_config(BookConfig { max_price, increment }) {
            Ok(book) => book,
            Err(error) => panic!("{error}"),
        }
    }

    #[inline(always)]
    fn price_to_idx(&self, price: Price) -> u32 {
        (price.as_raw() / self.increment) as u32
    }

    #[inline(always)]
    fn idx_to_price(&self, idx: u32) -> Price {
        Price(idx as u64 * self.increment)
    }

    /// A populated level at or below the best bid belongs to the bid side;
    /// bids and offers never cross, so the comparison is unambiguous. Only
    /// valid while the level is still linked.
    #[inline]
    fn is_bid_level(&self, idx: u32) -> bool {
        self.last_bid.is_some_and(|lb| idx <= lb)
    }

    fn validate(&self, price: Price, size: Size) -> Option<RejectReason> {
        if price.as_raw() > self.max_price {
            return Some(RejectReason::PriceOutOfRange);
        }
        if price.as_raw() % self.increment != 0 {
            return Some(RejectReason::PriceOffIncrement);
        }
        if size.is_zero() {
            return Some(RejectReason::InvalidSize);
        }
        None
    }

    /// Submit a limit order.
    ///
    /// The order first crosses against the opposite side from its best level
    /// inward while prices remain acceptable, filling FIFO within each level.
    /// Any remainder rests at `price`; a fully executed order goes straight
    /// to the done map and nothing rests.
    pub fn add_order(&mut self, price: Price, size: Size, side: Side) -> Result<Submit, RejectReason> {
        if let Some(reason) = self.validate(price, size) {
            return Err(reason);
        }

        let order_id = OrderId(self.next_order_id);
        self.next_order_id += 1;

        let new_idx = self.price_to_idx(price);
        let mut remaining = size;
        let mut filled_value: Notional = 0;
        let mut fills = FillReport::new();

        match side {
            Side::Bid => {
                while let Some(idx) = self.last_offer {
                    if idx > new_idx || remaining.is_zero() {
                        break;
                    }
                    remaining = self.fill_level(idx, order_id, remaining, &mut filled_value, &mut fills);
                    if self.levels[idx as usize].is_empty() {
                        self.retire_best(Side::Offer, idx);
                    }
                }
            }
            Side::Offer => {
                while let Some(idx) = self.last_bid {
                    if idx < new_idx || remaining.is_zero() {
                        break;
                    }
                    remaining = self.fill_level(idx, order_id, remaining, &mut filled_value, &mut fills);
                    if self.levels[idx as usize].is_empty() {
                        self.retire_best(Side::Bid, idx);
                    }
                }
            }
        }

        if remaining.is_zero() {
            self.done.insert(order_id, OrderState::new(size, filled_value));
            #[cfg(debug_assertions)]
            self.check_invariants();
            return Ok(Submit::Filled { order_id, fills });
        }

        if self.levels[new_idx as usize].is_empty() {
            self.link_level(new_idx, side);
        }
        self.levels[new_idx as usize].push_back(order_id, remaining);
        self.active
            .insert(order_id, LimitOrder::new(price, size, remaining, filled_value));

        #[cfg(debug_assertions)]
        self.check_invariants();

        if fills.is_empty() {
            Ok(Submit::Resting { order_id })
        } else {
            Ok(Submit::Partial {
                order_id,
                resting: remaining,
                fills,
            })
        }
    }

    /// Fill FIFO at one level until the level or the incoming order is
    /// exhausted. Returns the incoming order's unfilled remainder.
    fn fill_level(
        &mut self,
        idx: u32,
        taker: OrderId,
        mut incoming: Size,
        taker_value: &mut Notional,
        fills: &mut FillReport,
    ) -> Size {
        let price = self.idx_to_price(idx);

        while !incoming.is_zero() {
            let maker_id = match self.levels[idx as usize].queue.front() {
                Some(&id) => id,
                None => break,
            };
            let maker = self
                .active
                .get_mut(&maker_id)
                .expect("queued order present in active map");

            let qty = incoming.min(maker.remaining_size);
            let notional = qty.as_raw() as Notional * price.as_raw() as Notional;

            incoming -= qty;
            maker.remaining_size -= qty;
            maker.filled_value += notional;
            *taker_value += notional;
            self.levels[idx as usize].total_size -= qty;

            if !fills.is_full() {
                fills.push(Fill {
                    maker: maker_id,
                    taker,
                    price,
                    quantity: qty,
                });
            }

            if maker.remaining_size.is_zero() {
                let state = maker.state();
                self.active.remove(&maker_id);
                self.done.insert(maker_id, state);
                self.levels[idx as usize].queue.pop_front();
            }
        }

        incoming
    }

    /// Unlink a best level that the crossing walk emptied and advance the
    /// side's endpoints to the next-worse level.
    fn retire_best(&mut self, side: Side, idx: u32) {
        let prev = self.levels[idx as usize].prev;
        self.levels[idx as usize].clear_links();
        if let Some(p) = prev {
            self.levels[p as usize].next = None;
        }
        match side {
            Side::Bid => {
                self.last_bid = prev;
                if prev.is_none() {
                    self.first_bid = None;
                }
            }
            Side::Offer => {
                self.last_offer = prev;
                if prev.is_none() {
                    self.first_offer = None;
                }
            }
        }
    }

    /// Splice a freshly populated level into its side's chain by price order.
    fn link_level(&mut self, new_idx: u32, side: Side) {
        match side {
            Side::Bid => {
                let Some(last) = self.last_bid else {
                    self.first_bid = Some(new_idx);
                    self.last_bid = Some(new_idx);
                    return;
                };
                let first = self.first_bid.expect("bid endpoints set together");

                if new_idx > last {
                    self.levels[new_idx as usize].prev = Some(last);
                    self.levels[last as usize].next = Some(new_idx);
                    self.last_bid = Some(new_idx);
                } else if new_idx < first {
                    self.levels[new_idx as usize].next = Some(first);
                    self.levels[first as usize].prev = Some(new_idx);
                    self.first_bid = Some(new_idx);
                } else {
                    // interior: walk worse-ward from the best until the
                    // first level below the new one, splice after it
                    let mut curr = last;
                    while curr > new_idx {
                        curr = self.levels[curr as usize].prev.expect("bid chain reaches first_bid");
                    }
                    let next = self.levels[curr as usize].next.expect("interior bid has a next");
                    self.levels[new_idx as usize].next = Some(next);
                    self.levels[new_idx as usize].prev = Some(curr);
                    self.levels[curr as usize].next = Some(new_idx);
                    self.levels[next as usize].prev = Some(new_idx);
                }
            }
            Side::Offer => {
                let Some(last) = self.last_offer else {
                    self.first_offer = Some(new_idx);
                    self.last_offer = Some(new_idx);
                    return;
                };
                let first = self.first_offer.expect("offer endpoints set together");

                if new_idx < last {
                    self.levels[new_idx as usize].prev = Some(last);
                    self.levels[last as usize].next = Some(new_idx);
                    self.last_offer = Some(new_idx);
                } else if new_idx > first {
                    self.levels[new_idx as usize].next = Some(first);
                    self.levels[first as usize].prev = Some(new_idx);
                    self.first_offer = Some(new_idx);
                } else {
                    let mut curr = last;
                    while curr < new_idx {
                        curr = self.levels[curr as usize].prev.expect("offer chain reaches first_offer");
                    }
                    let next = self.levels[curr as usize].next.expect("interior offer has a next");
                    self.levels[new_idx as usize].next = Some(next);
                    self.levels[new_idx as usize].prev = Some(curr);
                    self.levels[curr as usize].next = Some(new_idx);
                    self.levels[next as usize].prev = Some(new_idx);
                }
            }
        }
    }

    /// Unlink an emptied level anywhere in its side's chain.
    fn unlink_level(&mut self, idx: u32) {
        let is_bid = self.is_bid_level(idx);
        let (prev, next) = {
            let level = &self.levels[idx as usize];
            (level.prev, level.next)
        };
        self.levels[idx as usize].clear_links();

        if let Some(n) = next {
            self.levels[n as usize].prev = prev;
        }
        if let Some(p) = prev {
            self.levels[p as usize].next = next;
        }

        if is_bid {
            if next.is_none() {
                self.last_bid = prev;
            }
            if prev.is_none() {
                self.first_bid = next;
            }
        } else {
            if next.is_none() {
                self.last_offer = prev;
            }
            if prev.is_none() {
                self.first_offer = next;
            }
        }
    }

    /// Query an order's fill state without mutating it.
    pub fn order_status(&self, id: OrderId) -> OrderStatus {
        if let Some(order) = self.active.get(&id) {
            return OrderStatus::Active(order.state());
        }
        if let Some(&state) = self.done.get(&id) {
            return OrderStatus::Done(state);
        }
        OrderStatus::Unknown
    }

    fn reject_inactive(&self, id: OrderId) -> RejectReason {
        if self.done.contains_key(&id) {
            RejectReason::OrderDone
        } else {
            RejectReason::UnknownOrder
        }
    }

    /// Cancel the unfilled remainder of an active order.
    ///
    /// Returns the order's state immediately before cancellation. Cancelled
    /// orders do not enter the done map; their id becomes unknown.
    pub fn cancel(&mut self, id: OrderId) -> Result<OrderState, RejectReason> {
        let order = match self.active.get(&id) {
            Some(order) => *order,
            None => return Err(self.reject_inactive(id)),
        };
        let state = order.state();
        let idx = self.price_to_idx(order.price);

        let removed = self.levels[idx as usize].remove(id, order.remaining_size);
        debug_assert!(removed, "active order present in its level queue");
        self.active.remove(&id);

        if self.levels[idx as usize].is_empty() {
            self.unlink_level(idx);
        }

        #[cfg(debug_assertions)]
        self.check_invariants();
        Ok(state)
    }

    /// Amend an active order's price and/or size (side is fixed).
    ///
    /// A same-price amend adjusts sizes in place and keeps queue position.
    /// A price change cancels and re-enters the unfilled remainder at the new
    /// price, losing queue position and potentially crossing; the public id
    /// keeps referring to the re-entered order. Returns the state before the
    /// amend.
    pub fn update(&mut self, id: OrderId, new_price: Price, new_size: Size) -> Result<OrderState, RejectReason> {
        let order = match self.active.get(&id) {
            Some(order) => *order,
            None => return Err(self.reject_inactive(id)),
        };
        let state = order.state();

        if let Some(reason) = self.validate(new_price, new_size) {
            return Err(reason);
        }
        if new_size <= state.filled_size {
            return Err(RejectReason::SizeBelowFilled);
        }

        if new_price == order.price {
            let idx = self.price_to_idx(order.price);
            let new_remaining = new_size - state.filled_size;
            let entry = self.active.get_mut(&id).expect("looked up above");
            let old_remaining = entry.remaining_size;
            entry.original_size = new_size;
            entry.remaining_size = new_remaining;
            let level = &mut self.levels[idx as usize];
            level.total_size -= old_remaining;
            level.total_size += new_remaining;
            #[cfg(debug_assertions)]
            self.check_invariants();
            return Ok(state);
        }

        // Side must be read off the level position before the cancel detaches
        // the order from its level.
        let old_idx = self.price_to_idx(order.price);
        let side = if self.is_bid_level(old_idx) { Side::Bid } else { Side::Offer };
        let reenter_size = new_size - state.filled_size;

        self.cancel(id).expect("active order cancels");
        let submit = self
            .add_order(new_price, reenter_size, side)
            .expect("amend parameters already validated");
        self.rebind(submit.order_id(), id);

        #[cfg(debug_assertions)]
        self.check_invariants();
        Ok(state)
    }

    /// Rebind a re-entered order's internal id to the public id the caller
    /// knows. The internal id is burned.
    fn rebind(&mut self, internal: OrderId, public: OrderId) {
        if let Some(order) = self.active.remove(&internal) {
            let idx = self.price_to_idx(order.price);
            if let Some(slot) = self.levels[idx as usize]
                .queue
                .iter_mut()
                .find(|slot| **slot == internal)
            {
                *slot = public;
            }
            self.active.insert(public, order);
        } else if let Some(state) = self.done.remove(&internal) {
            // the re-entry crossed completely
            self.done.insert(public, state);
        }
    }

    fn snapshot(&self, idx: u32) -> LevelSnapshot {
        LevelSnapshot {
            price: self.idx_to_price(idx),
            total_size: self.levels[idx as usize].total_size,
        }
    }

    /// Best bid and offer.
    pub fn l1(&self) -> L1Data {
        L1Data {
            best_bid: self.last_bid.map(|idx| self.snapshot(idx)),
            best_offer: self.last_offer.map(|idx| self.snapshot(idx)),
        }
    }

    /// Full depth, walking each side's chain from best to worst.
    pub fn l2(&self) -> L2Data {
        let mut bids = Vec::new();
        let mut curr = self.last_bid;
        while let Some(idx) = curr {
            bids.push(self.snapshot(idx));
            curr = self.levels[idx as usize].prev;
        }

        let mut offers = Vec::new();
        let mut curr = self.last_offer;
        while let Some(idx) = curr {
            offers.push(self.snapshot(idx));
            curr = self.levels[idx as usize].prev;
        }

        L2Data { bids, offers }
    }

    /// Best-offer minus best-bid, when both sides are populated.
    pub fn spread(&self) -> Option<Price> {
        match (self.last_bid, self.last_offer) {
            (Some(bid), Some(offer)) => Some(self.idx_to_price(offer) - self.idx_to_price(bid)),
            _ => None,
        }
    }

    /// Number of resting orders.
    #[inline]
    pub fn active_orders(&self) -> usize {
        self.active.len()
    }

    /// Number of fully filled orders retained in the done map.
    #[inline]
    pub fn done_orders(&self) -> usize {
        self.done.len()
    }

    /// Walk the book's structure and assert every invariant: per-level sums,
    /// chain reachability, non-crossing sides, FIFO/active-map agreement.
    ///
    /// Compiled into test and debug builds only; every mutating operation
    /// self-checks with it in debug builds. A failure is a bug in the book.
    #[cfg(any(test, debug_assertions))]
    pub fn check_invariants(&self) {
        let mut reachable = Vec::new();

        for (side_last, side_first) in [(self.last_bid, self.first_bid), (self.last_offer, self.first_offer)] {
            assert_eq!(side_last.is_some(), side_first.is_some());
            let mut chain = Vec::new();
            let mut curr = side_last;
            while let Some(idx) = curr {
                assert!(!self.levels[idx as usize].is_empty(), "linked level {idx} is empty");
                chain.push(idx);
                curr = self.levels[idx as usize].prev;
            }
            if let Some(first) = side_first {
                assert_eq!(chain.last(), Some(&first), "chain ends at the side's first level");
            }
            // prev/next are mutual inverses along the chain
            for pair in chain.windows(2) {
                assert_eq!(self.levels[pair[1] as usize].next, Some(pair[0]));
            }
            reachable.extend(chain);
        }

        // every non-empty level is reachable, exactly once
        let mut sorted = reachable.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), reachable.len(), "a level appears in two chains");
        let non_empty: Vec<u32> = (0..self.levels.len() as u32)
            .filter(|&i| !self.levels[i as usize].is_empty())
            .collect();
        assert_eq!(sorted, non_empty, "every non-empty level is reachable from an endpoint");

        // bids strictly below offers
        if let (Some(bid), Some(offer)) = (self.last_bid, self.last_offer) {
            assert!(bid < offer, "book is crossed");
        }

        // per-level sums and FIFO membership
        let mut queued = 0usize;
        for level in self.levels.iter() {
            let sum: u64 = level
                .queue
                .iter()
                .map(|id| self.active.get(id).expect("queued id is active").remaining_size.as_raw())
                .sum();
            assert_eq!(sum, level.total_size.as_raw(), "level sum drifted from its orders");
            queued += level.queue.len();
        }
        assert_eq!(queued, self.active.len(), "every active order rests in exactly one queue");
    }
}
