//! Order types and continuous matching.
//!
//! Orders rest per (session, asset). Matching runs to a fixpoint after every
//! placement: best buy against best sell while the pair is compatible.
//! Priority is price only, with creation order breaking ties. A sell that
//! reaches the top of the book without the holdings to cover it is rejected
//! and matching moves on to the next one.

use crate::types::{Leg, OrderId, ParticipantId, Price, SessionId, Side, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Executes against whatever the other side offers.
    Market,
    /// Executes only at the limit price or better.
    Limit,
}

/// Order lifecycle. PENDING -> PARTIAL -> FILLED, or open -> CANCELLED / REJECTED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Partial,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    /// Still on the book.
    pub fn is_open(&self) -> bool {
        match self {
            OrderStatus::Pending | OrderStatus::Partial => true,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected => false,
        }
    }
}

/// What a participant asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub participant: ParticipantId,
    pub asset: Leg,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Price>,
}

impl OrderRequest {
    pub fn limit(participant: impl Into<ParticipantId>, asset: impl Into<Leg>, side: Side, quantity: Decimal, price: Price) -> Self {
        Self {
            participant: participant.into(),
            asset: asset.into(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
        }
    }

    pub fn market(participant: impl Into<ParticipantId>, asset: impl Into<Leg>, side: Side, quantity: Decimal) -> Self {
        Self {
            participant: participant.into(),
            asset: asset.into(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
        }
    }

    /// Shape checks that need no state: positive quantity, price iff limit.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.quantity <= Decimal::ZERO {
            return Err(OrderError::NonPositiveQuantity(self.quantity));
        }
        match (self.order_type, self.price) {
            (OrderType::Limit, None) => Err(OrderError::MissingLimitPrice),
            (OrderType::Market, Some(_)) => Err(OrderError::PriceOnMarketOrder),
            (OrderType::Limit, Some(_)) | (OrderType::Market, None) => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub session_id: SessionId,
    pub participant: ParticipantId,
    pub asset: Leg,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Price>,
    pub filled_quantity: Decimal,
    pub status: OrderStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Order {
    pub fn from_request(session_id: SessionId, request: OrderRequest, at: Timestamp) -> Result<Self, OrderError> {
        request.validate()?;

        Ok(Self {
            id: OrderId::new(),
            session_id,
            participant: request.participant,
            asset: request.asset,
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            price: request.price,
            filled_quantity: Decimal::ZERO,
            status: OrderStatus::Pending,
            created_at: at,
            updated_at: at,
        })
    }

    pub fn remaining(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }

    pub fn fill(&mut self, quantity: Decimal, at: Timestamp) {
        debug_assert!(quantity <= self.remaining(), "cannot fill more than remaining");
        self.filled_quantity += quantity;
        self.status = if self.filled_quantity >= self.quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::Partial
        };
        self.updated_at = at;
    }

    /// Open -> REJECTED. Fills already taken stand.
    pub fn reject(&mut self, at: Timestamp) {
        if self.is_open() {
            self.status = OrderStatus::Rejected;
            self.updated_at = at;
        }
    }

    /// Open -> CANCELLED. Nothing was reserved, so nothing is released.
    pub fn cancel(&mut self, at: Timestamp) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Pending | OrderStatus::Partial => {
                self.status = OrderStatus::Cancelled;
                self.updated_at = at;
                Ok(())
            }
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected => Err(OrderError::NotCancellable {
                order_id: self.id,
                status: self.status,
            }),
        }
    }
}

/// Buys: market first, then highest price.
fn buy_priority(a: &Order, b: &Order) -> Ordering {
    match (a.order_type, b.order_type) {
        (OrderType::Market, OrderType::Limit) => Ordering::Less,
        (OrderType::Limit, OrderType::Market) => Ordering::Greater,
        (OrderType::Market, OrderType::Market) => Ordering::Equal,
        (OrderType::Limit, OrderType::Limit) => b.price.cmp(&a.price),
    }
}

/// Sells: market first, then lowest price.
fn sell_priority(a: &Order, b: &Order) -> Ordering {
    match (a.order_type, b.order_type) {
        (OrderType::Market, OrderType::Limit) => Ordering::Less,
        (OrderType::Limit, OrderType::Market) => Ordering::Greater,
        (OrderType::Market, OrderType::Market) => Ordering::Equal,
        (OrderType::Limit, OrderType::Limit) => a.price.cmp(&b.price),
    }
}

/// Price a compatible pair trades at, `None` when the pair cannot trade.
///
/// One market side takes the other side's limit. Two limits cross when
/// buy >= sell and trade at the sell price. Two market orders have no limit
/// to lean on and trade at the reference (latest oracle) price if one exists.
pub fn execution_price(buy: &Order, sell: &Order, reference: Option<Price>) -> Option<Price> {
    match (buy.order_type, sell.order_type) {
        (OrderType::Market, OrderType::Limit) => sell.price,
        (OrderType::Limit, OrderType::Market) => buy.price,
        (OrderType::Limit, OrderType::Limit) => match (buy.price, sell.price) {
            (Some(bid), Some(ask)) if bid >= ask => Some(ask),
            _ => None,
        },
        (OrderType::Market, OrderType::Market) => reference,
    }
}

/// One execution between a resting buy and a resting sell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fill {
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer: ParticipantId,
    pub seller: ParticipantId,
    pub quantity: Decimal,
    pub price: Price,
}

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub fills: Vec<Fill>,
    /// Orders whose state changed, in first-touched order.
    pub updated: Vec<Order>,
    /// Sells rejected for lack of holdings. Also present in `updated`.
    pub rejected: Vec<OrderId>,
}

/// Run matching to a fixpoint over the open orders of one asset.
///
/// `open` must be in creation order; the sorts are stable so creation order
/// survives as the tie-break. `holdings` is each participant's current
/// quantity of the asset. A sell whose remaining quantity exceeds what its
/// owner holds when it comes up to trade is rejected and skipped.
pub fn match_orders(
    open: Vec<Order>,
    reference: Option<Price>,
    mut holdings: BTreeMap<ParticipantId, Decimal>,
    at: Timestamp,
) -> MatchOutcome {
    let (mut buys, mut sells): (Vec<Order>, Vec<Order>) = open
        .into_iter()
        .filter(Order::is_open)
        .partition(|o| o.side == Side::Buy);

    buys.sort_by(buy_priority);
    sells.sort_by(sell_priority);

    let mut fills = Vec::new();
    let mut touched: Vec<OrderId> = Vec::new();
    let mut rejected = Vec::new();
    let (mut bi, mut si) = (0usize, 0usize);

    while bi < buys.len() && si < sells.len() {
        let Some(price) = execution_price(&buys[bi], &sells[si], reference) else {
            break;
        };

        let available = holdings.get(&sells[si].participant).copied().unwrap_or(Decimal::ZERO);
        if available < sells[si].remaining() {
            sells[si].reject(at);
            rejected.push(sells[si].id);
            if !touched.contains(&sells[si].id) {
                touched.push(sells[si].id);
            }
            si += 1;
            continue;
        }

        let quantity = buys[bi].remaining().min(sells[si].remaining());
        buys[bi].fill(quantity, at);
        sells[si].fill(quantity, at);

        // quantity <= available, so the seller side cannot overflow
        if let Some(held) = holdings.get_mut(&sells[si].participant) {
            *held -= quantity;
        }
        let bought = holdings.entry(buys[bi].participant.clone()).or_insert(Decimal::ZERO);
        *bought = bought.saturating_add(quantity);

        fills.push(Fill {
            buy_order_id: buys[bi].id,
            sell_order_id: sells[si].id,
            buyer: buys[bi].participant.clone(),
            seller: sells[si].participant.clone(),
            quantity,
            price,
        });

        for id in [buys[bi].id, sells[si].id] {
            if !touched.contains(&id) {
                touched.push(id);
            }
        }

        if buys[bi].is_filled() {
            bi += 1;
        }
        if sells[si].is_filled() {
            si += 1;
        }
    }

    let updated = touched
        .iter()
        .filter_map(|id| buys.iter().chain(sells.iter()).find(|o| o.id == *id).cloned())
        .collect();

    MatchOutcome {
        fills,
        updated,
        rejected,
    }
}

/// A resting order as shown on the book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookEntry {
    pub order_id: OrderId,
    pub participant: ParticipantId,
    pub order_type: OrderType,
    pub price: Option<Price>,
    pub remaining: Decimal,
}

/// Aggregate depth at one limit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Price,
    pub total_size: Decimal,
    pub order_count: usize,
}

/// Snapshot of one asset's book, both sides best-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub asset: Leg,
    pub bids: Vec<BookEntry>,
    pub asks: Vec<BookEntry>,
}

impl OrderBookSnapshot {
    /// Build from open orders in creation order.
    pub fn from_orders(asset: Leg, open: Vec<Order>) -> Self {
        let (mut buys, mut sells): (Vec<Order>, Vec<Order>) = open
            .into_iter()
            .filter(|o| o.is_open() && o.asset == asset)
            .partition(|o| o.side == Side::Buy);
        buys.sort_by(buy_priority);
        sells.sort_by(sell_priority);

        let entry = |o: Order| BookEntry {
            remaining: o.remaining(),
            order_id: o.id,
            participant: o.participant,
            order_type: o.order_type,
            price: o.price,
        };

        Self {
            asset,
            bids: buys.into_iter().map(entry).collect(),
            asks: sells.into_iter().map(entry).collect(),
        }
    }

    pub fn best_bid(&self) -> Option<Price> {
        self.bids.iter().find_map(|e| e.price)
    }

    pub fn best_ask(&self) -> Option<Price> {
        self.asks.iter().find_map(|e| e.price)
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.value() - bid.value()),
            _ => None,
        }
    }

    pub fn bid_levels(&self, max_levels: usize) -> Vec<PriceLevel> {
        levels(&self.bids, max_levels)
    }

    pub fn ask_levels(&self, max_levels: usize) -> Vec<PriceLevel> {
        levels(&self.asks, max_levels)
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

// entries are already best-first, so grouping consecutive prices is enough.
fn levels(entries: &[BookEntry], max_levels: usize) -> Vec<PriceLevel> {
    let mut levels: Vec<PriceLevel> = Vec::new();

    for entry in entries {
        let Some(price) = entry.price else {
            continue;
        };
        let same_level = levels.last().is_some_and(|l| l.price == price);
        if !same_level {
            if levels.len() >= max_levels {
                break;
            }
            levels.push(PriceLevel {
                price,
                total_size: Decimal::ZERO,
                order_count: 0,
            });
        }
        if let Some(level) = levels.last_mut() {
            level.total_size = level.total_size.saturating_add(entry.remaining);
            level.order_count += 1;
        }
    }

    levels
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("Order quantity must be positive, got {0}")]
    NonPositiveQuantity(Decimal),

    #[error("Limit orders must have a price")]
    MissingLimitPrice,

    #[error("Market orders must not carry a price")]
    PriceOnMarketOrder,

    #[error("Insufficient {asset} holdings for {participant}: have {held}, need {required}")]
    InsufficientHoldings {
        participant: ParticipantId,
        asset: Leg,
        held: Decimal,
        required: Decimal,
    },

    #[error("Order {order_id} is {status:?} and cannot be cancelled")]
    NotCancellable { order_id: OrderId, status: OrderStatus },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn ts(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    /// Everyone holds plenty, so no sell is rejected.
    fn stocked() -> BTreeMap<ParticipantId, Decimal> {
        ["alice", "bob", "carol"]
            .into_iter()
            .map(|p| (ParticipantId::from(p), dec!(1000)))
            .collect()
    }

    fn order(who: &str, side: Side, qty: Decimal, price: Option<Decimal>, at: i64) -> Order {
        let request = match price {
            Some(p) => OrderRequest::limit(who, "AAPL", side, qty, Price::new_unchecked(p)),
            None => OrderRequest::market(who, "AAPL", side, qty),
        };
        Order::from_request(SessionId::from("s1"), request, ts(at)).unwrap()
    }

    #[test]
    fn request_shape() {
        let no_price = OrderRequest {
            price: None,
            ..OrderRequest::limit("a", "AAPL", Side::Buy, dec!(1), Price::new_unchecked(dec!(1)))
        };
        assert_eq!(no_price.validate(), Err(OrderError::MissingLimitPrice));

        let priced_market = OrderRequest {
            price: Some(Price::new_unchecked(dec!(1))),
            ..OrderRequest::market("a", "AAPL", Side::Buy, dec!(1))
        };
        assert_eq!(priced_market.validate(), Err(OrderError::PriceOnMarketOrder));

        let zero = OrderRequest::market("a", "AAPL", Side::Sell, dec!(0));
        assert!(matches!(zero.validate(), Err(OrderError::NonPositiveQuantity(_))));
    }

    #[test]
    fn limit_cross_trades_at_sell_price() {
        let buy = order("alice", Side::Buy, dec!(5), Some(dec!(100)), 0);
        let sell = order("bob", Side::Sell, dec!(5), Some(dec!(95)), 1);

        let outcome = match_orders(vec![buy, sell], None, stocked(), ts(2));

        assert_eq!(outcome.fills.len(), 1);
        assert_eq!(outcome.fills[0].price.value(), dec!(95));
        assert_eq!(outcome.fills[0].quantity, dec!(5));
        assert!(outcome.updated.iter().all(|o| o.status == OrderStatus::Filled));
    }

    #[test]
    fn limits_that_do_not_cross_rest() {
        let buy = order("alice", Side::Buy, dec!(5), Some(dec!(90)), 0);
        let sell = order("bob", Side::Sell, dec!(5), Some(dec!(95)), 1);

        let outcome = match_orders(vec![buy, sell], None, stocked(), ts(2));
        assert!(outcome.fills.is_empty());
        assert!(outcome.updated.is_empty());
    }

    #[test]
    fn market_buy_takes_limit_price_and_partials() {
        let sell_a = order("bob", Side::Sell, dec!(2), Some(dec!(101)), 0);
        let sell_b = order("carol", Side::Sell, dec!(2), Some(dec!(100)), 1);
        let buy = order("alice", Side::Buy, dec!(3), None, 2);

        let outcome = match_orders(vec![sell_a, sell_b, buy], None, stocked(), ts(3));

        assert_eq!(outcome.fills.len(), 2);
        // best (lowest) ask first
        assert_eq!(outcome.fills[0].seller, ParticipantId::from("carol"));
        assert_eq!(outcome.fills[0].price.value(), dec!(100));
        assert_eq!(outcome.fills[1].seller, ParticipantId::from("bob"));
        assert_eq!(outcome.fills[1].quantity, dec!(1));

        let bob = outcome.updated.iter().find(|o| o.participant.as_str() == "bob").unwrap();
        assert_eq!(bob.status, OrderStatus::Partial);
        assert_eq!(bob.remaining(), dec!(1));
    }

    #[test]
    fn market_sell_takes_buy_limit() {
        let buy = order("alice", Side::Buy, dec!(1), Some(dec!(99)), 0);
        let sell = order("bob", Side::Sell, dec!(1), None, 1);

        let outcome = match_orders(vec![buy, sell], None, stocked(), ts(2));
        assert_eq!(outcome.fills[0].price.value(), dec!(99));
    }

    #[test]
    fn equal_prices_keep_creation_order() {
        let first = order("alice", Side::Buy, dec!(1), Some(dec!(100)), 0);
        let second = order("bob", Side::Buy, dec!(1), Some(dec!(100)), 0);
        let sell = order("carol", Side::Sell, dec!(1), Some(dec!(100)), 1);
        let first_id = first.id;

        let outcome = match_orders(vec![first, second, sell], None, stocked(), ts(2));
        assert_eq!(outcome.fills.len(), 1);
        assert_eq!(outcome.fills[0].buy_order_id, first_id);
    }

    #[test]
    fn two_market_orders_need_reference_price() {
        let buy = order("alice", Side::Buy, dec!(1), None, 0);
        let sell = order("bob", Side::Sell, dec!(1), None, 1);

        let none = match_orders(vec![buy.clone(), sell.clone()], None, stocked(), ts(2));
        assert!(none.fills.is_empty());

        let priced = match_orders(vec![buy, sell], Some(Price::new_unchecked(dec!(150))), stocked(), ts(2));
        assert_eq!(priced.fills[0].price.value(), dec!(150));
    }

    #[test]
    fn uncovered_sell_is_rejected_and_matching_continues() {
        let stale = order("bob", Side::Sell, dec!(5), Some(dec!(95)), 0);
        let backed = order("carol", Side::Sell, dec!(5), Some(dec!(96)), 1);
        let buy = order("alice", Side::Buy, dec!(5), Some(dec!(100)), 2);
        let stale_id = stale.id;

        let mut holdings = stocked();
        holdings.insert(ParticipantId::from("bob"), dec!(3));
        let outcome = match_orders(vec![stale, backed, buy], None, holdings, ts(3));

        assert_eq!(outcome.rejected, vec![stale_id]);
        assert_eq!(outcome.fills.len(), 1);
        assert_eq!(outcome.fills[0].seller, ParticipantId::from("carol"));
        assert_eq!(outcome.fills[0].price.value(), dec!(96));

        let bob = outcome.updated.iter().find(|o| o.id == stale_id).unwrap();
        assert_eq!(bob.status, OrderStatus::Rejected);
        assert_eq!(bob.updated_at, ts(3));
    }

    #[test]
    fn sells_sharing_holdings_draw_them_down() {
        // both sells were individually covered at placement
        let first = order("bob", Side::Sell, dec!(4), Some(dec!(95)), 0);
        let second = order("bob", Side::Sell, dec!(4), Some(dec!(96)), 1);
        let buy = order("alice", Side::Buy, dec!(8), None, 2);
        let second_id = second.id;

        let mut holdings = stocked();
        holdings.insert(ParticipantId::from("bob"), dec!(5));
        let outcome = match_orders(vec![first, second, buy], None, holdings, ts(3));

        assert_eq!(outcome.fills.len(), 1);
        assert_eq!(outcome.fills[0].quantity, dec!(4));
        assert_eq!(outcome.rejected, vec![second_id]);

        let alice = outcome.updated.iter().find(|o| o.participant.as_str() == "alice").unwrap();
        assert_eq!(alice.status, OrderStatus::Partial);
    }

    #[test]
    fn uncovered_sell_that_cannot_trade_keeps_resting() {
        let buy = order("alice", Side::Buy, dec!(5), Some(dec!(90)), 0);
        let sell = order("bob", Side::Sell, dec!(5), Some(dec!(95)), 1);

        let outcome = match_orders(vec![buy, sell], None, BTreeMap::new(), ts(2));
        assert!(outcome.rejected.is_empty());
        assert!(outcome.updated.is_empty());
    }

    #[test]
    fn cancel_only_open_orders() {
        let mut o = order("alice", Side::Buy, dec!(1), Some(dec!(100)), 0);
        o.cancel(ts(1)).unwrap();
        assert_eq!(o.status, OrderStatus::Cancelled);
        assert!(matches!(o.cancel(ts(2)), Err(OrderError::NotCancellable { .. })));
    }

    #[test]
    fn book_snapshot_levels() {
        let orders = vec![
            order("a", Side::Buy, dec!(1), Some(dec!(99)), 0),
            order("b", Side::Buy, dec!(2), Some(dec!(100)), 1),
            order("c", Side::Buy, dec!(3), Some(dec!(100)), 2),
            order("d", Side::Sell, dec!(1), Some(dec!(105)), 3),
        ];
        let book = OrderBookSnapshot::from_orders(Leg::from("AAPL"), orders);

        assert_eq!(book.best_bid().unwrap().value(), dec!(100));
        assert_eq!(book.best_ask().unwrap().value(), dec!(105));
        assert_eq!(book.spread(), Some(dec!(5)));

        let levels = book.bid_levels(10);
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].total_size, dec!(5));
        assert_eq!(levels[0].order_count, 2);
        assert_eq!(levels[1].price.value(), dec!(99));
    }
}
