//! Event replay.
//!
//! [`LedgerState`] is the pure fold of a session's events in sequence order.
//! It must match the live projection exactly; any divergence is a bug in
//! whichever side changed last.

use crate::allocation::AllocationMap;
use crate::events::{Event, EventPayload};
use crate::order::{Order, OrderStatus};
use crate::price_feed::PriceSnapshot;
use crate::rfq::{Quote, Rfq, RfqStatus};
use crate::session::{Participant, Session, SessionStatus};
use crate::settlement::Settlement;
use crate::trade::{Trade, TradeOrigin};
use crate::types::{OrderId, QuoteId, RfqId};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerState {
    pub session: Option<Session>,
    pub participants: Vec<Participant>,
    pub allocations: AllocationMap,
    pub rfqs: BTreeMap<RfqId, Rfq>,
    pub quotes: BTreeMap<QuoteId, Quote>,
    /// Execution order, both bilateral and matched.
    pub trades: Vec<Trade>,
    pub orders: BTreeMap<OrderId, Order>,
    pub latest_prices: Option<PriceSnapshot>,
    pub settlement: Option<Settlement>,
    pub last_sequence: Option<u64>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event. Events must arrive in sequence order without gaps.
    pub fn apply(&mut self, event: &Event) -> Result<(), ReplayError> {
        let expected = self.last_sequence.map_or(0, |s| s + 1);
        if event.sequence != expected {
            return Err(ReplayError::OutOfOrder {
                expected,
                found: event.sequence,
            });
        }

        match &event.payload {
            EventPayload::SessionCreated(e) => {
                self.session = Some(e.session.clone());
            }
            EventPayload::ParticipantJoined(e) => {
                self.participants.push(e.participant.clone());
            }
            EventPayload::SessionStarted(e) => {
                let session = self.session_mut(event)?;
                session.status = SessionStatus::Active;
                session.t1 = Some(e.t1);
                session.t2 = e.t2;
            }
            EventPayload::InitialAllocationAssigned(e) => {
                self.session_mut(event)?.q = e.basket.clone();
                // overlays the declared legs; CASH from earlier matches survives
                let row = self.allocations.entry(e.participant_id.clone()).or_default();
                row.extend(e.holdings.iter().map(|(leg, qty)| (leg.clone(), *qty)));
            }
            EventPayload::PriceTick(e) => {
                self.latest_prices = Some(e.snapshot.clone());
            }
            EventPayload::RfqRequested(e) => {
                self.rfqs.insert(e.rfq.id, e.rfq.clone());
            }
            EventPayload::QuoteProvided(e) => {
                self.quotes.insert(e.quote.id, e.quote.clone());
            }
            EventPayload::TradeExecuted(e) => {
                if let TradeOrigin::Bilateral { rfq_id, .. } = e.trade.origin {
                    let rfq = self.rfqs.get_mut(&rfq_id).ok_or(ReplayError::UnknownRfq {
                        sequence: event.sequence,
                        rfq_id,
                    })?;
                    rfq.status = RfqStatus::Executed;
                }
                self.apply_trade(event.sequence, &e.trade)?;
            }
            EventPayload::OrderPlaced(e) => {
                self.orders.insert(e.order.id, e.order.clone());
            }
            EventPayload::OrderCancelled(e) => {
                let order = self.order_mut(event.sequence, e.order_id)?;
                order.status = OrderStatus::Cancelled;
                order.updated_at = event.timestamp;
            }
            EventPayload::OrderMatched(e) => {
                if let TradeOrigin::Matched {
                    buy_order_id,
                    sell_order_id,
                } = e.trade.origin
                {
                    self.order_mut(event.sequence, buy_order_id)?.fill(e.quantity, event.timestamp);
                    self.order_mut(event.sequence, sell_order_id)?.fill(e.quantity, event.timestamp);
                }
                self.apply_trade(event.sequence, &e.trade)?;
            }
            EventPayload::OrderRejected(e) => {
                let order = self.order_mut(event.sequence, e.order_id)?;
                order.status = OrderStatus::Rejected;
                order.updated_at = event.timestamp;
            }
            EventPayload::SessionSettled(e) => {
                self.session_mut(event)?.status = SessionStatus::Settled;
                self.settlement = Some(e.settlement.clone());
            }
        }

        self.last_sequence = Some(event.sequence);
        Ok(())
    }

    // a trade that overflowed could never have been committed live
    fn apply_trade(&mut self, sequence: u64, trade: &Trade) -> Result<(), ReplayError> {
        let mut next = self.allocations.clone();
        trade
            .apply_to(&mut next)
            .map_err(|_| ReplayError::Overflow { sequence })?;
        self.allocations = next;
        self.trades.push(trade.clone());
        Ok(())
    }

    fn session_mut(&mut self, event: &Event) -> Result<&mut Session, ReplayError> {
        self.session.as_mut().ok_or(ReplayError::NoSession {
            sequence: event.sequence,
        })
    }

    fn order_mut(&mut self, sequence: u64, order_id: OrderId) -> Result<&mut Order, ReplayError> {
        self.orders
            .get_mut(&order_id)
            .ok_or(ReplayError::UnknownOrder { sequence, order_id })
    }

    /// Quotes attached to one RFQ, oldest first.
    pub fn quotes_for(&self, rfq_id: &RfqId) -> Vec<&Quote> {
        let mut quotes: Vec<&Quote> = self.quotes.values().filter(|q| q.rfq_id == *rfq_id).collect();
        quotes.sort_by_key(|q| q.created_at);
        quotes
    }
}

/// Fold a full event sequence from an empty state.
pub fn replay<'a>(events: impl IntoIterator<Item = &'a Event>) -> Result<LedgerState, ReplayError> {
    let mut state = LedgerState::new();
    for event in events {
        state.apply(event)?;
    }
    Ok(state)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReplayError {
    #[error("Event out of order: expected sequence {expected}, found {found}")]
    OutOfOrder { expected: u64, found: u64 },

    #[error("Event {sequence} precedes session creation")]
    NoSession { sequence: u64 },

    #[error("Event {sequence} references unknown RFQ {rfq_id}")]
    UnknownRfq { sequence: u64, rfq_id: RfqId },

    #[error("Event {sequence} references unknown order {order_id}")]
    UnknownOrder { sequence: u64, order_id: OrderId },

    #[error("Event {sequence} moves amounts outside the representable range")]
    Overflow { sequence: u64 },
}
