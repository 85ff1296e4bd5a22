// 10.0.2: result types and errors for ledger operations.

use crate::invariants::InvariantViolation;
use crate::order::{Order, OrderError};
use crate::price_feed::PriceFeedError;
use crate::replay::ReplayError;
use crate::rfq::RfqError;
use crate::session::SessionError;
use crate::store::StoreError;
use crate::trade::{Trade, TradeOrigin};
use crate::types::{ArithmeticOverflow, Leg, OrderId, ParticipantId, Price, QuoteId, RfqId, SessionId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Placed order after matching ran, plus the trades it took part in.
#[derive(Debug, Clone)]
pub struct OrderResult {
    pub order: Order,
    /// Every fill from this matching pass, including ones between resting orders.
    pub trades: Vec<Trade>,
}

impl OrderResult {
    pub fn filled_quantity(&self) -> Decimal {
        self.order.filled_quantity
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.order.remaining()
    }

    /// Quantity-weighted fill price of this order, if it filled at all and
    /// the totals fit in a Decimal.
    pub fn average_price(&self) -> Option<Price> {
        let (quantity, notional) = self
            .trades
            .iter()
            .filter(|t| self.involves(t))
            .try_fold((Decimal::ZERO, Decimal::ZERO), |(q, n), t| {
                Some((q.checked_add(t.amount_to)?, n.checked_add(t.amount_from)?))
            })?;

        if quantity.is_zero() {
            None
        } else {
            Price::new(notional / quantity)
        }
    }

    fn involves(&self, trade: &Trade) -> bool {
        match trade.origin {
            TradeOrigin::Matched {
                buy_order_id,
                sell_order_id,
            } => buy_order_id == self.order.id || sell_order_id == self.order.id,
            TradeOrigin::Bilateral { .. } => false,
        }
    }
}

/// Failure class. Callers branch on this, not on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input. Nothing changed; retry with corrected input.
    Validation,
    /// Candidate state broke an invariant and was discarded.
    Invariant,
    /// Target entity does not exist.
    NotFound,
    /// Storage failed. The operation was not applied.
    Persistence,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("Session {0} not found")]
    SessionNotFound(SessionId),

    #[error("RFQ {0} not found")]
    RfqNotFound(RfqId),

    #[error("Quote {0} not found")]
    QuoteNotFound(QuoteId),

    #[error("Order {0} not found")]
    OrderNotFound(OrderId),

    #[error("Participant {participant} has not joined session {session_id}")]
    UnknownParticipant {
        session_id: SessionId,
        participant: ParticipantId,
    },

    #[error("Leg {leg} is not part of session {session_id}")]
    UnknownLeg { session_id: SessionId, leg: Leg },

    #[error("Session {0} has no participants")]
    NoParticipants(SessionId),

    #[error("Session {0} has no allocations")]
    NoAllocations(SessionId),

    #[error("No prices recorded for session {0}")]
    NoPrices(SessionId),

    #[error("No settlement price for leg {0}")]
    MissingPrice(Leg),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("RFQ error: {0}")]
    Rfq(#[from] RfqError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Price error: {0}")]
    Price(#[from] PriceFeedError),

    #[error("Invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),

    #[error("Event log is inconsistent: {0}")]
    Replay(#[from] ReplayError),

    #[error("Amounts out of range: {0}")]
    Overflow(#[from] ArithmeticOverflow),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::SessionNotFound(_)
            | LedgerError::RfqNotFound(_)
            | LedgerError::QuoteNotFound(_)
            | LedgerError::OrderNotFound(_) => ErrorKind::NotFound,

            LedgerError::UnknownParticipant { .. }
            | LedgerError::UnknownLeg { .. }
            | LedgerError::NoParticipants(_)
            | LedgerError::NoAllocations(_)
            | LedgerError::NoPrices(_)
            | LedgerError::MissingPrice(_)
            | LedgerError::Session(_)
            | LedgerError::Rfq(_)
            | LedgerError::Order(_)
            | LedgerError::Price(_)
            | LedgerError::Overflow(_)
            | LedgerError::Invariant(InvariantViolation::Overflow(_)) => ErrorKind::Validation,

            LedgerError::Invariant(_) => ErrorKind::Invariant,

            LedgerError::Persistence(_) | LedgerError::Replay(_) => ErrorKind::Persistence,
        }
    }
}
