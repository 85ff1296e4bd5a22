// 5.0 trade.rs: executed trades. immutable once created.
// origin says which path produced the trade: a bilateral rfq/quote or an order match.

use crate::allocation::{adjust, AllocationMap};
use crate::types::{checked_mul, ArithmeticOverflow, Leg, OrderId, ParticipantId, Price, QuoteId, RfqId, SessionId, Timestamp, TradeId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TradeOrigin {
    Bilateral { rfq_id: RfqId, quote_id: QuoteId },
    Matched { buy_order_id: OrderId, sell_order_id: OrderId },
}

/// `participant_a` gives `amount_from` of `leg_from` and receives `amount_to` of `leg_to`.
/// `participant_b` takes the other side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    pub id: TradeId,
    pub session_id: SessionId,
    pub origin: TradeOrigin,
    pub participant_a: ParticipantId,
    pub participant_b: ParticipantId,
    pub leg_from: Leg,
    pub leg_to: Leg,
    pub amount_from: Decimal,
    pub amount_to: Decimal,
    pub executed_at: Timestamp,
}

impl Trade {
    /// Requester (a) against quoter (b).
    #[allow(clippy::too_many_arguments)]
    pub fn bilateral(
        session_id: SessionId,
        rfq_id: RfqId,
        quote_id: QuoteId,
        requester: ParticipantId,
        quoter: ParticipantId,
        leg_from: Leg,
        leg_to: Leg,
        amount_from: Decimal,
        amount_to: Decimal,
        executed_at: Timestamp,
    ) -> Self {
        Self {
            id: TradeId::new(),
            session_id,
            origin: TradeOrigin::Bilateral { rfq_id, quote_id },
            participant_a: requester,
            participant_b: quoter,
            leg_from,
            leg_to,
            amount_from,
            amount_to,
            executed_at,
        }
    }

    /// Buyer (a) pays cash for `quantity` of `asset` from seller (b).
    #[allow(clippy::too_many_arguments)]
    pub fn matched(
        session_id: SessionId,
        buy_order_id: OrderId,
        sell_order_id: OrderId,
        buyer: ParticipantId,
        seller: ParticipantId,
        asset: Leg,
        quantity: Decimal,
        price: Price,
        executed_at: Timestamp,
    ) -> Result<Self, ArithmeticOverflow> {
        let amount_from = checked_mul(quantity, price.value(), "trade notional")?;
        Ok(Self {
            id: TradeId::new(),
            session_id,
            origin: TradeOrigin::Matched {
                buy_order_id,
                sell_order_id,
            },
            participant_a: buyer,
            participant_b: seller,
            leg_from: Leg::cash(),
            leg_to: asset,
            amount_from,
            amount_to: quantity,
            executed_at,
        })
    }

    pub fn is_bilateral(&self) -> bool {
        matches!(self.origin, TradeOrigin::Bilateral { .. })
    }

    /// Move the four amounts. Shared by the live path and replay so both
    /// produce identical rows. On overflow `allocations` may be partly moved;
    /// callers work on a scratch copy.
    pub fn apply_to(&self, allocations: &mut AllocationMap) -> Result<(), ArithmeticOverflow> {
        let a = allocations.entry(self.participant_a.clone()).or_default();
        adjust(a, &self.leg_from, -self.amount_from)?;
        adjust(a, &self.leg_to, self.amount_to)?;

        let b = allocations.entry(self.participant_b.clone()).or_default();
        adjust(b, &self.leg_from, self.amount_from)?;
        adjust(b, &self.leg_to, -self.amount_to)?;
        Ok(())
    }
}
