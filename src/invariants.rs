//! Invariant checks.
//!
//! Pure validators run against a candidate state before anything is committed.
//! Each returns a distinguishable [`InvariantViolation`] and never mutates.

use crate::allocation::{holding, AllocationMap, Basket, Holdings};
use crate::types::{checked_add, checked_mul, checked_sum, ArithmeticOverflow, Leg, ParticipantId, Price};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("Conservation violated for leg {leg}: allocated {allocated}, basket {basket}")]
    Conservation {
        leg: Leg,
        allocated: Decimal,
        basket: Decimal,
    },

    #[error("Negative position for participant {participant}, leg {leg}: {amount}")]
    NegativePosition {
        participant: ParticipantId,
        leg: Leg,
        amount: Decimal,
    },

    #[error("Trade not zero-sum for leg {leg}: delta_a {delta_a}, delta_b {delta_b}")]
    NotZeroSum {
        leg: Leg,
        delta_a: Decimal,
        delta_b: Decimal,
    },

    #[error("Settlement sum mismatch: paid {total_payout}, expected {expected}")]
    SettlementSum {
        total_payout: Decimal,
        expected: Decimal,
    },

    #[error("No settlement price for leg {0}")]
    MissingPrice(Leg),

    #[error("Participant {participant} has insufficient {leg}: has {held}, needs {required}")]
    InsufficientHoldings {
        participant: ParticipantId,
        leg: Leg,
        held: Decimal,
        required: Decimal,
    },

    #[error("Trade amounts must be positive: amount_from {amount_from}, amount_to {amount_to}")]
    NonPositiveAmount {
        amount_from: Decimal,
        amount_to: Decimal,
    },

    #[error(transparent)]
    Overflow(#[from] ArithmeticOverflow),
}

/// Sum over participants equals the basket quantity for every basket leg.
pub fn conservation(
    allocations: &AllocationMap,
    basket: &Basket,
    tolerance: Decimal,
) -> Result<(), InvariantViolation> {
    for (leg, total) in basket {
        let allocated = checked_sum(
            allocations.values().map(|h| h.get(leg).copied().unwrap_or(Decimal::ZERO)),
            "allocated total",
        )?;

        if allocated.saturating_sub(*total).abs() > tolerance {
            return Err(InvariantViolation::Conservation {
                leg: leg.clone(),
                allocated,
                basket: *total,
            });
        }
    }
    Ok(())
}

/// Every entry is at least `-tolerance`.
pub fn non_negative(allocations: &AllocationMap, tolerance: Decimal) -> Result<(), InvariantViolation> {
    for (participant, holdings) in allocations {
        for (leg, amount) in holdings {
            if *amount < -tolerance {
                return Err(InvariantViolation::NegativePosition {
                    participant: participant.clone(),
                    leg: leg.clone(),
                    amount: *amount,
                });
            }
        }
    }
    Ok(())
}

/// What one side gains the other loses, leg by leg.
pub fn trade_zero_sum(
    delta_a: &Holdings,
    delta_b: &Holdings,
    legs: &[Leg],
    tolerance: Decimal,
) -> Result<(), InvariantViolation> {
    for leg in legs {
        let a = delta_a.get(leg).copied().unwrap_or(Decimal::ZERO);
        let b = delta_b.get(leg).copied().unwrap_or(Decimal::ZERO);
        if a.saturating_add(b).abs() > tolerance {
            return Err(InvariantViolation::NotZeroSum {
                leg: leg.clone(),
                delta_a: a,
                delta_b: b,
            });
        }
    }
    Ok(())
}

/// Total payout equals the basket valued at settlement prices.
pub fn settlement_sum(
    payouts: &BTreeMap<ParticipantId, Decimal>,
    basket: &Basket,
    prices: &BTreeMap<Leg, Price>,
    tolerance: Decimal,
) -> Result<(), InvariantViolation> {
    let total_payout = checked_sum(payouts.values().copied(), "total payout")?;

    let mut expected = Decimal::ZERO;
    for (leg, qty) in basket {
        let price = prices
            .get(leg)
            .ok_or_else(|| InvariantViolation::MissingPrice(leg.clone()))?;
        expected = checked_add(expected, checked_mul(*qty, price.value(), "basket value")?, "basket value")?;
    }

    if total_payout.saturating_sub(expected).abs() > tolerance {
        return Err(InvariantViolation::SettlementSum {
            total_payout,
            expected,
        });
    }
    Ok(())
}

/// Bilateral trade parameters checked by [`trade_feasible`].
#[derive(Debug, Clone)]
pub struct ProposedTrade<'a> {
    pub party_a: &'a ParticipantId,
    pub party_b: &'a ParticipantId,
    pub leg_from: &'a Leg,
    pub leg_to: &'a Leg,
    pub amount_from: Decimal,
    pub amount_to: Decimal,
}

/// A holds enough of leg_from, B holds enough of leg_to, both amounts positive.
pub fn trade_feasible(
    allocations: &AllocationMap,
    trade: &ProposedTrade<'_>,
    tolerance: Decimal,
) -> Result<(), InvariantViolation> {
    let held_a = holding(allocations, trade.party_a, trade.leg_from);
    if held_a < trade.amount_from.saturating_sub(tolerance) {
        return Err(InvariantViolation::InsufficientHoldings {
            participant: trade.party_a.clone(),
            leg: trade.leg_from.clone(),
            held: held_a,
            required: trade.amount_from,
        });
    }

    let held_b = holding(allocations, trade.party_b, trade.leg_to);
    if held_b < trade.amount_to.saturating_sub(tolerance) {
        return Err(InvariantViolation::InsufficientHoldings {
            participant: trade.party_b.clone(),
            leg: trade.leg_to.clone(),
            held: held_b,
            required: trade.amount_to,
        });
    }

    if trade.amount_from <= Decimal::ZERO || trade.amount_to <= Decimal::ZERO {
        return Err(InvariantViolation::NonPositiveAmount {
            amount_from: trade.amount_from,
            amount_to: trade.amount_to,
        });
    }

    Ok(())
}
