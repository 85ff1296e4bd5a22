// 7.0 settlement.rs: terminal conversion of holdings into a cash payout.
// payout = sum over declared legs of holding * price. CASH balances from order
// matching are not part of the formula.

use crate::allocation::{AllocationMap, Basket};
use crate::invariants::{self, InvariantViolation};
use crate::types::{checked_add, checked_mul, Leg, ParticipantId, Price, SessionId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub session_id: SessionId,
    pub prices: BTreeMap<Leg, Price>,
    pub payouts: BTreeMap<ParticipantId, Decimal>,
    pub settled_at: Timestamp,
}

impl Settlement {
    /// Price every participant's declared holdings and check the total
    /// against the basket value.
    pub fn compute(
        session_id: SessionId,
        legs: &[Leg],
        basket: &Basket,
        allocations: &AllocationMap,
        prices: &BTreeMap<Leg, Price>,
        tolerance: Decimal,
        settled_at: Timestamp,
    ) -> Result<Self, InvariantViolation> {
        let payouts = compute_payouts(allocations, legs, prices)?;
        invariants::settlement_sum(&payouts, basket, prices, tolerance)?;

        Ok(Self {
            session_id,
            prices: legs
                .iter()
                .filter_map(|leg| prices.get(leg).map(|p| (leg.clone(), *p)))
                .collect(),
            payouts,
            settled_at,
        })
    }

    /// Bounded by the basket value, which `compute` already summed without overflow.
    pub fn total_payout(&self) -> Decimal {
        self.payouts
            .values()
            .fold(Decimal::ZERO, |acc, p| acc.saturating_add(*p))
    }

    pub fn payout(&self, participant: &ParticipantId) -> Decimal {
        self.payouts.get(participant).copied().unwrap_or(Decimal::ZERO)
    }
}

// 7.1: declared legs only.
pub fn compute_payouts(
    allocations: &AllocationMap,
    legs: &[Leg],
    prices: &BTreeMap<Leg, Price>,
) -> Result<BTreeMap<ParticipantId, Decimal>, InvariantViolation> {
    let mut payouts = BTreeMap::new();

    for (participant, holdings) in allocations {
        let mut payout = Decimal::ZERO;
        for leg in legs {
            let price = prices
                .get(leg)
                .ok_or_else(|| InvariantViolation::MissingPrice(leg.clone()))?;
            let held = holdings.get(leg).copied().unwrap_or(Decimal::ZERO);
            payout = checked_add(payout, checked_mul(held, price.value(), "payout")?, "payout")?;
        }
        payouts.insert(participant.clone(), payout);
    }

    Ok(payouts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::Holdings;
    use crate::types::SETTLEMENT_TOLERANCE;
    use rust_decimal_macros::dec;

    fn legs() -> Vec<Leg> {
        vec![Leg::from("AAPL"), Leg::from("NVDA")]
    }

    fn prices() -> BTreeMap<Leg, Price> {
        let mut p = BTreeMap::new();
        p.insert(Leg::from("AAPL"), Price::new_unchecked(dec!(200)));
        p.insert(Leg::from("NVDA"), Price::new_unchecked(dec!(500)));
        p
    }

    fn basket() -> Basket {
        legs().into_iter().zip([dec!(100), dec!(60)]).collect()
    }

    fn allocations(cash: Decimal) -> AllocationMap {
        let mut allocs = AllocationMap::new();
        let mut alice = Holdings::new();
        alice.insert(Leg::from("AAPL"), dec!(55));
        alice.insert(Leg::from("NVDA"), dec!(30));
        alice.insert(Leg::cash(), -cash);
        let mut bob = Holdings::new();
        bob.insert(Leg::from("AAPL"), dec!(45));
        bob.insert(Leg::from("NVDA"), dec!(30));
        bob.insert(Leg::cash(), cash);
        allocs.insert(ParticipantId::from("alice"), alice);
        allocs.insert(ParticipantId::from("bob"), bob);
        allocs
    }

    #[test]
    fn payouts_ignore_cash() {
        let settlement = Settlement::compute(
            SessionId::from("s1"),
            &legs(),
            &basket(),
            &allocations(dec!(1000)),
            &prices(),
            SETTLEMENT_TOLERANCE,
            Timestamp::from_millis(0),
        )
        .unwrap();

        assert_eq!(settlement.payout(&ParticipantId::from("alice")), dec!(26000));
        assert_eq!(settlement.payout(&ParticipantId::from("bob")), dec!(24000));
        assert_eq!(settlement.total_payout(), dec!(50000));
    }

    #[test]
    fn missing_price_is_reported() {
        let mut partial = prices();
        partial.remove(&Leg::from("NVDA"));
        assert_eq!(
            compute_payouts(&allocations(dec!(0)), &legs(), &partial),
            Err(InvariantViolation::MissingPrice(Leg::from("NVDA")))
        );
    }

    #[test]
    fn oversized_price_is_an_overflow() {
        let mut huge = prices();
        huge.insert(Leg::from("AAPL"), Price::new_unchecked(Decimal::MAX));
        assert!(matches!(
            compute_payouts(&allocations(dec!(0)), &legs(), &huge),
            Err(InvariantViolation::Overflow(_))
        ));
    }

    #[test]
    fn leaked_allocation_fails_sum_check() {
        let mut allocs = allocations(dec!(0));
        allocs
            .get_mut(&ParticipantId::from("bob"))
            .unwrap()
            .insert(Leg::from("AAPL"), dec!(44));

        let result = Settlement::compute(
            SessionId::from("s1"),
            &legs(),
            &basket(),
            &allocs,
            &prices(),
            SETTLEMENT_TOLERANCE,
            Timestamp::from_millis(0),
        );
        assert!(matches!(result, Err(InvariantViolation::SettlementSum { .. })));
    }
}
