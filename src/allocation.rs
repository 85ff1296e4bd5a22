// 3.0 allocation.rs: the participant -> leg -> quantity projection and the math that
// moves quantities around it. nothing here touches storage.

use crate::types::{checked_add, checked_sum, ArithmeticOverflow, Leg, ParticipantId};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// One participant's holdings, leg -> quantity.
pub type Holdings = BTreeMap<Leg, Decimal>;

/// Session-wide allocation, participant -> holdings.
pub type AllocationMap = BTreeMap<ParticipantId, Holdings>;

/// Fixed total quantity per declared leg.
pub type Basket = BTreeMap<Leg, Decimal>;

/// Quantity held, zero when the leg was never touched.
pub fn holding(allocations: &AllocationMap, participant: &ParticipantId, leg: &Leg) -> Decimal {
    allocations
        .get(participant)
        .and_then(|h| h.get(leg))
        .copied()
        .unwrap_or(Decimal::ZERO)
}

/// Add `delta` to one entry, creating it if needed. The entry is untouched on overflow.
pub fn adjust(holdings: &mut Holdings, leg: &Leg, delta: Decimal) -> Result<(), ArithmeticOverflow> {
    let entry = holdings.entry(leg.clone()).or_insert(Decimal::ZERO);
    *entry = checked_add(*entry, delta, "holding")?;
    Ok(())
}

// 3.1: equal split of every basket leg across the given participants.
pub fn pro_rata(basket: &Basket, participants: &[ParticipantId]) -> AllocationMap {
    let mut allocations = AllocationMap::new();
    if participants.is_empty() {
        return allocations;
    }

    let count = Decimal::from(participants.len());
    for participant in participants {
        let share: Holdings = basket
            .iter()
            .map(|(leg, qty)| (leg.clone(), *qty / count))
            .collect();
        allocations.insert(participant.clone(), share);
    }
    allocations
}

// 3.2: column sums over the declared legs. used once, to fill a placeholder basket.
pub fn column_sums(legs: &[Leg], allocations: &AllocationMap) -> Result<Vec<Decimal>, ArithmeticOverflow> {
    legs.iter()
        .map(|leg| {
            checked_sum(
                allocations.values().map(|h| h.get(leg).copied().unwrap_or(Decimal::ZERO)),
                "column sum",
            )
        })
        .collect()
}

/// Every declared leg present, zero-filled. Keeps live and replayed rows identical.
pub fn normalize(holdings: &Holdings, legs: &[Leg]) -> Holdings {
    let mut out = holdings.clone();
    for leg in legs {
        out.entry(leg.clone()).or_insert(Decimal::ZERO);
    }
    out
}

/// Copy restricted to the declared legs. CASH and anything else is dropped.
pub fn declared_view(allocations: &AllocationMap, legs: &[Leg]) -> AllocationMap {
    allocations
        .iter()
        .map(|(participant, holdings)| {
            let filtered = holdings
                .iter()
                .filter(|(leg, _)| legs.contains(leg))
                .map(|(leg, qty)| (leg.clone(), *qty))
                .collect();
            (participant.clone(), filtered)
        })
        .collect()
}

/// Per-leg change between two holdings rows.
pub fn delta(before: &Holdings, after: &Holdings) -> Holdings {
    let mut out = Holdings::new();
    for leg in before.keys().chain(after.keys()) {
        let old = before.get(leg).copied().unwrap_or(Decimal::ZERO);
        let new = after.get(leg).copied().unwrap_or(Decimal::ZERO);
        out.insert(leg.clone(), new.saturating_sub(old));
    }
    out
}
