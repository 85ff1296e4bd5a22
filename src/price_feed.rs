// Price feed boundary.
//
// An external producer pushes full or partial snapshots keyed by leg. The
// ledger keeps only the most recent snapshot per session; a new tick replaces
// the previous one wholesale, so settlement always prices against a single
// consistent observation.

use crate::types::{Leg, Price, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Prices for some or all of a session's legs, observed at one instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub prices: BTreeMap<Leg, Price>,
    pub timestamp: Timestamp,
}

impl PriceSnapshot {
    /// Validate a raw tick against the session's declared legs.
    pub fn from_tick(raw: &BTreeMap<Leg, Decimal>, legs: &[Leg], timestamp: Timestamp) -> Result<Self, PriceFeedError> {
        if raw.is_empty() {
            return Err(PriceFeedError::EmptyTick);
        }

        let mut prices = BTreeMap::new();
        for (leg, value) in raw {
            if !legs.contains(leg) {
                return Err(PriceFeedError::UnknownLeg(leg.clone()));
            }
            let price = Price::new(*value).ok_or_else(|| PriceFeedError::NonPositivePrice {
                leg: leg.clone(),
                price: *value,
            })?;
            prices.insert(leg.clone(), price);
        }

        Ok(Self { prices, timestamp })
    }

    pub fn price(&self, leg: &Leg) -> Option<Price> {
        self.prices.get(leg).copied()
    }

    /// First declared leg without a price, if any.
    pub fn first_missing<'a>(&self, legs: &'a [Leg]) -> Option<&'a Leg> {
        legs.iter().find(|leg| !self.prices.contains_key(*leg))
    }

    pub fn covers(&self, legs: &[Leg]) -> bool {
        self.first_missing(legs).is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceFeedError {
    #[error("Price tick carries no prices")]
    EmptyTick,

    #[error("Price tick names unknown leg {0}")]
    UnknownLeg(Leg),

    #[error("Price for {leg} must be positive, got {price}")]
    NonPositivePrice { leg: Leg, price: Decimal },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn legs() -> Vec<Leg> {
        vec![Leg::from("AAPL"), Leg::from("NVDA")]
    }

    #[test]
    fn partial_tick_is_accepted_but_does_not_cover() {
        let mut raw = BTreeMap::new();
        raw.insert(Leg::from("AAPL"), dec!(200));

        let snap = PriceSnapshot::from_tick(&raw, &legs(), Timestamp::from_millis(0)).unwrap();
        assert_eq!(snap.price(&Leg::from("AAPL")).unwrap().value(), dec!(200));
        assert!(!snap.covers(&legs()));
        assert_eq!(snap.first_missing(&legs()), Some(&Leg::from("NVDA")));
    }

    #[test]
    fn rejects_bad_ticks() {
        let ts = Timestamp::from_millis(0);
        assert_eq!(
            PriceSnapshot::from_tick(&BTreeMap::new(), &legs(), ts),
            Err(PriceFeedError::EmptyTick)
        );

        let mut unknown = BTreeMap::new();
        unknown.insert(Leg::from("TSLA"), dec!(1));
        assert!(matches!(
            PriceSnapshot::from_tick(&unknown, &legs(), ts),
            Err(PriceFeedError::UnknownLeg(_))
        ));

        let mut zero = BTreeMap::new();
        zero.insert(Leg::from("AAPL"), dec!(0));
        assert!(matches!(
            PriceSnapshot::from_tick(&zero, &legs(), ts),
            Err(PriceFeedError::NonPositivePrice { .. })
        ));
    }
}
