// 1.0: primitives. ids, legs, prices, timestamps, tolerances.
// every id is a newtype so a quote id can never be passed where an rfq id is expected.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Allocation checks (conservation, non-negativity, zero-sum, feasibility).
pub const ALLOCATION_TOLERANCE: Decimal = dec!(0.000000001);

/// Settlement sum check.
pub const SETTLEMENT_TOLERANCE: Decimal = dec!(0.000001);

/// Name of the implicit leg that order matching books cash against.
pub const CASH_LEG: &str = "CASH";

// caller-chosen identifiers. sessions and participants are named by the host.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// 1.1: a tradable symbol inside a session basket, e.g. "AAPL".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Leg(pub String);

impl Leg {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    /// The synthetic cash leg. Lives outside every basket.
    pub fn cash() -> Self {
        Self(CASH_LEG.to_string())
    }

    pub fn is_cash(&self) -> bool {
        self.0 == CASH_LEG
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Leg {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// 1.2: engine-assigned identifiers.
macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(EventId);
uuid_id!(RfqId);
uuid_id!(QuoteId);
uuid_id!(TradeId);
uuid_id!(OrderId);

// 1.3: order side. buyers take the asset and pay cash, sellers the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => f.write_str("buy"),
            Side::Sell => f.write_str("sell"),
        }
    }
}

// 1.4: cash per unit of a leg. must be positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!(value > Decimal::ZERO);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.5: millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn plus_minutes(&self, minutes: u32) -> Self {
        Self(self.0 + i64::from(minutes) * 60_000)
    }
}

// 1.6: checked decimal arithmetic. quantities, prices and rates are only bounded
// below, so any product or running sum can leave Decimal's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Decimal overflow computing {0}")]
pub struct ArithmeticOverflow(pub &'static str);

pub fn checked_mul(a: Decimal, b: Decimal, what: &'static str) -> Result<Decimal, ArithmeticOverflow> {
    a.checked_mul(b).ok_or(ArithmeticOverflow(what))
}

pub fn checked_add(a: Decimal, b: Decimal, what: &'static str) -> Result<Decimal, ArithmeticOverflow> {
    a.checked_add(b).ok_or(ArithmeticOverflow(what))
}

/// Checked sum of a sequence.
pub fn checked_sum(
    values: impl IntoIterator<Item = Decimal>,
    what: &'static str,
) -> Result<Decimal, ArithmeticOverflow> {
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, v| checked_add(acc, v, what))
}
