//! Request-for-quote and quote records.
//!
//! An RFQ names a leg-for-leg swap. Any number of quotes can be attached while
//! it is open; accepting one executes the trade and closes the RFQ.

use crate::types::{checked_mul, ArithmeticOverflow, Leg, ParticipantId, QuoteId, RfqId, SessionId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RfqStatus {
    Open,
    Quoted,
    Executed,
    Cancelled,
    Expired,
}

impl RfqStatus {
    /// Open for new quotes and for acceptance.
    pub fn accepts_quotes(&self) -> bool {
        match self {
            RfqStatus::Open => true,
            RfqStatus::Quoted | RfqStatus::Executed | RfqStatus::Cancelled | RfqStatus::Expired => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rfq {
    pub id: RfqId,
    pub session_id: SessionId,
    pub requester: ParticipantId,
    pub leg_from: Leg,
    pub leg_to: Leg,
    /// Amount of `leg_from` the requester gives up.
    pub amount_from: Decimal,
    pub status: RfqStatus,
    pub created_at: Timestamp,
}

impl Rfq {
    pub fn new(
        session_id: SessionId,
        requester: ParticipantId,
        leg_from: Leg,
        leg_to: Leg,
        amount_from: Decimal,
        created_at: Timestamp,
    ) -> Result<Self, RfqError> {
        if leg_from == leg_to {
            return Err(RfqError::SameLeg(leg_from));
        }
        if amount_from <= Decimal::ZERO {
            return Err(RfqError::NonPositiveAmount(amount_from));
        }

        Ok(Self {
            id: RfqId::new(),
            session_id,
            requester,
            leg_from,
            leg_to,
            amount_from,
            status: RfqStatus::Open,
            created_at,
        })
    }

    pub fn ensure_open(&self) -> Result<(), RfqError> {
        if self.status.accepts_quotes() {
            Ok(())
        } else {
            Err(RfqError::NotOpen {
                rfq_id: self.id,
                status: self.status,
            })
        }
    }

    /// OPEN -> EXECUTED.
    pub fn mark_executed(&mut self) -> Result<(), RfqError> {
        self.ensure_open()?;
        self.status = RfqStatus::Executed;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub rfq_id: RfqId,
    pub quoter: ParticipantId,
    /// amount_to / amount_from. 0.62 means give 10, get 6.2.
    pub rate: Decimal,
    pub created_at: Timestamp,
}

impl Quote {
    pub fn new(rfq: &Rfq, quoter: ParticipantId, rate: Decimal, created_at: Timestamp) -> Result<Self, RfqError> {
        rfq.ensure_open()?;
        if quoter == rfq.requester {
            return Err(RfqError::SelfQuote(quoter));
        }
        if rate <= Decimal::ZERO {
            return Err(RfqError::NonPositiveRate(rate));
        }

        Ok(Self {
            id: QuoteId::new(),
            rfq_id: rfq.id,
            quoter,
            rate,
            created_at,
        })
    }

    /// What the quoter pays for the requester's `amount_from`.
    pub fn amount_to(&self, amount_from: Decimal) -> Result<Decimal, ArithmeticOverflow> {
        checked_mul(amount_from, self.rate, "quote amount")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RfqError {
    #[error("Cannot swap leg {0} for itself")]
    SameLeg(Leg),

    #[error("RFQ amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    #[error("Quote rate must be positive, got {0}")]
    NonPositiveRate(Decimal),

    #[error("Participant {0} cannot quote their own RFQ")]
    SelfQuote(ParticipantId),

    #[error("RFQ {rfq_id} is {status:?}")]
    NotOpen { rfq_id: RfqId, status: RfqStatus },
}
