//! Session lifecycle and participants.
//!
//! A session fixes an ordered list of legs and a basket quantity per leg.
//! Status moves CREATED -> ACTIVE -> SETTLED. CANCELLED is declared for
//! completeness; no operation currently reaches it.

use crate::allocation::Basket;
use crate::types::{Leg, ParticipantId, SessionId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Active,
    Settled,
    Cancelled,
}

impl SessionStatus {
    /// Terminal sessions accept no further mutation.
    pub fn is_terminal(&self) -> bool {
        match self {
            SessionStatus::Settled | SessionStatus::Cancelled => true,
            SessionStatus::Created | SessionStatus::Active => false,
        }
    }
}

/// How a session leaves CREATED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
    /// Started synchronously as part of creation.
    #[default]
    Immediate,
    /// Started by the host at a scheduled time.
    Scheduled,
    /// Started by an explicit call.
    Manual,
}

/// How a session is expected to end. Settlement is always an explicit call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndMode {
    Timed,
    #[default]
    Manual,
}

/// Parameters for creating a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSpec {
    pub id: SessionId,
    pub legs: Vec<Leg>,
    /// Basket quantity per leg. All zero means "derive at initial allocation".
    pub q: Vec<Decimal>,
    pub start_mode: StartMode,
    pub end_mode: EndMode,
    pub duration_minutes: Option<u32>,
}

impl SessionSpec {
    pub fn new(id: impl Into<SessionId>, legs: Vec<Leg>, q: Vec<Decimal>) -> Self {
        Self {
            id: id.into(),
            legs,
            q,
            start_mode: StartMode::default(),
            end_mode: EndMode::default(),
            duration_minutes: None,
        }
    }

    pub fn with_start_mode(mut self, start_mode: StartMode) -> Self {
        self.start_mode = start_mode;
        self
    }

    pub fn with_end_mode(mut self, end_mode: EndMode) -> Self {
        self.end_mode = end_mode;
        self
    }

    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub legs: Vec<Leg>,
    pub q: Vec<Decimal>,
    pub status: SessionStatus,
    pub start_mode: StartMode,
    pub end_mode: EndMode,
    pub duration_minutes: Option<u32>,
    /// Set when the session starts.
    pub t1: Option<Timestamp>,
    /// Planned end, only for timed sessions.
    pub t2: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl Session {
    /// Validate a `SessionSpec` and build a session in CREATED.
    pub fn create(spec: SessionSpec, created_at: Timestamp) -> Result<Self, SessionError> {
        validate_basket(&spec.legs, &spec.q)?;

        Ok(Self {
            id: spec.id,
            legs: spec.legs,
            q: spec.q,
            status: SessionStatus::Created,
            start_mode: spec.start_mode,
            end_mode: spec.end_mode,
            duration_minutes: spec.duration_minutes,
            t1: None,
            t2: None,
            created_at,
        })
    }

    /// CREATED -> ACTIVE. Records t1 and, for timed sessions, t2.
    pub fn start(&mut self, at: Timestamp) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::Created => {
                self.status = SessionStatus::Active;
                self.t1 = Some(at);
                self.t2 = match (self.end_mode, self.duration_minutes) {
                    (EndMode::Timed, Some(minutes)) => Some(at.plus_minutes(minutes)),
                    _ => None,
                };
                Ok(())
            }
            SessionStatus::Active | SessionStatus::Settled | SessionStatus::Cancelled => {
                Err(SessionError::InvalidTransition {
                    from: self.status,
                    to: SessionStatus::Active,
                })
            }
        }
    }

    /// ACTIVE or CREATED -> SETTLED.
    pub fn mark_settled(&mut self) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::Created | SessionStatus::Active => {
                self.status = SessionStatus::Settled;
                Ok(())
            }
            SessionStatus::Settled => Err(SessionError::AlreadySettled(self.id.clone())),
            SessionStatus::Cancelled => Err(SessionError::InvalidTransition {
                from: self.status,
                to: SessionStatus::Settled,
            }),
        }
    }

    pub fn ensure_mutable(&self) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::Created | SessionStatus::Active => Ok(()),
            SessionStatus::Settled => Err(SessionError::AlreadySettled(self.id.clone())),
            SessionStatus::Cancelled => Err(SessionError::Terminal {
                session_id: self.id.clone(),
                status: self.status,
            }),
        }
    }

    pub fn ensure_active(&self) -> Result<(), SessionError> {
        match self.status {
            SessionStatus::Active => Ok(()),
            SessionStatus::Created | SessionStatus::Settled | SessionStatus::Cancelled => {
                Err(SessionError::NotActive {
                    session_id: self.id.clone(),
                    status: self.status,
                })
            }
        }
    }

    pub fn has_leg(&self, leg: &Leg) -> bool {
        self.legs.contains(leg)
    }

    /// All-zero basket waiting to be derived from the first allocation.
    pub fn has_placeholder_basket(&self) -> bool {
        self.q.iter().all(|qty| qty.is_zero())
    }

    pub fn basket(&self) -> Basket {
        self.legs.iter().cloned().zip(self.q.iter().copied()).collect()
    }
}

fn validate_basket(legs: &[Leg], q: &[Decimal]) -> Result<(), SessionError> {
    if legs.is_empty() {
        return Err(SessionError::NoLegs);
    }
    if legs.len() != q.len() {
        return Err(SessionError::BasketLengthMismatch {
            legs: legs.len(),
            quantities: q.len(),
        });
    }

    let mut seen = BTreeSet::new();
    for leg in legs {
        if leg.is_cash() {
            return Err(SessionError::ReservedLeg(leg.clone()));
        }
        if !seen.insert(leg) {
            return Err(SessionError::DuplicateLeg(leg.clone()));
        }
    }

    let all_zero = q.iter().all(|qty| qty.is_zero());
    if !all_zero && q.iter().any(|qty| *qty <= Decimal::ZERO) {
        return Err(SessionError::MixedBasket);
    }

    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub session_id: SessionId,
    pub name: Option<String>,
    pub joined_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session must declare at least one leg")]
    NoLegs,

    #[error("Basket length mismatch: {legs} legs, {quantities} quantities")]
    BasketLengthMismatch { legs: usize, quantities: usize },

    #[error("Basket quantities must be all positive or all zero")]
    MixedBasket,

    #[error("Leg {0} declared twice")]
    DuplicateLeg(Leg),

    #[error("Leg name {0} is reserved")]
    ReservedLeg(Leg),

    #[error("Session {0} already exists")]
    AlreadyExists(SessionId),

    #[error("Cannot move session from {from:?} to {to:?}")]
    InvalidTransition { from: SessionStatus, to: SessionStatus },

    #[error("Session {session_id} is {status:?}, not active")]
    NotActive { session_id: SessionId, status: SessionStatus },

    #[error("Session {session_id} is {status:?} and accepts no changes")]
    Terminal { session_id: SessionId, status: SessionStatus },

    #[error("Session {0} already settled")]
    AlreadySettled(SessionId),

    #[error("Participant {0} already joined")]
    DuplicateParticipant(ParticipantId),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn legs() -> Vec<Leg> {
        vec![Leg::from("AAPL"), Leg::from("NVDA")]
    }

    #[test]
    fn create_validates_lengths() {
        let spec = SessionSpec::new("s1", legs(), vec![dec!(100)]);
        assert!(matches!(
            Session::create(spec, Timestamp::from_millis(0)),
            Err(SessionError::BasketLengthMismatch { legs: 2, quantities: 1 })
        ));
    }

    #[test]
    fn basket_all_zero_or_all_positive() {
        let zero = SessionSpec::new("s1", legs(), vec![dec!(0), dec!(0)]);
        let session = Session::create(zero, Timestamp::from_millis(0)).unwrap();
        assert!(session.has_placeholder_basket());

        let mixed = SessionSpec::new("s2", legs(), vec![dec!(100), dec!(0)]);
        assert_eq!(
            Session::create(mixed, Timestamp::from_millis(0)),
            Err(SessionError::MixedBasket)
        );

        let negative = SessionSpec::new("s3", legs(), vec![dec!(100), dec!(-5)]);
        assert_eq!(
            Session::create(negative, Timestamp::from_millis(0)),
            Err(SessionError::MixedBasket)
        );
    }

    #[test]
    fn cash_leg_is_reserved() {
        let spec = SessionSpec::new("s1", vec![Leg::cash()], vec![dec!(1)]);
        assert!(matches!(
            Session::create(spec, Timestamp::from_millis(0)),
            Err(SessionError::ReservedLeg(_))
        ));
    }

    #[test]
    fn start_only_from_created() {
        let spec = SessionSpec::new("s1", legs(), vec![dec!(100), dec!(60)])
            .with_end_mode(EndMode::Timed)
            .with_duration(30);
        let mut session = Session::create(spec, Timestamp::from_millis(0)).unwrap();

        session.start(Timestamp::from_millis(1_000)).unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.t1, Some(Timestamp::from_millis(1_000)));
        assert_eq!(session.t2, Some(Timestamp::from_millis(1_801_000)));

        assert!(matches!(
            session.start(Timestamp::from_millis(2_000)),
            Err(SessionError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn settled_is_terminal() {
        let spec = SessionSpec::new("s1", legs(), vec![dec!(100), dec!(60)]);
        let mut session = Session::create(spec, Timestamp::from_millis(0)).unwrap();
        session.mark_settled().unwrap();

        assert!(session.status.is_terminal());
        assert!(session.ensure_mutable().is_err());
        assert!(matches!(session.mark_settled(), Err(SessionError::AlreadySettled(_))));
    }

    #[test]
    fn basket_map_follows_leg_order() {
        let spec = SessionSpec::new("s1", legs(), vec![dec!(100), dec!(60)]);
        let session = Session::create(spec, Timestamp::from_millis(0)).unwrap();
        let basket = session.basket();
        assert_eq!(basket[&Leg::from("AAPL")], dec!(100));
        assert_eq!(basket[&Leg::from("NVDA")], dec!(60));
    }
}
