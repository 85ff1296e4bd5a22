//! Session lifecycle, participants and initial allocation.

use super::core::Ledger;
use super::results::LedgerError;
use crate::allocation::{column_sums, declared_view, normalize, pro_rata, AllocationMap};
use crate::events::{
    AllocationAssignedEvent, EventPayload, ParticipantJoinedEvent, SessionCreatedEvent, SessionStartedEvent,
};
use crate::invariants;
use crate::notify::NotificationKind;
use crate::session::{Participant, Session, SessionError, SessionSpec, StartMode};
use crate::store::{LedgerStore, ProjectionWrite};
use crate::types::{ParticipantId, SessionId, Timestamp};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

impl<S: LedgerStore> Ledger<S> {
    /// Create a session. Immediate sessions start in the same commit.
    #[instrument(skip(self, spec), fields(session_id = %spec.id))]
    pub fn create_session(&self, spec: SessionSpec) -> Result<Session, LedgerError> {
        let session_id = spec.id.clone();
        self.locks.with(&session_id, || {
            if self.store.session(&session_id)?.is_some() {
                return Err(SessionError::AlreadyExists(session_id.clone()).into());
            }

            let now = Timestamp::now();
            let mut session = Session::create(spec, now)?;
            let mut commit = self.begin(&session_id, now)?.event(EventPayload::SessionCreated(SessionCreatedEvent {
                session: session.clone(),
            }));

            if session.start_mode == StartMode::Immediate {
                session.start(now)?;
                commit.push_event(EventPayload::SessionStarted(SessionStartedEvent {
                    t1: now,
                    t2: session.t2,
                }));
            }
            commit.push_write(ProjectionWrite::PutSession(session.clone()));

            self.commit(commit)?;
            info!(session_id = %session_id, legs = session.legs.len(), status = ?session.status, "session created");
            self.publish(&session_id, NotificationKind::SessionStatus, &session, now);
            Ok(session)
        })
    }

    /// CREATED -> ACTIVE for scheduled and manual sessions.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn start_session(&self, session_id: &SessionId) -> Result<Session, LedgerError> {
        self.locks.with(session_id, || {
            let mut session = self.load_session(session_id)?;
            let now = Timestamp::now();
            session.start(now)?;

            let commit = self
                .begin(session_id, now)?
                .event(EventPayload::SessionStarted(SessionStartedEvent {
                    t1: now,
                    t2: session.t2,
                }))
                .write(ProjectionWrite::PutSession(session.clone()));
            self.commit(commit)?;

            info!(session_id = %session_id, t2 = ?session.t2, "session started");
            self.publish(session_id, NotificationKind::SessionStatus, &session, now);
            Ok(session)
        })
    }

    #[instrument(skip(self, name), fields(session_id = %session_id, participant = %participant_id))]
    pub fn join(
        &self,
        session_id: &SessionId,
        participant_id: ParticipantId,
        name: Option<String>,
    ) -> Result<Participant, LedgerError> {
        self.locks.with(session_id, || {
            let session = self.load_session(session_id)?;
            session.ensure_mutable()?;

            let existing = self.store.participants(session_id)?;
            if existing.iter().any(|p| p.id == participant_id) {
                return Err(SessionError::DuplicateParticipant(participant_id.clone()).into());
            }

            let now = Timestamp::now();
            let participant = Participant {
                id: participant_id.clone(),
                session_id: session_id.clone(),
                name,
                joined_at: now,
            };
            let commit = self
                .begin(session_id, now)?
                .event(EventPayload::ParticipantJoined(ParticipantJoinedEvent {
                    participant: participant.clone(),
                }))
                .write(ProjectionWrite::AddParticipant(participant.clone()));
            self.commit(commit)?;

            info!(session_id = %session_id, participant = %participant_id, "participant joined");
            self.publish(session_id, NotificationKind::ParticipantJoined, &participant, now);
            Ok(participant)
        })
    }

    /// Hand out the basket. `None` splits every leg equally across all joined
    /// participants. A placeholder basket is derived here, once, as the column
    /// sums of the allocations.
    ///
    /// Can run again, for example after a late join. The new rows overwrite the
    /// declared legs of the participants they name; other rows and CASH
    /// balances are kept. Conservation and non-negativity are checked on the
    /// merged result.
    #[instrument(skip(self, allocations), fields(session_id = %session_id, custom = allocations.is_some()))]
    pub fn assign_initial_allocations(
        &self,
        session_id: &SessionId,
        allocations: Option<AllocationMap>,
    ) -> Result<AllocationMap, LedgerError> {
        self.locks.with(session_id, || {
            let mut session = self.load_session(session_id)?;
            session.ensure_mutable()?;

            let participants = self.store.participants(session_id)?;
            if participants.is_empty() {
                return Err(LedgerError::NoParticipants(session_id.clone()));
            }
            let existing = self.store.allocations(session_id)?;

            let rows: AllocationMap = match allocations {
                Some(supplied) => {
                    for (participant, holdings) in &supplied {
                        if !participants.iter().any(|p| p.id == *participant) {
                            return Err(LedgerError::UnknownParticipant {
                                session_id: session_id.clone(),
                                participant: participant.clone(),
                            });
                        }
                        for leg in holdings.keys() {
                            self.ensure_leg(&session, leg)?;
                        }
                    }
                    supplied
                        .iter()
                        .map(|(participant, holdings)| (participant.clone(), normalize(holdings, &session.legs)))
                        .collect()
                }
                None => {
                    let ids: Vec<ParticipantId> = participants.iter().map(|p| p.id.clone()).collect();
                    pro_rata(&session.basket(), &ids)
                }
            };

            let mut merged = existing;
            for (participant, holdings) in &rows {
                let row = merged.entry(participant.clone()).or_default();
                row.extend(holdings.iter().map(|(leg, qty)| (leg.clone(), *qty)));
            }
            let declared = declared_view(&merged, &session.legs);

            if session.has_placeholder_basket() {
                let derived = column_sums(&session.legs, &declared)?;
                if derived.iter().any(|qty| *qty <= Decimal::ZERO) {
                    warn!(session_id = %session_id, ?derived, "derived basket is not strictly positive");
                    return Err(SessionError::MixedBasket.into());
                }
                info!(session_id = %session_id, ?derived, "basket derived from initial allocations");
                session.q = derived;
            }

            let tolerance = self.config.allocation_tolerance;
            invariants::conservation(&declared, &session.basket(), tolerance)?;
            invariants::non_negative(&declared, tolerance)?;

            let now = Timestamp::now();
            let mut commit = self.begin(session_id, now)?;
            for (participant_id, holdings) in &rows {
                commit.push_event(EventPayload::InitialAllocationAssigned(AllocationAssignedEvent {
                    participant_id: participant_id.clone(),
                    holdings: holdings.clone(),
                    basket: session.q.clone(),
                }));
                commit.push_write(ProjectionWrite::SetHoldings {
                    participant_id: participant_id.clone(),
                    holdings: merged.get(participant_id).cloned().unwrap_or_default(),
                });
            }
            commit.push_write(ProjectionWrite::PutSession(session.clone()));
            self.commit(commit)?;

            info!(session_id = %session_id, participants = rows.len(), "initial allocations assigned");
            self.publish(session_id, NotificationKind::AllocationUpdate, &merged, now);
            Ok(rows)
        })
    }
}
