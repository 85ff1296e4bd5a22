// 10.0 engine/core.rs: the ledger service. owns the store handle, notifier and
// session locks. mutations live in the sibling files, one impl block per concern.

use super::config::EngineConfig;
use super::locks::SessionLocks;
use super::results::LedgerError;
use crate::allocation::AllocationMap;
use crate::events::Event;
use crate::notify::{Notification, NotificationKind, Notifier, NullNotifier};
use crate::order::{Order, OrderBookSnapshot};
use crate::price_feed::PriceSnapshot;
use crate::replay::{LedgerState, ReplayError};
use crate::rfq::{Quote, Rfq};
use crate::session::{Participant, Session};
use crate::settlement::Settlement;
use crate::store::{Commit, InMemoryStore, LedgerStore};
use crate::trade::Trade;
use crate::types::{Leg, OrderId, ParticipantId, QuoteId, RfqId, SessionId, Timestamp};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/** 10.1: main service. cheap to share behind an Arc; all methods take &self */
pub struct Ledger<S: LedgerStore = InMemoryStore> {
    pub(super) config: EngineConfig,
    pub(super) store: Arc<S>,
    pub(super) notifier: Arc<dyn Notifier>,
    pub(super) locks: SessionLocks,
}

impl Ledger<InMemoryStore> {
    /// Ledger over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()))
    }
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            config: EngineConfig::default(),
            store,
            notifier: Arc::new(NullNotifier),
            locks: SessionLocks::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // 10.2: helpers shared by the mutation files

    pub(super) fn load_session(&self, session_id: &SessionId) -> Result<Session, LedgerError> {
        self.store
            .session(session_id)?
            .ok_or_else(|| LedgerError::SessionNotFound(session_id.clone()))
    }

    pub(super) fn ensure_participant(&self, session_id: &SessionId, participant: &ParticipantId) -> Result<(), LedgerError> {
        let joined = self.store.participants(session_id)?.iter().any(|p| p.id == *participant);
        if joined {
            Ok(())
        } else {
            Err(LedgerError::UnknownParticipant {
                session_id: session_id.clone(),
                participant: participant.clone(),
            })
        }
    }

    pub(super) fn ensure_leg(&self, session: &Session, leg: &Leg) -> Result<(), LedgerError> {
        if session.has_leg(leg) {
            Ok(())
        } else {
            Err(LedgerError::UnknownLeg {
                session_id: session.id.clone(),
                leg: leg.clone(),
            })
        }
    }

    /// Start a commit at the session's next sequence.
    pub(super) fn begin(&self, session_id: &SessionId, timestamp: Timestamp) -> Result<Commit, LedgerError> {
        let next = self.store.next_sequence(session_id)?;
        Ok(Commit::new(session_id.clone(), next, timestamp))
    }

    pub(super) fn commit(&self, commit: Commit) -> Result<Vec<Event>, LedgerError> {
        let session_id = commit.session_id.clone();
        let stored = self.store.commit(commit).map_err(|e| {
            warn!(session_id = %session_id, error = %e, "commit failed");
            LedgerError::from(e)
        })?;

        for event in &stored {
            if self.config.verbose {
                info!(
                    session_id = %event.session_id,
                    sequence = event.sequence,
                    event_type = %event.event_type(),
                    "event committed"
                );
            } else {
                debug!(
                    session_id = %event.session_id,
                    sequence = event.sequence,
                    event_type = %event.event_type(),
                    "event committed"
                );
            }
        }
        Ok(stored)
    }

    /// Best effort. Serialization problems are logged and the message dropped.
    pub(super) fn publish<T: Serialize>(&self, session_id: &SessionId, kind: NotificationKind, payload: &T, timestamp: Timestamp) {
        match serde_json::to_value(payload) {
            Ok(value) => {
                let note = Notification::new(kind, session_id.clone(), value, timestamp);
                self.notifier.notify(session_id, note);
            }
            Err(e) => {
                warn!(session_id = %session_id, kind = ?kind, error = %e, "notification dropped");
            }
        }
    }

    // 10.3: queries. read-only, no session lock.

    pub fn session(&self, session_id: &SessionId) -> Result<Session, LedgerError> {
        self.load_session(session_id)
    }

    pub fn list_sessions(&self) -> Result<Vec<Session>, LedgerError> {
        Ok(self.store.sessions()?)
    }

    pub fn participants(&self, session_id: &SessionId) -> Result<Vec<Participant>, LedgerError> {
        self.load_session(session_id)?;
        Ok(self.store.participants(session_id)?)
    }

    pub fn allocations(&self, session_id: &SessionId) -> Result<AllocationMap, LedgerError> {
        self.load_session(session_id)?;
        Ok(self.store.allocations(session_id)?)
    }

    pub fn rfq(&self, rfq_id: &RfqId) -> Result<Rfq, LedgerError> {
        self.store.rfq(rfq_id)?.ok_or(LedgerError::RfqNotFound(*rfq_id))
    }

    pub fn rfqs(&self, session_id: &SessionId) -> Result<Vec<Rfq>, LedgerError> {
        self.load_session(session_id)?;
        Ok(self.store.rfqs(session_id)?)
    }

    pub fn quote(&self, quote_id: &QuoteId) -> Result<Quote, LedgerError> {
        self.store.quote(quote_id)?.ok_or(LedgerError::QuoteNotFound(*quote_id))
    }

    pub fn quotes_for_rfq(&self, rfq_id: &RfqId) -> Result<Vec<Quote>, LedgerError> {
        self.rfq(rfq_id)?;
        Ok(self.store.quotes_for_rfq(rfq_id)?)
    }

    pub fn trades(&self, session_id: &SessionId) -> Result<Vec<Trade>, LedgerError> {
        self.load_session(session_id)?;
        Ok(self.store.trades(session_id)?)
    }

    pub fn order(&self, order_id: &OrderId) -> Result<Order, LedgerError> {
        self.store.order(order_id)?.ok_or(LedgerError::OrderNotFound(*order_id))
    }

    pub fn orders(&self, session_id: &SessionId) -> Result<Vec<Order>, LedgerError> {
        self.load_session(session_id)?;
        Ok(self.store.orders(session_id)?)
    }

    pub fn order_book(&self, session_id: &SessionId, asset: &Leg) -> Result<OrderBookSnapshot, LedgerError> {
        let session = self.load_session(session_id)?;
        self.ensure_leg(&session, asset)?;
        Ok(self.store.order_book(session_id, asset)?)
    }

    pub fn latest_prices(&self, session_id: &SessionId) -> Result<Option<PriceSnapshot>, LedgerError> {
        self.load_session(session_id)?;
        Ok(self.store.latest_prices(session_id)?)
    }

    pub fn settlement(&self, session_id: &SessionId) -> Result<Option<Settlement>, LedgerError> {
        self.load_session(session_id)?;
        Ok(self.store.settlement(session_id)?)
    }

    /// Events from `from_sequence` on, ascending, capped at `max_events_per_read`.
    pub fn events(&self, session_id: &SessionId, from_sequence: u64) -> Result<Vec<Event>, LedgerError> {
        self.load_session(session_id)?;
        Ok(self
            .store
            .events(session_id, from_sequence, self.config.max_events_per_read)?)
    }

    /// Fold the whole log from sequence 0.
    pub fn replay(&self, session_id: &SessionId) -> Result<LedgerState, LedgerError> {
        self.load_session(session_id)?;

        let limit = self.config.max_events_per_read.max(1);
        let mut state = LedgerState::new();
        let mut from = 0u64;
        loop {
            let page = self.store.events(session_id, from, limit)?;
            let Some(last) = page.last() else {
                break;
            };
            from = last.sequence + 1;
            for event in &page {
                state.apply(event).map_err(|e: ReplayError| {
                    warn!(session_id = %session_id, sequence = event.sequence, error = %e, "replay failed");
                    LedgerError::from(e)
                })?;
            }
            if page.len() < limit {
                break;
            }
        }

        debug!(session_id = %session_id, last_sequence = ?state.last_sequence, "replayed");
        Ok(state)
    }
}

impl<S: LedgerStore> std::fmt::Debug for Ledger<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("config", &self.config)
            .field("locked_sessions", &self.locks.len())
            .finish_non_exhaustive()
    }
}
