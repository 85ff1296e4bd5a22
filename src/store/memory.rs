//! In-memory [`LedgerStore`].
//!
//! Each session's log and projections live in one [`DashMap`] entry, so a
//! commit validates and applies under that entry's lock and is all or
//! nothing. Id lookups for RFQs, quotes and orders go through side indexes.

use super::{Commit, LedgerStore, ProjectionWrite, StoreError};
use crate::allocation::AllocationMap;
use crate::events::Event;
use crate::order::Order;
use crate::price_feed::PriceSnapshot;
use crate::rfq::{Quote, Rfq};
use crate::session::{Participant, Session};
use crate::settlement::Settlement;
use crate::trade::Trade;
use crate::types::{OrderId, QuoteId, RfqId, SessionId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
struct SessionData {
    session: Option<Session>,
    events: Vec<Event>,
    participants: Vec<Participant>,
    allocations: AllocationMap,
    rfqs: Vec<Rfq>,
    quotes: Vec<Quote>,
    trades: Vec<Trade>,
    orders: Vec<Order>,
    prices: Option<PriceSnapshot>,
    settlement: Option<Settlement>,
}

impl SessionData {
    fn next_sequence(&self) -> u64 {
        self.events.len() as u64
    }

    /// Reject anything that would fail halfway through `apply`.
    fn check(&self, commit: &Commit) -> Result<(), StoreError> {
        if commit.events.is_empty() {
            return Err(StoreError::EmptyCommit(commit.session_id.clone()));
        }

        let actual = self.next_sequence();
        if commit.expected_sequence != actual {
            return Err(StoreError::SequenceConflict {
                session_id: commit.session_id.clone(),
                expected: commit.expected_sequence,
                actual,
            });
        }

        let mut joined: BTreeSet<_> = self.participants.iter().map(|p| p.id.clone()).collect();
        for write in &commit.writes {
            match write {
                ProjectionWrite::AddParticipant(p) => {
                    if !joined.insert(p.id.clone()) {
                        return Err(duplicate("participant", &p.id));
                    }
                }
                ProjectionWrite::PutQuote(quote) if self.quotes.iter().any(|q| q.id == quote.id) => {
                    return Err(duplicate("quote", &quote.id));
                }
                ProjectionWrite::PutTrade(trade) if self.trades.iter().any(|t| t.id == trade.id) => {
                    return Err(duplicate("trade", &trade.id));
                }
                ProjectionWrite::PutSettlement(_) if self.settlement.is_some() => {
                    return Err(duplicate("settlement", &commit.session_id));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Infallible once `check` passed.
    fn apply(&mut self, commit: Commit) -> Vec<Event> {
        let start = commit.expected_sequence;
        let stored: Vec<Event> = commit
            .events
            .into_iter()
            .enumerate()
            .map(|(i, payload)| Event::new(commit.session_id.clone(), start + i as u64, commit.timestamp, payload))
            .collect();
        self.events.extend(stored.iter().cloned());

        for write in commit.writes {
            match write {
                ProjectionWrite::PutSession(session) => self.session = Some(session),
                ProjectionWrite::AddParticipant(p) => self.participants.push(p),
                ProjectionWrite::SetHoldings {
                    participant_id,
                    holdings,
                } => {
                    self.allocations.insert(participant_id, holdings);
                }
                ProjectionWrite::PutRfq(rfq) => match self.rfqs.iter_mut().find(|r| r.id == rfq.id) {
                    Some(existing) => *existing = rfq,
                    None => self.rfqs.push(rfq),
                },
                ProjectionWrite::PutQuote(quote) => self.quotes.push(quote),
                ProjectionWrite::PutTrade(trade) => self.trades.push(trade),
                ProjectionWrite::PutOrder(order) => match self.orders.iter_mut().find(|o| o.id == order.id) {
                    Some(existing) => *existing = order,
                    None => self.orders.push(order),
                },
                ProjectionWrite::PutPrices(snapshot) => self.prices = Some(snapshot),
                ProjectionWrite::PutSettlement(settlement) => self.settlement = Some(settlement),
            }
        }

        stored
    }
}

fn duplicate(entity: &'static str, id: &impl ToString) -> StoreError {
    StoreError::Duplicate {
        entity,
        id: id.to_string(),
    }
}

/// Thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    sessions: DashMap<SessionId, SessionData>,
    rfq_index: DashMap<RfqId, SessionId>,
    quote_index: DashMap<QuoteId, SessionId>,
    order_index: DashMap<OrderId, SessionId>,
    fail_next_commit: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail with [`StoreError::Unavailable`] before it touches anything.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn event_count(&self, session_id: &SessionId) -> usize {
        self.sessions.get(session_id).map_or(0, |d| d.events.len())
    }

    fn read<T>(&self, session_id: &SessionId, f: impl FnOnce(&SessionData) -> T) -> Option<T> {
        self.sessions.get(session_id).map(|data| f(data.value()))
    }

    fn index_commit(&self, session_id: &SessionId, commit: &Commit) {
        for write in &commit.writes {
            match write {
                ProjectionWrite::PutRfq(rfq) => {
                    self.rfq_index.insert(rfq.id, session_id.clone());
                }
                ProjectionWrite::PutQuote(quote) => {
                    self.quote_index.insert(quote.id, session_id.clone());
                }
                ProjectionWrite::PutOrder(order) => {
                    self.order_index.insert(order.id, session_id.clone());
                }
                _ => {}
            }
        }
    }
}

impl LedgerStore for InMemoryStore {
    fn next_sequence(&self, session_id: &SessionId) -> Result<u64, StoreError> {
        Ok(self.read(session_id, SessionData::next_sequence).unwrap_or(0))
    }

    fn events(&self, session_id: &SessionId, from_sequence: u64, limit: usize) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .read(session_id, |d| {
                d.events
                    .iter()
                    .skip(usize::try_from(from_sequence).unwrap_or(usize::MAX))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn session(&self, session_id: &SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.read(session_id, |d| d.session.clone()).flatten())
    }

    fn sessions(&self) -> Result<Vec<Session>, StoreError> {
        let mut sessions: Vec<Session> = self.sessions.iter().filter_map(|d| d.session.clone()).collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(sessions)
    }

    fn participants(&self, session_id: &SessionId) -> Result<Vec<Participant>, StoreError> {
        Ok(self.read(session_id, |d| d.participants.clone()).unwrap_or_default())
    }

    fn allocations(&self, session_id: &SessionId) -> Result<AllocationMap, StoreError> {
        Ok(self.read(session_id, |d| d.allocations.clone()).unwrap_or_default())
    }

    fn rfq(&self, rfq_id: &RfqId) -> Result<Option<Rfq>, StoreError> {
        let Some(session_id) = self.rfq_index.get(rfq_id).map(|s| s.value().clone()) else {
            return Ok(None);
        };
        Ok(self
            .read(&session_id, |d| d.rfqs.iter().find(|r| r.id == *rfq_id).cloned())
            .flatten())
    }

    fn rfqs(&self, session_id: &SessionId) -> Result<Vec<Rfq>, StoreError> {
        Ok(self.read(session_id, |d| d.rfqs.clone()).unwrap_or_default())
    }

    fn quote(&self, quote_id: &QuoteId) -> Result<Option<Quote>, StoreError> {
        let Some(session_id) = self.quote_index.get(quote_id).map(|s| s.value().clone()) else {
            return Ok(None);
        };
        Ok(self
            .read(&session_id, |d| d.quotes.iter().find(|q| q.id == *quote_id).cloned())
            .flatten())
    }

    fn quotes_for_rfq(&self, rfq_id: &RfqId) -> Result<Vec<Quote>, StoreError> {
        let Some(session_id) = self.rfq_index.get(rfq_id).map(|s| s.value().clone()) else {
            return Ok(Vec::new());
        };
        Ok(self
            .read(&session_id, |d| d.quotes.iter().filter(|q| q.rfq_id == *rfq_id).cloned().collect())
            .unwrap_or_default())
    }

    fn trades(&self, session_id: &SessionId) -> Result<Vec<Trade>, StoreError> {
        Ok(self.read(session_id, |d| d.trades.clone()).unwrap_or_default())
    }

    fn order(&self, order_id: &OrderId) -> Result<Option<Order>, StoreError> {
        let Some(session_id) = self.order_index.get(order_id).map(|s| s.value().clone()) else {
            return Ok(None);
        };
        Ok(self
            .read(&session_id, |d| d.orders.iter().find(|o| o.id == *order_id).cloned())
            .flatten())
    }

    fn orders(&self, session_id: &SessionId) -> Result<Vec<Order>, StoreError> {
        Ok(self.read(session_id, |d| d.orders.clone()).unwrap_or_default())
    }

    fn latest_prices(&self, session_id: &SessionId) -> Result<Option<PriceSnapshot>, StoreError> {
        Ok(self.read(session_id, |d| d.prices.clone()).flatten())
    }

    fn settlement(&self, session_id: &SessionId) -> Result<Option<Settlement>, StoreError> {
        Ok(self.read(session_id, |d| d.settlement.clone()).flatten())
    }

    fn commit(&self, commit: Commit) -> Result<Vec<Event>, StoreError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }

        let session_id = commit.session_id.clone();
        match self.sessions.entry(session_id.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get().check(&commit)?;
                self.index_commit(&session_id, &commit);
                Ok(entry.get_mut().apply(commit))
            }
            Entry::Vacant(entry) => {
                let mut data = SessionData::default();
                data.check(&commit)?;
                self.index_commit(&session_id, &commit);
                let stored = data.apply(commit);
                entry.insert(data);
                Ok(stored)
            }
        }
    }
}
