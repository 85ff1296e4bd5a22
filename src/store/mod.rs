// 9.0 store: the storage port. reads for every projection, one write entry point.
// a commit appends its events and applies its projection writes as a unit, guarded
// by the sequence number the caller expects to be next.

mod memory;

pub use memory::InMemoryStore;

use crate::allocation::{AllocationMap, Holdings};
use crate::events::{Event, EventPayload};
use crate::order::{Order, OrderBookSnapshot};
use crate::price_feed::PriceSnapshot;
use crate::rfq::{Quote, Rfq};
use crate::session::{Participant, Session};
use crate::settlement::Settlement;
use crate::trade::Trade;
use crate::types::{Leg, OrderId, ParticipantId, QuoteId, RfqId, SessionId, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Sequence conflict on session {session_id}: expected {expected}, actual {actual}")]
    SequenceConflict {
        session_id: SessionId,
        expected: u64,
        actual: u64,
    },

    #[error("Duplicate {entity}: {id} already exists")]
    Duplicate { entity: &'static str, id: String },

    #[error("Commit for session {0} carries no events")]
    EmptyCommit(SessionId),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// One projection change implied by a commit's events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionWrite {
    /// Insert or replace the session row.
    PutSession(Session),
    AddParticipant(Participant),
    /// Replace one participant's whole allocation row.
    SetHoldings {
        participant_id: ParticipantId,
        holdings: Holdings,
    },
    /// Insert or replace.
    PutRfq(Rfq),
    PutQuote(Quote),
    PutTrade(Trade),
    /// Insert or replace; creation order is kept from the first put.
    PutOrder(Order),
    /// Replaces the latest snapshot.
    PutPrices(PriceSnapshot),
    PutSettlement(Settlement),
}

/// Everything one operation writes. Applied all or nothing.
#[derive(Debug, Clone)]
pub struct Commit {
    pub session_id: SessionId,
    /// Sequence the first event must receive.
    pub expected_sequence: u64,
    pub timestamp: Timestamp,
    pub events: Vec<EventPayload>,
    pub writes: Vec<ProjectionWrite>,
}

impl Commit {
    pub fn new(session_id: SessionId, expected_sequence: u64, timestamp: Timestamp) -> Self {
        Self {
            session_id,
            expected_sequence,
            timestamp,
            events: Vec::new(),
            writes: Vec::new(),
        }
    }

    pub fn event(mut self, payload: EventPayload) -> Self {
        self.events.push(payload);
        self
    }

    pub fn write(mut self, write: ProjectionWrite) -> Self {
        self.writes.push(write);
        self
    }

    pub fn push_event(&mut self, payload: EventPayload) {
        self.events.push(payload);
    }

    pub fn push_write(&mut self, write: ProjectionWrite) {
        self.writes.push(write);
    }
}

/// Synchronous storage port. Every failure aborts the calling operation.
pub trait LedgerStore: Send + Sync {
    /// Sequence the next event for this session will get. 0 for an unknown session.
    fn next_sequence(&self, session_id: &SessionId) -> Result<u64, StoreError>;

    /// Events with sequence >= `from_sequence`, ascending, at most `limit`.
    fn events(&self, session_id: &SessionId, from_sequence: u64, limit: usize) -> Result<Vec<Event>, StoreError>;

    fn session(&self, session_id: &SessionId) -> Result<Option<Session>, StoreError>;

    fn sessions(&self) -> Result<Vec<Session>, StoreError>;

    /// Join order.
    fn participants(&self, session_id: &SessionId) -> Result<Vec<Participant>, StoreError>;

    fn allocations(&self, session_id: &SessionId) -> Result<AllocationMap, StoreError>;

    fn rfq(&self, rfq_id: &RfqId) -> Result<Option<Rfq>, StoreError>;

    /// Creation order.
    fn rfqs(&self, session_id: &SessionId) -> Result<Vec<Rfq>, StoreError>;

    fn quote(&self, quote_id: &QuoteId) -> Result<Option<Quote>, StoreError>;

    fn quotes_for_rfq(&self, rfq_id: &RfqId) -> Result<Vec<Quote>, StoreError>;

    /// Execution order.
    fn trades(&self, session_id: &SessionId) -> Result<Vec<Trade>, StoreError>;

    fn order(&self, order_id: &OrderId) -> Result<Option<Order>, StoreError>;

    /// Creation order.
    fn orders(&self, session_id: &SessionId) -> Result<Vec<Order>, StoreError>;

    /// PENDING and PARTIAL orders for one asset, creation order.
    fn open_orders(&self, session_id: &SessionId, asset: &Leg) -> Result<Vec<Order>, StoreError> {
        Ok(self
            .orders(session_id)?
            .into_iter()
            .filter(|o| o.is_open() && o.asset == *asset)
            .collect())
    }

    fn order_book(&self, session_id: &SessionId, asset: &Leg) -> Result<OrderBookSnapshot, StoreError> {
        let open = self.open_orders(session_id, asset)?;
        Ok(OrderBookSnapshot::from_orders(asset.clone(), open))
    }

    fn latest_prices(&self, session_id: &SessionId) -> Result<Option<PriceSnapshot>, StoreError>;

    fn settlement(&self, session_id: &SessionId) -> Result<Option<Settlement>, StoreError>;

    /// Append events and apply writes atomically. Returns the stored events.
    fn commit(&self, commit: Commit) -> Result<Vec<Event>, StoreError>;
}
