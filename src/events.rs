// 8.0: every state change is an event. the per-session event sequence is the source
// of truth; every projection can be rebuilt by folding it (see replay.rs).
// ids and sequence numbers are assigned by the store at commit time.

use crate::allocation::Holdings;
use crate::order::Order;
use crate::price_feed::PriceSnapshot;
use crate::rfq::{Quote, Rfq};
use crate::session::{Participant, Session};
use crate::settlement::Settlement;
use crate::types::{EventId, OrderId, ParticipantId, Price, SessionId, Timestamp};
use crate::trade::Trade;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub session_id: SessionId,
    /// Strictly increasing per session, starting at 0.
    pub sequence: u64,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(session_id: SessionId, sequence: u64, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            session_id,
            sequence,
            timestamp,
            payload,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    // Session events
    SessionCreated(SessionCreatedEvent),
    ParticipantJoined(ParticipantJoinedEvent),
    SessionStarted(SessionStartedEvent),
    SessionSettled(SessionSettledEvent),

    // Allocation events
    InitialAllocationAssigned(AllocationAssignedEvent),

    // Market data
    PriceTick(PriceTickEvent),

    // Bilateral trading
    RfqRequested(RfqRequestedEvent),
    QuoteProvided(QuoteProvidedEvent),
    TradeExecuted(TradeExecutedEvent),

    // Order book
    OrderPlaced(OrderPlacedEvent),
    OrderCancelled(OrderCancelledEvent),
    OrderMatched(OrderMatchedEvent),
    OrderRejected(OrderRejectedEvent),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::SessionCreated(_) => EventType::SessionCreated,
            EventPayload::ParticipantJoined(_) => EventType::ParticipantJoined,
            EventPayload::SessionStarted(_) => EventType::SessionStarted,
            EventPayload::SessionSettled(_) => EventType::SessionSettled,
            EventPayload::InitialAllocationAssigned(_) => EventType::InitialAllocationAssigned,
            EventPayload::PriceTick(_) => EventType::PriceTick,
            EventPayload::RfqRequested(_) => EventType::RfqRequested,
            EventPayload::QuoteProvided(_) => EventType::QuoteProvided,
            EventPayload::TradeExecuted(_) => EventType::TradeExecuted,
            EventPayload::OrderPlaced(_) => EventType::OrderPlaced,
            EventPayload::OrderCancelled(_) => EventType::OrderCancelled,
            EventPayload::OrderMatched(_) => EventType::OrderMatched,
            EventPayload::OrderRejected(_) => EventType::OrderRejected,
        }
    }
}

/// Payload discriminant, for filtering and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    SessionCreated,
    ParticipantJoined,
    SessionStarted,
    SessionSettled,
    InitialAllocationAssigned,
    PriceTick,
    RfqRequested,
    QuoteProvided,
    TradeExecuted,
    OrderPlaced,
    OrderCancelled,
    OrderMatched,
    OrderRejected,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SessionCreated => "SESSION_CREATED",
            EventType::ParticipantJoined => "PARTICIPANT_JOINED",
            EventType::SessionStarted => "SESSION_STARTED",
            EventType::SessionSettled => "SESSION_SETTLED",
            EventType::InitialAllocationAssigned => "INITIAL_ALLOCATION_ASSIGNED",
            EventType::PriceTick => "PRICE_TICK",
            EventType::RfqRequested => "RFQ_REQUESTED",
            EventType::QuoteProvided => "QUOTE_PROVIDED",
            EventType::TradeExecuted => "TRADE_EXECUTED",
            EventType::OrderPlaced => "ORDER_PLACED",
            EventType::OrderCancelled => "ORDER_CANCELLED",
            EventType::OrderMatched => "ORDER_MATCHED",
            EventType::OrderRejected => "ORDER_REJECTED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCreatedEvent {
    pub session: Session,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantJoinedEvent {
    pub participant: Participant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartedEvent {
    pub t1: Timestamp,
    pub t2: Option<Timestamp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettledEvent {
    pub settlement: Settlement,
}

/// One per participant. `basket` is the conservation target in force, so a
/// basket derived from these allocations survives replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationAssignedEvent {
    pub participant_id: ParticipantId,
    pub holdings: Holdings,
    pub basket: Vec<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTickEvent {
    pub snapshot: PriceSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfqRequestedEvent {
    pub rfq: Rfq,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteProvidedEvent {
    pub quote: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeExecutedEvent {
    pub trade: Trade,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlacedEvent {
    pub order: Order,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelledEvent {
    pub order_id: OrderId,
    pub participant: ParticipantId,
}

/// A resting sell that no longer had the holdings to cover it when it came up to trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRejectedEvent {
    pub order_id: OrderId,
    pub participant: ParticipantId,
}

/// One fill. The buy and sell order ids travel in the trade origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderMatchedEvent {
    pub trade: Trade,
    pub price: Price,
    pub quantity: Decimal,
}
