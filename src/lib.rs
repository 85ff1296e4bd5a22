// session-ledger: multi-participant basket allocation market.
// event-sourced: every mutation appends events and updates projections in one
// commit, and only after the candidate state passes the invariant checks.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: ids, Leg, Price, Timestamp, tolerances
//   2.x  session.rs: session lifecycle, participants
//   3.x  allocation.rs: participant -> leg -> quantity projection math
//   4.x  invariants.rs: conservation, non-negativity, zero-sum, settlement sum
//   5.x  trade.rs: executed trades, bilateral or matched
//   5.1  rfq.rs: request-for-quote and quotes
//   6.x  order.rs: orders, continuous matching, book snapshots
//   7.x  settlement.rs: terminal payout
//   7.1  price_feed.rs: price snapshots from the external feed
//   8.x  events.rs: event log payloads
//   8.1  replay.rs: fold events back into state
//   9.x  store/: storage port + in-memory adapter
//   9.1  notify.rs: best-effort notification fan-out
//   10.x engine/: the Ledger service: sessions, trading, orders, pricing, settlement

// domain
pub mod allocation;
pub mod invariants;
pub mod order;
pub mod rfq;
pub mod session;
pub mod settlement;
pub mod trade;
pub mod types;

// event sourcing
pub mod events;
pub mod replay;

// service and ports
pub mod engine;
pub mod notify;
pub mod price_feed;
pub mod store;

// re exports for convenience
pub use allocation::{AllocationMap, Basket, Holdings};
pub use engine::{EngineConfig, ErrorKind, Ledger, LedgerError, OrderResult};
pub use events::{Event, EventPayload, EventType};
pub use invariants::InvariantViolation;
pub use notify::{BroadcastNotifier, Notification, NotificationKind, Notifier, NullNotifier};
pub use order::{BookEntry, Order, OrderBookSnapshot, OrderError, OrderRequest, OrderStatus, OrderType, PriceLevel};
pub use price_feed::{PriceFeedError, PriceSnapshot};
pub use replay::{replay, LedgerState, ReplayError};
pub use rfq::{Quote, Rfq, RfqError, RfqStatus};
pub use session::{EndMode, Participant, Session, SessionError, SessionSpec, SessionStatus, StartMode};
pub use settlement::Settlement;
pub use store::{Commit, InMemoryStore, LedgerStore, ProjectionWrite, StoreError};
pub use trade::{Trade, TradeOrigin};
pub use types::*;
