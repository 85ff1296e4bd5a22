//! Notification port.
//!
//! Fan-out is best effort and at most once. A notifier never reports failure
//! back to the ledger, so a committed mutation can never be rolled back or
//! blocked by a slow or missing subscriber.

use crate::types::{SessionId, Timestamp};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Per-session channel depth. Receivers that fall further behind lose messages.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SessionStatus,
    ParticipantJoined,
    AllocationUpdate,
    PriceUpdate,
    RfqCreated,
    QuoteProvided,
    TradeExecuted,
    OrderPlaced,
    OrderCancelled,
    OrderMatched,
    OrderRejected,
    SessionSettled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub session_id: SessionId,
    pub payload: serde_json::Value,
    pub timestamp: Timestamp,
}

impl Notification {
    pub fn new(kind: NotificationKind, session_id: SessionId, payload: serde_json::Value, timestamp: Timestamp) -> Self {
        Self {
            kind,
            session_id,
            payload,
            timestamp,
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, session_id: &SessionId, notification: Notification);
}

/// Drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _session_id: &SessionId, _notification: Notification) {}
}

/// One `tokio::sync::broadcast` channel per session.
#[derive(Debug)]
pub struct BroadcastNotifier {
    channels: DashMap<SessionId, broadcast::Sender<Notification>>,
    capacity: usize,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, session_id: &SessionId) -> broadcast::Receiver<Notification> {
        self.channels
            .entry(session_id.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    pub fn subscriber_count(&self, session_id: &SessionId) -> usize {
        self.channels
            .get(session_id)
            .map_or(0, |tx| tx.receiver_count())
    }

    /// Sessions that currently hold a channel.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, session_id: &SessionId, notification: Notification) {
        let delivered = match self.channels.get(session_id) {
            Some(tx) => tx.send(notification).is_ok(),
            None => {
                trace!(session_id = %session_id, "no subscribers, notification dropped");
                return;
            }
        };

        // send only fails once every receiver is gone
        if !delivered {
            self.channels.remove_if(session_id, |_, tx| tx.receiver_count() == 0);
            debug!(session_id = %session_id, "pruned channel with no subscribers");
        }
    }
}
