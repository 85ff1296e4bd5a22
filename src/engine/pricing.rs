//! Price ticks from the external feed.

use super::core::Ledger;
use super::results::LedgerError;
use crate::events::{EventPayload, PriceTickEvent};
use crate::notify::NotificationKind;
use crate::price_feed::PriceSnapshot;
use crate::store::{LedgerStore, ProjectionWrite};
use crate::types::{Leg, SessionId, Timestamp};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

impl<S: LedgerStore> Ledger<S> {
    /// Record a full or partial snapshot. It replaces the previous one.
    #[instrument(skip(self, prices), fields(session_id = %session_id, legs = prices.len()))]
    pub fn record_prices(
        &self,
        session_id: &SessionId,
        prices: BTreeMap<Leg, Decimal>,
    ) -> Result<PriceSnapshot, LedgerError> {
        self.locks.with(session_id, || {
            let session = self.load_session(session_id)?;
            session.ensure_mutable()?;

            let now = Timestamp::now();
            let snapshot = PriceSnapshot::from_tick(&prices, &session.legs, now)?;

            let commit = self
                .begin(session_id, now)?
                .event(EventPayload::PriceTick(PriceTickEvent {
                    snapshot: snapshot.clone(),
                }))
                .write(ProjectionWrite::PutPrices(snapshot.clone()));
            self.commit(commit)?;

            debug!(session_id = %session_id, covers_all = snapshot.covers(&session.legs), "prices recorded");
            self.publish(session_id, NotificationKind::PriceUpdate, &snapshot, now);
            Ok(snapshot)
        })
    }
}
