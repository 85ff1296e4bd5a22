//! Terminal settlement.

use super::core::Ledger;
use super::results::LedgerError;
use crate::events::{EventPayload, SessionSettledEvent};
use crate::notify::NotificationKind;
use crate::settlement::Settlement;
use crate::store::{LedgerStore, ProjectionWrite};
use crate::types::{SessionId, Timestamp};
use tracing::{info, instrument, warn};

impl<S: LedgerStore> Ledger<S> {
    /// Pay every participant their declared holdings at the latest prices and
    /// close the session.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn settle(&self, session_id: &SessionId) -> Result<Settlement, LedgerError> {
        self.locks.with(session_id, || {
            let mut session = self.load_session(session_id)?;
            session.ensure_mutable()?;

            let snapshot = self
                .store
                .latest_prices(session_id)?
                .ok_or_else(|| LedgerError::NoPrices(session_id.clone()))?;
            if let Some(leg) = snapshot.first_missing(&session.legs) {
                return Err(LedgerError::MissingPrice(leg.clone()));
            }

            let allocations = self.store.allocations(session_id)?;
            if allocations.is_empty() {
                return Err(LedgerError::NoAllocations(session_id.clone()));
            }

            let now = Timestamp::now();
            let settlement = Settlement::compute(
                session_id.clone(),
                &session.legs,
                &session.basket(),
                &allocations,
                &snapshot.prices,
                self.config.settlement_tolerance,
                now,
            )
            .map_err(|violation| {
                warn!(%violation, "settlement rejected");
                LedgerError::from(violation)
            })?;
            session.mark_settled()?;

            let commit = self
                .begin(session_id, now)?
                .event(EventPayload::SessionSettled(SessionSettledEvent {
                    settlement: settlement.clone(),
                }))
                .write(ProjectionWrite::PutSettlement(settlement.clone()))
                .write(ProjectionWrite::PutSession(session.clone()));
            self.commit(commit)?;

            info!(
                session_id = %session_id,
                participants = settlement.payouts.len(),
                total = %settlement.total_payout(),
                "session settled"
            );
            self.publish(session_id, NotificationKind::SessionSettled, &settlement, now);
            self.publish(session_id, NotificationKind::SessionStatus, &session, now);
            Ok(settlement)
        })
    }
}
