//! Bilateral trading: RFQ, quote, accept.

use super::core::Ledger;
use super::results::LedgerError;
use crate::allocation::{declared_view, delta, AllocationMap, Holdings};
use crate::events::{EventPayload, QuoteProvidedEvent, RfqRequestedEvent, TradeExecutedEvent};
use crate::invariants::{self, ProposedTrade};
use crate::notify::NotificationKind;
use crate::rfq::{Quote, Rfq};
use crate::store::{LedgerStore, ProjectionWrite};
use crate::trade::Trade;
use crate::types::{Leg, ParticipantId, QuoteId, RfqId, SessionId, Timestamp};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

impl<S: LedgerStore> Ledger<S> {
    /// Ask the session for `amount_from` of `leg_from` in exchange for `leg_to`.
    #[instrument(skip(self), fields(session_id = %session_id, requester = %requester))]
    pub fn create_rfq(
        &self,
        session_id: &SessionId,
        requester: ParticipantId,
        leg_from: Leg,
        leg_to: Leg,
        amount_from: Decimal,
    ) -> Result<Rfq, LedgerError> {
        self.locks.with(session_id, || {
            let session = self.load_session(session_id)?;
            session.ensure_mutable()?;
            self.ensure_participant(session_id, &requester)?;
            self.ensure_leg(&session, &leg_from)?;
            self.ensure_leg(&session, &leg_to)?;

            let now = Timestamp::now();
            let rfq = Rfq::new(session_id.clone(), requester, leg_from, leg_to, amount_from, now)?;

            let commit = self
                .begin(session_id, now)?
                .event(EventPayload::RfqRequested(RfqRequestedEvent { rfq: rfq.clone() }))
                .write(ProjectionWrite::PutRfq(rfq.clone()));
            self.commit(commit)?;

            info!(rfq_id = %rfq.id, leg_from = %rfq.leg_from, leg_to = %rfq.leg_to, amount = %rfq.amount_from, "rfq created");
            self.publish(session_id, NotificationKind::RfqCreated, &rfq, now);
            Ok(rfq)
        })
    }

    /// Attach a quote. The RFQ stays open for more.
    #[instrument(skip(self), fields(rfq_id = %rfq_id, quoter = %quoter))]
    pub fn provide_quote(&self, rfq_id: &RfqId, quoter: ParticipantId, rate: Decimal) -> Result<Quote, LedgerError> {
        let session_id = self.rfq(rfq_id)?.session_id;

        self.locks.with(&session_id, || {
            let rfq = self.rfq(rfq_id)?;
            let session = self.load_session(&session_id)?;
            session.ensure_mutable()?;
            self.ensure_participant(&session_id, &quoter)?;

            let now = Timestamp::now();
            let quote = Quote::new(&rfq, quoter, rate, now)?;

            let commit = self
                .begin(&session_id, now)?
                .event(EventPayload::QuoteProvided(QuoteProvidedEvent { quote: quote.clone() }))
                .write(ProjectionWrite::PutQuote(quote.clone()));
            self.commit(commit)?;

            info!(quote_id = %quote.id, rate = %quote.rate, "quote provided");
            self.publish(&session_id, NotificationKind::QuoteProvided, &quote, now);
            Ok(quote)
        })
    }

    /// Execute the swap at the quote's rate. Feasibility is checked first, then
    /// zero-sum, conservation and non-negativity over the whole session.
    #[instrument(skip(self), fields(quote_id = %quote_id))]
    pub fn accept_quote(&self, quote_id: &QuoteId) -> Result<Trade, LedgerError> {
        let quote = self.quote(quote_id)?;
        let session_id = self.rfq(&quote.rfq_id)?.session_id;

        self.locks.with(&session_id, || {
            let mut rfq = self.rfq(&quote.rfq_id)?;
            let session = self.load_session(&session_id)?;
            session.ensure_mutable()?;
            rfq.ensure_open()?;

            let amount_to = quote.amount_to(rfq.amount_from)?;
            let before = self.store.allocations(&session_id)?;
            let tolerance = self.config.allocation_tolerance;

            let proposed = ProposedTrade {
                party_a: &rfq.requester,
                party_b: &quote.quoter,
                leg_from: &rfq.leg_from,
                leg_to: &rfq.leg_to,
                amount_from: rfq.amount_from,
                amount_to,
            };
            if let Err(violation) = invariants::trade_feasible(&before, &proposed, tolerance) {
                warn!(rfq_id = %rfq.id, %violation, "quote rejected");
                return Err(violation.into());
            }

            let now = Timestamp::now();
            let trade = Trade::bilateral(
                session_id.clone(),
                rfq.id,
                quote.id,
                rfq.requester.clone(),
                quote.quoter.clone(),
                rfq.leg_from.clone(),
                rfq.leg_to.clone(),
                rfq.amount_from,
                amount_to,
                now,
            );

            let mut after = before.clone();
            trade.apply_to(&mut after)?;

            let row = |allocs: &AllocationMap, p: &ParticipantId| -> Holdings {
                allocs.get(p).cloned().unwrap_or_default()
            };
            let delta_a = delta(&row(&before, &trade.participant_a), &row(&after, &trade.participant_a));
            let delta_b = delta(&row(&before, &trade.participant_b), &row(&after, &trade.participant_b));
            invariants::trade_zero_sum(&delta_a, &delta_b, &session.legs, tolerance)?;

            let declared = declared_view(&after, &session.legs);
            invariants::conservation(&declared, &session.basket(), tolerance)?;
            invariants::non_negative(&declared, tolerance)?;

            rfq.mark_executed()?;

            let commit = self
                .begin(&session_id, now)?
                .event(EventPayload::TradeExecuted(TradeExecutedEvent { trade: trade.clone() }))
                .write(ProjectionWrite::PutTrade(trade.clone()))
                .write(ProjectionWrite::PutRfq(rfq.clone()))
                .write(ProjectionWrite::SetHoldings {
                    participant_id: trade.participant_a.clone(),
                    holdings: row(&after, &trade.participant_a),
                })
                .write(ProjectionWrite::SetHoldings {
                    participant_id: trade.participant_b.clone(),
                    holdings: row(&after, &trade.participant_b),
                });
            self.commit(commit)?;

            info!(
                trade_id = %trade.id,
                requester = %trade.participant_a,
                quoter = %trade.participant_b,
                amount_from = %trade.amount_from,
                amount_to = %trade.amount_to,
                "quote accepted"
            );
            self.publish(&session_id, NotificationKind::TradeExecuted, &trade, now);
            self.publish(&session_id, NotificationKind::AllocationUpdate, &after, now);
            Ok(trade)
        })
    }
}
