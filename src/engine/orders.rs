//! Order placement, matching and cancellation.

use super::core::Ledger;
use super::results::{LedgerError, OrderResult};
use crate::allocation::{declared_view, holding};
use crate::events::{EventPayload, OrderCancelledEvent, OrderMatchedEvent, OrderPlacedEvent, OrderRejectedEvent};
use crate::invariants;
use crate::notify::NotificationKind;
use crate::order::{match_orders, Order, OrderError, OrderRequest};
use crate::store::{LedgerStore, ProjectionWrite};
use crate::trade::Trade;
use crate::types::{Leg, OrderId, ParticipantId, Price, SessionId, Side, Timestamp};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, warn};

impl<S: LedgerStore> Ledger<S> {
    /// Place a limit order.
    pub fn place_limit_order(
        &self,
        session_id: &SessionId,
        participant: ParticipantId,
        asset: Leg,
        side: Side,
        quantity: Decimal,
        price: Price,
    ) -> Result<OrderResult, LedgerError> {
        self.place_order(session_id, OrderRequest::limit(participant, asset, side, quantity, price))
    }

    /// Place a market order.
    pub fn place_market_order(
        &self,
        session_id: &SessionId,
        participant: ParticipantId,
        asset: Leg,
        side: Side,
        quantity: Decimal,
    ) -> Result<OrderResult, LedgerError> {
        self.place_order(session_id, OrderRequest::market(participant, asset, side, quantity))
    }

    /// Rest the order and match its asset to a fixpoint. Placement, fills,
    /// rejections of uncovered resting sells and balance moves land in one commit.
    #[instrument(skip(self, request), fields(
        session_id = %session_id,
        participant = %request.participant,
        asset = %request.asset,
        side = %request.side,
    ))]
    pub fn place_order(&self, session_id: &SessionId, request: OrderRequest) -> Result<OrderResult, LedgerError> {
        self.locks.with(session_id, || {
            let session = self.load_session(session_id)?;
            session.ensure_active()?;
            self.ensure_participant(session_id, &request.participant)?;
            self.ensure_leg(&session, &request.asset)?;
            request.validate()?;

            let mut allocations = self.store.allocations(session_id)?;
            if request.side == Side::Sell {
                let held = holding(&allocations, &request.participant, &request.asset);
                if held < request.quantity {
                    warn!(held = %held, required = %request.quantity, "sell exceeds holdings");
                    return Err(OrderError::InsufficientHoldings {
                        participant: request.participant.clone(),
                        asset: request.asset.clone(),
                        held,
                        required: request.quantity,
                    }
                    .into());
                }
            }

            let now = Timestamp::now();
            let order = Order::from_request(session_id.clone(), request, now)?;
            let asset = order.asset.clone();

            let mut commit = self
                .begin(session_id, now)?
                .event(EventPayload::OrderPlaced(OrderPlacedEvent { order: order.clone() }))
                .write(ProjectionWrite::PutOrder(order.clone()));

            // 10.4: matching. the new order is the youngest, so it goes last.
            let mut book = self.store.open_orders(session_id, &asset)?;
            book.push(order.clone());
            let reference = self
                .store
                .latest_prices(session_id)?
                .and_then(|snapshot| snapshot.price(&asset));
            let asset_holdings: BTreeMap<ParticipantId, Decimal> = allocations
                .keys()
                .map(|p| (p.clone(), holding(&allocations, p, &asset)))
                .collect();
            let outcome = match_orders(book, reference, asset_holdings, now);

            let mut trades = Vec::with_capacity(outcome.fills.len());
            let mut touched: BTreeSet<ParticipantId> = BTreeSet::new();
            for fill in &outcome.fills {
                let trade = Trade::matched(
                    session_id.clone(),
                    fill.buy_order_id,
                    fill.sell_order_id,
                    fill.buyer.clone(),
                    fill.seller.clone(),
                    asset.clone(),
                    fill.quantity,
                    fill.price,
                    now,
                )?;
                trade.apply_to(&mut allocations)?;
                touched.insert(fill.buyer.clone());
                touched.insert(fill.seller.clone());

                debug!(trade_id = %trade.id, quantity = %fill.quantity, price = %fill.price, "orders matched");
                commit.push_event(EventPayload::OrderMatched(OrderMatchedEvent {
                    trade: trade.clone(),
                    price: fill.price,
                    quantity: fill.quantity,
                }));
                commit.push_write(ProjectionWrite::PutTrade(trade.clone()));
                trades.push(trade);
            }

            let mut rejected = Vec::with_capacity(outcome.rejected.len());
            for id in &outcome.rejected {
                if let Some(stale) = outcome.updated.iter().find(|o| o.id == *id) {
                    warn!(order_id = %stale.id, participant = %stale.participant, remaining = %stale.remaining(), "resting sell no longer covered, rejected");
                    commit.push_event(EventPayload::OrderRejected(OrderRejectedEvent {
                        order_id: stale.id,
                        participant: stale.participant.clone(),
                    }));
                    rejected.push(stale.clone());
                }
            }

            if !trades.is_empty() {
                let tolerance = self.config.allocation_tolerance;
                let declared = declared_view(&allocations, &session.legs);
                invariants::conservation(&declared, &session.basket(), tolerance)?;
                if let Err(violation) = invariants::non_negative(&declared, tolerance) {
                    warn!(%violation, "matching would leave a negative position");
                    return Err(violation.into());
                }
            }

            for updated in &outcome.updated {
                commit.push_write(ProjectionWrite::PutOrder(updated.clone()));
            }
            for participant in &touched {
                if let Some(holdings) = allocations.get(participant) {
                    commit.push_write(ProjectionWrite::SetHoldings {
                        participant_id: participant.clone(),
                        holdings: holdings.clone(),
                    });
                }
            }
            self.commit(commit)?;

            let placed = outcome
                .updated
                .iter()
                .find(|o| o.id == order.id)
                .cloned()
                .unwrap_or(order);

            info!(
                order_id = %placed.id,
                order_type = ?placed.order_type,
                quantity = %placed.quantity,
                filled = %placed.filled_quantity,
                status = ?placed.status,
                fills = trades.len(),
                rejected = rejected.len(),
                "order placed"
            );
            self.publish(session_id, NotificationKind::OrderPlaced, &placed, now);
            for trade in &trades {
                self.publish(session_id, NotificationKind::OrderMatched, trade, now);
            }
            for stale in &rejected {
                self.publish(session_id, NotificationKind::OrderRejected, stale, now);
            }
            if !trades.is_empty() {
                self.publish(session_id, NotificationKind::AllocationUpdate, &allocations, now);
            }

            Ok(OrderResult { order: placed, trades })
        })
    }

    /// PENDING or PARTIAL -> CANCELLED. Nothing was reserved, so no balances move.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub fn cancel_order(&self, order_id: &OrderId) -> Result<Order, LedgerError> {
        let session_id = self.order(order_id)?.session_id;

        self.locks.with(&session_id, || {
            let mut order = self.order(order_id)?;
            let session = self.load_session(&session_id)?;
            session.ensure_mutable()?;

            let now = Timestamp::now();
            order.cancel(now)?;

            let commit = self
                .begin(&session_id, now)?
                .event(EventPayload::OrderCancelled(OrderCancelledEvent {
                    order_id: order.id,
                    participant: order.participant.clone(),
                }))
                .write(ProjectionWrite::PutOrder(order.clone()));
            self.commit(commit)?;

            info!(session_id = %session_id, remaining = %order.remaining(), "order cancelled");
            self.publish(&session_id, NotificationKind::OrderCancelled, &order, now);
            Ok(order)
        })
    }
}
