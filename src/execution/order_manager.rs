//! In-memory order store.
//!
//! Keyed by client id and venue id. Consumes fill and order-update events,
//! normalizing venue statuses and keeping `filled_size ≤ size`. The order
//! manager only observes: it never submits or cancels, so fill/cancel races
//! resolve in exactly one place (the executor).

use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{Order, OrderPurpose, OrderStatus};

/// Outcome of applying a venue event to an order.
#[derive(Debug, Clone)]
pub struct OrderChange {
    pub client_id: Uuid,
    pub purpose: OrderPurpose,
    pub position_id: Option<Uuid>,
    pub status: OrderStatus,
    /// True when this event moved the order into a terminal status.
    pub became_terminal: bool,
}

#[derive(Debug, Default)]
pub struct OrderManager {
    orders: HashMap<Uuid, Order>,
    by_venue: HashMap<String, Uuid>,
}

impl OrderManager {
    /// Track a freshly-created order.
    pub fn insert(&mut self, order: Order) {
        debug!(
            client_id = %order.client_id,
            ticker = %order.ticker,
            side = ?order.side,
            price = %order.price,
            size = %order.size,
            purpose = ?order.purpose,
            "tracking order"
        );
        self.orders.insert(order.client_id, order);
    }

    /// Record venue acknowledgement of a submit.
    pub fn mark_submitted(&mut self, client_id: Uuid, venue_id: String, contracts: u32) {
        if let Some(order) = self.orders.get_mut(&client_id) {
            order.venue_id = Some(venue_id.clone());
            order.contracts = contracts;
            order.submitted_at = Some(chrono::Utc::now());
            order.apply_status(OrderStatus::Open);
            self.by_venue.insert(venue_id, client_id);
        }
    }

    /// Record a local rejection (submit failed).
    pub fn mark_rejected(&mut self, client_id: Uuid) {
        if let Some(order) = self.orders.get_mut(&client_id) {
            order.apply_status(OrderStatus::Rejected);
        }
    }

    /// Record a locally-confirmed cancel (the REST call succeeded, so we do
    /// not wait for the stream echo).
    pub fn mark_cancelled(&mut self, client_id: Uuid) {
        if let Some(order) = self.orders.get_mut(&client_id) {
            order.apply_status(OrderStatus::Cancelled);
        }
    }

    pub fn get(&self, client_id: &Uuid) -> Option<&Order> {
        self.orders.get(client_id)
    }

    pub fn by_venue_id(&self, venue_id: &str) -> Option<&Order> {
        self.by_venue.get(venue_id).and_then(|id| self.orders.get(id))
    }

    /// Apply a fill of `count` contracts reported by the stream.
    pub fn apply_fill(&mut self, venue_id: &str, count: u32) -> Option<OrderChange> {
        let client_id = *self.by_venue.get(venue_id)?;
        let order = self.orders.get_mut(&client_id)?;

        if order.status.is_terminal() {
            // Late echo of a fill we already settled; idempotent.
            debug!(%venue_id, "fill for terminal order ignored");
            return None;
        }

        let was_terminal = order.status.is_terminal();
        order.record_fill(count);
        info!(
            client_id = %order.client_id,
            ticker = %order.ticker,
            filled = order.filled_contracts,
            of = order.contracts,
            status = ?order.status,
            "order fill applied"
        );

        Some(OrderChange {
            client_id,
            purpose: order.purpose,
            position_id: order.position_id,
            status: order.status,
            became_terminal: !was_terminal && order.status.is_terminal(),
        })
    }

    /// Apply an order-update (status change) reported by the stream.
    pub fn apply_update(
        &mut self,
        venue_id: &str,
        status: OrderStatus,
        remaining_contracts: u32,
    ) -> Option<OrderChange> {
        let client_id = *self.by_venue.get(venue_id)?;
        let order = self.orders.get_mut(&client_id)?;

        if order.status.is_terminal() {
            debug!(%venue_id, ?status, "update for terminal order ignored");
            return None;
        }

        // Fill progress only ever moves forward.
        let implied_filled = order.contracts.saturating_sub(remaining_contracts);
        if implied_filled > order.filled_contracts {
            order.record_fill(implied_filled - order.filled_contracts);
        }

        let was_terminal = order.status.is_terminal();
        if !order.apply_status(status) {
            return None;
        }

        Some(OrderChange {
            client_id,
            purpose: order.purpose,
            position_id: order.position_id,
            status: order.status,
            became_terminal: !was_terminal && order.status.is_terminal(),
        })
    }

    /// All non-terminal orders.
    pub fn active(&self) -> impl Iterator<Item = &Order> {
        self.orders.values().filter(|o| o.is_active())
    }

    /// Whether a non-terminal entry order exists for this ticker.
    pub fn has_pending_entry(&self, ticker: &str) -> bool {
        self.orders.values().any(|o| {
            o.ticker == ticker && o.purpose == OrderPurpose::Entry && o.is_active()
        })
    }

    /// Drop terminal orders older than the given count, keeping memory flat.
    pub fn prune_terminal(&mut self, keep: usize) {
        let mut terminal: Vec<(Uuid, chrono::DateTime<chrono::Utc>)> = self
            .orders
            .values()
            .filter(|o| !o.is_active())
            .map(|o| (o.client_id, o.created_at))
            .collect();
        if terminal.len() <= keep {
            return;
        }
        terminal.sort_by_key(|(_, created)| *created);
        let excess = terminal.len() - keep;
        for (client_id, _) in terminal.into_iter().take(excess) {
            if let Some(order) = self.orders.remove(&client_id) {
                if let Some(venue_id) = order.venue_id {
                    self.by_venue.remove(&venue_id);
                }
            }
        }
        warn!(removed = excess, "pruned terminal orders");
    }
}
