//! The executor↔venue boundary.
//!
//! [`OrderGateway`] is the capability set the executor needs from a venue:
//! submit a limit order, cancel by venue id. The live implementation wraps
//! the REST client; the paper implementation simulates matching against
//! market updates. Everything downstream of this trait (order tracking,
//! position lifecycle, accounting, risk) runs identically in both modes.

use rust_decimal::Decimal;
use std::sync::Arc;

use crate::domain::{Order, OwnOrderEvent};
use crate::error::RestError;
use crate::market::Market;
use crate::rest::RestClient;

/// Venue acknowledgement of a submitted order.
#[derive(Debug, Clone)]
pub struct Submission {
    pub venue_id: String,
    /// Contracts requested after rounding down at the boundary.
    pub contracts: u32,
    /// Dollar cost of those contracts at the limit price.
    pub cost: Decimal,
}

/// Order placement/cancel capability, implemented by live and paper venues.
pub trait OrderGateway {
    /// Submit a limit order. The gateway converts dollars to contract
    /// counts; rejects sizes that round to zero contracts.
    fn submit(
        &mut self,
        order: &Order,
    ) -> impl std::future::Future<Output = Result<Submission, RestError>> + Send;

    /// Cancel by venue id. Idempotent: cancelling a missing order succeeds.
    fn cancel(
        &mut self,
        venue_id: &str,
    ) -> impl std::future::Future<Output = Result<(), RestError>> + Send;

    /// Called on every market update. The paper gateway matches resting
    /// orders here; the live venue does its own matching, so the default
    /// produces nothing.
    fn on_market_update(&mut self, _market: &Market) -> Vec<OwnOrderEvent> {
        Vec::new()
    }
}

/// Live gateway backed by the venue REST client.
#[derive(Debug, Clone)]
pub struct LiveGateway {
    rest: Arc<RestClient>,
}

impl LiveGateway {
    pub fn new(rest: Arc<RestClient>) -> Self {
        Self { rest }
    }
}

impl OrderGateway for LiveGateway {
    async fn submit(&mut self, order: &Order) -> Result<Submission, RestError> {
        let submitted = self
            .rest
            .submit_order(
                &order.ticker,
                order.side,
                order.price,
                order.size,
                order.client_id,
            )
            .await?;
        Ok(Submission {
            venue_id: submitted.venue_id,
            contracts: submitted.contracts,
            cost: submitted.cost,
        })
    }

    async fn cancel(&mut self, venue_id: &str) -> Result<(), RestError> {
        self.rest.cancel_order(venue_id).await
    }
}
