//! Venue REST request/response models.
//!
//! Everything here speaks the venue's units: integer cents for prices,
//! integer contract counts for sizes. Conversion to internal decimal dollars
//! happens in the client, not in these types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::OrderStatus;

/// Convert a cents price (1-99) to decimal dollars.
pub fn cents_to_dollars(cents: u32) -> Decimal {
    Decimal::from(cents) / Decimal::ONE_HUNDRED
}

/// Convert a decimal dollar price to integer cents, clamped to [1, 99].
pub fn dollars_to_cents(price: Decimal) -> u32 {
    let cents = (price * Decimal::ONE_HUNDRED).round();
    let cents: i64 = cents.try_into().unwrap_or(1);
    cents.clamp(1, 99) as u32
}

/// Map a venue order status string onto the internal enum. An unrecognized
/// status is `None` and logged loudly: silently treating it as anything
/// would mask a venue API change.
pub fn map_status(status: &str) -> Option<OrderStatus> {
    match status {
        "resting" => Some(OrderStatus::Open),
        "pending" => Some(OrderStatus::Pending),
        "executed" => Some(OrderStatus::Filled),
        "canceled" | "cancelled" => Some(OrderStatus::Cancelled),
        "rejected" => Some(OrderStatus::Rejected),
        other => {
            warn!(status = %other, "unrecognized venue order status");
            None
        }
    }
}

/// Request body for POST /portfolio/orders.
#[derive(Debug, Clone, Serialize)]
pub struct ApiCreateOrder {
    pub ticker: String,
    pub action: String, // "buy" or "sell"
    pub side: String,   // always "yes": the agent trades the YES contract
    #[serde(rename = "type")]
    pub order_type: String, // "limit"
    pub count: u32,
    /// Price in cents (1-99).
    pub yes_price: u32,
    pub client_order_id: String,
}

/// Response from POST /portfolio/orders.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiOrderResponse {
    pub order: ApiOrder,
}

/// A venue order.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiOrder {
    pub order_id: String,
    pub ticker: String,
    pub status: String,
    pub action: String,
    pub side: String,
    pub yes_price: Option<u32>,
    pub count: Option<u32>,
    pub remaining_count: Option<u32>,
    #[serde(default)]
    pub client_order_id: Option<String>,
    pub created_time: Option<String>,
}

impl ApiOrder {
    /// Price in decimal dollars from the yes_price cents field.
    pub fn price_dollars(&self) -> Option<Decimal> {
        self.yes_price.map(cents_to_dollars)
    }

    /// Filled count = original count - remaining count.
    pub fn filled_count(&self) -> u32 {
        let total = self.count.unwrap_or(0);
        let remaining = self.remaining_count.unwrap_or(total);
        total.saturating_sub(remaining)
    }

    pub fn status(&self) -> Option<OrderStatus> {
        map_status(&self.status)
    }

    pub fn is_open(&self) -> bool {
        self.status == "resting"
    }
}

/// Response from GET /portfolio/orders.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiOrdersResponse {
    pub orders: Vec<ApiOrder>,
    pub cursor: Option<String>,
}

/// Response from DELETE /portfolio/orders/{id}.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiCancelResponse {
    pub order: ApiOrder,
    pub reduced_by: Option<u32>,
}

/// Response from GET /portfolio/balance. Balance is in cents.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiBalanceResponse {
    pub balance: i64,
}

/// A market summary from GET /markets.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiMarket {
    pub ticker: String,
    #[serde(default)]
    pub title: String,
    pub status: String,
    pub close_time: Option<String>,
    #[serde(default)]
    pub volume: i64,
    #[serde(default)]
    pub liquidity: i64,
    pub yes_bid: Option<u32>,
    pub yes_ask: Option<u32>,
    pub last_price: Option<u32>,
}

/// Response from GET /markets.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiMarketsResponse {
    pub markets: Vec<ApiMarket>,
    pub cursor: Option<String>,
}

/// Response from GET /markets/{ticker}/orderbook.
///
/// Levels are sparse `[price_cents, count]` pairs per side.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiOrderbookResponse {
    pub orderbook: ApiOrderbook,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiOrderbook {
    #[serde(default)]
    pub yes: Vec<(u32, u32)>,
    #[serde(default)]
    pub no: Vec<(u32, u32)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn cents_roundtrip_is_identity_in_range() {
        for cents in 1..=99u32 {
            assert_eq!(dollars_to_cents(cents_to_dollars(cents)), cents);
        }
    }

    #[test]
    fn dollars_to_cents_clamps() {
        assert_eq!(dollars_to_cents(dec!(0.001)), 1);
        assert_eq!(dollars_to_cents(dec!(1.50)), 99);
        assert_eq!(dollars_to_cents(dec!(0.91)), 91);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(map_status("resting"), Some(OrderStatus::Open));
        assert_eq!(map_status("executed"), Some(OrderStatus::Filled));
        assert_eq!(map_status("canceled"), Some(OrderStatus::Cancelled));
        assert_eq!(map_status("pending"), Some(OrderStatus::Pending));
        // Anything the venue invents later must surface, not pass as Open.
        assert_eq!(map_status("amended"), None);
    }

    #[test]
    fn api_order_filled_count() {
        let order: ApiOrder = serde_json::from_str(
            r#"{
                "order_id": "ord-1",
                "ticker": "KXTEST-MKT",
                "status": "resting",
                "action": "buy",
                "side": "yes",
                "yes_price": 91,
                "count": 109,
                "remaining_count": 59
            }"#,
        )
        .unwrap();

        assert_eq!(order.filled_count(), 50);
        assert_eq!(order.price_dollars(), Some(dec!(0.91)));
        assert!(order.is_open());
    }

    #[test]
    fn markets_response_decodes() {
        let response: ApiMarketsResponse = serde_json::from_str(
            r#"{
                "markets": [{
                    "ticker": "KXTEST-MKT",
                    "title": "Test market",
                    "status": "open",
                    "close_time": "2026-08-02T20:00:00Z",
                    "volume": 20000,
                    "liquidity": 600,
                    "yes_bid": 90,
                    "yes_ask": 91
                }],
                "cursor": null
            }"#,
        )
        .unwrap();

        assert_eq!(response.markets.len(), 1);
        assert!(response.cursor.is_none());
    }
}
