//! Authenticated venue REST client.
//!
//! Single entry point for all venue REST calls. Every call passes through the
//! dual-bucket [`RateLimiter`] and the [`Signer`], and is retried up to three
//! times on transient failures with jittered exponential backoff (100ms,
//! 400ms, 1.6s). This is also the cents↔dollar boundary: callers deal only in
//! decimal dollars and contract counts.

pub mod model;
pub mod rate_limit;

use chrono::{DateTime, Utc};
use rand::Rng;
use reqwest::{Method, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::Signer;
use crate::domain::{OrderStatus, Side};
use crate::error::RestError;
use model::*;
use rate_limit::{RateLimiter, RequestKind};

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
/// Total tries per logical call: one initial attempt plus three retries.
const MAX_ATTEMPTS: u32 = 4;
/// Base backoff; grows 4x per attempt (100ms, 400ms, 1.6s).
const BACKOFF_BASE_MS: u64 = 100;
/// Trailing window for the API error-rate breaker.
const ERROR_WINDOW: usize = 100;
/// Path prefix included in the signed message.
const SIGN_PREFIX: &str = "/trade-api/v2";

/// A market as returned by `list_markets`, converted to internal units.
#[derive(Debug, Clone)]
pub struct MarketInfo {
    pub ticker: String,
    pub title: String,
    pub active: bool,
    pub close_time: Option<DateTime<Utc>>,
    pub volume_24h: Decimal,
    pub liquidity: Decimal,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub last_price: Option<Decimal>,
}

/// Result of submitting an order.
#[derive(Debug, Clone)]
pub struct SubmittedOrder {
    pub venue_id: String,
    /// Contracts actually requested after rounding down.
    pub contracts: u32,
    /// Dollar cost of those contracts at the limit price.
    pub cost: Decimal,
}

/// Venue-side view of an order, in internal units.
#[derive(Debug, Clone)]
pub struct VenueOrder {
    pub venue_id: String,
    pub client_order_id: Option<Uuid>,
    pub ticker: String,
    pub side: Side,
    /// `None` when the venue reported a status this build does not know.
    pub status: Option<OrderStatus>,
    pub price: Option<Decimal>,
    pub contracts: u32,
    pub filled_contracts: u32,
}

impl From<ApiOrder> for VenueOrder {
    fn from(order: ApiOrder) -> Self {
        let side = if order.action == "buy" { Side::Buy } else { Side::Sell };
        Self {
            venue_id: order.order_id.clone(),
            client_order_id: order
                .client_order_id
                .as_deref()
                .and_then(|id| Uuid::parse_str(id).ok()),
            ticker: order.ticker.clone(),
            side,
            status: order.status(),
            price: order.price_dollars(),
            contracts: order.count.unwrap_or(0),
            filled_contracts: order.filled_count(),
        }
    }
}

/// Top-of-book depth for one market, prices in dollars.
#[derive(Debug, Clone, Default)]
pub struct RestOrderBook {
    pub yes: Vec<(Decimal, u32)>,
    pub no: Vec<(Decimal, u32)>,
}

/// Authenticated REST client with dual rate limiting and retry.
#[derive(Debug)]
pub struct RestClient {
    http: reqwest::Client,
    signer: Signer,
    limiter: RateLimiter,
    base_url: String,
    /// Trailing call outcomes (true = error) for the API-error breaker.
    window: Mutex<VecDeque<bool>>,
    total_calls: Mutex<u64>,
}

impl RestClient {
    pub fn new(
        base_url: impl Into<String>,
        signer: Signer,
        read_rate: u32,
        write_rate: u32,
    ) -> Result<Self, RestError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RestError::Request(e.to_string()))?;

        Ok(Self {
            http,
            signer,
            limiter: RateLimiter::new(read_rate, write_rate),
            base_url: base_url.into(),
            window: Mutex::new(VecDeque::with_capacity(ERROR_WINDOW)),
            total_calls: Mutex::new(0),
        })
    }

    /// Error rate over the trailing window of calls, in [0, 1].
    pub fn error_rate(&self) -> f64 {
        let window = self.window.lock().expect("window lock");
        if window.is_empty() {
            return 0.0;
        }
        let errors = window.iter().filter(|&&e| e).count();
        errors as f64 / window.len() as f64
    }

    /// Total REST calls issued since startup.
    pub fn total_calls(&self) -> u64 {
        *self.total_calls.lock().expect("counter lock")
    }

    /// Current rate-limiter fill levels (read, write).
    pub async fn limiter_fill_levels(&self) -> (f64, f64) {
        self.limiter.fill_levels().await
    }

    fn record_outcome(&self, error: bool) {
        let mut window = self.window.lock().expect("window lock");
        if window.len() == ERROR_WINDOW {
            window.pop_front();
        }
        window.push_back(error);
        *self.total_calls.lock().expect("counter lock") += 1;
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T, RestError> {
        let kind = if method == Method::GET { RequestKind::Read } else { RequestKind::Write };

        let mut last_err = RestError::Request("no attempt made".into());
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let base = BACKOFF_BASE_MS * 4u64.pow(attempt - 1);
                let jitter = rand::thread_rng().gen_range(0..=base / 2);
                tokio::time::sleep(Duration::from_millis(base + jitter)).await;
            }

            self.limiter.acquire(kind).await;

            match self.attempt::<T>(&method, path, body.as_ref()).await {
                Ok(value) => {
                    self.limiter.record_success(kind).await;
                    self.record_outcome(false);
                    return Ok(value);
                }
                Err(err) => {
                    if matches!(err, RestError::RateLimited) {
                        self.limiter.penalize(kind).await;
                    }
                    let retryable = err.is_retryable();
                    warn!(
                        %path,
                        attempt = attempt + 1,
                        error = %err,
                        retryable,
                        "rest call failed"
                    );
                    last_err = err;
                    if !retryable {
                        break;
                    }
                }
            }
        }

        self.record_outcome(true);
        Err(last_err)
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        method: &Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<T, RestError> {
        // The signature covers the full venue path, query string excluded.
        let sign_path = format!("{}{}", SIGN_PREFIX, path.split('?').next().unwrap_or(path));
        let headers = self
            .signer
            .sign(method.as_str(), &sign_path)
            .map_err(|e| RestError::Request(e.to_string()))?;

        let url = format!("{}{}", self.base_url, path);
        let mut builder = self.http.request(method.clone(), &url);
        for (name, value) in headers.pairs() {
            builder = builder.header(name, value);
        }
        if let Some(json) = body {
            builder = builder.json(json);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                RestError::Timeout
            } else {
                RestError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RestError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RestError::Api { status: status.as_u16(), body });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RestError::Parse(e.to_string()))
    }

    /// Fetch all open markets, following pagination until exhausted.
    pub async fn list_markets(&self) -> Result<Vec<MarketInfo>, RestError> {
        let mut markets = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let path = match &cursor {
                Some(c) => format!("/markets?limit=200&status=open&cursor={}", c),
                None => "/markets?limit=200&status=open".to_string(),
            };
            let response: ApiMarketsResponse = self.request(Method::GET, &path, None).await?;

            for market in response.markets {
                markets.push(MarketInfo {
                    ticker: market.ticker.clone(),
                    title: market.title.clone(),
                    active: market.status == "open" || market.status == "active",
                    close_time: market
                        .close_time
                        .as_deref()
                        .and_then(|t| t.parse::<DateTime<Utc>>().ok()),
                    volume_24h: Decimal::from(market.volume),
                    liquidity: Decimal::from(market.liquidity),
                    best_bid: market.yes_bid.map(cents_to_dollars),
                    best_ask: market.yes_ask.map(cents_to_dollars),
                    last_price: market.last_price.map(cents_to_dollars),
                });
            }

            match response.cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }

        debug!(count = markets.len(), "listed venue markets");
        Ok(markets)
    }

    /// Fetch top-of-book depth for a market.
    pub async fn get_orderbook(&self, ticker: &str) -> Result<RestOrderBook, RestError> {
        let path = format!("/markets/{}/orderbook?depth=8", ticker);
        let response: ApiOrderbookResponse = self.request(Method::GET, &path, None).await?;

        let convert = |levels: Vec<(u32, u32)>| {
            levels
                .into_iter()
                .map(|(price, count)| (cents_to_dollars(price), count))
                .collect()
        };

        Ok(RestOrderBook {
            yes: convert(response.orderbook.yes),
            no: convert(response.orderbook.no),
        })
    }

    /// Submit a limit order. `price` is in dollars; `size` in dollars is
    /// rounded down to a whole contract count at the venue boundary.
    pub async fn submit_order(
        &self,
        ticker: &str,
        side: Side,
        price: Decimal,
        size: Decimal,
        client_id: Uuid,
    ) -> Result<SubmittedOrder, RestError> {
        if price <= Decimal::ZERO {
            return Err(RestError::Validation(format!("non-positive price {}", price)));
        }
        let contracts = (size / price).floor().to_u32().unwrap_or(0);
        if contracts == 0 {
            return Err(RestError::Validation(format!(
                "size {} at price {} rounds to zero contracts",
                size, price
            )));
        }

        let payload = ApiCreateOrder {
            ticker: ticker.to_string(),
            action: match side {
                Side::Buy => "buy".to_string(),
                Side::Sell => "sell".to_string(),
            },
            side: "yes".to_string(),
            order_type: "limit".to_string(),
            count: contracts,
            yes_price: dollars_to_cents(price),
            client_order_id: client_id.to_string(),
        };

        let response: ApiOrderResponse = self
            .request(
                Method::POST,
                "/portfolio/orders",
                Some(serde_json::to_value(&payload).map_err(|e| RestError::Parse(e.to_string()))?),
            )
            .await?;

        let cost = (price * Decimal::from(contracts)).round_dp(2);
        Ok(SubmittedOrder {
            venue_id: response.order.order_id,
            contracts,
            cost,
        })
    }

    /// Cancel an order. Idempotent: a 404 (already gone) is success.
    pub async fn cancel_order(&self, venue_id: &str) -> Result<(), RestError> {
        let path = format!("/portfolio/orders/{}", venue_id);
        match self.request::<ApiCancelResponse>(Method::DELETE, &path, None).await {
            Ok(_) => Ok(()),
            Err(RestError::Api { status: 404, .. }) => {
                debug!(%venue_id, "cancel of missing order treated as success");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Fetch the current status of one order.
    pub async fn get_order(&self, venue_id: &str) -> Result<VenueOrder, RestError> {
        let path = format!("/portfolio/orders/{}", venue_id);
        let response: ApiOrderResponse = self.request(Method::GET, &path, None).await?;
        Ok(response.order.into())
    }

    /// Fetch all resting orders. Used at startup and after reconnects.
    pub async fn get_active_orders(&self) -> Result<Vec<VenueOrder>, RestError> {
        let mut orders = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let path = match &cursor {
                Some(c) => format!("/portfolio/orders?status=resting&cursor={}", c),
                None => "/portfolio/orders?status=resting".to_string(),
            };
            let response: ApiOrdersResponse = self.request(Method::GET, &path, None).await?;
            orders.extend(response.orders.into_iter().map(VenueOrder::from));

            match response.cursor {
                Some(c) if !c.is_empty() => cursor = Some(c),
                _ => break,
            }
        }

        Ok(orders)
    }

    /// Fetch the account cash balance in dollars.
    pub async fn get_balance(&self) -> Result<Decimal, RestError> {
        let response: ApiBalanceResponse =
            self.request(Method::GET, "/portfolio/balance", None).await?;
        Ok(Decimal::from(response.balance) / Decimal::ONE_HUNDRED)
    }
}
