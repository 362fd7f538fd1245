//! Application configuration loaded from environment variables.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ConfigError;

const KALSHI_API_BASE: &str = "https://api.elections.kalshi.com/trade-api/v2";
const KALSHI_DEMO_API_BASE: &str = "https://demo-api.kalshi.co/trade-api/v2";
const KALSHI_WS_URL: &str = "wss://api.elections.kalshi.com/trade-api/ws/v2";
const KALSHI_DEMO_WS_URL: &str = "wss://demo-api.kalshi.co/trade-api/ws/v2";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Credentials ===
    /// Kalshi API key ID.
    pub kalshi_api_key_id: String,

    /// RSA private key as an inline PEM string.
    #[serde(default)]
    pub kalshi_private_key: Option<String>,

    /// Path to an RSA private key PEM file (used when the inline key is absent).
    #[serde(default)]
    pub kalshi_private_key_path: Option<String>,

    // === Strategy ===
    /// Minimum bid probability to enter (e.g. 0.85).
    #[serde(default = "default_entry_threshold")]
    pub entry_threshold: Decimal,

    /// Take-profit distance as a fraction of entry (e.g. 0.02).
    #[serde(default = "default_profit_target")]
    pub profit_target: Decimal,

    /// Stop-loss distance as a fraction of entry (e.g. 0.01).
    #[serde(default = "default_stop_loss")]
    pub stop_loss: Decimal,

    /// Maximum hours to hold a position before a timeout exit.
    #[serde(default = "default_max_hold_hours")]
    pub max_hold_hours: i64,

    /// Exit this many minutes before the market's scheduled close.
    #[serde(default = "default_close_buffer_minutes")]
    pub close_buffer_minutes: i64,

    /// Minimum dollar liquidity at the top of the bid ladder.
    #[serde(default = "default_min_liquidity")]
    pub min_liquidity: Decimal,

    /// Minimum 24h volume in dollars.
    #[serde(default = "default_min_volume")]
    pub min_volume: Decimal,

    /// Maximum relative bid-ask spread.
    #[serde(default = "default_max_spread")]
    pub max_spread: Decimal,

    // === Risk ===
    /// Max single position size as a fraction of balance.
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: Decimal,

    /// Max total exposure as a fraction of balance.
    #[serde(default = "default_max_exposure_pct")]
    pub max_exposure_pct: Decimal,

    /// Max concurrent open positions.
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,

    /// Minimum position size in dollars.
    #[serde(default = "default_min_position_dollars")]
    pub min_position_dollars: Decimal,

    /// Daily loss fraction that trips the daily-loss breaker.
    #[serde(default = "default_daily_loss_limit")]
    pub daily_loss_limit: Decimal,

    /// Consecutive losing trades that trip the streak breaker.
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,

    /// REST error rate (over the trailing window) that trips the API breaker.
    #[serde(default = "default_api_error_rate_limit")]
    pub api_error_rate_limit: f64,

    /// Stream silence in seconds that trips the disconnect breaker.
    #[serde(default = "default_stream_silence_s")]
    pub stream_silence_s: u64,

    /// Stream silence in seconds that forces an emergency exit of all positions.
    #[serde(default = "default_stream_force_exit_s")]
    pub stream_force_exit_s: u64,

    // === Venue ===
    /// Read (GET) requests per second.
    #[serde(default = "default_read_rate")]
    pub read_rate: u32,

    /// Write (POST/DELETE) requests per second.
    #[serde(default = "default_write_rate")]
    pub write_rate: u32,

    /// Use the demo venue instead of production.
    #[serde(default)]
    pub use_demo: bool,

    /// Seconds an entry order may rest unfilled before being cancelled.
    #[serde(default = "default_entry_timeout_s")]
    pub entry_timeout_s: u64,

    // === Surfaces ===
    /// Port for the health/status HTTP probe.
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Directory for trade/snapshot write intents (JSONL sink).
    #[serde(default = "default_persist_dir")]
    pub persist_dir: String,

    /// Log filter (tracing EnvFilter syntax).
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_entry_threshold() -> Decimal {
    Decimal::new(85, 2) // 0.85
}

fn default_profit_target() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

fn default_stop_loss() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_max_hold_hours() -> i64 {
    2
}

fn default_close_buffer_minutes() -> i64 {
    30
}

fn default_min_liquidity() -> Decimal {
    Decimal::new(500, 0)
}

fn default_min_volume() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_max_spread() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

fn default_max_position_pct() -> Decimal {
    Decimal::new(10, 2) // 0.10
}

fn default_max_exposure_pct() -> Decimal {
    Decimal::new(30, 2) // 0.30
}

fn default_max_positions() -> usize {
    5
}

fn default_min_position_dollars() -> Decimal {
    Decimal::new(50, 0)
}

fn default_daily_loss_limit() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_max_consecutive_losses() -> u32 {
    5
}

fn default_api_error_rate_limit() -> f64 {
    0.10
}

fn default_stream_silence_s() -> u64 {
    15
}

fn default_stream_force_exit_s() -> u64 {
    30
}

fn default_read_rate() -> u32 {
    20
}

fn default_write_rate() -> u32 {
    10
}

fn default_entry_timeout_s() -> u64 {
    60
}

fn default_health_port() -> u16 {
    8080
}

fn default_persist_dir() -> String {
    "./records".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from the environment, reading a `.env` file first.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-field sanity checks. Failure here refuses to start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kalshi_api_key_id.is_empty() {
            return Err(ConfigError::Invalid("KALSHI_API_KEY_ID is required".into()));
        }
        if self.kalshi_private_key.is_none() && self.kalshi_private_key_path.is_none() {
            return Err(ConfigError::Invalid(
                "one of KALSHI_PRIVATE_KEY or KALSHI_PRIVATE_KEY_PATH is required".into(),
            ));
        }
        if self.entry_threshold <= Decimal::ZERO || self.entry_threshold >= Decimal::ONE {
            return Err(ConfigError::Invalid(format!(
                "ENTRY_THRESHOLD must be in (0, 1), got {}",
                self.entry_threshold
            )));
        }
        if self.profit_target <= Decimal::ZERO || self.stop_loss <= Decimal::ZERO {
            return Err(ConfigError::Invalid(
                "PROFIT_TARGET and STOP_LOSS must be positive".into(),
            ));
        }
        if self.max_position_pct > self.max_exposure_pct {
            return Err(ConfigError::Invalid(format!(
                "MAX_POSITION_PCT ({}) must not exceed MAX_EXPOSURE_PCT ({})",
                self.max_position_pct, self.max_exposure_pct
            )));
        }
        if self.max_positions == 0 {
            return Err(ConfigError::Invalid("MAX_POSITIONS must be at least 1".into()));
        }
        if self.read_rate == 0 || self.write_rate == 0 {
            return Err(ConfigError::Invalid("rate limits must be at least 1/s".into()));
        }
        Ok(())
    }

    /// Active REST base URL.
    pub fn api_base_url(&self) -> &'static str {
        if self.use_demo {
            KALSHI_DEMO_API_BASE
        } else {
            KALSHI_API_BASE
        }
    }

    /// Active WebSocket URL.
    pub fn ws_url(&self) -> &'static str {
        if self.use_demo {
            KALSHI_DEMO_WS_URL
        } else {
            KALSHI_WS_URL
        }
    }

    pub fn max_hold(&self) -> chrono::Duration {
        chrono::Duration::hours(self.max_hold_hours)
    }

    pub fn close_buffer(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.close_buffer_minutes)
    }
}

/// A fully-populated config with documented defaults, for tests.
#[cfg(test)]
pub(crate) fn test_default() -> Config {
    Config {
        kalshi_api_key_id: "key-id".to_string(),
        kalshi_private_key: Some("pem".to_string()),
        kalshi_private_key_path: None,
        entry_threshold: default_entry_threshold(),
        profit_target: default_profit_target(),
        stop_loss: default_stop_loss(),
        max_hold_hours: default_max_hold_hours(),
        close_buffer_minutes: default_close_buffer_minutes(),
        min_liquidity: default_min_liquidity(),
        min_volume: default_min_volume(),
        max_spread: default_max_spread(),
        max_position_pct: default_max_position_pct(),
        max_exposure_pct: default_max_exposure_pct(),
        max_positions: default_max_positions(),
        min_position_dollars: default_min_position_dollars(),
        daily_loss_limit: default_daily_loss_limit(),
        max_consecutive_losses: default_max_consecutive_losses(),
        api_error_rate_limit: default_api_error_rate_limit(),
        stream_silence_s: default_stream_silence_s(),
        stream_force_exit_s: default_stream_force_exit_s(),
        read_rate: default_read_rate(),
        write_rate: default_write_rate(),
        use_demo: true,
        entry_timeout_s: default_entry_timeout_s(),
        health_port: default_health_port(),
        persist_dir: default_persist_dir(),
        log_filter: default_log_filter(),
    }
}
