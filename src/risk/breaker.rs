//! Circuit breakers: suppress new entries while letting resting exits
//! resolve naturally.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::account::Account;

/// Why the breaker tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerReason {
    DailyLoss,
    ConsecutiveLosses,
    ApiErrorRate,
    StreamDisconnect,
    Manual,
}

impl BreakerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DailyLoss => "daily_loss",
            Self::ConsecutiveLosses => "consecutive_losses",
            Self::ApiErrorRate => "api_error_rate",
            Self::StreamDisconnect => "stream_disconnect",
            Self::Manual => "manual",
        }
    }
}

/// Current breaker state, exported on status snapshots.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BreakerState {
    pub active: bool,
    pub reason: Option<BreakerReason>,
    pub tripped_at: Option<DateTime<Utc>>,
}

/// Inputs sampled by the periodic risk check.
#[derive(Debug, Clone, Copy)]
pub struct BreakerInputs {
    /// REST error rate over the trailing call window, in [0, 1].
    pub api_error_rate: f64,
    /// How long the stream has been silent/disconnected, in seconds.
    pub stream_down_secs: f64,
}

/// Thresholds plus active state.
#[derive(Debug)]
pub struct CircuitBreakers {
    daily_loss_limit: rust_decimal::Decimal,
    max_consecutive_losses: u32,
    api_error_rate_limit: f64,
    stream_silence_s: u64,

    active: Option<(BreakerReason, DateTime<Utc>)>,
}

impl CircuitBreakers {
    pub fn new(
        daily_loss_limit: rust_decimal::Decimal,
        max_consecutive_losses: u32,
        api_error_rate_limit: f64,
        stream_silence_s: u64,
    ) -> Self {
        Self {
            daily_loss_limit,
            max_consecutive_losses,
            api_error_rate_limit,
            stream_silence_s,
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn reason(&self) -> Option<BreakerReason> {
        self.active.map(|(reason, _)| reason)
    }

    pub fn state(&self) -> BreakerState {
        BreakerState {
            active: self.active.is_some(),
            reason: self.active.map(|(r, _)| r),
            tripped_at: self.active.map(|(_, at)| at),
        }
    }

    /// Evaluate trip conditions. Returns the reason iff the breaker tripped
    /// on this call (transition from inactive to active).
    pub fn check(&mut self, account: &Account, inputs: BreakerInputs) -> Option<BreakerReason> {
        if self.active.is_some() {
            return None;
        }

        let daily_fraction = account.daily_pnl_fraction();
        if daily_fraction <= -self.daily_loss_limit {
            error!(
                daily_pnl = %account.daily_pnl,
                limit = %self.daily_loss_limit,
                "circuit breaker: daily loss limit exceeded"
            );
            return Some(self.trip(BreakerReason::DailyLoss));
        }

        if account.consecutive_losses >= self.max_consecutive_losses {
            error!(
                consecutive_losses = account.consecutive_losses,
                limit = self.max_consecutive_losses,
                "circuit breaker: consecutive loss limit reached"
            );
            return Some(self.trip(BreakerReason::ConsecutiveLosses));
        }

        if inputs.api_error_rate >= self.api_error_rate_limit {
            error!(
                error_rate = inputs.api_error_rate,
                limit = self.api_error_rate_limit,
                "circuit breaker: api error rate too high"
            );
            return Some(self.trip(BreakerReason::ApiErrorRate));
        }

        if inputs.stream_down_secs >= self.stream_silence_s as f64 {
            error!(
                down_secs = inputs.stream_down_secs,
                limit = self.stream_silence_s,
                "circuit breaker: stream silent too long"
            );
            return Some(self.trip(BreakerReason::StreamDisconnect));
        }

        None
    }

    /// Trip manually (operator shutdown).
    pub fn trip_manual(&mut self) -> BreakerReason {
        self.trip(BreakerReason::Manual)
    }

    fn trip(&mut self, reason: BreakerReason) -> BreakerReason {
        self.active = Some((reason, Utc::now()));
        reason
    }

    /// Reset rules are per-reason:
    /// - daily loss resets at the UTC-midnight daily rollover,
    /// - consecutive losses reset on the next winning close,
    /// - stream disconnect resets when the connection is back,
    /// - API error rate (and manual) reset only via operator action.
    pub fn on_daily_reset(&mut self) {
        self.clear_if(BreakerReason::DailyLoss);
    }

    pub fn on_winning_close(&mut self) {
        self.clear_if(BreakerReason::ConsecutiveLosses);
    }

    pub fn on_stream_reconnected(&mut self) {
        self.clear_if(BreakerReason::StreamDisconnect);
    }

    /// Operator override; clears any reason.
    pub fn reset_manual(&mut self) {
        if let Some((reason, tripped_at)) = self.active.take() {
            warn!(
                reason = reason.as_str(),
                active_secs = (Utc::now() - tripped_at).num_seconds(),
                "circuit breaker manually reset"
            );
        }
    }

    fn clear_if(&mut self, reason: BreakerReason) {
        if self.active.map(|(r, _)| r) == Some(reason) {
            info!(reason = reason.as_str(), "circuit breaker reset");
            self.active = None;
        }
    }

    /// Daily-loss and manual trips escalate to a full shutdown.
    pub fn requires_shutdown(&self) -> bool {
        matches!(
            self.reason(),
            Some(BreakerReason::DailyLoss) | Some(BreakerReason::Manual)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn breakers() -> CircuitBreakers {
        CircuitBreakers::new(dec!(0.05), 5, 0.10, 15)
    }

    fn quiet_inputs() -> BreakerInputs {
        BreakerInputs { api_error_rate: 0.0, stream_down_secs: 0.0 }
    }

    #[test]
    fn daily_loss_trips_at_limit() {
        let mut breakers = breakers();
        let mut account = Account::new(dec!(1000));
        account.settle_close(rust_decimal::Decimal::ZERO, dec!(-50));

        let reason = breakers.check(&account, quiet_inputs());
        assert_eq!(reason, Some(BreakerReason::DailyLoss));
        assert!(breakers.is_active());
        assert!(breakers.requires_shutdown());

        // A second check does not re-trip.
        assert!(breakers.check(&account, quiet_inputs()).is_none());
    }

    #[test]
    fn four_losses_survive_fifth_trips() {
        let mut breakers = breakers();
        let mut account = Account::new(dec!(10000));
        for _ in 0..4 {
            account.settle_close(rust_decimal::Decimal::ZERO, dec!(-1));
        }
        assert!(breakers.check(&account, quiet_inputs()).is_none());

        account.settle_close(rust_decimal::Decimal::ZERO, dec!(-1));
        assert_eq!(
            breakers.check(&account, quiet_inputs()),
            Some(BreakerReason::ConsecutiveLosses)
        );
        assert!(!breakers.requires_shutdown());

        // Next winning close resets it.
        breakers.on_winning_close();
        assert!(!breakers.is_active());
    }

    #[test]
    fn api_error_rate_trips_and_needs_manual_reset() {
        let mut breakers = breakers();
        let account = Account::new(dec!(1000));
        let inputs = BreakerInputs { api_error_rate: 0.12, stream_down_secs: 0.0 };

        assert_eq!(breakers.check(&account, inputs), Some(BreakerReason::ApiErrorRate));

        // Reconnect/daily-reset hooks do not clear it.
        breakers.on_stream_reconnected();
        breakers.on_daily_reset();
        assert!(breakers.is_active());

        breakers.reset_manual();
        assert!(!breakers.is_active());
    }

    #[test]
    fn stream_silence_trips_and_reconnect_resets() {
        let mut breakers = breakers();
        let account = Account::new(dec!(1000));
        let inputs = BreakerInputs { api_error_rate: 0.0, stream_down_secs: 16.0 };

        assert_eq!(breakers.check(&account, inputs), Some(BreakerReason::StreamDisconnect));
        breakers.on_stream_reconnected();
        assert!(!breakers.is_active());
    }

    #[test]
    fn daily_reset_clears_daily_loss() {
        let mut breakers = breakers();
        let mut account = Account::new(dec!(1000));
        account.settle_close(rust_decimal::Decimal::ZERO, dec!(-60));
        breakers.check(&account, quiet_inputs());
        assert!(breakers.is_active());

        breakers.on_daily_reset();
        assert!(!breakers.is_active());
    }
}
