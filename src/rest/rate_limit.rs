//! Dual token-bucket rate limiting for the venue REST API.
//!
//! Reads (GET) and writes (POST/DELETE) draw from independent buckets. A 429
//! response additionally imposes an exponential backoff on the offending
//! bucket; the backoff resets on the next success.

use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Which bucket a request draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Write,
}

/// Single token bucket: `rate` tokens per second, burst up to `rate`.
#[derive(Debug)]
struct Bucket {
    rate: f64,
    tokens: f64,
    last_refill: Instant,
    /// Consecutive 429s; drives the penalty backoff.
    penalty_count: u32,
}

impl Bucket {
    fn new(rate: u32) -> Self {
        Self {
            rate: rate as f64,
            tokens: rate as f64,
            last_refill: Instant::now(),
            penalty_count: 0,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.rate);
        self.last_refill = now;
    }

    /// Time to wait before a token is available, taking one if it is.
    fn take(&mut self) -> Option<Duration> {
        let now = Instant::now();
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            None
        } else {
            let wait = (1.0 - self.tokens) / self.rate;
            Some(Duration::from_secs_f64(wait))
        }
    }

    /// Exponential penalty after a 429: `2^n * 100ms` with jitter, capped at
    /// 30 seconds.
    fn penalty(&mut self) -> Duration {
        let base_ms = 100u64.saturating_mul(1u64 << self.penalty_count.min(16));
        let jitter = rand::thread_rng().gen_range(0..=base_ms / 2);
        self.penalty_count += 1;
        Duration::from_millis((base_ms + jitter).min(30_000))
    }

    fn reset_penalty(&mut self) {
        self.penalty_count = 0;
    }

    fn fill_level(&mut self) -> f64 {
        self.refill(Instant::now());
        self.tokens
    }
}

/// Dual-bucket rate limiter shared by all REST calls.
#[derive(Debug)]
pub struct RateLimiter {
    read: tokio::sync::Mutex<Bucket>,
    write: tokio::sync::Mutex<Bucket>,
}

impl RateLimiter {
    pub fn new(read_rate: u32, write_rate: u32) -> Self {
        Self {
            read: tokio::sync::Mutex::new(Bucket::new(read_rate)),
            write: tokio::sync::Mutex::new(Bucket::new(write_rate)),
        }
    }

    /// Block until a token is available for this request kind.
    pub async fn acquire(&self, kind: RequestKind) {
        loop {
            let wait = {
                let mut bucket = self.bucket(kind).lock().await;
                bucket.take()
            };
            match wait {
                None => return,
                Some(duration) => {
                    debug!(?kind, wait_ms = duration.as_millis() as u64, "rate limited locally");
                    tokio::time::sleep(duration).await;
                }
            }
        }
    }

    /// Apply the 429 penalty to the offending bucket, sleeping through it.
    pub async fn penalize(&self, kind: RequestKind) {
        let penalty = {
            let mut bucket = self.bucket(kind).lock().await;
            bucket.penalty()
        };
        warn!(?kind, backoff_ms = penalty.as_millis() as u64, "venue rate limit hit, backing off");
        tokio::time::sleep(penalty).await;
    }

    /// Reset the 429 backoff for this bucket after a success.
    pub async fn record_success(&self, kind: RequestKind) {
        self.bucket(kind).lock().await.reset_penalty();
    }

    /// Current token fill levels (read, write), for observability.
    pub async fn fill_levels(&self) -> (f64, f64) {
        let read = self.read.lock().await.fill_level();
        let write = self.write.lock().await.fill_level();
        (read, write)
    }

    fn bucket(&self, kind: RequestKind) -> &tokio::sync::Mutex<Bucket> {
        match kind {
            RequestKind::Read => &self.read,
            RequestKind::Write => &self.write,
        }
    }
}
