//! Request pacing for the upstream API.
//!
//! Every request waits on a `governor` limiter. A 429 doubles the spacing
//! between requests (up to [`MAX_SLOWDOWN`]) by swapping in a slower limiter;
//! the base pace returns once [`RESTORE_AFTER`] passes without another 429.

use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;

use crate::source::SourceError;

type Governor = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Largest slowdown applied after repeated 429s.
pub const MAX_SLOWDOWN: u32 = 16;

/// Quiet period after the last 429 before the base pace is restored.
pub const RESTORE_AFTER: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Backoff {
    slowdown: u32,
    last_429: Option<Instant>,
}

/// Pacer whose spacing stretches after rate-limit responses.
pub struct AdaptiveLimiter {
    governor: ArcSwap<Governor>,
    base_period: Duration,
    backoff: Mutex<Backoff>,
}

impl AdaptiveLimiter {
    /// One request per `period`. A zero period is bumped to one millisecond.
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        Self {
            governor: ArcSwap::from_pointee(governor_for(period)),
            base_period: period,
            backoff: Mutex::new(Backoff {
                slowdown: 1,
                last_429: None,
            }),
        }
    }

    /// `n` requests per second.
    pub fn per_second(n: u32) -> Self {
        Self::new(Duration::from_secs(1) / n.max(1))
    }

    /// Wait for a permit.
    pub async fn acquire(&self) {
        self.restore_if_quiet(Instant::now());
        let governor = self.governor.load_full();
        governor.until_ready().await;
    }

    /// Record a 429 and halve the pace.
    pub fn on_rate_limited(&self) {
        let mut backoff = self.backoff.lock().unwrap_or_else(|e| e.into_inner());
        backoff.last_429 = Some(Instant::now());
        if backoff.slowdown >= MAX_SLOWDOWN {
            return;
        }
        backoff.slowdown = (backoff.slowdown * 2).min(MAX_SLOWDOWN);
        let period = self.base_period * backoff.slowdown;
        tracing::debug!(
            slowdown = backoff.slowdown,
            period_ms = period.as_millis() as u64,
            "slowing upstream requests"
        );
        self.governor.store(Arc::new(governor_for(period)));
    }

    /// Current slowdown multiplier (1 = base pace).
    pub fn slowdown(&self) -> u32 {
        self.backoff
            .lock()
            .map(|b| b.slowdown)
            .unwrap_or(MAX_SLOWDOWN)
    }

    fn restore_if_quiet(&self, now: Instant) {
        let mut backoff = self.backoff.lock().unwrap_or_else(|e| e.into_inner());
        let quiet = backoff
            .last_429
            .is_some_and(|t| now.saturating_duration_since(t) >= RESTORE_AFTER);
        if quiet && backoff.slowdown > 1 {
            backoff.slowdown = 1;
            backoff.last_429 = None;
            self.governor.store(Arc::new(governor_for(self.base_period)));
            tracing::debug!("upstream pace restored");
        }
    }
}

fn governor_for(period: Duration) -> Governor {
    let quota = Quota::with_period(period).unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));
    RateLimiter::direct(quota)
}

/// Turn a 429 into [`SourceError::RateLimited`], carrying Retry-After.
pub fn check_rate_limit_response(resp: &reqwest::Response) -> Result<(), SourceError> {
    if resp.status() != StatusCode::TOO_MANY_REQUESTS {
        return Ok(());
    }
    let retry_after = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| parse_retry_after(v, chrono::Utc::now()));
    Err(SourceError::RateLimited { retry_after })
}

/// Retry-After as delay-seconds or an HTTP-date relative to `now`. Dates in
/// the past mean "retry now".
pub fn parse_retry_after(value: &str, now: chrono::DateTime<chrono::Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    Some((at.with_timezone(&chrono::Utc) - now).to_std().unwrap_or(Duration::ZERO))
}
