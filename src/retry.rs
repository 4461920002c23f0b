//! Bounded recovery for rate limiting and token expiry
//!
//! The request executor retries a request after a 429 (honoring `Retry-After`)
//! and after a 401 (once the token provider has minted a fresh token). Both
//! loops are bounded by a per-request [`RecoveryBudget`] built from
//! [`RetryConfig`]: a maximum number of 429 retries, a maximum number of token
//! refreshes and a ceiling on total sleeping time. Breaching any of them turns
//! into [`Error::RetryExhausted`].
//!
//! # Example
//!
//! ```
//! use graph_chat_export::config::RetryConfig;
//! use graph_chat_export::retry::RecoveryBudget;
//! use std::time::Duration;
//!
//! let config = RetryConfig { jitter: false, ..Default::default() };
//! let mut budget = RecoveryBudget::new(&config);
//! budget.record_attempt();
//! let wait = budget
//!     .rate_limit_wait("https://graph.microsoft.com/v1.0/me/chats", Duration::from_secs(2))
//!     .unwrap();
//! assert_eq!(wait, Duration::from_secs(2));
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Maximum fraction of the Retry-After value added as jitter
const MAX_JITTER_FRACTION: f64 = 0.1;

/// Per-request recovery accounting
#[derive(Debug)]
pub struct RecoveryBudget<'a> {
    config: &'a RetryConfig,
    attempts: u32,
    rate_limit_retries: u32,
    auth_refreshes: u32,
    waited: Duration,
}

impl<'a> RecoveryBudget<'a> {
    /// Start a fresh budget for one logical request
    pub fn new(config: &'a RetryConfig) -> Self {
        Self {
            config,
            attempts: 0,
            rate_limit_retries: 0,
            auth_refreshes: 0,
            waited: Duration::ZERO,
        }
    }

    /// Count one issued request
    pub fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Requests issued so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Total time granted for Retry-After sleeping so far
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Grant a wait after a 429, or fail once the budget is spent
    ///
    /// The returned duration is never shorter than `retry_after`; jitter only
    /// adds to it and is clipped to the remaining total-wait allowance.
    pub fn rate_limit_wait(&mut self, url: &str, retry_after: Duration) -> Result<Duration> {
        if self.rate_limit_retries >= self.config.max_rate_limit_retries {
            return Err(self.exhausted(url, "rate limit retries exhausted"));
        }
        let remaining = self.config.max_total_wait.saturating_sub(self.waited);
        if retry_after > remaining {
            return Err(self.exhausted(url, "rate limit wait exceeds ceiling"));
        }

        let wait = if self.config.jitter {
            add_jitter(retry_after).min(remaining)
        } else {
            retry_after
        };

        self.rate_limit_retries += 1;
        self.waited += wait;
        Ok(wait)
    }

    /// Allow one more token refresh after a 401, or fail once the budget is spent
    pub fn auth_refresh(&mut self, url: &str) -> Result<()> {
        if self.auth_refreshes >= self.config.max_auth_refreshes {
            return Err(self.exhausted(url, "token refreshes exhausted"));
        }
        self.auth_refreshes += 1;
        Ok(())
    }

    fn exhausted(&self, url: &str, reason: &str) -> Error {
        Error::RetryExhausted {
            url: url.to_string(),
            reason: reason.to_string(),
            attempts: self.attempts,
            waited: self.waited,
        }
    }
}

/// Process-wide recovery counters, shared by all requests of an executor
#[derive(Debug, Default)]
pub struct RecoveryStats {
    rate_limit_waits: AtomicU64,
    token_refreshes: AtomicU64,
    waited_ms: AtomicU64,
}

impl RecoveryStats {
    /// Record a 429 that was waited out
    pub fn record_rate_limit(&self, wait: Duration) {
        self.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
        self.waited_ms
            .fetch_add(wait.as_millis() as u64, Ordering::Relaxed);
    }

    /// Record a token refresh triggered by a 401
    pub fn record_token_refresh(&self) {
        self.token_refreshes.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of 429 responses waited out
    pub fn rate_limit_waits(&self) -> u64 {
        self.rate_limit_waits.load(Ordering::Relaxed)
    }

    /// Number of 401-triggered token refreshes
    pub fn token_refreshes(&self) -> u64 {
        self.token_refreshes.load(Ordering::Relaxed)
    }

    /// Total time spent sleeping on Retry-After
    pub fn total_wait(&self) -> Duration {
        Duration::from_millis(self.waited_ms.load(Ordering::Relaxed))
    }
}

/// Parse a `Retry-After` header value
///
/// Accepts delta-seconds and HTTP-dates. Missing or unparseable values fall
/// back to `default`; dates in the past yield zero.
pub fn parse_retry_after(value: Option<&str>, now: DateTime<Utc>, default: Duration) -> Duration {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return default;
    };

    if let Ok(secs) = value.parse::<u64>() {
        return Duration::from_secs(secs);
    }

    match DateTime::parse_from_rfc2822(value) {
        Ok(date) => (date.with_timezone(&Utc) - now)
            .to_std()
            .unwrap_or(Duration::ZERO),
        Err(_) => {
            tracing::debug!(value, "Unparseable Retry-After header, using default");
            default
        }
    }
}

/// Add up to [`MAX_JITTER_FRACTION`] of random extra delay
///
/// Concurrent workers rate limited together would otherwise retry in lockstep.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=MAX_JITTER_FRACTION);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const URL: &str = "https://graph.microsoft.com/v1.0/me/chats";

    fn config() -> RetryConfig {
        RetryConfig {
            max_rate_limit_retries: 2,
            max_auth_refreshes: 1,
            max_total_wait: Duration::from_secs(10),
            default_retry_after: Duration::from_secs(60),
            jitter: false,
        }
    }

    #[test]
    fn rate_limit_retries_are_capped() {
        let config = config();
        let mut budget = RecoveryBudget::new(&config);
        budget.record_attempt();
        assert!(budget.rate_limit_wait(URL, Duration::from_secs(1)).is_ok());
        budget.record_attempt();
        assert!(budget.rate_limit_wait(URL, Duration::from_secs(1)).is_ok());
        budget.record_attempt();

        match budget.rate_limit_wait(URL, Duration::from_secs(1)) {
            Err(Error::RetryExhausted {
                attempts, waited, ..
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(waited, Duration::from_secs(2));
            }
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
    }

    #[test]
    fn wait_beyond_ceiling_is_refused_up_front() {
        let config = config();
        let mut budget = RecoveryBudget::new(&config);
        budget.record_attempt();
        let err = budget
            .rate_limit_wait(URL, Duration::from_secs(11))
            .unwrap_err();
        assert!(err.to_string().contains("exceeds ceiling"), "{err}");
        assert_eq!(budget.waited(), Duration::ZERO);
    }

    #[test]
    fn jitter_never_shortens_the_wait() {
        let config = RetryConfig {
            jitter: true,
            ..config()
        };
        for _ in 0..50 {
            let mut budget = RecoveryBudget::new(&config);
            let wait = budget.rate_limit_wait(URL, Duration::from_secs(2)).unwrap();
            assert!(wait >= Duration::from_secs(2));
            assert!(wait <= Duration::from_millis(2201));
        }
    }

    #[test]
    fn auth_refreshes_are_capped() {
        let config = config();
        let mut budget = RecoveryBudget::new(&config);
        assert!(budget.auth_refresh(URL).is_ok());
        let err = budget.auth_refresh(URL).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("token refreshes exhausted"));
    }

    #[test]
    fn retry_after_seconds() {
        let now = Utc::now();
        let default = Duration::from_secs(60);
        assert_eq!(
            parse_retry_after(Some("7"), now, default),
            Duration::from_secs(7)
        );
        assert_eq!(
            parse_retry_after(Some(" 0 "), now, default),
            Duration::ZERO
        );
    }

    #[test]
    fn retry_after_missing_or_garbage_uses_default() {
        let now = Utc::now();
        let default = Duration::from_secs(60);
        assert_eq!(parse_retry_after(None, now, default), default);
        assert_eq!(parse_retry_after(Some(""), now, default), default);
        assert_eq!(parse_retry_after(Some("soon"), now, default), default);
        assert_eq!(parse_retry_after(Some("-5"), now, default), default);
    }

    #[test]
    fn retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 30).unwrap();
        let default = Duration::from_secs(60);
        assert_eq!(
            parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT"), now, default),
            Duration::from_secs(30)
        );
        // Dates in the past mean "retry now"
        assert_eq!(
            parse_retry_after(Some("Wed, 21 Oct 2015 07:00:00 GMT"), now, default),
            Duration::ZERO
        );
    }

    #[test]
    fn stats_accumulate() {
        let stats = RecoveryStats::default();
        stats.record_rate_limit(Duration::from_millis(1500));
        stats.record_rate_limit(Duration::from_millis(500));
        stats.record_token_refresh();
        assert_eq!(stats.rate_limit_waits(), 2);
        assert_eq!(stats.token_refreshes(), 1);
        assert_eq!(stats.total_wait(), Duration::from_secs(2));
    }
}
