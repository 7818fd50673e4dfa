//! Retry decisions for failed exchanges.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use reqwest::Method;

use crate::config::ClientConfig;
use crate::error::Error;

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for the given duration, then try again.
    RetryAfter(Duration),
    /// The error is retryable but the retry budget is spent.
    Exhausted,
    /// The error is terminal.
    Stop,
}

/// Retry policy: which failures are retried and how long to wait.
///
/// - Status >= 500, 424 and 429 are retried; other statuses are terminal.
/// - Transport failures are retried for GET only.
/// - 429 waits until the `ratelimit-reset` instant; everything else waits
///   `delay_interval * attempt`, clamped to `[delay_interval, max_delay_interval]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    delay_interval: Duration,
    max_delay_interval: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay_interval: Duration, max_delay_interval: Duration) -> Self {
        Self {
            max_retries,
            delay_interval,
            max_delay_interval: max_delay_interval.max(delay_interval),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(
            config.max_retries,
            config.delay_interval,
            config.max_delay_interval,
        )
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether `err` may be retried for a call using `method`.
    pub fn is_retryable(method: &Method, err: &Error) -> bool {
        match err {
            Error::Transport { .. } => *method == Method::GET,
            Error::Api { source, .. } => is_retryable_status(source.status_code),
            _ => false,
        }
    }

    /// Decide after `retries_done` retries have already been spent.
    ///
    /// `budget` is an optional per-operation cap; the smaller of it and the
    /// configured maximum applies.
    pub fn decide(
        &self,
        method: &Method,
        err: &Error,
        retries_done: u32,
        budget: Option<u32>,
    ) -> RetryDecision {
        if !Self::is_retryable(method, err) {
            return RetryDecision::Stop;
        }
        let cap = budget.map_or(self.max_retries, |b| b.min(self.max_retries));
        if retries_done >= cap {
            return RetryDecision::Exhausted;
        }
        RetryDecision::RetryAfter(self.delay_for(err, retries_done + 1))
    }

    /// Wait before retry number `attempt` (1-based).
    pub fn delay_for(&self, err: &Error, attempt: u32) -> Duration {
        if let Some(reset) = err
            .api_error()
            .filter(|e| e.status_code == 429)
            .and_then(|e| e.rate_limit_reset)
        {
            return until(reset);
        }
        self.linear_delay(attempt)
    }

    fn linear_delay(&self, attempt: u32) -> Duration {
        self.delay_interval
            .saturating_mul(attempt)
            .clamp(self.delay_interval, self.max_delay_interval)
    }
}

pub fn is_retryable_status(status_code: u16) -> bool {
    status_code >= 500 || status_code == 424 || status_code == 429
}

/// Parse a `ratelimit-reset` header value (Unix timestamp in milliseconds).
pub fn parse_rate_limit_reset(value: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = value.trim().parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

fn until(instant: DateTime<Utc>) -> Duration {
    (instant - Utc::now()).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;

    fn api(status: u16, reset: Option<DateTime<Utc>>) -> Error {
        Error::Api {
            method: Method::POST,
            path: "/objects/servers".to_string(),
            source: ApiError {
                status_code: status,
                title: "t".to_string(),
                description: String::new(),
                request_id: Some("req".to_string()),
                rate_limit_reset: reset,
            },
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(250))
    }

    #[test]
    fn test_retryable_statuses() {
        for status in [500, 502, 503, 424, 429] {
            assert!(is_retryable_status(status), "{status}");
        }
        for status in [400, 401, 403, 404, 409, 422] {
            assert!(!is_retryable_status(status), "{status}");
        }
    }

    #[test]
    fn test_terminal_errors_stop() {
        let p = policy();
        assert_eq!(p.decide(&Method::GET, &api(404, None), 0, None), RetryDecision::Stop);
        assert_eq!(p.decide(&Method::GET, &Error::Cancelled, 0, None), RetryDecision::Stop);
        assert_eq!(
            p.decide(&Method::GET, &Error::Validation("x".into()), 0, None),
            RetryDecision::Stop
        );
    }

    #[test]
    fn test_linear_delay_is_bounded() {
        let p = policy();
        let err = api(503, None);
        assert_eq!(
            p.decide(&Method::POST, &err, 0, None),
            RetryDecision::RetryAfter(Duration::from_millis(100))
        );
        assert_eq!(
            p.decide(&Method::POST, &err, 1, None),
            RetryDecision::RetryAfter(Duration::from_millis(200))
        );
        assert_eq!(
            p.decide(&Method::POST, &err, 2, None),
            RetryDecision::RetryAfter(Duration::from_millis(250))
        );
        assert_eq!(p.decide(&Method::POST, &err, 3, None), RetryDecision::Exhausted);
    }

    #[test]
    fn test_budget_caps_retries() {
        let p = policy();
        let err = api(424, None);
        assert_eq!(p.decide(&Method::PATCH, &err, 0, Some(0)), RetryDecision::Exhausted);
        assert!(matches!(
            p.decide(&Method::PATCH, &err, 0, Some(10)),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(p.decide(&Method::PATCH, &err, 3, Some(10)), RetryDecision::Exhausted);
    }

    #[test]
    fn test_zero_max_retries_disables_retries() {
        let p = RetryPolicy::new(0, Duration::from_millis(10), Duration::from_millis(10));
        assert_eq!(p.decide(&Method::GET, &api(500, None), 0, None), RetryDecision::Exhausted);
    }

    #[test]
    fn test_rate_limit_waits_until_reset() {
        let p = policy();
        let reset = Utc::now() + chrono::Duration::milliseconds(2_000);
        match p.decide(&Method::POST, &api(429, Some(reset)), 0, None) {
            RetryDecision::RetryAfter(d) => {
                assert!(d > Duration::from_millis(1_500), "{d:?}");
                assert!(d <= Duration::from_millis(2_000), "{d:?}");
            }
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[test]
    fn test_rate_limit_in_past_is_clamped() {
        let p = policy();
        let reset = Utc::now() - chrono::Duration::seconds(5);
        assert_eq!(
            p.decide(&Method::POST, &api(429, Some(reset)), 0, None),
            RetryDecision::RetryAfter(Duration::ZERO)
        );
    }

    #[test]
    fn test_rate_limit_without_header_uses_linear_delay() {
        assert_eq!(
            policy().decide(&Method::POST, &api(429, None), 0, None),
            RetryDecision::RetryAfter(Duration::from_millis(100))
        );
    }

    #[test]
    fn test_parse_rate_limit_reset() {
        let parsed = parse_rate_limit_reset("1700000000123").unwrap();
        assert_eq!(parsed.timestamp_millis(), 1_700_000_000_123);
        assert!(parse_rate_limit_reset("soon").is_none());
        assert!(parse_rate_limit_reset("").is_none());
    }
}
