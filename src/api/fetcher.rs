use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crate::api::overfast_api::{Endpoint, Upstream};
use crate::util::sleeper::Sleeper;
use crate::Error;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_AFTER_MARGIN: Duration = Duration::from_secs(2);
/// Larger `Retry-After` values are ignored in favour of exponential backoff.
pub const MAX_RETRY_AFTER_SECS: u64 = 300;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{endpoint}: HTTP {status} after {attempts} attempts")]
    RetriesExhausted {
        endpoint: String,
        status: u16,
        attempts: u32,
    },
    #[error("{endpoint}: HTTP {status}")]
    Status { endpoint: String, status: u16 },
    #[error("{endpoint}: malformed payload: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{endpoint}: transport failure: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_after_margin: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_after_margin: DEFAULT_RETRY_AFTER_MARGIN,
        }
    }
}

impl RetryPolicy {
    /// Wait before retrying after the zero-based `attempt` failed.
    /// An integer `Retry-After` up to [`MAX_RETRY_AFTER_SECS`] wins; anything else
    /// falls back to `2^(attempt+2)` seconds.
    pub fn backoff(&self, attempt: u32, retry_after: Option<&str>) -> Duration {
        let retry_after = retry_after
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs <= MAX_RETRY_AFTER_SECS);
        match retry_after {
            Some(secs) => Duration::from_secs(secs).saturating_add(self.retry_after_margin),
            None => Duration::from_secs(1u64 << (attempt + 2).min(20)),
        }
    }
}

/// Only rate limiting and server-side failures are worth another attempt.
pub fn is_retryable(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

pub struct BackoffFetcher<'a> {
    upstream: &'a dyn Upstream,
    sleeper: &'a dyn Sleeper,
    policy: RetryPolicy,
}

impl<'a> BackoffFetcher<'a> {
    pub fn new(upstream: &'a dyn Upstream, sleeper: &'a dyn Sleeper, policy: RetryPolicy) -> Self {
        Self {
            upstream,
            sleeper,
            policy,
        }
    }

    #[tracing::instrument(level = "debug", skip_all, fields(endpoint = %endpoint))]
    pub async fn fetch<T: DeserializeOwned>(&self, endpoint: &Endpoint) -> Result<T, FetchError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            let response =
                self.upstream
                    .get(endpoint)
                    .await
                    .map_err(|source| FetchError::Transport {
                        endpoint: endpoint.to_string(),
                        source,
                    })?;
            let status = response.status;

            if (200..300).contains(&status) {
                debug!(status, attempts = attempt + 1, "Fetched upstream payload");
                return serde_json::from_str(&response.body).map_err(|source| {
                    FetchError::Decode {
                        endpoint: endpoint.to_string(),
                        source,
                    }
                });
            }

            if !is_retryable(status) {
                return Err(FetchError::Status {
                    endpoint: endpoint.to_string(),
                    status,
                });
            }

            if attempt + 1 >= max_attempts {
                error!(status, attempts = attempt + 1, "Upstream retries exhausted");
                return Err(FetchError::RetriesExhausted {
                    endpoint: endpoint.to_string(),
                    status,
                    attempts: attempt + 1,
                });
            }

            let wait = self.policy.backoff(attempt, response.retry_after.as_deref());
            warn!(
                status,
                attempt = attempt + 1,
                max_attempts,
                wait_secs = wait.as_secs(),
                retry_after = ?response.retry_after,
                "Upstream request failed, backing off before retry"
            );
            self.sleeper.sleep(wait).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::api::overfast_api::ApiHeroSummary;
    use crate::test_support::{RecordingSleeper, ScriptedUpstream};

    fn roster() -> Endpoint {
        Endpoint::Heroes { locale: None }
    }

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().map(|s| Duration::from_secs(*s)).collect()
    }

    #[tokio::test]
    async fn returns_payload_on_first_success() {
        let upstream = ScriptedUpstream::new(|_, _| ScriptedUpstream::ok(r#"[{"key": "ana"}]"#));
        let sleeper = RecordingSleeper::default();
        let fetcher = BackoffFetcher::new(&upstream, &sleeper, RetryPolicy::default());

        let heroes: Vec<ApiHeroSummary> = fetcher.fetch(&roster()).await.unwrap();

        assert_eq!(heroes.len(), 1);
        assert_eq!(upstream.call_count(), 1);
        assert!(sleeper.waits().is_empty());
    }

    #[tokio::test]
    async fn server_errors_exhaust_five_attempts_with_exponential_waits() {
        let upstream = ScriptedUpstream::new(|_, _| ScriptedUpstream::status(500));
        let sleeper = RecordingSleeper::default();
        let fetcher = BackoffFetcher::new(&upstream, &sleeper, RetryPolicy::default());

        let err = fetcher.fetch::<Vec<ApiHeroSummary>>(&roster()).await.unwrap_err();

        assert_matches!(
            err,
            FetchError::RetriesExhausted {
                status: 500,
                attempts: 5,
                ..
            }
        );
        assert_eq!(upstream.call_count(), 5);
        assert_eq!(sleeper.waits(), secs(&[4, 8, 16, 32]));
    }

    #[tokio::test]
    async fn retry_after_header_adds_safety_margin() {
        let upstream = ScriptedUpstream::new(|_, call| match call {
            0 => ScriptedUpstream::throttled("10"),
            1 => ScriptedUpstream::status(503),
            _ => ScriptedUpstream::ok("[]"),
        });
        let sleeper = RecordingSleeper::default();
        let fetcher = BackoffFetcher::new(&upstream, &sleeper, RetryPolicy::default());

        let heroes: Vec<ApiHeroSummary> = fetcher.fetch(&roster()).await.unwrap();

        assert!(heroes.is_empty());
        assert_eq!(upstream.call_count(), 3);
        assert_eq!(sleeper.waits(), secs(&[12, 8]));
    }

    #[tokio::test]
    async fn unparsable_retry_after_falls_back_to_exponential() {
        let upstream = ScriptedUpstream::new(|_, call| match call {
            0 => ScriptedUpstream::throttled("Wed, 21 Oct 2015 07:28:00 GMT"),
            _ => ScriptedUpstream::ok("[]"),
        });
        let sleeper = RecordingSleeper::default();
        let fetcher = BackoffFetcher::new(&upstream, &sleeper, RetryPolicy::default());

        fetcher.fetch::<Vec<ApiHeroSummary>>(&roster()).await.unwrap();

        assert_eq!(sleeper.waits(), secs(&[4]));
    }

    #[tokio::test]
    async fn oversized_retry_after_falls_back_to_exponential() {
        let upstream = ScriptedUpstream::new(|_, call| match call {
            0 => ScriptedUpstream::throttled("18446744073709551615"),
            1 => ScriptedUpstream::throttled("99999999"),
            2 => ScriptedUpstream::throttled("300"),
            _ => ScriptedUpstream::ok("[]"),
        });
        let sleeper = RecordingSleeper::default();
        let fetcher = BackoffFetcher::new(&upstream, &sleeper, RetryPolicy::default());

        fetcher.fetch::<Vec<ApiHeroSummary>>(&roster()).await.unwrap();

        assert_eq!(sleeper.waits(), secs(&[4, 8, 302]));
    }

    #[test]
    fn retry_after_margin_saturates_instead_of_overflowing() {
        let policy = RetryPolicy {
            max_attempts: 5,
            retry_after_margin: Duration::MAX,
        };
        assert_eq!(policy.backoff(0, Some("10")), Duration::MAX);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        for status in [400, 401, 404, 422] {
            let upstream = ScriptedUpstream::new(move |_, _| ScriptedUpstream::status(status));
            let sleeper = RecordingSleeper::default();
            let fetcher = BackoffFetcher::new(&upstream, &sleeper, RetryPolicy::default());

            let err = fetcher.fetch::<Vec<ApiHeroSummary>>(&roster()).await.unwrap_err();

            assert_matches!(err, FetchError::Status { status: s, .. } if s == status);
            assert_eq!(upstream.call_count(), 1);
            assert!(sleeper.waits().is_empty());
        }
    }

    #[tokio::test]
    async fn transport_failures_are_not_retried() {
        let upstream = ScriptedUpstream::new(|_, _| Err("connection reset".into()));
        let sleeper = RecordingSleeper::default();
        let fetcher = BackoffFetcher::new(&upstream, &sleeper, RetryPolicy::default());

        let err = fetcher.fetch::<Vec<ApiHeroSummary>>(&roster()).await.unwrap_err();

        assert_matches!(err, FetchError::Transport { .. });
        assert_eq!(upstream.call_count(), 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_permanent() {
        let upstream = ScriptedUpstream::new(|_, _| ScriptedUpstream::ok(r#"{"not": "a list"}"#));
        let sleeper = RecordingSleeper::default();
        let fetcher = BackoffFetcher::new(&upstream, &sleeper, RetryPolicy::default());

        let err = fetcher.fetch::<Vec<ApiHeroSummary>>(&roster()).await.unwrap_err();

        assert_matches!(err, FetchError::Decode { .. });
        assert_eq!(upstream.call_count(), 1);
    }

    #[tokio::test]
    async fn fetcher_is_reusable_across_calls() {
        let upstream = ScriptedUpstream::new(|_, call| match call {
            0 => ScriptedUpstream::status(429),
            _ => ScriptedUpstream::ok("[]"),
        });
        let sleeper = RecordingSleeper::default();
        let fetcher = BackoffFetcher::new(&upstream, &sleeper, RetryPolicy::default());

        for _ in 0..3 {
            fetcher.fetch::<Vec<ApiHeroSummary>>(&roster()).await.unwrap();
        }

        assert_eq!(upstream.call_count(), 4);
        assert_eq!(sleeper.waits(), secs(&[4]));
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable(429));
        assert!(is_retryable(500));
        assert!(is_retryable(599));
        assert!(!is_retryable(404));
        assert!(!is_retryable(200));
    }
}
