// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode, redirect};

use crate::error::Result;
use crate::models::{RetryConfig, SourceConfig};

/// Statuses treated as transient and retried.
pub const TRANSIENT_STATUSES: [u16; 4] = [302, 500, 502, 504];

/// Create a configured asynchronous HTTP client.
///
/// Redirects are not followed so that a 302 surfaces as a retryable status.
pub fn create_client(config: &SourceConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .redirect(redirect::Policy::none())
        .build()?;
    Ok(client)
}

/// Bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    pub fn is_transient(status: StatusCode) -> bool {
        TRANSIENT_STATUSES.contains(&status.as_u16())
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Send a request, retrying transient statuses and connection failures.
///
/// `build` is called once per attempt. The last response is returned as-is,
/// whatever its status; callers decide what counts as success.
pub async fn send_with_retry<F>(policy: &RetryPolicy, mut build: F) -> Result<Response>
where
    F: FnMut() -> RequestBuilder,
{
    let mut attempt = 1;
    loop {
        let outcome = build().send().await;

        let retryable = match &outcome {
            Ok(response) => RetryPolicy::is_transient(response.status()),
            Err(e) => e.is_connect() || e.is_timeout(),
        };
        if !retryable || attempt >= policy.max_attempts {
            return Ok(outcome?);
        }

        let delay = policy.backoff_for(attempt);
        match &outcome {
            Ok(response) => log::warn!(
                "Transient status {} (attempt {}/{}), retrying in {:?}",
                response.status(),
                attempt,
                policy.max_attempts,
                delay
            ),
            Err(e) => log::warn!(
                "Request failed: {} (attempt {}/{}), retrying in {:?}",
                e,
                attempt,
                policy.max_attempts,
                delay
            ),
        }

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn quick_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(5))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5, Duration::from_millis(500), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(1), Duration::from_millis(500));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(1));
    }

    #[test]
    fn test_transient_statuses() {
        assert!(RetryPolicy::is_transient(StatusCode::FOUND));
        assert!(RetryPolicy::is_transient(StatusCode::BAD_GATEWAY));
        assert!(!RetryPolicy::is_transient(StatusCode::NOT_FOUND));
        assert!(!RetryPolicy::is_transient(StatusCode::SERVICE_UNAVAILABLE));
    }

    #[test]
    fn test_zero_attempts_still_sends_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts(), 1);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = create_client(&SourceConfig::default()).unwrap();
        let url = format!("{}/search", server.uri());
        let response = send_with_retry(&quick_policy(4), || client.get(&url))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let client = create_client(&SourceConfig::default()).unwrap();
        let url = format!("{}/search", server.uri());
        let response = send_with_retry(&quick_policy(3), || client.get(&url))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = create_client(&SourceConfig::default()).unwrap();
        let url = format!("{}/missing", server.uri());
        let response = send_with_retry(&quick_policy(4), || client.get(&url))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
