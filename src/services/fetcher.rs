// src/services/fetcher.rs

//! Search page fetcher.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use crate::error::{AppError, Result};
use crate::models::Config;
use crate::utils::http::{self, RetryPolicy};

/// Anything that can produce the raw search page.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<u8>>;
}

/// Fetches the search page over HTTP.
pub struct PageFetcher {
    client: Client,
    url: String,
    retry: RetryPolicy,
}

impl PageFetcher {
    pub fn new(client: Client, url: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client,
            url: url.into(),
            retry,
        }
    }

    /// Build a fetcher for the configured search URL.
    pub fn from_config(config: &Config, client: Client) -> Self {
        Self::new(
            client,
            config.source.search_url(),
            RetryPolicy::from_config(&config.retry),
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl PageSource for PageFetcher {
    async fn fetch(&self) -> Result<Vec<u8>> {
        log::debug!("Fetching {}", self.url);
        let response = http::send_with_retry(&self.retry, || self.client.get(&self.url)).await?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(AppError::fetch(&self.url, status.as_u16()));
        }

        let bytes = response.bytes().await?;
        log::debug!("Fetched {} bytes from {}", bytes.len(), self.url);
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::models::SourceConfig;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(server: &MockServer) -> PageFetcher {
        let source = SourceConfig {
            base_url: server.uri(),
            search_query: "/search?zip=98101".to_string(),
            user_agent: "tracker-test/1.0".to_string(),
            ..SourceConfig::default()
        };
        let client = http::create_client(&source).unwrap();
        let retry = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2));
        PageFetcher::new(client, source.search_url(), retry)
    }

    #[tokio::test]
    async fn test_fetch_returns_body_and_sends_user_agent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("zip", "98101"))
            .and(header("user-agent", "tracker-test/1.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let body = fetcher(&server).fetch().await.unwrap();
        assert_eq!(body, b"<html></html>");
    }

    #[tokio::test]
    async fn test_redirect_is_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", "/login"))
            .expect(3)
            .mount(&server)
            .await;

        let err = fetcher(&server).fetch().await.unwrap_err();
        assert!(matches!(err, AppError::Fetch { status: 302, .. }));
    }

    #[tokio::test]
    async fn test_non_transient_status_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let err = fetcher(&server).fetch().await.unwrap_err();
        assert_eq!(err.status(), Some(403));
    }
}
