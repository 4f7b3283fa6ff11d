//! HTTP transport for the Surge engine.
//!
//! Talks to a customer-style REST service:
//! - `GET  /customers/{id}`
//! - `GET  /customers?search={term}`
//! - `POST /customers`
//! - `GET  {health_path}`
//!
//! Every call is timed around the whole exchange, body included. Calls that
//! never get a response (refused, timed out) report status 0.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde_json::Value;
use std::time::{Duration, Instant};
use surge_core::config::TargetConfig;
use surge_core::{Transport, TransportResponse};
use thiserror::Error;
use tracing::{debug, info};

/// Errors building an [`HttpTransport`].
#[derive(Debug, Error)]
pub enum HttpTransportError {
    #[error("invalid base URL `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

pub type HttpTransportResult<T> = Result<T, HttpTransportError>;

/// reqwest-backed [`Transport`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
    health_path: String,
}

impl HttpTransport {
    pub fn new(target: &TargetConfig) -> HttpTransportResult<Self> {
        let base_url = target.base_url.trim_end_matches('/').to_string();
        let parsed = Url::parse(&base_url).map_err(|e| HttpTransportError::InvalidUrl {
            url: target.base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(HttpTransportError::InvalidUrl {
                url: target.base_url.clone(),
                reason: format!("unsupported scheme `{}`", parsed.scheme()),
            });
        }

        let client = Client::builder()
            .timeout(target.timeout())
            .pool_max_idle_per_host(target.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        info!(
            base_url = %base_url,
            timeout_ms = target.timeout_ms,
            "HTTP transport ready"
        );

        Ok(Self {
            client,
            base_url,
            health_path: target.health_path.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> TransportResponse {
        let start = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "request failed without a response");
                return TransportResponse::failed(elapsed_ms(start));
            }
        };

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(text) if !text.is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                debug!(status, error = %e, "failed to read response body");
                None
            }
        };

        TransportResponse::new(status, elapsed_ms(start), body)
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get_entity(&self, id: u64) -> TransportResponse {
        let request = self.client.get(self.url(&format!("/customers/{}", id)));
        self.send(request).await
    }

    async fn search(&self, term: &str) -> TransportResponse {
        let request = self
            .client
            .get(self.url("/customers"))
            .query(&[("search", term)]);
        self.send(request).await
    }

    async fn create(&self, payload: &Value) -> TransportResponse {
        let request = self.client.post(self.url("/customers")).json(payload);
        self.send(request).await
    }

    async fn health(&self) -> TransportResponse {
        let request = self.client.get(self.url(&self.health_path));
        self.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(base_url: &str) -> TargetConfig {
        TargetConfig {
            base_url: base_url.to_string(),
            ..TargetConfig::default()
        }
    }

    #[test]
    fn test_trailing_slash_is_dropped() {
        let transport = HttpTransport::new(&target("http://localhost:8080/")).unwrap();

        assert_eq!(transport.base_url(), "http://localhost:8080");
        assert_eq!(transport.url("/customers/7"), "http://localhost:8080/customers/7");
    }

    #[test]
    fn test_path_prefix_is_kept() {
        let transport = HttpTransport::new(&target("https://gateway.local/api")).unwrap();

        assert_eq!(transport.url("/customers"), "https://gateway.local/api/customers");
    }

    #[test]
    fn test_rejects_bad_urls() {
        assert!(matches!(
            HttpTransport::new(&target("not a url")),
            Err(HttpTransportError::InvalidUrl { .. })
        ));
        assert!(matches!(
            HttpTransport::new(&target("ftp://files.local")),
            Err(HttpTransportError::InvalidUrl { .. })
        ));
    }
}
