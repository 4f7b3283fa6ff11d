//! Transport collaborator seam
//!
//! The engine never speaks HTTP itself. Every outbound call goes through a
//! [`Transport`], which returns the raw status, timing and body. Transport
//! failures (connection refused, timeouts) are reported as status `0`
//! rather than as errors so they flow into metrics like any other outcome.

use async_trait::async_trait;
use serde_json::Value;

/// Status reported for calls that never produced an HTTP response.
pub const STATUS_TRANSPORT_FAILURE: u16 = 0;

/// Raw result of one outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    /// HTTP status code, or [`STATUS_TRANSPORT_FAILURE`]
    pub status: u16,
    /// Wall-clock duration of the call in milliseconds
    pub duration_ms: f64,
    /// Response body, if any was read
    pub body: Option<String>,
}

impl TransportResponse {
    pub fn new(status: u16, duration_ms: f64, body: Option<String>) -> Self {
        Self {
            status,
            duration_ms,
            body,
        }
    }

    /// Response for a call that failed before a status line was received.
    pub fn failed(duration_ms: f64) -> Self {
        Self::new(STATUS_TRANSPORT_FAILURE, duration_ms, None)
    }

    /// True when a non-empty body was received.
    pub fn body_present(&self) -> bool {
        self.body.as_deref().map(|b| !b.is_empty()).unwrap_or(false)
    }
}

/// Outbound calls the engine issues against the target service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// `GET` one entity by id.
    async fn get_entity(&self, id: u64) -> TransportResponse;

    /// `GET` a search query.
    async fn search(&self, term: &str) -> TransportResponse;

    /// `POST` a new entity.
    async fn create(&self, payload: &Value) -> TransportResponse;

    /// `GET` the health endpoint.
    async fn health(&self) -> TransportResponse;
}
