//! Request and generation events handed to the logging collaborator.
//!
//! Every dispatched request and every payload generation failure produces
//! exactly one [`RequestEvent`], delivered to an [`EventSink`]. The default
//! [`TracingSink`] turns events into structured `tracing` records.

use std::fmt;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::errors::ErrorCategory;

/// Classification of a single dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestOutcome {
    /// 2xx (or other non-error status) within the slow threshold
    Success,
    /// Non-error status slower than the slow threshold
    SlowSuccess,
    /// HTTP 4xx
    ClientError,
    /// HTTP 5xx
    ServerError,
    /// Transport failure with no usable response
    Failed,
    /// The run was cancelled while the request was in flight
    Cancelled,
}

impl RequestOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RequestOutcome::Success => "success",
            RequestOutcome::SlowSuccess => "slow_success",
            RequestOutcome::ClientError => "client_error",
            RequestOutcome::ServerError => "server_error",
            RequestOutcome::Failed => "failed",
            RequestOutcome::Cancelled => "cancelled",
        }
    }

    pub fn all() -> [RequestOutcome; 6] {
        [
            RequestOutcome::Success,
            RequestOutcome::SlowSuccess,
            RequestOutcome::ClientError,
            RequestOutcome::ServerError,
            RequestOutcome::Failed,
            RequestOutcome::Cancelled,
        ]
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PayloadGenerationFailed,
    Request(RequestOutcome),
}

/// One structured log event.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub worker_id: usize,
    pub kind: EventKind,
    pub url: String,
    pub latency: Option<Duration>,
    pub status: Option<u16>,
    /// Request body, already truncated for logging
    pub payload: Option<String>,
    /// Response body prefix, already truncated for logging
    pub response: Option<String>,
    pub error: Option<String>,
    pub error_category: Option<ErrorCategory>,
}

impl RequestEvent {
    pub fn generation_failed(worker_id: usize, url: &str, error: String) -> Self {
        Self {
            worker_id,
            kind: EventKind::PayloadGenerationFailed,
            url: url.to_string(),
            latency: None,
            status: None,
            payload: None,
            response: None,
            error: Some(error),
            error_category: None,
        }
    }

    pub fn outcome(&self) -> Option<RequestOutcome> {
        match self.kind {
            EventKind::Request(outcome) => Some(outcome),
            EventKind::PayloadGenerationFailed => None,
        }
    }
}

/// Receives events from workers and the dispatcher.
///
/// Implementations are shared by all workers and must tolerate concurrent
/// calls.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &RequestEvent);
}

/// Emits every event as a `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn record(&self, event: &RequestEvent) {
        let latency_ms = event.latency.map(|d| d.as_millis() as u64);
        let payload = event.payload.as_deref().unwrap_or_default();
        let response = event.response.as_deref().unwrap_or_default();
        let err = event.error.as_deref().unwrap_or_default();

        match event.kind {
            EventKind::PayloadGenerationFailed => error!(
                worker = event.worker_id,
                error = %err,
                "Failed to generate payload"
            ),
            EventKind::Request(RequestOutcome::ServerError) => error!(
                worker = event.worker_id,
                url = %event.url,
                latency_ms = ?latency_ms,
                status = ?event.status,
                payload = %payload,
                response = %response,
                "Server error"
            ),
            EventKind::Request(RequestOutcome::ClientError) => warn!(
                worker = event.worker_id,
                url = %event.url,
                latency_ms = ?latency_ms,
                status = ?event.status,
                payload = %payload,
                response = %response,
                "Client error"
            ),
            EventKind::Request(RequestOutcome::SlowSuccess) => warn!(
                worker = event.worker_id,
                url = %event.url,
                latency_ms = ?latency_ms,
                status = ?event.status,
                payload = %payload,
                response = %response,
                "Slow response"
            ),
            EventKind::Request(RequestOutcome::Success) => info!(
                worker = event.worker_id,
                url = %event.url,
                latency_ms = ?latency_ms,
                status = ?event.status,
                payload = %payload,
                response = %response,
                "Request succeeded"
            ),
            EventKind::Request(RequestOutcome::Failed) => error!(
                worker = event.worker_id,
                url = %event.url,
                latency_ms = ?latency_ms,
                status = ?event.status,
                payload = %payload,
                error = %err,
                error_category = event.error_category.map_or("", |c| c.label()),
                "Request failed"
            ),
            EventKind::Request(RequestOutcome::Cancelled) => warn!(
                worker = event.worker_id,
                url = %event.url,
                latency_ms = ?latency_ms,
                payload = %payload,
                error = %err,
                "Request cancelled"
            ),
        }
    }
}
