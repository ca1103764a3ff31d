//! Single-request dispatch and outcome classification.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tokio::time::Instant;
use tracing::debug;

use crate::cancel::RunContext;
use crate::errors::ErrorCategory;
use crate::events::{EventKind, EventSink, RequestEvent, RequestOutcome};
use crate::metrics::{CONCURRENT_REQUESTS, REQUEST_DURATION_SECONDS, REQUEST_OUTCOMES, REQUEST_TOTAL};
use crate::utils::truncate_for_log;

/// Tunables for classification and log output.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Successful responses slower than this are reported as slow
    pub slow_threshold: Duration,
    /// Only this many response body bytes are read
    pub max_response_bytes: usize,
    /// Request bodies are cut to this many bytes in log events
    pub max_logged_payload_bytes: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            slow_threshold: Duration::from_secs(3),
            max_response_bytes: 1024,
            max_logged_payload_bytes: 1024,
        }
    }
}

/// What happened to one dispatched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchResult {
    pub outcome: RequestOutcome,
    /// Present when a response was received
    pub status: Option<u16>,
    pub latency: Duration,
}

/// Classifies a received response.
pub fn classify(status: u16, latency: Duration, slow_threshold: Duration) -> RequestOutcome {
    match status {
        s if s >= 500 => RequestOutcome::ServerError,
        s if s >= 400 => RequestOutcome::ClientError,
        _ if latency > slow_threshold => RequestOutcome::SlowSuccess,
        _ => RequestOutcome::Success,
    }
}

enum Exchange {
    Response {
        status: u16,
        latency: Duration,
        body: Vec<u8>,
    },
    Transport {
        error: reqwest::Error,
        status: Option<u16>,
    },
    Cancelled,
}

/// Sends JSON payloads and reports every outcome to the event sink.
///
/// The per-request timeout and connect timeout live on the shared
/// `reqwest::Client` (see [`crate::client::build_client`]). The dispatcher
/// never retries.
pub struct Dispatcher {
    client: reqwest::Client,
    settings: DispatchSettings,
    sink: Arc<dyn EventSink>,
}

impl Dispatcher {
    pub fn new(client: reqwest::Client, settings: DispatchSettings, sink: Arc<dyn EventSink>) -> Self {
        Self {
            client,
            settings,
            sink,
        }
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Issues one POST of `payload` to `url`.
    ///
    /// A cancelled `ctx` aborts the request at whatever stage it is in and
    /// yields [`RequestOutcome::Cancelled`].
    pub async fn dispatch(
        &self,
        ctx: &RunContext,
        worker_id: usize,
        url: &str,
        payload: Vec<u8>,
    ) -> DispatchResult {
        let logged_payload = truncate_for_log(&payload, self.settings.max_logged_payload_bytes);

        CONCURRENT_REQUESTS.inc();
        REQUEST_TOTAL.inc();
        let start = Instant::now();

        let request = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(payload);
        let limit = self.settings.max_response_bytes;

        let in_flight = async move {
            let mut response = match request.send().await {
                Ok(response) => response,
                Err(error) => return Exchange::Transport { error, status: None },
            };
            let latency = start.elapsed();
            let status = response.status().as_u16();

            match read_bounded(&mut response, limit).await {
                Ok(body) => Exchange::Response {
                    status,
                    latency,
                    body,
                },
                Err(error) => Exchange::Transport {
                    error,
                    status: Some(status),
                },
            }
        };

        let exchange = tokio::select! {
            biased;
            _ = ctx.cancelled() => Exchange::Cancelled,
            exchange = in_flight => exchange,
        };

        CONCURRENT_REQUESTS.dec();

        let mut event = RequestEvent {
            worker_id,
            kind: EventKind::Request(RequestOutcome::Success),
            url: url.to_string(),
            latency: None,
            status: None,
            payload: Some(logged_payload),
            response: None,
            error: None,
            error_category: None,
        };

        let result = match exchange {
            Exchange::Response {
                status,
                latency,
                body,
            } => {
                REQUEST_DURATION_SECONDS.observe(latency.as_secs_f64());
                event.latency = Some(latency);
                event.status = Some(status);
                event.response = Some(truncate_for_log(&body, limit));
                DispatchResult {
                    outcome: classify(status, latency, self.settings.slow_threshold),
                    status: Some(status),
                    latency,
                }
            }
            Exchange::Transport { error, status } => {
                let latency = start.elapsed();
                // A transport error racing with cancellation is still a cancellation.
                let outcome = if ctx.is_cancelled() {
                    RequestOutcome::Cancelled
                } else {
                    event.error_category = Some(ErrorCategory::from_reqwest_error(&error));
                    RequestOutcome::Failed
                };
                event.latency = Some(latency);
                event.status = status;
                event.error = Some(error.to_string());
                DispatchResult {
                    outcome,
                    status,
                    latency,
                }
            }
            Exchange::Cancelled => {
                let latency = start.elapsed();
                event.latency = Some(latency);
                event.error = Some(match ctx.cause() {
                    Some(cause) => cause.to_string(),
                    None => "run cancelled".to_string(),
                });
                DispatchResult {
                    outcome: RequestOutcome::Cancelled,
                    status: None,
                    latency,
                }
            }
        };

        event.kind = EventKind::Request(result.outcome);
        REQUEST_OUTCOMES
            .with_label_values(&[result.outcome.label()])
            .inc();
        debug!(
            worker = worker_id,
            outcome = %result.outcome,
            latency_ms = result.latency.as_millis() as u64,
            "Request dispatched"
        );
        self.sink.record(&event);

        result
    }
}

/// Reads at most `limit` bytes of the body; the rest is dropped with the
/// response.
async fn read_bounded(
    response: &mut reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, reqwest::Error> {
    let mut body = Vec::with_capacity(limit.min(8 * 1024));

    while body.len() < limit {
        match response.chunk().await? {
            Some(chunk) => {
                let take = chunk.len().min(limit - body.len());
                body.extend_from_slice(&chunk[..take]);
            }
            None => break,
        }
    }

    Ok(body)
}
