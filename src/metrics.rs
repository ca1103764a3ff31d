use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode};
use prometheus::{
    Encoder, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::env;
use tracing::{error, info};

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "payload_loadtest".to_string());

    pub static ref REQUEST_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("requests_total", "Total number of HTTP requests dispatched")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_OUTCOMES: IntCounterVec =
        IntCounterVec::new(
            Opts::new("request_outcomes_total", "Number of HTTP requests by outcome")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["outcome"]  // success, slow_success, client_error, server_error, failed, cancelled
        ).unwrap();

    pub static ref PAYLOAD_FAILURES_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("payload_generation_failures_total", "Number of payloads that failed to generate")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref CONCURRENT_REQUESTS: Gauge =
        Gauge::with_opts(
            Opts::new("concurrent_requests", "Number of HTTP requests currently in flight")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref ACTIVE_WORKERS: IntGauge =
        IntGauge::with_opts(
            Opts::new("active_workers", "Number of workers that have not finished yet")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref REQUEST_DURATION_SECONDS: Histogram =
        Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "request_duration_seconds",
                "HTTP request latencies in seconds."
            ).namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();
}

/// Registers all metrics with the given registry.
pub fn register_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(REQUEST_TOTAL.clone()))?;
    registry.register(Box::new(REQUEST_OUTCOMES.clone()))?;
    registry.register(Box::new(PAYLOAD_FAILURES_TOTAL.clone()))?;
    registry.register(Box::new(CONCURRENT_REQUESTS.clone()))?;
    registry.register(Box::new(ACTIVE_WORKERS.clone()))?;
    registry.register(Box::new(REQUEST_DURATION_SECONDS.clone()))?;
    Ok(())
}

/// Encodes every metric in `registry` in the Prometheus text format.
pub fn gather_metrics_string(registry: &Registry) -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::from("# ERROR ENCODING METRICS");
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!(error = %e, "Metrics output is not valid UTF-8");
        String::from("# ERROR ENCODING METRICS TO UTF-8")
    })
}

/// HTTP handler for the Prometheus metrics endpoint.
pub async fn metrics_handler(
    req: Request<Body>,
    registry: Registry,
) -> Result<Response<Body>, hyper::Error> {
    let mut response = Response::new(Body::empty());

    if req.uri().path() != "/metrics" {
        *response.status_mut() = StatusCode::NOT_FOUND;
        return Ok(response);
    }

    *response.body_mut() = Body::from(gather_metrics_string(&registry));
    if let Ok(content_type) = TextEncoder::new().format_type().parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }
    Ok(response)
}

/// Starts the Prometheus metrics HTTP server. Runs until the process exits.
pub async fn start_metrics_server(port: u16, registry: Registry) {
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let registry = registry.clone();
                async move { metrics_handler(req, registry).await }
            }))
        }
    });

    let server = match Server::try_bind(&addr) {
        Ok(builder) => builder.serve(make_svc),
        Err(e) => {
            error!(port = port, error = %e, "Failed to bind metrics server");
            return;
        }
    };
    info!(
        port = port,
        addr = %addr,
        "Metrics server listening"
    );

    if let Err(e) = server.await {
        error!(error = %e, "Metrics server error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_and_gathers() {
        let registry = Registry::new();
        register_metrics(&registry).unwrap();
        REQUEST_OUTCOMES.with_label_values(&["success"]).inc();

        let text = gather_metrics_string(&registry);
        assert!(text.contains("payload_loadtest_request_outcomes_total"), "{}", text);
    }

    #[test]
    fn double_registration_is_an_error() {
        let registry = Registry::new();
        register_metrics(&registry).unwrap();
        assert!(register_metrics(&registry).is_err());
    }

    #[tokio::test]
    async fn handler_serves_metrics_path_only() {
        let registry = Registry::new();
        register_metrics(&registry).unwrap();

        let ok = metrics_handler(
            Request::builder().uri("/metrics").body(Body::empty()).unwrap(),
            registry.clone(),
        )
        .await
        .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let missing = metrics_handler(
            Request::builder().uri("/other").body(Body::empty()).unwrap(),
            registry,
        )
        .await
        .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
