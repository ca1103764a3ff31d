use std::process::ExitCode;
use std::sync::Arc;

use mimalloc::MiMalloc;
use prometheus::Registry;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use payload_loadtest::cancel::{CancelCause, RunContext};
use payload_loadtest::client::build_client;
use payload_loadtest::config::{Config, LogFormat};
use payload_loadtest::dispatcher::Dispatcher;
use payload_loadtest::events::TracingSink;
use payload_loadtest::metrics::{gather_metrics_string, register_metrics, start_metrics_server};
use payload_loadtest::orchestrator::{LoadTest, RunOutcome};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const EXIT_CONFIG_ERROR: u8 = 1;
const EXIT_INTERRUPTED: u8 = 2;

/// Prints helpful configuration documentation.
fn print_config_help() {
    eprintln!("Required environment variables:");
    eprintln!(
        "  TARGET_URL                - The URL to POST to (must start with http:// or https://)"
    );
    eprintln!();
    eprintln!("Optional environment variables:");
    eprintln!("  TOTAL_REQUESTS            - Total number of requests (default: 1000, must be > 0)");
    eprintln!(
        "  NUM_CONCURRENT_TASKS      - Number of concurrent workers (default: 10, must be > 0)"
    );
    eprintln!("  TEMPLATE_PATH             - Payload template file (default: config.json)");
    eprintln!("  TEST_DURATION             - Run deadline: 30s, 10m, 2h (default: 30m)");
    eprintln!("  REQUEST_TIMEOUT           - Per-request timeout (default: 5s)");
    eprintln!("  CONNECT_TIMEOUT           - Connect/handshake timeout (default: 2s)");
    eprintln!("  SLOW_THRESHOLD            - Latency above which a success is slow (default: 3s)");
    eprintln!("  MAX_RESPONSE_BYTES        - Response body prefix read and logged (default: 1024)");
    eprintln!("  MAX_LOGGED_PAYLOAD_BYTES  - Request body prefix logged (default: 1024)");
    eprintln!("  RANDOM_SEED               - Seed for reproducible payloads");
    eprintln!();
    eprintln!("Transport and output:");
    eprintln!("  SKIP_TLS_VERIFY           - Skip TLS certificate verification (default: false)");
    eprintln!("  CUSTOM_HEADERS            - Comma-separated headers (use \\, for literal commas)");
    eprintln!("  METRICS_PORT              - Serve Prometheus metrics on this port");
    eprintln!("  METRIC_NAMESPACE          - Prometheus metric namespace (default: payload_loadtest)");
    eprintln!("  LOG_FORMAT                - text or json (default: text)");
    eprintln!("  RUST_LOG                  - Log filter (default: info)");
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

/// Cancels the run on Ctrl+C or SIGTERM.
fn spawn_signal_handler(ctx: RunContext) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
            _ = ctx.cancelled() => return,
        }

        warn!("Shutdown signal received, waiting for workers to stop");
        ctx.cancel(CancelCause::Interrupt);
    });
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration from environment variables
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    init_tracing(config.log_format);

    let client_result = match build_client(&config.to_client_config()) {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Failed to build HTTP client");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let load_test = match LoadTest::load(config.run_params()) {
        Ok(test) => test,
        Err(e) => {
            error!(error = %e, "Failed to load test configuration");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    config.print_summary(&client_result.parsed_headers);

    let registry = Registry::new();
    if let Err(e) = register_metrics(&registry) {
        error!(error = %e, "Failed to register metrics");
    }
    if let Some(port) = config.metrics_port {
        let registry = registry.clone();
        tokio::spawn(async move {
            start_metrics_server(port, registry).await;
        });
    }

    let dispatcher = Arc::new(Dispatcher::new(
        client_result.client,
        config.dispatch_settings(),
        Arc::new(TracingSink),
    ));

    let ctx = RunContext::new();
    spawn_signal_handler(ctx.clone());

    let outcome = match load_test.run(ctx, dispatcher).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(error = %e, "Load test failed to start");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match &outcome {
        RunOutcome::Completed { elapsed, .. } => {
            println!("\nTest completed in {:?}", elapsed);
        }
        RunOutcome::Interrupted { elapsed, cause, .. } => {
            println!("\nTest interrupted after {:?}: {}", elapsed, cause);
        }
    }
    println!("{}", outcome.report());

    if config.metrics_port.is_some() {
        println!("\n--- FINAL METRICS ---\n{}", gather_metrics_string(&registry));
        println!("--- END OF FINAL METRICS ---");
    }

    if outcome.is_completed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_INTERRUPTED)
    }
}
