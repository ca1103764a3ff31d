use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;
use tokio::time::Duration;

use crate::client::ClientConfig;
use crate::dispatcher::DispatchSettings;
use crate::orchestrator::RunParams;
use crate::utils::parse_duration_string;

/// Errors in the environment configuration. All of them are fatal.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} environment variable must be set")]
    MissingVar(&'static str),

    #[error("TARGET_URL must start with http:// or https://, got '{0}'")]
    InvalidUrl(String),

    #[error("{var} must be a positive integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    #[error("Invalid {var} format: '{value}'. {message}")]
    InvalidDuration {
        var: &'static str,
        value: String,
        message: String,
    },

    #[error("{var} must be true or false, got '{value}'")]
    InvalidBool { var: &'static str, value: String },

    #[error("{0}")]
    InvalidTimeouts(String),

    #[error("LOG_FORMAT must be 'text' or 'json', got '{0}'")]
    InvalidLogFormat(String),
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "text" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(ConfigError::InvalidLogFormat(s.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Main configuration for the load test.
#[derive(Debug, Clone)]
pub struct Config {
    pub target_url: String,
    pub total_requests: u64,
    pub num_concurrent_tasks: usize,
    pub template_path: PathBuf,
    pub test_duration: Duration,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub slow_threshold: Duration,
    pub max_response_bytes: usize,
    pub max_logged_payload_bytes: usize,
    pub random_seed: Option<u64>,
    pub skip_tls_verify: bool,
    pub custom_headers: Option<String>,
    pub metrics_port: Option<u16>,
    pub log_format: LogFormat,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let target_url = env::var("TARGET_URL")
            .ok()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .ok_or(ConfigError::MissingVar("TARGET_URL"))?;
        if !(target_url.starts_with("http://") || target_url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(target_url));
        }

        let total_requests: u64 = positive("TOTAL_REQUESTS", 1000)?;
        let num_concurrent_tasks: usize = positive("NUM_CONCURRENT_TASKS", 10)?;

        let template_path =
            PathBuf::from(env::var("TEMPLATE_PATH").unwrap_or_else(|_| "config.json".to_string()));

        let test_duration = duration("TEST_DURATION", "30m")?;
        let request_timeout = duration("REQUEST_TIMEOUT", "5s")?;
        let connect_timeout = duration("CONNECT_TIMEOUT", "2s")?;
        let slow_threshold = duration("SLOW_THRESHOLD", "3s")?;

        if request_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeouts(
                "REQUEST_TIMEOUT must be greater than zero".to_string(),
            ));
        }
        if request_timeout >= test_duration {
            return Err(ConfigError::InvalidTimeouts(format!(
                "REQUEST_TIMEOUT ({:?}) must be shorter than TEST_DURATION ({:?})",
                request_timeout, test_duration
            )));
        }
        if connect_timeout > request_timeout {
            return Err(ConfigError::InvalidTimeouts(format!(
                "CONNECT_TIMEOUT ({:?}) must not exceed REQUEST_TIMEOUT ({:?})",
                connect_timeout, request_timeout
            )));
        }

        let max_response_bytes: usize = positive("MAX_RESPONSE_BYTES", 1024)?;
        let max_logged_payload_bytes: usize = positive("MAX_LOGGED_PAYLOAD_BYTES", 1024)?;

        let random_seed = optional_number("RANDOM_SEED")?;
        let metrics_port = optional_number("METRICS_PORT")?;

        let skip_tls_verify = boolean("SKIP_TLS_VERIFY", false)?;
        let custom_headers = env::var("CUSTOM_HEADERS").ok();

        let log_format = match env::var("LOG_FORMAT") {
            Ok(value) => value.parse()?,
            Err(_) => LogFormat::default(),
        };

        Ok(Config {
            target_url,
            total_requests,
            num_concurrent_tasks,
            template_path,
            test_duration,
            request_timeout,
            connect_timeout,
            slow_threshold,
            max_response_bytes,
            max_logged_payload_bytes,
            random_seed,
            skip_tls_verify,
            custom_headers,
            metrics_port,
            log_format,
        })
    }

    pub fn run_params(&self) -> RunParams {
        RunParams {
            target_url: self.target_url.clone(),
            total_requests: self.total_requests,
            workers: self.num_concurrent_tasks,
            template_path: self.template_path.clone(),
            deadline: self.test_duration,
            seed: self.random_seed,
        }
    }

    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            request_timeout: self.request_timeout,
            connect_timeout: self.connect_timeout,
            skip_tls_verify: self.skip_tls_verify,
            custom_headers: self.custom_headers.clone(),
            ..ClientConfig::default()
        }
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            slow_threshold: self.slow_threshold,
            max_response_bytes: self.max_response_bytes,
            max_logged_payload_bytes: self.max_logged_payload_bytes,
        }
    }

    /// Prints the configuration summary.
    pub fn print_summary(&self, parsed_headers: &reqwest::header::HeaderMap) {
        println!("Starting load test:");
        println!("  Target URL: {}", self.target_url);
        println!("  Total Requests: {}", self.total_requests);
        println!("  Concurrent Tasks: {}", self.num_concurrent_tasks);
        println!("  Template: {}", self.template_path.display());
        println!("  Run Deadline: {:?}", self.test_duration);
        println!(
            "  Request Timeout: {:?} (connect {:?}, slow above {:?})",
            self.request_timeout, self.connect_timeout, self.slow_threshold
        );
        println!("  Skip TLS Verify: {}", self.skip_tls_verify);
        match self.random_seed {
            Some(seed) => println!("  Random Seed: {}", seed),
            None => println!("  Random Seed: none (entropy)"),
        }

        if parsed_headers.is_empty() {
            println!("  Custom Headers: none");
        } else {
            println!("  Custom Headers:");
            for (name, value) in parsed_headers.iter() {
                println!(
                    "    {}: {}",
                    name,
                    value.to_str().unwrap_or("<non-ASCII or sensitive value>")
                );
            }
        }
    }
}

fn positive<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    let value = match env::var(var) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .trim()
        .parse::<T>()
        .ok()
        .filter(|n| *n > T::default())
        .ok_or(ConfigError::InvalidNumber { var, value })
}

fn optional_number<T: FromStr>(var: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
        Err(_) => Ok(None),
    }
}

fn duration(var: &'static str, default: &str) -> Result<Duration, ConfigError> {
    let value = env::var(var).unwrap_or_else(|_| default.to_string());
    parse_duration_string(&value).map_err(|message| ConfigError::InvalidDuration {
        var,
        value,
        message,
    })
}

fn boolean(var: &'static str, default: bool) -> Result<bool, ConfigError> {
    let value = match env::var(var) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(ConfigError::InvalidBool { var, value }),
    }
}
