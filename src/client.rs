use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Errors raised while building the HTTP client.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Invalid header format in CUSTOM_HEADERS: '{0}'. Expected 'Name:Value'.")]
    InvalidHeaderFormat(String),

    #[error("Invalid header name '{name}': {message}")]
    InvalidHeaderName { name: String, message: String },

    #[error("Invalid header value for '{name}': {message}")]
    InvalidHeaderValue { name: String, message: String },

    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Configuration for building the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Overall budget for one request, body included
    pub request_timeout: Duration,
    /// Budget for TCP connect and TLS handshake
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
    pub skip_tls_verify: bool,
    pub custom_headers: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            idle_timeout: Duration::from_secs(30),
            skip_tls_verify: false,
            custom_headers: None,
        }
    }
}

/// Result of building the client, includes parsed headers for logging.
pub struct ClientBuildResult {
    pub client: reqwest::Client,
    pub parsed_headers: HeaderMap,
}

/// Builds the reqwest client shared by all workers.
pub fn build_client(config: &ClientConfig) -> Result<ClientBuildResult, ClientError> {
    let mut client_builder = reqwest::Client::builder()
        .timeout(config.request_timeout)
        .connect_timeout(config.connect_timeout)
        .pool_idle_timeout(config.idle_timeout);

    let parsed_headers = parse_custom_headers(config.custom_headers.as_deref())?;
    if !parsed_headers.is_empty() {
        client_builder = client_builder.default_headers(parsed_headers.clone());
        info!(
            headers = parsed_headers.len(),
            "Configured custom default headers"
        );
    }

    let client = if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification");
        client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?
    } else {
        client_builder.build()?
    };

    Ok(ClientBuildResult {
        client,
        parsed_headers,
    })
}

/// Parses `Name:Value` pairs separated by commas into a header map.
///
/// Use `\,` to include a literal comma in a header value.
/// Example: "Connection:keep-alive,Keep-Alive:timeout=5\,max=200"
pub fn parse_custom_headers(headers_str: Option<&str>) -> Result<HeaderMap, ClientError> {
    let mut parsed_headers = HeaderMap::new();

    let headers_str = match headers_str {
        Some(s) if !s.trim().is_empty() => s,
        _ => return Ok(parsed_headers),
    };

    for pair in split_escaped(headers_str) {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }

        let (name, value) = pair
            .split_once(':')
            .map(|(n, v)| (n.trim(), v.trim()))
            .filter(|(n, _)| !n.is_empty())
            .ok_or_else(|| ClientError::InvalidHeaderFormat(pair.to_string()))?;

        let header_name =
            HeaderName::from_str(name).map_err(|e| ClientError::InvalidHeaderName {
                name: name.to_string(),
                message: e.to_string(),
            })?;
        let header_value =
            HeaderValue::from_str(value).map_err(|e| ClientError::InvalidHeaderValue {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        parsed_headers.insert(header_name, header_value);
    }

    Ok(parsed_headers)
}

/// Splits on unescaped commas, turning `\,` into a literal comma.
fn split_escaped(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if chars.peek() == Some(&',') => {
                current.push(',');
                chars.next();
            }
            ',' => parts.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    parts.push(current);

    parts
}
