//! HTTP utilities for Azure REST calls

use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
pub fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| c.is_control(), "")
}

/// Failure of a single HTTP exchange
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{status}: {summary}")]
    Status { status: StatusCode, summary: String },

    #[error("invalid response JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// HTTP client wrapper for Azure calls
#[derive(Clone)]
pub struct AzureHttpClient {
    client: Client,
}

impl AzureHttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self, HttpError> {
        Self::build(Client::builder())
    }

    /// Create a client that gives up quickly on unreachable hosts
    pub fn with_connect_timeout(timeout: Duration) -> Result<Self, HttpError> {
        Self::build(Client::builder().connect_timeout(timeout))
    }

    fn build(builder: reqwest::ClientBuilder) -> Result<Self, HttpError> {
        let client = builder
            .user_agent(concat!("graph-export/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    /// Start a GET request
    pub fn get(&self, url: &str) -> RequestBuilder {
        tracing::debug!("GET {}", url);
        self.client.get(url)
    }

    /// Start a POST request
    pub fn post(&self, url: &str) -> RequestBuilder {
        tracing::debug!("POST {}", url);
        self.client.post(url)
    }

    /// Send a request and parse the JSON body of a successful response
    pub async fn send(&self, request: RequestBuilder) -> Result<Value, HttpError> {
        let response = request.send().await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(HttpError::Status {
                status,
                summary: error_summary(&body),
            });
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }

        Ok(serde_json::from_str(&body)?)
    }
}

/// Pull a short description out of an Azure error body
///
/// Handles both the ARM shape (`{"error": {"code", "message"}}`) and the
/// OAuth2 shape (`{"error": "...", "error_description": "..."}`).
pub fn error_summary(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return sanitize_for_log(body);
    };

    let summary = match value.get("error") {
        Some(Value::Object(err)) => {
            let code = err.get("code").and_then(|v| v.as_str()).unwrap_or("Error");
            match err.get("message").and_then(|v| v.as_str()) {
                Some(message) => format!("{}: {}", code, message),
                None => code.to_string(),
            }
        }
        Some(Value::String(code)) => match value.get("error_description").and_then(|v| v.as_str())
        {
            Some(description) => format!("{}: {}", code, description),
            None => code.clone(),
        },
        _ => body.to_string(),
    };

    sanitize_for_log(&summary)
}

/// Hint for the statuses a user can act on
pub fn status_hint(status: StatusCode) -> Option<&'static str> {
    match status.as_u16() {
        401 => Some("check the Azure credentials in the environment or run 'az login'"),
        403 => Some("the identity needs read access on every listed subscription"),
        429 => Some("the Resource Graph request quota was exceeded"),
        _ => None,
    }
}
