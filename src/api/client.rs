//! Shared HTTP plumbing for the backend API
//!
//! One `ApiClient` per session: it owns the cookie jar that carries the
//! session credential, so it must be shared across every call made on behalf
//! of the same login.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors surfaced by the backend collaborators. Every variant renders as a
/// human-readable message; callers display it, they do not retry.
#[derive(Debug)]
pub enum ApiError {
    /// Network/HTTP transport failure.
    NetworkError(String),
    /// The backend answered with a non-success status.
    ApiError { status: u16, message: String },
    /// The response body could not be parsed.
    ParseError(String),
    /// A required credential is missing locally (no login, no API key).
    MissingCredentials(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::NetworkError(e) => write!(f, "Network error: {}", e),
            ApiError::ApiError { status, message } => {
                write!(f, "Server error ({}): {}", status, message)
            }
            ApiError::ParseError(e) => write!(f, "Failed to parse server response: {}", e),
            ApiError::MissingCredentials(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

/// Backend error body (FastAPI-style `{"detail": "..."}`).
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    detail: String,
}

/// HTTP client bound to one backend base URL, with a persistent cookie jar
/// for the session credential.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()
            .map_err(|e| ApiError::NetworkError(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Turn a non-success response into a readable `ApiError`, preferring
    /// the backend's `detail` message when it sent one.
    pub(crate) async fn error_for_status(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = if let Ok(err) = serde_json::from_str::<ApiErrorResponse>(&body) {
            err.detail
        } else if !body.is_empty() {
            body
        } else {
            match status.as_u16() {
                401 => "Unauthorized".to_string(),
                403 => "Forbidden".to_string(),
                429 => "Rate limited - try again later".to_string(),
                _ => status
                    .canonical_reason()
                    .unwrap_or("Request failed")
                    .to_string(),
            }
        };

        log::error!("API error ({}): {}", status.as_u16(), message);
        Err(ApiError::ApiError {
            status: status.as_u16(),
            message,
        })
    }
}
