//! LLM error types with retry classification.

use std::time::Duration;

use thiserror::Error;

/// Classification of LLM errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmErrorKind {
    /// 429 - transient, retry with a longer base delay
    RateLimited,
    /// 5xx - transient
    ServerError,
    /// Other 4xx - permanent
    ClientError,
    /// Connection failure or timeout - transient
    NetworkError,
    /// Body could not be decoded - permanent
    ParseError,
}

impl LlmErrorKind {
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            LlmErrorKind::RateLimited | LlmErrorKind::ServerError | LlmErrorKind::NetworkError
        )
    }

    fn base_delay(self) -> Duration {
        match self {
            LlmErrorKind::RateLimited => Duration::from_secs(5),
            LlmErrorKind::ServerError => Duration::from_secs(2),
            _ => Duration::from_secs(1),
        }
    }
}

impl std::fmt::Display for LlmErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            LlmErrorKind::RateLimited => "Rate limited",
            LlmErrorKind::ServerError => "Server error",
            LlmErrorKind::ClientError => "Client error",
            LlmErrorKind::NetworkError => "Network error",
            LlmErrorKind::ParseError => "Parse error",
        };
        f.write_str(label)
    }
}

/// Error from an LLM API call.
#[derive(Debug, Error)]
#[error("{kind}{}: {message}", status_suffix(.status_code))]
pub struct LlmError {
    pub kind: LlmErrorKind,
    pub status_code: Option<u16>,
    pub message: String,
    /// Delay requested by the server via `Retry-After`
    pub retry_after: Option<Duration>,
}

impl LlmError {
    pub fn new(kind: LlmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Build an error from a non-success HTTP response.
    pub fn from_status(
        status: u16,
        body: impl Into<String>,
        retry_after: Option<Duration>,
    ) -> Self {
        Self {
            kind: classify_http_status(status),
            status_code: Some(status),
            message: body.into(),
            retry_after,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::NetworkError, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(LlmErrorKind::ParseError, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

fn status_suffix(status_code: &Option<u16>) -> String {
    status_code
        .map(|code| format!(" (HTTP {})", code))
        .unwrap_or_default()
}

/// How the client retries transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Upper bound for a single backoff delay
    pub max_delay: Duration,
    /// Upper bound for the whole request including retries
    pub max_total: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_delay: Duration::from_secs(60),
            max_total: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn should_retry(&self, error: &LlmError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_retries
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// `Retry-After` wins; otherwise exponential backoff on the kind's base
    /// delay, capped at `max_delay`.
    pub fn delay_for(&self, error: &LlmError, attempt: u32) -> Duration {
        if let Some(retry_after) = error.retry_after {
            return retry_after.min(self.max_delay);
        }
        let multiplier = 2u32.saturating_pow(attempt);
        error
            .kind
            .base_delay()
            .saturating_mul(multiplier)
            .min(self.max_delay)
    }
}

/// Map an HTTP status code to an error kind.
pub fn classify_http_status(status: u16) -> LlmErrorKind {
    match status {
        429 => LlmErrorKind::RateLimited,
        400..=499 => LlmErrorKind::ClientError,
        _ => LlmErrorKind::ServerError,
    }
}
