// src/error.rs
// Error taxonomy for the routing engine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Normalized category for upstream provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Auth,
    RateLimited,
    InvalidRequest,
    UpstreamUnavailable,
    Timeout,
    MalformedResponse,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::RateLimited => "rate_limited",
            Self::InvalidRequest => "invalid_request",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::Timeout => "timeout",
            Self::MalformedResponse => "malformed_response",
        }
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify an HTTP status code from an upstream provider.
pub fn classify_status(status: u16) -> ProviderErrorKind {
    match status {
        401 | 403 => ProviderErrorKind::Auth,
        429 => ProviderErrorKind::RateLimited,
        408 => ProviderErrorKind::Timeout,
        400..=499 => ProviderErrorKind::InvalidRequest,
        _ => ProviderErrorKind::UpstreamUnavailable,
    }
}

/// A failure from a provider adapter, already normalized.
///
/// Clone is required so the coalescer can fan a single failure out to
/// every waiter.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::MalformedResponse, message)
    }

    /// Normalize a reqwest transport error.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(format!("request timeout: {err}"))
        } else if err.is_connect() {
            Self::new(
                ProviderErrorKind::UpstreamUnavailable,
                format!("connection failed: {err}"),
            )
        } else {
            Self::new(ProviderErrorKind::UpstreamUnavailable, format!("request failed: {err}"))
        }
    }

    /// Normalize a non-success HTTP status plus error body.
    pub fn from_status(status: u16, body: &str) -> Self {
        Self::new(classify_status(status), format!("upstream returned {status}: {body}"))
    }
}

/// Engine-level error types
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("model '{0}' not found or inactive")]
    UnknownModel(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("account '{0}' not found")]
    UnknownAccount(uuid::Uuid),

    #[error("budget exceeded: estimated ${requested} but only ${remaining} remaining")]
    BudgetExceeded { requested: Decimal, remaining: Decimal },

    #[error("prompt of ~{estimated_tokens} tokens exceeds context window {context_window} of '{model}'")]
    ContextWindowExceeded {
        model: String,
        estimated_tokens: u32,
        context_window: u32,
    },

    #[error("no active model can serve a prompt of ~{estimated_tokens} tokens")]
    NoEligibleModel { estimated_tokens: u32 },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("all {failed} dispatches failed")]
    AllSlotsFailed { failed: usize },

    #[error("store error: {0}")]
    Store(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_auth_statuses() {
        assert_eq!(classify_status(401), ProviderErrorKind::Auth);
        assert_eq!(classify_status(403), ProviderErrorKind::Auth);
    }

    #[test]
    fn classify_rate_limit_and_client_errors() {
        assert_eq!(classify_status(429), ProviderErrorKind::RateLimited);
        assert_eq!(classify_status(400), ProviderErrorKind::InvalidRequest);
        assert_eq!(classify_status(422), ProviderErrorKind::InvalidRequest);
    }

    #[test]
    fn classify_server_errors() {
        assert_eq!(classify_status(500), ProviderErrorKind::UpstreamUnavailable);
        assert_eq!(classify_status(503), ProviderErrorKind::UpstreamUnavailable);
    }

    #[test]
    fn provider_error_display_includes_category() {
        let err = ProviderError::from_status(429, "slow down");
        assert!(err.to_string().starts_with("rate_limited"));
    }
}
