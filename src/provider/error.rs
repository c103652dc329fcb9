use std::time::Duration;

/// Upstream signalled that we are over quota.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{provider} rate limited (status {status_code}): {message}")]
pub struct RateLimitError {
    pub provider: String,
    pub status_code: u16,
    /// How long upstream asked us to wait; zero when it did not say.
    pub retry_after: Duration,
    /// Raw remaining-quota header value, empty when absent.
    pub remaining: String,
    pub message: String,
}

/// Failure modes of a [`GameProvider`](super::GameProvider) call.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// No underlying provider is configured. Never retried.
    #[error("provider unavailable")]
    Unavailable,

    /// The caller's cancellation token fired while waiting or fetching.
    #[error("fetch canceled")]
    Canceled,

    #[error(transparent)]
    RateLimited(#[from] RateLimitError),

    /// Any other upstream or decode failure; retried with backoff.
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl FetchError {
    pub fn as_rate_limit(&self) -> Option<&RateLimitError> {
        match self {
            FetchError::RateLimited(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, FetchError::Canceled)
    }

    /// Short, fixed label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Unavailable => "unavailable",
            FetchError::Canceled => "canceled",
            FetchError::RateLimited(_) => "rate_limited",
            FetchError::Upstream(_) => "upstream",
        }
    }
}

/// Returns the typed rate-limit details when `err` is a rate-limit signal.
pub fn rate_limit_error(err: &FetchError) -> Option<&RateLimitError> {
    err.as_rate_limit()
}
