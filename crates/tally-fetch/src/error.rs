//! Fetch error types.

use tally_auth::AuthError;
use tally_core::{CoreError, FailureKind};
use thiserror::Error;

/// Errors raised while talking to the provider's resource and discovery APIs.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Token refresh failed, or a request stayed unauthorized after re-auth.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// The provider kept answering 429 past the retry ceiling.
    #[error("rate limit exceeded after {attempts} attempts")]
    RateLimitExceeded { attempts: u32 },

    /// Network errors or 5xx responses past the retry ceiling.
    #[error("transient fetch failure after {attempts} attempts: {reason}")]
    TransientFetch { attempts: u32, reason: String },

    /// Non-retryable provider status.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The response body did not have the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(String),

    /// Configured tenants are not authorized for the credential.
    #[error(transparent)]
    Validation(#[from] CoreError),

    /// The run was cancelled before the request was issued.
    #[error("cancelled")]
    Cancelled,
}

impl FetchError {
    /// Summary classification of this error when it ends a pair.
    #[must_use]
    pub const fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Auth(_) => FailureKind::Auth,
            Self::RateLimitExceeded { .. } => FailureKind::RateLimitExceeded,
            Self::TransientFetch { .. } => FailureKind::TransientFetch,
            Self::Cancelled => FailureKind::Cancelled,
            Self::Api { .. } | Self::Parse(_) | Self::Client(_) | Self::Validation(_) => {
                FailureKind::Provider
            }
        }
    }

    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}
