//! Authenticated provider client with the shared retry loop.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tally_auth::{AccessToken, AuthError, Grant, TokenManager};
use tally_core::Backoff;
use tokio_util::sync::CancellationToken;

use crate::error::FetchError;
use crate::http::{Rejection, check_response};
use crate::throttle::Throttle;

// ── Settings ───────────────────────────────────────────────────────

/// Where the provider lives and how requests identify the tenant.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_base_url: String,
    pub connections_url: String,
    pub tenant_header: String,
    pub timeout: Duration,
    pub user_agent: String,
}

impl ClientSettings {
    /// Build the `reqwest` client shared by token exchanges and API calls.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the TLS backend cannot initialize.
    pub fn http_client(&self) -> Result<reqwest::Client, FetchError> {
        reqwest::Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))
    }
}

/// Retry ceilings for one request.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_rate_limit_retries: u32,
    pub max_transient_retries: u32,
    pub backoff: Backoff,
    /// Wait used when a 429 carries no usable `Retry-After`.
    pub default_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_rate_limit_retries: 5,
            max_transient_retries: 3,
            backoff: Backoff::default(),
            default_retry_after: Duration::from_secs(60),
        }
    }
}

// ── Scope ──────────────────────────────────────────────────────────

/// Which grant authorizes a request.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Scope<'a> {
    Tenant(&'a str),
    /// Grant-scoped calls such as tenant discovery.
    Grant(&'a Grant),
}

impl Scope<'_> {
    /// Tenant whose call budget the request spends. Credential-scoped calls
    /// are not made against a tenant.
    fn throttle_key(&self) -> Option<&str> {
        match self {
            Self::Tenant(id) => Some(*id),
            Self::Grant(Grant::Tenant(id)) => Some(id.as_str()),
            Self::Grant(Grant::Credential) => None,
        }
    }
}

impl fmt::Display for Scope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tenant(id) => f.write_str(id),
            Self::Grant(grant) => write!(f, "{grant}"),
        }
    }
}

// ── Client ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ProviderClient {
    http: reqwest::Client,
    tokens: Arc<TokenManager>,
    settings: ClientSettings,
    retry: RetryPolicy,
    throttle: Throttle,
}

impl ProviderClient {
    /// Client with default retry ceilings and a 50 calls/minute throttle.
    #[must_use]
    pub fn new(http: reqwest::Client, tokens: Arc<TokenManager>, settings: ClientSettings) -> Self {
        Self {
            http,
            tokens,
            settings,
            retry: RetryPolicy::default(),
            throttle: Throttle::per_minute(50),
        }
    }

    #[must_use]
    pub const fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = throttle;
        self
    }

    #[must_use]
    pub const fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    #[must_use]
    pub const fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Send the request produced by `build` until it succeeds or a retry
    /// ceiling is hit.
    ///
    /// - 429: wait for `Retry-After` (or the default), then resend
    /// - 401: force one token refresh, then resend; a second 401 is fatal
    /// - network error or 5xx: exponential backoff, then resend
    ///
    /// Every resend rebuilds the identical request, so a retry restarts only
    /// the current page. Cancellation is checked before each send and
    /// interrupts any wait.
    pub(crate) async fn execute<F>(
        &self,
        scope: Scope<'_>,
        cancel: &CancellationToken,
        build: F,
    ) -> Result<reqwest::Response, FetchError>
    where
        F: Fn(&reqwest::Client, &AccessToken) -> reqwest::RequestBuilder + Send + Sync,
    {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let mut token = self.token(scope).await?;
        let mut rate_limited = 0u32;
        let mut transient = 0u32;
        let mut reauthenticated = false;

        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            if let Some(key) = scope.throttle_key() {
                self.throttle.acquire(key, cancel).await?;
            }

            let failure = match build(&self.http, &token).send().await {
                Err(e) if e.is_builder() => return Err(FetchError::Client(e.to_string())),
                Err(e) => format!("request failed: {e}"),
                Ok(resp) => match check_response(resp).await {
                    Ok(resp) => return Ok(resp),
                    Err(Rejection::Unauthorized) if !reauthenticated => {
                        tracing::info!(%scope, "request unauthorized; forcing token refresh");
                        reauthenticated = true;
                        token = self.fresh_token(scope, &token).await?;
                        continue;
                    }
                    Err(Rejection::Unauthorized) => {
                        return Err(AuthError::Unauthorized(scope.to_string()).into());
                    }
                    Err(Rejection::RateLimited { retry_after }) => {
                        rate_limited += 1;
                        if rate_limited > self.retry.max_rate_limit_retries {
                            return Err(FetchError::RateLimitExceeded {
                                attempts: rate_limited,
                            });
                        }
                        let wait = retry_after.unwrap_or(self.retry.default_retry_after);
                        tracing::warn!(
                            %scope,
                            attempt = rate_limited,
                            wait_secs = wait.as_secs_f64(),
                            "rate limited; waiting before resending"
                        );
                        pause(wait, cancel).await?;
                        continue;
                    }
                    Err(Rejection::Server { status, message }) => {
                        format!("HTTP {status}: {}", message.trim())
                    }
                    Err(Rejection::Api { status, message }) => {
                        return Err(FetchError::Api { status, message });
                    }
                },
            };

            transient += 1;
            if transient > self.retry.max_transient_retries {
                return Err(FetchError::TransientFetch {
                    attempts: transient,
                    reason: failure,
                });
            }
            let wait = self.retry.backoff.delay(transient);
            tracing::warn!(
                %scope,
                attempt = transient,
                wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                reason = %failure,
                "transient failure; backing off"
            );
            pause(wait, cancel).await?;
        }
    }

    async fn token(&self, scope: Scope<'_>) -> Result<AccessToken, AuthError> {
        match scope {
            Scope::Tenant(id) => self.tokens.obtain(id).await,
            Scope::Grant(grant) => self.tokens.obtain_grant(grant).await,
        }
    }

    async fn fresh_token(&self, scope: Scope<'_>, stale: &AccessToken) -> Result<AccessToken, AuthError> {
        match scope {
            Scope::Tenant(id) => self.tokens.obtain_fresh(id, stale).await,
            Scope::Grant(grant) => self.tokens.obtain_fresh_grant(grant, stale).await,
        }
    }
}

/// Sleep for `wait` unless the run is cancelled first.
async fn pause(wait: Duration, cancel: &CancellationToken) -> Result<(), FetchError> {
    tokio::select! {
        () = cancel.cancelled() => Err(FetchError::Cancelled),
        () = tokio::time::sleep(wait) => Ok(()),
    }
}
