//! OAuth2 `refresh_token` exchanges against the provider's token endpoint.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use tally_core::Backoff;

use crate::error::AuthError;
use crate::store::{Grant, Slot, TokenStore};
use crate::token::{AccessToken, Token, TokenResponse};

const DEFAULT_SAFETY_MARGIN_SECS: i64 = 30;
const DEFAULT_EXCHANGE_RETRIES: u32 = 3;

/// Application credentials used for HTTP basic auth on the token endpoint.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

/// Failure of one exchange attempt.
enum Attempt {
    /// Network error, 429 or 5xx: worth retrying.
    Retryable(String),
    Fatal(AuthError),
}

/// Hands out access tokens per tenant, refreshing them on demand.
///
/// Refreshes are single-flight per grant: the slot lock is held across the
/// exchange, so callers queued behind it observe the rotated token instead of
/// spending the old refresh token a second time.
#[derive(Debug)]
pub struct TokenManager {
    http: reqwest::Client,
    credentials: ClientCredentials,
    store: TokenStore,
    safety_margin: chrono::Duration,
    max_retries: u32,
    backoff: Backoff,
}

impl TokenManager {
    #[must_use]
    pub fn new(http: reqwest::Client, credentials: ClientCredentials, store: TokenStore) -> Self {
        Self {
            http,
            credentials,
            store,
            safety_margin: chrono::Duration::seconds(DEFAULT_SAFETY_MARGIN_SECS),
            max_retries: DEFAULT_EXCHANGE_RETRIES,
            backoff: Backoff::default(),
        }
    }

    #[must_use]
    pub fn with_safety_margin(mut self, margin: Duration) -> Self {
        self.safety_margin =
            chrono::Duration::from_std(margin).unwrap_or(self.safety_margin);
        self
    }

    #[must_use]
    pub const fn with_retries(mut self, max_retries: u32, backoff: Backoff) -> Self {
        self.max_retries = max_retries;
        self.backoff = backoff;
        self
    }

    #[must_use]
    pub const fn store(&self) -> &TokenStore {
        &self.store
    }

    /// Access token for `tenant_id`, refreshed first if it expires within the
    /// safety margin.
    ///
    /// # Errors
    ///
    /// - `AuthError::NoGrant` when no refresh token serves the tenant
    /// - `AuthError::Revoked` when the provider rejected the grant (now or earlier)
    /// - `AuthError::Exchange` when the token endpoint kept failing
    pub async fn obtain(&self, tenant_id: &str) -> Result<AccessToken, AuthError> {
        let slot = self.store.slot_for(tenant_id)?;
        self.obtain_from(slot, None).await
    }

    /// Forced refresh after the provider answered 401 to `stale`.
    ///
    /// If another task already replaced `stale`, its token is returned without
    /// a second exchange.
    ///
    /// # Errors
    ///
    /// Same as [`Self::obtain`].
    pub async fn obtain_fresh(
        &self,
        tenant_id: &str,
        stale: &AccessToken,
    ) -> Result<AccessToken, AuthError> {
        let slot = self.store.slot_for(tenant_id)?;
        self.obtain_from(slot, Some(stale)).await
    }

    /// Token of `grant`, for calls scoped to a grant rather than a tenant
    /// (tenant discovery).
    ///
    /// # Errors
    ///
    /// Same as [`Self::obtain`].
    pub async fn obtain_grant(&self, grant: &Grant) -> Result<AccessToken, AuthError> {
        let slot = self.store.slot_named(grant)?;
        self.obtain_from(slot, None).await
    }

    /// Forced refresh of a grant token after a 401.
    ///
    /// # Errors
    ///
    /// Same as [`Self::obtain`].
    pub async fn obtain_fresh_grant(
        &self,
        grant: &Grant,
        stale: &AccessToken,
    ) -> Result<AccessToken, AuthError> {
        let slot = self.store.slot_named(grant)?;
        self.obtain_from(slot, Some(stale)).await
    }

    /// Current (possibly rotated) refresh token of every live grant.
    pub async fn refresh_tokens(&self) -> BTreeMap<Grant, String> {
        self.store.refresh_tokens().await
    }

    async fn obtain_from(
        &self,
        slot: &Slot,
        stale: Option<&AccessToken>,
    ) -> Result<AccessToken, AuthError> {
        let mut state = slot.state.lock().await;

        if let Some(reason) = &state.revoked {
            return Err(AuthError::Revoked {
                grant: slot.grant.to_string(),
                reason: reason.clone(),
            });
        }

        if let Some(token) = &state.token
            && stale.is_none_or(|stale| token.access != *stale)
            && token.is_fresh(Utc::now(), self.safety_margin)
        {
            return Ok(token.access.clone());
        }

        match self.exchange(&slot.grant, &state.refresh_token).await {
            Ok(token) => {
                tracing::debug!(grant = %slot.grant, expires_at = %token.expires_at, "access token refreshed");
                let access = token.access.clone();
                state.refresh_token.clone_from(&token.refresh_token);
                state.token = Some(token);
                Ok(access)
            }
            Err(AuthError::Revoked { grant, reason }) => {
                tracing::error!(%grant, %reason, "refresh token rejected; grant disabled for this run");
                state.revoked = Some(reason.clone());
                state.token = None;
                Err(AuthError::Revoked { grant, reason })
            }
            Err(error) => Err(error),
        }
    }

    async fn exchange(&self, grant: &Grant, refresh_token: &str) -> Result<Token, AuthError> {
        let mut attempt = 0;
        loop {
            match self.exchange_once(grant, refresh_token).await {
                Ok(token) => return Ok(token),
                Err(Attempt::Fatal(error)) => return Err(error),
                Err(Attempt::Retryable(reason)) if attempt < self.max_retries => {
                    attempt += 1;
                    let wait = self.backoff.delay(attempt);
                    tracing::warn!(
                        %grant,
                        attempt,
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        %reason,
                        "token exchange failed; retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(Attempt::Retryable(reason)) => {
                    return Err(AuthError::Exchange {
                        grant: grant.to_string(),
                        reason,
                    });
                }
            }
        }
    }

    async fn exchange_once(&self, grant: &Grant, refresh_token: &str) -> Result<Token, Attempt> {
        let response = self
            .http
            .post(&self.credentials.token_url)
            .basic_auth(&self.credentials.client_id, Some(&self.credentials.client_secret))
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .send()
            .await
            .map_err(|e| Attempt::Retryable(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            let body: TokenResponse = response.json().await.map_err(|e| {
                Attempt::Fatal(AuthError::MalformedResponse(e.to_string()))
            })?;
            return Ok(Token::from_response(body, refresh_token, Utc::now()));
        }

        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(Attempt::Retryable(format!("HTTP {status}")));
        }
        if status == StatusCode::UNAUTHORIZED
            || (status == StatusCode::BAD_REQUEST && body.contains("invalid_grant"))
        {
            return Err(Attempt::Fatal(AuthError::Revoked {
                grant: grant.to_string(),
                reason: format!("HTTP {status}: {}", body.trim()),
            }));
        }
        Err(Attempt::Fatal(AuthError::Exchange {
            grant: grant.to_string(),
            reason: format!("HTTP {status}: {}", body.trim()),
        }))
    }
}
