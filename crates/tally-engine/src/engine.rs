//! Wiring of configured components into a runnable extraction.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tally_auth::{ClientCredentials, Grant, RefreshState, TokenManager, TokenStore};
use tally_config::TallyConfig;
use tally_core::{Endpoint, RunSummary, Tenant};
use tally_fetch::{ClientSettings, EndpointFetcher, ProviderClient, RetryPolicy, TenantResolver, Throttle};
use tally_load::{DuckDbSink, LoadPlanner, TableSink};
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::orchestrator::Orchestrator;

/// A validated configuration bound to live components.
pub struct Engine {
    config: TallyConfig,
    endpoints: Vec<Endpoint>,
    modified_since: Option<DateTime<Utc>>,
    tokens: Arc<TokenManager>,
    client: Arc<ProviderClient>,
    cancel: CancellationToken,
}

impl Engine {
    /// Validate `config` and build the token manager and provider client.
    ///
    /// Refresh tokens persisted in `state` take precedence over configured
    /// ones, since the provider rotates them on every exchange.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] when validation fails and
    /// [`EngineError::Resolve`] when the HTTP client cannot be built.
    pub fn from_config(config: TallyConfig, state: &RefreshState) -> Result<Self, EngineError> {
        config.validate()?;
        let endpoints = config.extract.endpoint_selection()?;
        let modified_since = config.extract.modified_since_at(Utc::now())?;

        let oauth = &config.oauth;
        let store = TokenStore::from_grants(
            state.token_or(&Grant::Credential, &oauth.refresh_token),
            oauth.tenant_refresh_tokens.iter().map(|(tenant, token)| {
                let grant = Grant::Tenant(tenant.clone());
                (tenant.clone(), state.token_or(&grant, token).to_string())
            }),
        );

        let settings = ClientSettings {
            api_base_url: config.provider.api_base_url.clone(),
            connections_url: config.provider.connections_url.clone(),
            tenant_header: config.provider.tenant_header.clone(),
            timeout: Duration::from_secs(config.provider.timeout_secs),
            user_agent: config.provider.user_agent.clone(),
        };
        let http = settings.http_client()?;

        let retry = &config.retry;
        let tokens = Arc::new(
            TokenManager::new(
                http.clone(),
                ClientCredentials {
                    client_id: oauth.client_id.clone(),
                    client_secret: oauth.client_secret.clone(),
                    token_url: oauth.token_url.clone(),
                },
                store,
            )
            .with_safety_margin(Duration::from_secs(oauth.safety_margin_secs))
            .with_retries(retry.max_transient_retries, retry.backoff()),
        );

        let throttle = if retry.calls_per_minute == 0 {
            Throttle::disabled()
        } else {
            Throttle::per_minute(retry.calls_per_minute)
        };
        let client = Arc::new(
            ProviderClient::new(http, Arc::clone(&tokens), settings)
                .with_retry_policy(RetryPolicy {
                    max_rate_limit_retries: retry.max_rate_limit_retries,
                    max_transient_retries: retry.max_transient_retries,
                    backoff: retry.backoff(),
                    default_retry_after: Duration::from_secs(retry.default_retry_after_secs),
                })
                .with_throttle(throttle),
        );

        Ok(Self {
            config,
            endpoints,
            modified_since,
            tokens,
            client,
            cancel: CancellationToken::new(),
        })
    }

    #[must_use]
    pub const fn config(&self) -> &TallyConfig {
        &self.config
    }

    #[must_use]
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Token that aborts [`Engine::run`] when cancelled.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolve the tenants this run covers.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Resolve`] when discovery fails or a configured
    /// tenant is not authorized.
    pub async fn tenants(&self) -> Result<Vec<Tenant>, EngineError> {
        let resolver = TenantResolver::new(Arc::clone(&self.client));
        let tenants = resolver
            .resolve(&self.config.extract.tenant_ids, &self.cancel)
            .await?;
        tracing::info!(
            tenants = tenants.len(),
            names = %tenants.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
            "tenants resolved"
        );
        Ok(tenants)
    }

    /// Run against the configured `DuckDB` destination.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] for run-fatal failures only: tenant
    /// resolution or an unusable destination. Pair failures are in the
    /// returned summary.
    pub async fn run(&self) -> Result<RunSummary, EngineError> {
        let sink = DuckDbSink::open(Path::new(&self.config.destination.database_path))?;
        self.run_with_sink(Arc::new(sink)).await
    }

    /// Run against any sink.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Resolve`] when tenant resolution fails.
    pub async fn run_with_sink<S: TableSink + 'static>(&self, sink: Arc<S>) -> Result<RunSummary, EngineError> {
        let tenants = self.tenants().await?;
        let planner = Arc::new(LoadPlanner::new(sink, self.config.destination.load_type));
        let orchestrator = Orchestrator::new(EndpointFetcher::new(Arc::clone(&self.client)), planner)
            .with_concurrency(self.config.extract.concurrency)
            .with_modified_since(self.modified_since)
            .with_cancellation(self.cancel.clone());
        Ok(orchestrator.run(&tenants, &self.endpoints).await)
    }

    /// Refresh tokens to persist for the next run.
    ///
    /// Revoked grants are left out so the next run falls back to the
    /// configured token.
    pub async fn refresh_state(&self) -> RefreshState {
        RefreshState::new(self.tokens.refresh_tokens().await)
    }
}
