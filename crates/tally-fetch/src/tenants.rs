//! Tenant discovery and validation of the configured tenant list.

use std::sync::Arc;

use reqwest::header::ACCEPT;
use serde::Deserialize;
use tally_auth::{AuthError, Grant};
use tally_core::{CoreError, Tenant};
use tokio_util::sync::CancellationToken;

use crate::client::{ProviderClient, Scope};
use crate::error::FetchError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection {
    tenant_id: String,
    #[serde(default)]
    tenant_name: Option<String>,
}

pub struct TenantResolver {
    client: Arc<ProviderClient>,
}

impl TenantResolver {
    #[must_use]
    pub const fn new(client: Arc<ProviderClient>) -> Self {
        Self { client }
    }

    /// Every tenant reachable through any configured grant, in discovery
    /// order.
    ///
    /// The connections endpoint is queried once per grant and the results
    /// are merged. Each tenant is routed to the first grant that lists it, so
    /// later calls for a tenant found only through another tenant's grant use
    /// that grant. A tenant-owned grant that fails authorization still
    /// contributes its own tenant, so the failure is recorded against that
    /// tenant's pairs instead of failing the run.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] if a discovery call fails after retries, the
    /// credential grant is rejected, the body is not a list of connections,
    /// or no grant is configured.
    pub async fn discover(&self, cancel: &CancellationToken) -> Result<Vec<Tenant>, FetchError> {
        let store = self.client.tokens().store();
        let grants = store.grants();
        if grants.is_empty() {
            return Err(AuthError::NoGrant(Grant::Credential.to_string()).into());
        }

        let mut tenants: Vec<Tenant> = Vec::new();
        for grant in grants {
            let connections = match self.connections(&grant, cancel).await {
                Ok(connections) => connections,
                Err(error) => match &grant {
                    Grant::Tenant(id) if error.is_auth() => {
                        tracing::warn!(%grant, %error, "tenant grant failed discovery; keeping its tenant");
                        vec![Connection {
                            tenant_id: id.clone(),
                            tenant_name: None,
                        }]
                    }
                    _ => return Err(error),
                },
            };
            for connection in connections {
                store.route(&connection.tenant_id, &grant);
                if tenants.iter().any(|t| t.id == connection.tenant_id) {
                    continue;
                }
                tenants.push(Tenant::new(
                    connection.tenant_id,
                    connection.tenant_name.unwrap_or_default(),
                ));
            }
        }
        tracing::info!(count = tenants.len(), "discovered tenants");
        Ok(tenants)
    }

    async fn connections(
        &self,
        grant: &Grant,
        cancel: &CancellationToken,
    ) -> Result<Vec<Connection>, FetchError> {
        let url = &self.client.settings().connections_url;
        let resp = self
            .client
            .execute(Scope::Grant(grant), cancel, |http, token| {
                http.get(url)
                    .bearer_auth(token.secret())
                    .header(ACCEPT, "application/json")
            })
            .await?;
        let connections: Vec<Connection> = resp
            .json()
            .await
            .map_err(|e| FetchError::Parse(format!("connections response: {e}")))?;
        tracing::debug!(%grant, count = connections.len(), "connections listed");
        Ok(connections)
    }

    /// Resolve the tenants to process.
    ///
    /// An empty `configured` list selects every discovered tenant. Otherwise
    /// the configured ids are returned in configured order, each matched
    /// case-insensitively against discovery.
    ///
    /// # Errors
    ///
    /// - [`FetchError::Validation`] with [`CoreError::UnknownTenants`] when a
    ///   configured id is not authorized, or when no tenant is authorized at all
    /// - any discovery error from [`Self::discover`]
    pub async fn resolve(
        &self,
        configured: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<Tenant>, FetchError> {
        let discovered = self.discover(cancel).await?;
        let selected = select(discovered, configured)?;
        tracing::info!(
            tenants = %selected.iter().map(ToString::to_string).collect::<Vec<_>>().join(", "),
            "tenants resolved"
        );
        Ok(selected)
    }
}

fn select(discovered: Vec<Tenant>, configured: &[String]) -> Result<Vec<Tenant>, CoreError> {
    let wanted: Vec<&str> = configured
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .collect();

    if wanted.is_empty() {
        if discovered.is_empty() {
            return Err(CoreError::Validation(
                "the credential is not authorized for any tenant".into(),
            ));
        }
        return Ok(discovered);
    }

    let mut selected: Vec<Tenant> = Vec::with_capacity(wanted.len());
    let mut unknown = Vec::new();
    for id in wanted {
        match discovered.iter().find(|t| t.id.eq_ignore_ascii_case(id)) {
            Some(tenant) if !selected.contains(tenant) => selected.push(tenant.clone()),
            Some(_) => {}
            None => unknown.push(id.to_string()),
        }
    }
    if unknown.is_empty() {
        Ok(selected)
    } else {
        Err(CoreError::UnknownTenants(unknown))
    }
}
