//! Per-grant token cache.
//!
//! Every tenant maps to a grant slot. Tenants with their own refresh token get
//! a dedicated slot. A tenant that discovery found through another tenant's
//! grant is routed to that grant; all others share the credential slot. Each
//! slot sits behind its own async mutex, so exchanges are serialized per grant
//! while distinct grants refresh in parallel.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::Mutex;

use crate::error::AuthError;
use crate::token::Token;

/// Owner of a refresh token.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Grant {
    /// Credential-wide token, shared by tenants without a grant of their own.
    Credential,
    /// Token issued for one tenant, named by its tenant id.
    Tenant(String),
}

impl fmt::Display for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Credential => f.write_str("credential"),
            Self::Tenant(id) => write!(f, "tenant {id}"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct SlotState {
    pub(crate) refresh_token: String,
    pub(crate) token: Option<Token>,
    /// Set once the provider rejects the refresh token. Never cleared.
    pub(crate) revoked: Option<String>,
}

#[derive(Debug)]
pub(crate) struct Slot {
    pub(crate) grant: Grant,
    pub(crate) state: Mutex<SlotState>,
}

impl Slot {
    fn new(grant: Grant, refresh_token: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            grant,
            state: Mutex::new(SlotState {
                refresh_token: refresh_token.into(),
                token: None,
                revoked: None,
            }),
        })
    }
}

#[derive(Debug, Default)]
pub struct TokenStore {
    credential: Option<Arc<Slot>>,
    tenants: BTreeMap<String, Arc<Slot>>,
    /// Tenant id -> grant that discovered it, for tenants without their own.
    routes: RwLock<BTreeMap<String, Grant>>,
}

impl TokenStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the credential-wide grant shared by every tenant without its own.
    #[must_use]
    pub fn with_credential(mut self, refresh_token: impl Into<String>) -> Self {
        self.credential = Some(Slot::new(Grant::Credential, refresh_token));
        self
    }

    /// Seed a grant owned by a single tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        let tenant_id = tenant_id.into();
        let slot = Slot::new(Grant::Tenant(tenant_id.clone()), refresh_token);
        self.tenants.insert(tenant_id, slot);
        self
    }

    /// Build from a credential token (empty means none) and per-tenant tokens.
    #[must_use]
    pub fn from_grants<I>(credential: &str, tenants: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut store = Self::new();
        if !credential.is_empty() {
            store = store.with_credential(credential);
        }
        for (tenant_id, refresh_token) in tenants {
            if !refresh_token.is_empty() {
                store = store.with_tenant(tenant_id, refresh_token);
            }
        }
        store
    }

    /// Slot serving `tenant_id`: its own grant, then the grant that
    /// discovered it, then the credential grant.
    pub(crate) fn slot_for(&self, tenant_id: &str) -> Result<&Arc<Slot>, AuthError> {
        if let Some(slot) = self.tenants.get(tenant_id) {
            return Ok(slot);
        }
        let routed = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tenant_id)
            .cloned();
        match routed {
            Some(grant) => self.slot_named(&grant),
            None => self
                .credential
                .as_ref()
                .ok_or_else(|| AuthError::NoGrant(tenant_id.to_string())),
        }
    }

    /// Slot holding `grant`.
    pub(crate) fn slot_named(&self, grant: &Grant) -> Result<&Arc<Slot>, AuthError> {
        let slot = match grant {
            Grant::Credential => self.credential.as_ref(),
            Grant::Tenant(id) => self.tenants.get(id),
        };
        slot.ok_or_else(|| AuthError::NoGrant(grant.to_string()))
    }

    /// Every configured grant: the credential grant first, then tenant
    /// grants by tenant id.
    #[must_use]
    pub fn grants(&self) -> Vec<Grant> {
        self.credential
            .iter()
            .chain(self.tenants.values())
            .map(|slot| slot.grant.clone())
            .collect()
    }

    /// Record that `grant` lists `tenant_id` among its connections.
    ///
    /// Only the first grant to list a tenant is kept, and tenants with a
    /// grant of their own are never routed.
    pub fn route(&self, tenant_id: &str, grant: &Grant) {
        if self.tenants.contains_key(tenant_id) {
            return;
        }
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tenant_id.to_string())
            .or_insert_with(|| grant.clone());
    }

    /// Grant serving `tenant_id`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NoGrant` when the tenant has no grant of its own,
    /// was not routed, and no credential grant is configured.
    pub fn grant_of(&self, tenant_id: &str) -> Result<&Grant, AuthError> {
        self.slot_for(tenant_id).map(|slot| &slot.grant)
    }

    /// Cache an already-issued token for the grant serving `tenant_id`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::NoGrant` when no grant serves the tenant.
    pub async fn prime(&self, tenant_id: &str, token: Token) -> Result<(), AuthError> {
        let slot = self.slot_for(tenant_id)?;
        let mut state = slot.state.lock().await;
        state.refresh_token.clone_from(&token.refresh_token);
        state.token = Some(token);
        Ok(())
    }

    /// Current refresh token of every grant.
    ///
    /// Revoked grants are left out: their token is useless to the next run.
    pub async fn refresh_tokens(&self) -> BTreeMap<Grant, String> {
        let mut snapshot = BTreeMap::new();
        for slot in self.credential.iter().chain(self.tenants.values()) {
            let state = slot.state.lock().await;
            if state.revoked.is_none() {
                snapshot.insert(slot.grant.clone(), state.refresh_token.clone());
            }
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(id: &str) -> Grant {
        Grant::Tenant(id.to_string())
    }

    #[test]
    fn tenants_without_grant_share_credential_slot() {
        let store = TokenStore::new()
            .with_credential("rt-shared")
            .with_tenant("t-own", "rt-own");
        assert_eq!(store.grant_of("t-1").unwrap(), &Grant::Credential);
        assert_eq!(store.grant_of("t-2").unwrap(), &Grant::Credential);
        assert_eq!(store.grant_of("t-own").unwrap(), &tenant("t-own"));
        assert!(Arc::ptr_eq(
            store.slot_for("t-1").unwrap(),
            store.slot_for("t-2").unwrap()
        ));
    }

    #[test]
    fn no_grant_for_unknown_tenant_without_credential() {
        let store = TokenStore::new().with_tenant("t-own", "rt-own");
        assert!(matches!(store.grant_of("t-1"), Err(AuthError::NoGrant(_))));
        assert!(matches!(store.slot_named(&Grant::Credential), Err(AuthError::NoGrant(_))));
        assert_eq!(store.slot_named(&tenant("t-own")).unwrap().grant, tenant("t-own"));
    }

    #[test]
    fn tenant_named_like_the_credential_keeps_its_own_grant() {
        let store = TokenStore::new()
            .with_credential("rt-shared")
            .with_tenant("credential", "rt-own");
        assert_eq!(store.grant_of("credential").unwrap(), &tenant("credential"));
        assert_eq!(store.grants(), vec![Grant::Credential, tenant("credential")]);
        assert!(!Arc::ptr_eq(
            store.slot_named(&Grant::Credential).unwrap(),
            store.slot_named(&tenant("credential")).unwrap()
        ));
    }

    #[test]
    fn routed_tenant_uses_the_grant_that_listed_it() {
        let store = TokenStore::new()
            .with_credential("rt-shared")
            .with_tenant("aaa-1", "rt-a");
        store.route("ccc-3", &tenant("aaa-1"));
        store.route("ccc-3", &Grant::Credential);
        store.route("aaa-1", &Grant::Credential);

        assert_eq!(store.grant_of("ccc-3").unwrap(), &tenant("aaa-1"));
        assert_eq!(store.grant_of("aaa-1").unwrap(), &tenant("aaa-1"));
        assert_eq!(store.grant_of("ddd-4").unwrap(), &Grant::Credential);
    }

    #[test]
    fn from_grants_skips_empty_tokens() {
        let store = TokenStore::from_grants(
            "",
            [("t-1".to_string(), String::new()), ("t-2".to_string(), "rt-2".to_string())],
        );
        assert!(store.grant_of("t-1").is_err());
        assert_eq!(store.grant_of("t-2").unwrap(), &tenant("t-2"));
    }

    #[test]
    fn grants_list_credential_first() {
        let store = TokenStore::new()
            .with_tenant("t-b", "rt-b")
            .with_credential("rt-shared")
            .with_tenant("t-a", "rt-a");
        assert_eq!(store.grants(), vec![Grant::Credential, tenant("t-a"), tenant("t-b")]);
        assert!(TokenStore::new().grants().is_empty());
    }

    #[tokio::test]
    async fn snapshot_skips_revoked_grants() {
        let store = TokenStore::new()
            .with_credential("rt-shared")
            .with_tenant("t-own", "rt-own");
        store.slot_for("t-own").unwrap().state.lock().await.revoked = Some("invalid_grant".into());

        let snapshot = store.refresh_tokens().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[&Grant::Credential], "rt-shared");
    }
}
