//! OAuth2 client credentials and refresh-token seeds.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

fn default_token_url() -> String {
    String::from("https://identity.xero.com/connect/token")
}

const fn default_safety_margin_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OAuthConfig {
    /// OAuth2 client id (app key).
    #[serde(default)]
    pub client_id: String,

    /// OAuth2 client secret (app secret).
    #[serde(default)]
    pub client_secret: String,

    /// Refresh token of the credential-wide grant.
    #[serde(default)]
    pub refresh_token: String,

    /// Refresh tokens of tenants that hold their own grant.
    #[serde(default)]
    pub tenant_refresh_tokens: BTreeMap<String, String>,

    /// Provider token endpoint (`refresh_token` grant).
    #[serde(default = "default_token_url")]
    pub token_url: String,

    /// Access tokens expiring within this many seconds are refreshed first.
    #[serde(default = "default_safety_margin_secs")]
    pub safety_margin_secs: u64,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            tenant_refresh_tokens: BTreeMap::new(),
            token_url: default_token_url(),
            safety_margin_secs: default_safety_margin_secs(),
        }
    }
}

impl OAuthConfig {
    /// Client credentials plus at least one refresh token.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty()
            && !self.client_secret.is_empty()
            && (!self.refresh_token.is_empty() || !self.tenant_refresh_tokens.is_empty())
    }
}
