//! Provider API locations and HTTP client settings.

use serde::{Deserialize, Serialize};

fn default_api_base_url() -> String {
    String::from("https://api.xero.com/api.xro/2.0")
}

fn default_connections_url() -> String {
    String::from("https://api.xero.com/connections")
}

fn default_tenant_header() -> String {
    String::from("xero-tenant-id")
}

fn default_user_agent() -> String {
    String::from("tally/0.1")
}

const fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Base URL that endpoint paths are appended to.
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Tenant discovery endpoint.
    #[serde(default = "default_connections_url")]
    pub connections_url: String,

    /// Header carrying the tenant id on resource requests.
    #[serde(default = "default_tenant_header")]
    pub tenant_header: String,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            connections_url: default_connections_url(),
            tenant_header: default_tenant_header(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}
