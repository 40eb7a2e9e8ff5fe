//! Refresh-token state carried between runs.
//!
//! The provider rotates refresh tokens on every exchange, so the token from
//! configuration is only valid until the first run spends it. The rotated
//! tokens are written here after each run and preferred on the next one.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::store::Grant;

/// Laid out like the `oauth` configuration section it overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshState {
    /// Latest credential-wide refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Tenant id -> latest refresh token of the tenant's own grant.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tenant_refresh_tokens: BTreeMap<String, String>,
}

impl RefreshState {
    #[must_use]
    pub fn new(refresh_tokens: BTreeMap<Grant, String>) -> Self {
        let mut state = Self::default();
        for (grant, token) in refresh_tokens {
            match grant {
                Grant::Credential => state.refresh_token = Some(token),
                Grant::Tenant(id) => {
                    state.tenant_refresh_tokens.insert(id, token);
                }
            }
        }
        state
    }

    /// Read the state file. A missing or blank file is an empty state.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::StateFile` if the file exists but cannot be read or
    /// parsed.
    pub fn load(path: &Path) -> Result<Self, AuthError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(AuthError::StateFile(format!("read {}: {e}", path.display())));
            }
        };
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&content)
            .map_err(|e| AuthError::StateFile(format!("parse {}: {e}", path.display())))
    }

    /// Write the state file with owner-only permissions.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::StateFile` if the directory or file cannot be
    /// written.
    pub fn save(&self, path: &Path) -> Result<(), AuthError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| AuthError::StateFile(format!("mkdir {}: {e}", parent.display())))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AuthError::StateFile(format!("serialize: {e}")))?;
        fs::write(path, json)
            .map_err(|e| AuthError::StateFile(format!("write {}: {e}", path.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))
                .map_err(|e| AuthError::StateFile(format!("chmod {}: {e}", path.display())))?;
        }

        Ok(())
    }

    /// Persisted token for `grant`, falling back to `configured`.
    #[must_use]
    pub fn token_or<'a>(&'a self, grant: &Grant, configured: &'a str) -> &'a str {
        let persisted = match grant {
            Grant::Credential => self.refresh_token.as_deref(),
            Grant::Tenant(id) => self.tenant_refresh_tokens.get(id).map(String::as_str),
        };
        persisted.filter(|rt| !rt.is_empty()).unwrap_or(configured)
    }
}
