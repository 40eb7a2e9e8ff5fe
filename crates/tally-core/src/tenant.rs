use std::fmt;

use serde::{Deserialize, Serialize};

/// One provider-side organization accessed under the shared credential.
///
/// Resolved once per run by the tenant resolver and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tenant {
    /// Provider tenant id (sent on every resource request).
    pub id: String,
    /// Human-readable organization name from the discovery response.
    pub display_name: String,
}

impl Tenant {
    #[must_use]
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.display_name.is_empty() {
            f.write_str(&self.id)
        } else {
            write!(f, "{} ({})", self.display_name, self.id)
        }
    }
}
