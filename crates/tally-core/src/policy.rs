//! Load and run-success policies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

// ---------------------------------------------------------------------------
// LoadPolicy
// ---------------------------------------------------------------------------

/// How destination tables are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LoadPolicy {
    /// The table is logically replaced by this run's rows.
    #[default]
    #[serde(rename = "full_load")]
    Full,
    /// Rows are upserted by primary key; unseen keys persist.
    #[serde(rename = "incremental_load")]
    Incremental,
}

impl LoadPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full_load",
            Self::Incremental => "incremental_load",
        }
    }

    #[must_use]
    pub const fn is_incremental(self) -> bool {
        matches!(self, Self::Incremental)
    }
}

impl fmt::Display for LoadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full_load" | "full" => Ok(Self::Full),
            "incremental_load" | "incremental" => Ok(Self::Incremental),
            _ => Err(CoreError::InvalidPolicy {
                field: "destination.load_type",
                value: s.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// SuccessPolicy
// ---------------------------------------------------------------------------

/// When a run counts as successful overall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuccessPolicy {
    /// At least one `(tenant, endpoint)` pair succeeded.
    #[default]
    AtLeastOne,
    /// Every pair succeeded.
    All,
}

impl SuccessPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AtLeastOne => "at_least_one",
            Self::All => "all",
        }
    }
}

impl fmt::Display for SuccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SuccessPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "at_least_one" | "any" => Ok(Self::AtLeastOne),
            "all" => Ok(Self::All),
            _ => Err(CoreError::InvalidPolicy {
                field: "extract.success_policy",
                value: s.to_string(),
            }),
        }
    }
}
