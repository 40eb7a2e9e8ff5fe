//! Extraction selection: tenants, endpoints, modified-since filter, concurrency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tally_core::{Endpoint, SuccessPolicy};

use crate::error::ConfigError;
use crate::since::parse_modified_since;

const fn default_concurrency() -> usize {
    4
}

/// Accepts a comma-separated string, a bare number, or a list.
#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrList {
    One(String),
    Number(i64),
    Many(Vec<String>),
}

fn split_list<'a>(items: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    items
        .into_iter()
        .flat_map(|item| item.split(','))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn string_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::One(s) => split_list([s.as_str()]),
        StringOrList::Number(n) => vec![n.to_string()],
        StringOrList::Many(v) => split_list(v.iter().map(String::as_str)),
    })
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractConfig {
    /// Tenants to process. Empty means every tenant the credential can access.
    #[serde(default, deserialize_with = "string_list")]
    pub tenant_ids: Vec<String>,

    /// Endpoint names from the registry. Must not be empty.
    #[serde(default, deserialize_with = "string_list")]
    pub endpoints: Vec<String>,

    /// Absolute date, RFC 3339 timestamp, or relative phrase (`3 days ago`).
    #[serde(default)]
    pub modified_since: String,

    /// Pairs processed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// `at_least_one` or `all`.
    #[serde(default)]
    pub success_policy: SuccessPolicy,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            tenant_ids: Vec::new(),
            endpoints: Vec::new(),
            modified_since: String::new(),
            concurrency: default_concurrency(),
            success_policy: SuccessPolicy::default(),
        }
    }
}

impl ExtractConfig {
    /// Validated endpoint selection, deduplicated in configured order.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Selection`] when the selection is empty or names
    /// an endpoint outside the registry.
    pub fn endpoint_selection(&self) -> Result<Vec<Endpoint>, ConfigError> {
        Ok(Endpoint::parse_selection(&self.endpoints)?)
    }

    /// Resolve the modified-since filter relative to `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when the value cannot be parsed.
    pub fn modified_since_at(&self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, ConfigError> {
        parse_modified_since(&self.modified_since, now)
    }
}
