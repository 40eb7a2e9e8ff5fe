//! Per-pair outcomes of an extraction run.
//!
//! The orchestrator fills a [`SummaryBuilder`] as pairs finish and freezes it
//! into a [`RunSummary`] when the run ends. The summary is the externally
//! visible report: its [`fmt::Display`] form is what the binary prints.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::policy::SuccessPolicy;

// ---------------------------------------------------------------------------
// FailureKind
// ---------------------------------------------------------------------------

/// Classification of a pair-scoped failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Token refresh failed or a request stayed unauthorized after re-auth.
    Auth,
    /// Rate-limit retries were exhausted.
    RateLimitExceeded,
    /// Network or 5xx retries were exhausted.
    TransientFetch,
    /// The destination write failed.
    Sink,
    /// The provider answered with an unexpected status or body.
    Provider,
    /// The run was cancelled before the pair completed.
    Cancelled,
}

impl FailureKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth_error",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::TransientFetch => "transient_fetch_error",
            Self::Sink => "sink_error",
            Self::Provider => "provider_error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PairKey / PairOutcome
// ---------------------------------------------------------------------------

/// One unit of work: a tenant and an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    pub tenant_id: String,
    pub endpoint: Endpoint,
}

impl PairKey {
    #[must_use]
    pub fn new(tenant_id: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            endpoint,
        }
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.endpoint)
    }
}

/// Result of processing one pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairOutcome {
    Success { rows: usize },
    Failure { kind: FailureKind, reason: String },
}

impl PairOutcome {
    #[must_use]
    pub fn failure(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self::Failure {
            kind,
            reason: reason.into(),
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub const fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }
}

impl fmt::Display for PairOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { rows } => write!(f, "ok ({rows} rows)"),
            Self::Failure { kind, reason } => write!(f, "FAILED [{kind}] {reason}"),
        }
    }
}

// ---------------------------------------------------------------------------
// RunSummary
// ---------------------------------------------------------------------------

/// Serialized shape of one summary entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairReport {
    pub tenant_id: String,
    pub endpoint: Endpoint,
    #[serde(flatten)]
    pub outcome: PairOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SummaryReport {
    cancelled: bool,
    pairs: Vec<PairReport>,
}

/// Immutable mapping from `(tenant, endpoint)` to its outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(into = "SummaryReport")]
pub struct RunSummary {
    outcomes: BTreeMap<PairKey, PairOutcome>,
    cancelled: bool,
}

impl From<RunSummary> for SummaryReport {
    fn from(summary: RunSummary) -> Self {
        Self {
            cancelled: summary.cancelled,
            pairs: summary.reports(),
        }
    }
}

impl RunSummary {
    #[must_use]
    pub fn get(&self, tenant_id: &str, endpoint: Endpoint) -> Option<&PairOutcome> {
        self.outcomes.get(&PairKey::new(tenant_id, endpoint))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PairKey, &PairOutcome)> {
        self.outcomes.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Whether the run was cut short by an abort signal.
    #[must_use]
    pub const fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_success()).count()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.len() - self.succeeded()
    }

    /// Rows written across all successful pairs.
    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.outcomes
            .values()
            .map(|o| match o {
                PairOutcome::Success { rows } => *rows,
                PairOutcome::Failure { .. } => 0,
            })
            .sum()
    }

    /// Overall verdict under `policy`. An empty summary never succeeds.
    #[must_use]
    pub fn is_success(&self, policy: SuccessPolicy) -> bool {
        if self.is_empty() {
            return false;
        }
        match policy {
            SuccessPolicy::AtLeastOne => self.succeeded() > 0,
            SuccessPolicy::All => self.failed() == 0,
        }
    }

    #[must_use]
    pub fn reports(&self) -> Vec<PairReport> {
        self.outcomes
            .iter()
            .map(|(key, outcome)| PairReport {
                tenant_id: key.tenant_id.clone(),
                endpoint: key.endpoint,
                outcome: outcome.clone(),
            })
            .collect()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, outcome) in &self.outcomes {
            writeln!(f, "{key}: {outcome}")?;
        }
        write!(
            f,
            "{} succeeded, {} failed, {} rows written",
            self.succeeded(),
            self.failed(),
            self.total_rows()
        )?;
        if self.cancelled {
            f.write_str(" (run cancelled)")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SummaryBuilder
// ---------------------------------------------------------------------------

/// Mutable accumulator owned by the orchestrator while a run is in progress.
#[derive(Debug, Default)]
pub struct SummaryBuilder {
    outcomes: BTreeMap<PairKey, PairOutcome>,
    cancelled: bool,
}

impl SummaryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of a pair. A later outcome for the same pair wins.
    pub fn record(&mut self, key: PairKey, outcome: PairOutcome) {
        self.outcomes.insert(key, outcome);
    }

    #[must_use]
    pub fn contains(&self, key: &PairKey) -> bool {
        self.outcomes.contains_key(key)
    }

    pub const fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    #[must_use]
    pub fn finish(self) -> RunSummary {
        RunSummary {
            outcomes: self.outcomes,
            cancelled: self.cancelled,
        }
    }
}
