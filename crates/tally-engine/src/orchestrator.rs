//! Runs every `(tenant, endpoint)` pair through fetch and load.
//!
//! Pairs are scheduled tenant-major on a `JoinSet` bounded by a semaphore.
//! Each pair is isolated: its failure is recorded and siblings carry on. The
//! exception is an authorization failure, which closes the tenant's gate so
//! its remaining pairs are recorded as failed without touching the network.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tally_core::{Endpoint, FailureKind, PairKey, PairOutcome, RunSummary, SummaryBuilder, Tenant};
use tally_fetch::{EndpointFetcher, FetchError};
use tally_load::{LoadError, LoadPlanner, TableSink};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const DEFAULT_CONCURRENCY: usize = 4;

// ── Auth gate ──────────────────────────────────────────────────────

/// Tenants whose authorization failed during this run.
#[derive(Debug, Default)]
struct AuthGate {
    closed: Mutex<HashMap<String, String>>,
}

impl AuthGate {
    fn close(&self, tenant_id: &str, reason: &str) {
        self.closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tenant_id.to_string())
            .or_insert_with(|| reason.to_string());
    }

    fn reason(&self, tenant_id: &str) -> Option<String> {
        self.closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tenant_id)
            .cloned()
    }
}

// ── Orchestrator ───────────────────────────────────────────────────

pub struct Orchestrator<S: TableSink + 'static> {
    fetcher: EndpointFetcher,
    planner: Arc<LoadPlanner<S>>,
    concurrency: usize,
    modified_since: Option<DateTime<Utc>>,
    cancel: CancellationToken,
}

impl<S: TableSink + 'static> Orchestrator<S> {
    #[must_use]
    pub fn new(fetcher: EndpointFetcher, planner: Arc<LoadPlanner<S>>) -> Self {
        Self {
            fetcher,
            planner,
            concurrency: DEFAULT_CONCURRENCY,
            modified_since: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Maximum pairs in flight. Zero is treated as one.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub const fn with_modified_since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.modified_since = since;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that aborts the run when cancelled.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Process the cartesian product of `tenants` and `endpoints`.
    ///
    /// Every pair ends with a recorded outcome. After cancellation no new
    /// pair starts, in-flight pairs stop before their next page and discard
    /// their staged rows, and the summary is marked cancelled.
    pub async fn run(&self, tenants: &[Tenant], endpoints: &[Endpoint]) -> RunSummary {
        let pairs: Vec<(Tenant, Endpoint)> = tenants
            .iter()
            .flat_map(|tenant| endpoints.iter().map(move |&endpoint| (tenant.clone(), endpoint)))
            .collect();
        tracing::info!(
            pairs = pairs.len(),
            concurrency = self.concurrency,
            policy = %self.planner.policy(),
            "run started"
        );

        let gate = Arc::new(AuthGate::default());
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut summary = SummaryBuilder::new();
        let mut set = JoinSet::new();

        for (tenant, endpoint) in &pairs {
            let permit = tokio::select! {
                biased;
                () = self.cancel.cancelled() => None,
                permit = Arc::clone(&permits).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else { break };

            let fetcher = self.fetcher.clone();
            let planner = Arc::clone(&self.planner);
            let gate = Arc::clone(&gate);
            let cancel = self.cancel.clone();
            let since = self.modified_since;
            let tenant = tenant.clone();
            let endpoint = *endpoint;
            set.spawn(async move {
                let outcome = process(&fetcher, &planner, &gate, &tenant, endpoint, since, cancel).await;
                drop(permit);
                (PairKey::new(tenant.id, endpoint), outcome)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((key, outcome)) => summary.record(key, outcome),
                Err(e) => tracing::warn!(%e, "pair task failed"),
            }
        }

        let cancelled = self.cancel.is_cancelled();
        for (tenant, endpoint) in pairs {
            let key = PairKey::new(tenant.id, endpoint);
            if summary.contains(&key) {
                continue;
            }
            let outcome = if cancelled {
                PairOutcome::failure(FailureKind::Cancelled, "run cancelled before the pair started")
            } else {
                PairOutcome::failure(FailureKind::Provider, "pair task aborted unexpectedly")
            };
            summary.record(key, outcome);
        }
        if cancelled {
            summary.mark_cancelled();
        }

        let summary = summary.finish();
        tracing::info!(
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            rows = summary.total_rows(),
            cancelled,
            "run finished"
        );
        summary
    }
}

async fn process<S: TableSink>(
    fetcher: &EndpointFetcher,
    planner: &LoadPlanner<S>,
    gate: &AuthGate,
    tenant: &Tenant,
    endpoint: Endpoint,
    since: Option<DateTime<Utc>>,
    cancel: CancellationToken,
) -> PairOutcome {
    if let Some(reason) = gate.reason(&tenant.id) {
        tracing::debug!(tenant = %tenant.id, %endpoint, "skipping pair of unauthorized tenant");
        return PairOutcome::failure(
            FailureKind::Auth,
            format!("skipped after an earlier authorization failure: {reason}"),
        );
    }
    if cancel.is_cancelled() {
        return PairOutcome::failure(FailureKind::Cancelled, "run cancelled before the pair started");
    }

    let mut stream = fetcher.fetch(tenant, endpoint, since, cancel);
    match planner.write(&mut stream, endpoint).await {
        Ok(report) => {
            tracing::info!(
                tenant = %tenant.id,
                %endpoint,
                rows = report.records,
                pages = stream.pages(),
                "pair completed"
            );
            PairOutcome::Success { rows: report.records }
        }
        Err(error) => {
            match &error {
                LoadError::Source(source) if source.is_auth() => {
                    tracing::error!(
                        tenant = %tenant.id,
                        %endpoint,
                        error = %source,
                        "tenant authorization failed; skipping its remaining endpoints"
                    );
                    gate.close(&tenant.id, &source.to_string());
                }
                LoadError::Source(_) => tracing::warn!(tenant = %tenant.id, %endpoint, %error, "pair failed"),
                LoadError::Sink(_) => tracing::warn!(tenant = %tenant.id, %endpoint, %error, "pair write failed"),
            }
            PairOutcome::failure(error.failure_kind(FetchError::failure_kind), error.to_string())
        }
    }
}
