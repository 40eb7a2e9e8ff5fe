mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tally_auth::TokenStore;
use tally_core::{Endpoint, FailureKind, LoadPolicy, PairOutcome, RunSummary, SuccessPolicy, Tenant};
use tally_engine::Orchestrator;
use tally_fetch::EndpointFetcher;
use tally_load::{LoadPlanner, MemorySink};
use tokio_util::sync::CancellationToken;

use common::{CONNECTIONS, CONNECTIONS_PATH, MockProvider, Reply, Seen, TOKEN_PATH, items, token_reply};

const ENDPOINTS: [Endpoint; 3] = [Endpoint::Accounts, Endpoint::Contacts, Endpoint::Invoices];

/// Every resource answers: `Accounts` in one response, paged resources with
/// three items on page 1 and an empty page 2.
fn healthy(seen: &Seen, n: usize) -> Reply {
    if seen.path == TOKEN_PATH {
        return token_reply(n);
    }
    if seen.path == CONNECTIONS_PATH {
        return Reply::json(CONNECTIONS);
    }
    match (seen.resource(), seen.query_param("page")) {
        (Some("Accounts"), _) => items("Accounts", "AccountID", &["a-1", "a-2"]),
        (Some(name), Some(1)) => {
            let id_field = format!("{}ID", name.trim_end_matches('s'));
            items(name, &id_field, &["x-1", "x-2", "x-3"])
        }
        (Some(name), _) => Reply::json(format!(r#"{{"{name}":[]}}"#)),
        (None, _) => Reply::status(404),
    }
}

fn tenants() -> Vec<Tenant> {
    vec![Tenant::new("t-1", "Alpha Ltd"), Tenant::new("t-2", "Beta Pty")]
}

fn orchestrator(provider: &MockProvider, store: TokenStore, sink: &Arc<MemorySink>) -> Orchestrator<MemorySink> {
    let planner = LoadPlanner::new(Arc::clone(sink), LoadPolicy::Incremental);
    Orchestrator::new(EndpointFetcher::new(provider.client(store)), Arc::new(planner)).with_concurrency(1)
}

fn kinds(summary: &RunSummary, tenant: &str) -> Vec<Option<FailureKind>> {
    ENDPOINTS
        .iter()
        .map(|&endpoint| summary.get(tenant, endpoint).and_then(PairOutcome::failure_kind))
        .collect()
}

// ── Happy path ─────────────────────────────────────────────────────

#[tokio::test]
async fn every_pair_is_processed_and_loaded() {
    let provider = MockProvider::spawn(healthy);
    let sink = Arc::new(MemorySink::new());
    let summary = orchestrator(&provider, TokenStore::new().with_credential("rt-0"), &sink)
        .with_concurrency(4)
        .run(&tenants(), &ENDPOINTS)
        .await;

    assert_eq!(summary.len(), 6);
    assert_eq!(summary.failed(), 0);
    assert_eq!(summary.get("t-2", Endpoint::Invoices), Some(&PairOutcome::Success { rows: 3 }));
    assert_eq!(summary.total_rows(), 2 * (2 + 3 + 3));
    assert!(summary.is_success(SuccessPolicy::All));
    assert_eq!(sink.rows("Invoices").len(), 6);
    assert_eq!(provider.requests_to(TOKEN_PATH).len(), 1);
}

// ── Failure isolation ──────────────────────────────────────────────

#[tokio::test]
async fn a_failing_endpoint_does_not_affect_its_siblings() {
    let provider = MockProvider::spawn(|seen, n| match seen.resource() {
        Some("Contacts") => Reply::status(500),
        _ => healthy(seen, n),
    });
    let sink = Arc::new(MemorySink::new());
    let summary = orchestrator(&provider, TokenStore::new().with_credential("rt-0"), &sink)
        .run(&tenants()[..1], &ENDPOINTS)
        .await;

    assert_eq!(kinds(&summary, "t-1"), vec![None, Some(FailureKind::TransientFetch), None]);
    assert!(summary.is_success(SuccessPolicy::AtLeastOne));
    assert!(!summary.is_success(SuccessPolicy::All));
    assert!(sink.rows("Contacts").is_empty());
    assert_eq!(sink.rows("Invoices").len(), 3);
}

#[tokio::test]
async fn sink_failure_is_recorded_for_that_pair_only() {
    let provider = MockProvider::spawn(healthy);
    let sink = Arc::new(MemorySink::new());
    sink.reject("Accounts");
    let summary = orchestrator(&provider, TokenStore::new().with_credential("rt-0"), &sink)
        .run(&tenants()[..1], &ENDPOINTS)
        .await;

    assert_eq!(kinds(&summary, "t-1"), vec![Some(FailureKind::Sink), None, None]);
    match summary.get("t-1", Endpoint::Accounts) {
        Some(PairOutcome::Failure { reason, .. }) => {
            assert!(reason.starts_with("sink error: table 'Accounts' rejected"), "{reason}");
        }
        other => panic!("expected a sink failure, got {other:?}"),
    }
}

// ── Auth cascade ───────────────────────────────────────────────────

#[tokio::test]
async fn revoked_tenant_grant_skips_its_remaining_endpoints() {
    let provider = MockProvider::spawn(|seen, n| {
        if seen.path == TOKEN_PATH && seen.body.contains("rt-revoked") {
            return Reply::invalid_grant();
        }
        healthy(seen, n)
    });
    let store = TokenStore::new()
        .with_tenant("t-1", "rt-revoked")
        .with_tenant("t-2", "rt-good");
    let sink = Arc::new(MemorySink::new());
    let summary = orchestrator(&provider, store, &sink).run(&tenants(), &ENDPOINTS).await;

    assert_eq!(kinds(&summary, "t-1"), vec![Some(FailureKind::Auth); 3]);
    assert_eq!(kinds(&summary, "t-2"), vec![None, None, None]);
    assert!(provider.resource_requests_for("t-1").is_empty());
    let revoked_exchanges = provider
        .requests_to(TOKEN_PATH)
        .into_iter()
        .filter(|seen| seen.body.contains("rt-revoked"))
        .count();
    assert_eq!(revoked_exchanges, 1);
}

#[tokio::test]
async fn repeated_401_closes_the_tenant_without_further_requests() {
    let provider = MockProvider::spawn(|seen, n| {
        if seen.tenant() == Some("t-1") {
            return Reply::status(401);
        }
        healthy(seen, n)
    });
    let sink = Arc::new(MemorySink::new());
    let summary = orchestrator(&provider, TokenStore::new().with_credential("rt-0"), &sink)
        .run(&tenants(), &ENDPOINTS)
        .await;

    assert_eq!(kinds(&summary, "t-1"), vec![Some(FailureKind::Auth); 3]);
    assert_eq!(kinds(&summary, "t-2"), vec![None, None, None]);
    // The first pair sends once, then once more after the forced refresh.
    assert_eq!(provider.resource_requests_for("t-1").len(), 2);
    match summary.get("t-1", Endpoint::Invoices) {
        Some(PairOutcome::Failure { reason, .. }) => assert!(reason.starts_with("skipped"), "{reason}"),
        other => panic!("expected a skipped pair, got {other:?}"),
    }
}

// ── Cancellation ───────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_run_records_every_pair_as_cancelled() {
    let provider = MockProvider::spawn(healthy);
    let sink = Arc::new(MemorySink::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = orchestrator(&provider, TokenStore::new().with_credential("rt-0"), &sink)
        .with_cancellation(cancel)
        .run(&tenants(), &ENDPOINTS)
        .await;

    assert!(summary.was_cancelled());
    assert_eq!(kinds(&summary, "t-1"), vec![Some(FailureKind::Cancelled); 3]);
    assert_eq!(kinds(&summary, "t-2"), vec![Some(FailureKind::Cancelled); 3]);
    assert!(provider.requests().is_empty());
    assert!(sink.table_names().is_empty());
}

#[tokio::test]
async fn cancellation_mid_run_keeps_finished_pairs() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let provider = MockProvider::spawn(move |seen, n| {
        if seen.resource().is_some() {
            trigger.cancel();
        }
        healthy(seen, n)
    });
    let sink = Arc::new(MemorySink::new());

    let summary = orchestrator(&provider, TokenStore::new().with_credential("rt-0"), &sink)
        .with_cancellation(cancel)
        .run(&tenants()[..1], &ENDPOINTS)
        .await;

    assert!(summary.was_cancelled());
    assert_eq!(
        kinds(&summary, "t-1"),
        vec![None, Some(FailureKind::Cancelled), Some(FailureKind::Cancelled)]
    );
    assert_eq!(sink.rows("Accounts").len(), 2);
    assert_eq!(provider.resource_requests_for("t-1").len(), 1);
}
