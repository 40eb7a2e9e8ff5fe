mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tally_auth::TokenStore;
use tally_core::{CoreError, Endpoint};
use tally_fetch::{EndpointFetcher, FetchError, TenantResolver};
use tokio_util::sync::CancellationToken;

use common::{API_PREFIX, CONNECTIONS_PATH, MockProvider, Reply, Seen, TOKEN_PATH, fast_retry, token_reply};

const CONNECTIONS: &str = r#"[
    {"id":"c-1","tenantId":"aaa-1","tenantType":"ORGANISATION","tenantName":"Alpha Ltd"},
    {"id":"c-2","tenantId":"bbb-2","tenantType":"ORGANISATION","tenantName":"Beta Pty"}
]"#;

fn provider() -> MockProvider {
    MockProvider::spawn(|seen, n| {
        if seen.path == TOKEN_PATH {
            return token_reply(n);
        }
        Reply::json(CONNECTIONS)
    })
}

#[tokio::test]
async fn empty_configuration_selects_every_authorized_tenant() {
    let provider = provider();
    let resolver = TenantResolver::new(provider.client(fast_retry()));

    let tenants = resolver
        .resolve(&[], &CancellationToken::new())
        .await
        .expect("resolve");

    let names: Vec<_> = tenants.iter().map(ToString::to_string).collect();
    assert_eq!(names, vec!["Alpha Ltd (aaa-1)", "Beta Pty (bbb-2)"]);

    let discovery = provider.requests_to(CONNECTIONS_PATH);
    assert_eq!(discovery.len(), 1);
    assert_eq!(discovery[0].header("authorization"), Some("Bearer at-1"));
    assert_eq!(discovery[0].header("xero-tenant-id"), None);
}

#[tokio::test]
async fn configured_subset_keeps_configured_order() {
    let provider = provider();
    let resolver = TenantResolver::new(provider.client(fast_retry()));

    let tenants = resolver
        .resolve(&["bbb-2".to_string(), "aaa-1".to_string()], &CancellationToken::new())
        .await
        .expect("resolve");
    let ids: Vec<_> = tenants.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["bbb-2", "aaa-1"]);
}

#[tokio::test]
async fn unauthorized_configured_tenant_is_a_validation_error() {
    let provider = provider();
    let resolver = TenantResolver::new(provider.client(fast_retry()));

    let err = resolver
        .resolve(&["aaa-1".to_string(), "zzz-9".to_string()], &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        FetchError::Validation(CoreError::UnknownTenants(ids)) => assert_eq!(ids, vec!["zzz-9"]),
        other => panic!("expected unknown tenants, got {other}"),
    }
}

#[tokio::test]
async fn discovery_reauthenticates_once_on_401() {
    let provider = MockProvider::spawn(|seen, n| {
        if seen.path == TOKEN_PATH {
            return token_reply(n);
        }
        if n == 1 {
            return Reply::status(401);
        }
        Reply::json(CONNECTIONS)
    });
    let resolver = TenantResolver::new(provider.client(fast_retry()));

    let tenants = resolver
        .resolve(&[], &CancellationToken::new())
        .await
        .expect("resolve");
    assert_eq!(tenants.len(), 2);
    assert_eq!(provider.requests_to(TOKEN_PATH).len(), 2);
}

#[tokio::test]
async fn revoked_credential_fails_discovery() {
    let provider = MockProvider::spawn(|seen, _| {
        if seen.path == TOKEN_PATH {
            return Reply {
                status: 400,
                body: r#"{"error":"invalid_grant"}"#.into(),
                headers: Vec::new(),
            };
        }
        Reply::json(CONNECTIONS)
    });
    let resolver = TenantResolver::new(provider.client(fast_retry()));

    let err = resolver
        .resolve(&[], &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_auth(), "{err}");
    assert!(provider.requests_to(CONNECTIONS_PATH).is_empty());
}

/// Each grant only sees its own organisation. Refresh token `rt-x` is
/// exchanged for access token `at-x`; `rt-dead` is rejected.
fn per_grant_provider() -> MockProvider {
    MockProvider::spawn(|seen: &Seen, _| {
        if seen.path == TOKEN_PATH {
            if seen.body.contains("refresh_token=rt-dead") {
                return Reply {
                    status: 400,
                    body: r#"{"error":"invalid_grant"}"#.into(),
                    headers: Vec::new(),
                };
            }
            let grant = seen
                .body
                .split('&')
                .find_map(|pair| pair.strip_prefix("refresh_token=rt-"))
                .unwrap_or("unknown")
                .to_string();
            return Reply::json(format!(
                r#"{{"access_token":"at-{grant}","refresh_token":"rt-{grant}","expires_in":1800}}"#
            ));
        }
        match seen.header("authorization") {
            Some("Bearer at-a") => Reply::json(r#"[{"tenantId":"aaa-1","tenantName":"Alpha Ltd"}]"#),
            Some("Bearer at-b") => Reply::json(r#"[{"tenantId":"bbb-2","tenantName":"Beta Pty"}]"#),
            Some("Bearer at-shared") => Reply::json(CONNECTIONS),
            _ => Reply::status(403),
        }
    })
}

fn ids(tenants: &[tally_core::Tenant]) -> Vec<&str> {
    tenants.iter().map(|t| t.id.as_str()).collect()
}

#[tokio::test]
async fn every_tenant_grant_is_asked_for_its_connections() {
    let provider = per_grant_provider();
    let store = TokenStore::new().with_tenant("aaa-1", "rt-a").with_tenant("bbb-2", "rt-b");
    let resolver = TenantResolver::new(provider.client_with(store, fast_retry()));

    let all = resolver
        .resolve(&[], &CancellationToken::new())
        .await
        .expect("resolve all");
    assert_eq!(ids(&all), vec!["aaa-1", "bbb-2"]);

    let configured = resolver
        .resolve(&["bbb-2".to_string(), "aaa-1".to_string()], &CancellationToken::new())
        .await
        .expect("resolve configured");
    assert_eq!(ids(&configured), vec!["bbb-2", "aaa-1"]);

    let authorizations: Vec<_> = provider
        .requests_to(CONNECTIONS_PATH)
        .iter()
        .filter_map(|seen| seen.header("authorization").map(ToString::to_string))
        .collect();
    assert_eq!(
        authorizations,
        vec!["Bearer at-a", "Bearer at-b", "Bearer at-a", "Bearer at-b"]
    );
}

#[tokio::test]
async fn credential_and_tenant_grants_are_merged_without_duplicates() {
    let provider = per_grant_provider();
    let store = TokenStore::new()
        .with_credential("rt-shared")
        .with_tenant("bbb-2", "rt-b");
    let resolver = TenantResolver::new(provider.client_with(store, fast_retry()));

    let tenants = resolver
        .resolve(&[], &CancellationToken::new())
        .await
        .expect("resolve");
    assert_eq!(ids(&tenants), vec!["aaa-1", "bbb-2"]);
    assert_eq!(provider.requests_to(CONNECTIONS_PATH).len(), 2);
}

#[tokio::test]
async fn rejected_tenant_grant_keeps_its_tenant() {
    let provider = per_grant_provider();
    let store = TokenStore::new().with_tenant("aaa-1", "rt-a").with_tenant("bbb-2", "rt-dead");
    let resolver = TenantResolver::new(provider.client_with(store, fast_retry()));

    let tenants = resolver
        .resolve(&["aaa-1".to_string(), "bbb-2".to_string()], &CancellationToken::new())
        .await
        .expect("resolve");
    assert_eq!(ids(&tenants), vec!["aaa-1", "bbb-2"]);
    assert_eq!(tenants[1].display_name, "");

    let authorizations: Vec<_> = provider
        .requests_to(CONNECTIONS_PATH)
        .iter()
        .filter_map(|seen| seen.header("authorization").map(ToString::to_string))
        .collect();
    assert_eq!(authorizations, vec!["Bearer at-a"]);
}

#[tokio::test]
async fn tenant_listed_by_another_tenants_grant_is_fetched_with_that_grant() {
    let provider = MockProvider::spawn(|seen: &Seen, _| {
        if seen.path == TOKEN_PATH {
            return Reply::json(r#"{"access_token":"at-a","refresh_token":"rt-a2","expires_in":1800}"#);
        }
        if seen.path == CONNECTIONS_PATH {
            return Reply::json(
                r#"[{"tenantId":"aaa-1","tenantName":"Alpha Ltd"},{"tenantId":"ccc-3","tenantName":"Gamma Inc"}]"#,
            );
        }
        Reply::json(r#"{"Accounts":[{"AccountID":"acc-1"}]}"#)
    });
    let client = provider.client_with(TokenStore::new().with_tenant("aaa-1", "rt-a"), fast_retry());

    let tenants = TenantResolver::new(Arc::clone(&client))
        .resolve(&[], &CancellationToken::new())
        .await
        .expect("resolve");
    assert_eq!(ids(&tenants), vec!["aaa-1", "ccc-3"]);

    let fetcher = EndpointFetcher::new(client);
    for tenant in &tenants {
        let mut stream = fetcher.fetch(tenant, Endpoint::Accounts, None, CancellationToken::new());
        let page = stream.next_page().await.expect("fetch").expect("page");
        assert_eq!(page.items.len(), 1);
    }

    let calls: Vec<_> = provider
        .requests_to(&format!("{API_PREFIX}/Accounts"))
        .iter()
        .map(|seen| {
            (
                seen.header("xero-tenant-id").map(ToString::to_string),
                seen.header("authorization").map(ToString::to_string),
            )
        })
        .collect();
    assert_eq!(
        calls,
        vec![
            (Some("aaa-1".to_string()), Some("Bearer at-a".to_string())),
            (Some("ccc-3".to_string()), Some("Bearer at-a".to_string())),
        ]
    );
    assert_eq!(provider.requests_to(TOKEN_PATH).len(), 1);
}

#[tokio::test]
async fn no_grant_at_all_fails_discovery() {
    let provider = per_grant_provider();
    let resolver = TenantResolver::new(provider.client_with(TokenStore::new(), fast_retry()));

    let err = resolver
        .resolve(&[], &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_auth(), "{err}");
    assert!(provider.requests().is_empty());
}
