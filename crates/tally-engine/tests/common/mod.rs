//! Scripted provider for engine tests.
//!
//! One `tiny_http` server plays the token endpoint, tenant discovery and
//! every resource. Handlers see the request and the per-path hit count.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tally_auth::{ClientCredentials, TokenManager, TokenStore};
use tally_core::Backoff;
use tally_fetch::{ClientSettings, ProviderClient, RetryPolicy, Throttle};

pub const TOKEN_PATH: &str = "/connect/token";
pub const CONNECTIONS_PATH: &str = "/connections";
pub const API_PREFIX: &str = "/api.xro/2.0";

pub const CONNECTIONS: &str = r#"[
    {"tenantId":"t-1","tenantName":"Alpha Ltd"},
    {"tenantId":"t-2","tenantName":"Beta Pty"}
]"#;

#[derive(Debug, Clone)]
pub struct Seen {
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl Seen {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn tenant(&self) -> Option<&str> {
        self.header("xero-tenant-id")
    }

    /// Resource name for API calls, e.g. `Invoices`.
    pub fn resource(&self) -> Option<&str> {
        self.path.strip_prefix(API_PREFIX)?.strip_prefix('/')
    }

    pub fn query_param(&self, name: &str) -> Option<u64> {
        self.query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == name)
            .and_then(|(_, value)| value.parse().ok())
    }
}

pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }

    pub fn invalid_grant() -> Self {
        Self {
            status: 400,
            body: r#"{"error":"invalid_grant"}"#.into(),
        }
    }
}

/// Token endpoint reply rotating `at-N` / `rt-N`.
pub fn token_reply(n: usize) -> Reply {
    Reply::json(format!(
        r#"{{"access_token":"at-{n}","refresh_token":"rt-{n}","expires_in":1800}}"#
    ))
}

/// Body of a page holding `ids` under `key` with `id_field`.
pub fn items(key: &str, id_field: &str, ids: &[&str]) -> Reply {
    let items: Vec<String> = ids
        .iter()
        .map(|id| format!(r#"{{"{id_field}":"{id}"}}"#))
        .collect();
    Reply::json(format!(r#"{{"{key}":[{}]}}"#, items.join(",")))
}

pub struct MockProvider {
    pub base: String,
    log: Arc<Mutex<Vec<Seen>>>,
}

impl MockProvider {
    pub fn spawn<F>(handler: F) -> Self
    where
        F: Fn(&Seen, usize) -> Reply + Send + 'static,
    {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("bind");
        let port = server.server_addr().to_ip().expect("ip").port();
        let log = Arc::new(Mutex::new(Vec::new()));
        let thread_log = Arc::clone(&log);

        std::thread::spawn(move || {
            let mut hits: HashMap<String, usize> = HashMap::new();
            for mut request in server.incoming_requests() {
                let url = request.url().to_string();
                let (path, query) = url.split_once('?').unwrap_or((url.as_str(), ""));
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);
                let seen = Seen {
                    path: path.to_string(),
                    query: query.to_string(),
                    headers: request
                        .headers()
                        .iter()
                        .map(|h| {
                            (
                                h.field.as_str().as_str().to_ascii_lowercase(),
                                h.value.as_str().to_string(),
                            )
                        })
                        .collect(),
                    body,
                };
                let n = {
                    let count = hits.entry(seen.path.clone()).or_default();
                    *count += 1;
                    *count
                };
                thread_log.lock().unwrap().push(seen.clone());

                let reply = handler(&seen, n);
                let mut response =
                    tiny_http::Response::from_string(reply.body).with_status_code(reply.status);
                response.add_header(
                    tiny_http::Header::from_bytes("Content-Type", "application/json").unwrap(),
                );
                let _ = request.respond(response);
            }
        });

        Self {
            base: format!("http://127.0.0.1:{port}"),
            log,
        }
    }

    pub fn requests(&self) -> Vec<Seen> {
        self.log.lock().unwrap().clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<Seen> {
        self.requests().into_iter().filter(|s| s.path == path).collect()
    }

    /// Resource requests carrying `tenant` in the tenant header.
    pub fn resource_requests_for(&self, tenant: &str) -> Vec<Seen> {
        self.requests()
            .into_iter()
            .filter(|s| s.resource().is_some() && s.tenant() == Some(tenant))
            .collect()
    }

    pub fn settings(&self) -> ClientSettings {
        ClientSettings {
            api_base_url: format!("{}{API_PREFIX}", self.base),
            connections_url: format!("{}{CONNECTIONS_PATH}", self.base),
            tenant_header: "xero-tenant-id".into(),
            timeout: Duration::from_secs(5),
            user_agent: "tally-tests".into(),
        }
    }

    /// Client over `store` with fast retries and no throttle.
    pub fn client(&self, store: TokenStore) -> Arc<ProviderClient> {
        let http = reqwest::Client::new();
        let credentials = ClientCredentials {
            client_id: "app".into(),
            client_secret: "secret".into(),
            token_url: format!("{}{TOKEN_PATH}", self.base),
        };
        let tokens = TokenManager::new(http.clone(), credentials, store).with_retries(0, Backoff::default());
        Arc::new(
            ProviderClient::new(http, Arc::new(tokens), self.settings())
                .with_retry_policy(fast_retry())
                .with_throttle(Throttle::disabled()),
        )
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_rate_limit_retries: 2,
        max_transient_retries: 2,
        backoff: Backoff::new(Duration::from_millis(5), Duration::from_millis(20)),
        default_retry_after: Duration::from_millis(5),
    }
}
