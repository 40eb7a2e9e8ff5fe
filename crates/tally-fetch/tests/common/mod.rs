//! Scripted local provider for fetch integration tests.
//!
//! One `tiny_http` server answers the token, discovery and resource endpoints.
//! Each test supplies a handler deciding the reply from the request and the
//! number of times its path has been hit.

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
}

pub struct Reply {
    pub status: u16,
    pub body: String,
    pub headers: Vec<(&'static str, String)>,
}

impl Reply {
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            headers: Vec::new(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

/// Token endpoint reply rotating `at-N` / `rt-N`.
pub fn token_reply(n: usize) -> Reply {
    Reply::json(format!(
        r#"{{"access_token":"at-{n}","refresh_token":"rt-{n}","expires_in":1800}}"#
    ))
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
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);
                let url = request.url().to_string();
                let (path, query) = url.split_once('?').unwrap_or((url.as_str(), ""));
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
                for (name, value) in reply.headers {
                    response.add_header(
                        tiny_http::Header::from_bytes(name.as_bytes(), value.as_bytes()).unwrap(),
                    );
                }
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

    pub fn settings(&self) -> ClientSettings {
        ClientSettings {
            api_base_url: format!("{}{API_PREFIX}", self.base),
            connections_url: format!("{}{CONNECTIONS_PATH}", self.base),
            tenant_header: "xero-tenant-id".into(),
            timeout: Duration::from_secs(5),
            user_agent: "tally-tests".into(),
        }
    }

    /// Client over a shared credential grant with fast retries and no throttle.
    pub fn client(&self, retry: RetryPolicy) -> Arc<ProviderClient> {
        self.client_with(TokenStore::new().with_credential("rt-0"), retry)
    }

    /// Client over the given grants with fast retries and no throttle.
    pub fn client_with(&self, store: TokenStore, retry: RetryPolicy) -> Arc<ProviderClient> {
        let http = reqwest::Client::new();
        let credentials = ClientCredentials {
            client_id: "app".into(),
            client_secret: "secret".into(),
            token_url: format!("{}{TOKEN_PATH}", self.base),
        };
        let tokens =
            TokenManager::new(http.clone(), credentials, store).with_retries(0, Backoff::default());
        Arc::new(
            ProviderClient::new(http, Arc::new(tokens), self.settings())
                .with_retry_policy(retry)
                .with_throttle(Throttle::disabled()),
        )
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_rate_limit_retries: 3,
        max_transient_retries: 2,
        backoff: Backoff::new(Duration::from_millis(10), Duration::from_millis(40)),
        default_retry_after: Duration::from_millis(10),
    }
}

/// Query parameter value, e.g. `page` from `page=3`.
pub fn query_param(seen: &Seen, name: &str) -> Option<u64> {
    seen.query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .and_then(|(_, value)| value.parse().ok())
}
