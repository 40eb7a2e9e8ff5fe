//! Paginated, rate-limit-aware reads of one `(tenant, endpoint)` pair.
//!
//! [`EndpointFetcher::fetch`] returns a [`PageStream`]: a lazy, finite,
//! non-restartable sequence of pages. Each call to [`PageStream::next_page`]
//! issues exactly one logical page request (retries included) and tags every
//! item with the tenant id before handing it out.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, IF_MODIFIED_SINCE};
use serde_json::Value;
use tally_core::{Endpoint, Pagination, Record, RecordSource, Tenant};
use tokio_util::sync::CancellationToken;

use crate::client::{ProviderClient, Scope};
use crate::error::FetchError;

// ── Types ──────────────────────────────────────────────────────────

/// Continuation position of a paginated endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    /// 1-based page number.
    Page(u32),
    /// Offset value sent as `offset=`.
    Offset(u64),
}

/// One provider response.
#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<Record>,
    pub has_more: bool,
    /// Position of the next request when `has_more` is set.
    pub cursor: Option<Cursor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    /// Next request carries this cursor (`None` for unpaginated endpoints).
    Pending(Option<Cursor>),
    Done,
}

// ── Fetcher ────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct EndpointFetcher {
    client: Arc<ProviderClient>,
}

impl EndpointFetcher {
    #[must_use]
    pub const fn new(client: Arc<ProviderClient>) -> Self {
        Self { client }
    }

    /// Start reading `endpoint` for `tenant`.
    ///
    /// No request is made until the first [`PageStream::next_page`].
    /// `modified_since` is dropped for endpoints that do not support it.
    #[must_use]
    pub fn fetch(
        &self,
        tenant: &Tenant,
        endpoint: Endpoint,
        modified_since: Option<DateTime<Utc>>,
        cancel: CancellationToken,
    ) -> PageStream {
        let spec = endpoint.spec();
        if modified_since.is_some() && !spec.supports_modified_since {
            tracing::debug!(
                endpoint = spec.name,
                "endpoint ignores modified-since; fetching full history"
            );
        }
        let first = match spec.pagination {
            Pagination::Single => None,
            Pagination::Page => Some(Cursor::Page(1)),
            Pagination::Offset { .. } => Some(Cursor::Offset(0)),
        };
        PageStream {
            client: Arc::clone(&self.client),
            tenant_id: tenant.id.clone(),
            endpoint,
            modified_since: modified_since.filter(|_| spec.supports_modified_since),
            extracted_at: Utc::now(),
            state: StreamState::Pending(first),
            pages: 0,
            cancel,
        }
    }
}

// ── PageStream ─────────────────────────────────────────────────────

pub struct PageStream {
    client: Arc<ProviderClient>,
    tenant_id: String,
    endpoint: Endpoint,
    modified_since: Option<DateTime<Utc>>,
    extracted_at: DateTime<Utc>,
    state: StreamState,
    pages: u32,
    cancel: CancellationToken,
}

impl PageStream {
    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    #[must_use]
    pub const fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Pages yielded so far.
    #[must_use]
    pub const fn pages(&self) -> u32 {
        self.pages
    }

    /// Fetch the next page. `Ok(None)` once the provider signals the end.
    ///
    /// After an error the stream is finished: later calls return `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] when retries are exhausted, the tenant's grant
    /// fails, the body is malformed, or the run is cancelled.
    pub async fn next_page(&mut self) -> Result<Option<Page>, FetchError> {
        let StreamState::Pending(cursor) = self.state else {
            return Ok(None);
        };
        match self.request(cursor).await {
            Ok(Some(page)) => {
                self.state = match (page.has_more, page.cursor) {
                    (true, Some(next)) => StreamState::Pending(Some(next)),
                    _ => StreamState::Done,
                };
                self.pages += 1;
                tracing::debug!(
                    tenant = %self.tenant_id,
                    endpoint = %self.endpoint,
                    page = self.pages,
                    items = page.items.len(),
                    has_more = page.has_more,
                    "page fetched"
                );
                Ok(Some(page))
            }
            Ok(None) => {
                self.state = StreamState::Done;
                Ok(None)
            }
            Err(error) => {
                self.state = StreamState::Done;
                Err(error)
            }
        }
    }

    async fn request(&self, cursor: Option<Cursor>) -> Result<Option<Page>, FetchError> {
        let spec = self.endpoint.spec();
        let settings = self.client.settings();
        let url = format!("{}/{}", settings.api_base_url.trim_end_matches('/'), spec.path);
        let query: Vec<(&str, String)> = match cursor {
            Some(Cursor::Page(page)) => vec![("page", page.to_string())],
            Some(Cursor::Offset(offset)) => vec![("offset", offset.to_string())],
            None => Vec::new(),
        };
        let if_modified_since = self
            .modified_since
            .map(|since| since.format("%a, %d %b %Y %H:%M:%S GMT").to_string());
        let tenant_header = settings.tenant_header.as_str();
        let tenant_id = self.tenant_id.as_str();

        let resp = self
            .client
            .execute(Scope::Tenant(tenant_id), &self.cancel, |http, token| {
                let request = http
                    .get(&url)
                    .bearer_auth(token.secret())
                    .header(tenant_header, tenant_id)
                    .header(ACCEPT, "application/json")
                    .query(&query);
                match &if_modified_since {
                    Some(since) => request.header(IF_MODIFIED_SINCE, since),
                    None => request,
                }
            })
            .await?;

        if resp.status() == StatusCode::NOT_MODIFIED {
            return Ok(None);
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| FetchError::Parse(format!("{} response: {e}", spec.name)))?;

        let reported_pages = page_count(&body);
        let raw = extract_items(body, spec.response_key)?;
        if raw.is_empty() {
            return Ok(None);
        }

        let (has_more, next) = match (spec.pagination, cursor) {
            (Pagination::Page, Some(Cursor::Page(page))) => {
                let within_count = reported_pages.is_none_or(|count| u64::from(page) < count);
                (within_count, Some(Cursor::Page(page.saturating_add(1))))
            }
            (Pagination::Offset { cursor_field }, Some(Cursor::Offset(offset))) => {
                let advanced = offset.saturating_add(u64::try_from(raw.len()).unwrap_or(u64::MAX));
                let next = raw
                    .last()
                    .and_then(|item| item.get(cursor_field))
                    .and_then(Value::as_u64)
                    .filter(|&value| value > offset)
                    .unwrap_or(advanced);
                (true, Some(Cursor::Offset(next)))
            }
            _ => (false, None),
        };

        let items = raw
            .into_iter()
            .map(|item| Record::tag(item, tenant_id, self.extracted_at))
            .collect();
        Ok(Some(Page {
            items,
            has_more,
            cursor: next.filter(|_| has_more),
        }))
    }
}

impl RecordSource for PageStream {
    type Error = FetchError;

    async fn next_batch(&mut self) -> Result<Option<Vec<Record>>, FetchError> {
        Ok(self.next_page().await?.map(|page| page.items))
    }
}

/// Item array under `key`, or the body itself when it is an array.
fn extract_items(body: Value, key: &str) -> Result<Vec<Value>, FetchError> {
    match body {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove(key) {
            Some(Value::Array(items)) => Ok(items),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(other) => Err(FetchError::Parse(format!(
                "'{key}' is not an array but {}",
                type_name(&other)
            ))),
        },
        Value::Null => Ok(Vec::new()),
        other => Err(FetchError::Parse(format!(
            "unexpected {} response body",
            type_name(&other)
        ))),
    }
}

/// `pagination.pageCount` when the provider reports it.
fn page_count(body: &Value) -> Option<u64> {
    body.get("pagination")?.get("pageCount")?.as_u64()
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
