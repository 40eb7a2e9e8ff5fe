//! # tally-fetch
//!
//! Provider API access for Tally.
//!
//! - [`ProviderClient`]: authenticated `reqwest` client with the shared retry
//!   loop (429 `Retry-After` waits, one forced re-auth on 401, exponential
//!   backoff on network errors and 5xx) and a per-tenant call throttle
//! - [`TenantResolver`]: tenant discovery and validation of configured ids
//! - [`EndpointFetcher`] / [`PageStream`]: lazy page-by-page reads of one
//!   `(tenant, endpoint)` pair, yielding tagged records

mod client;
mod error;
mod fetcher;
mod http;
mod tenants;
mod throttle;

pub use client::{ClientSettings, ProviderClient, RetryPolicy};
pub use error::FetchError;
pub use fetcher::{Cursor, EndpointFetcher, Page, PageStream};
pub use tenants::TenantResolver;
pub use throttle::Throttle;
