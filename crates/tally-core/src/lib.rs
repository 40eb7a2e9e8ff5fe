//! # tally-core
//!
//! Core types shared by every Tally crate.
//!
//! - [`Tenant`]: one provider organization resolved for the run
//! - [`Endpoint`]: the closed registry of provider resources with their keys and capabilities
//! - [`Record`]: one provider object tagged with `tenantId` and `extractedAt`
//! - [`LoadPolicy`] / [`SuccessPolicy`]: how tables are written and how a run is judged
//! - [`RunSummary`]: per `(tenant, endpoint)` outcomes of a run
//! - [`Backoff`]: the retry delay curve
//! - [`RecordSource`]: the pull interface between fetching and loading

pub mod backoff;
pub mod endpoint;
pub mod errors;
pub mod policy;
pub mod record;
pub mod source;
pub mod summary;
pub mod tenant;

pub use backoff::Backoff;
pub use endpoint::{Endpoint, EndpointSpec, Pagination};
pub use errors::CoreError;
pub use policy::{LoadPolicy, SuccessPolicy};
pub use record::{EXTRACTED_AT_FIELD, Record, TENANT_ID_FIELD};
pub use source::RecordSource;
pub use summary::{FailureKind, PairKey, PairOutcome, PairReport, RunSummary, SummaryBuilder};
pub use tenant::Tenant;
