//! Run-fatal errors.

use tally_config::ConfigError;
use tally_fetch::FetchError;
use tally_load::SinkError;

/// Errors that stop a run before any pair is processed.
///
/// Pair-scoped failures never surface here; they are recorded in the
/// [`RunSummary`](tally_core::RunSummary).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("tenant resolution failed: {0}")]
    Resolve(#[from] FetchError),

    #[error("destination unavailable: {0}")]
    Destination(#[from] SinkError),
}
