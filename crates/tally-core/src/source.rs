use std::future::Future;

use crate::record::Record;

/// A finite, non-restartable sequence of record batches.
///
/// Fetchers implement this per `(tenant, endpoint)` pair; the load planner
/// pulls one batch at a time so memory stays bounded to one page.
pub trait RecordSource: Send {
    /// Error raised when the next batch cannot be produced.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Pull the next batch. `Ok(None)` marks the end of the sequence.
    fn next_batch(
        &mut self,
    ) -> impl Future<Output = Result<Option<Vec<Record>>, Self::Error>> + Send;
}
