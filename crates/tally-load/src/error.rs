//! Load error types.

use tally_core::FailureKind;

/// Errors raised by a table sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// `DuckDB` operation failed.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sink refused the table (name or state).
    #[error("table '{table}' rejected: {reason}")]
    Rejected { table: String, reason: String },
}

/// Failure of one planner write: either the record source or the sink.
#[derive(Debug, thiserror::Error)]
pub enum LoadError<E: std::error::Error + 'static> {
    #[error(transparent)]
    Source(E),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),
}

impl<E: std::error::Error + 'static> LoadError<E> {
    /// Summary classification, delegating source errors to `classify`.
    pub fn failure_kind(&self, classify: impl FnOnce(&E) -> FailureKind) -> FailureKind {
        match self {
            Self::Source(error) => classify(error),
            Self::Sink(_) => FailureKind::Sink,
        }
    }
}
