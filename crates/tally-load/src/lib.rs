//! # tally-load
//!
//! Loading of record streams into destination tables.
//!
//! - [`LoadPlanner`]: one per run; maps endpoints to tables, stages each
//!   pair's records and commits them under the run's [`LoadPolicy`](tally_core::LoadPolicy)
//! - [`TableSink`] / [`TableWriter`]: the destination seam
//! - [`DuckDbSink`]: tables in a `DuckDB` file
//! - [`MemorySink`]: tables in process memory
//! - [`flatten()`]: nested objects to `Parent_Child` columns; [`explode`]
//!   also splits arrays of objects into child table rows
//! - [`row_key`]: upsert keys, with a content hash for keyless records

pub mod duckdb_sink;
pub mod error;
pub mod flatten;
pub mod key;
pub mod memory;
pub mod planner;
pub mod sink;

pub use duckdb_sink::{DuckDbSink, DuckDbWriter};
pub use error::{LoadError, SinkError};
pub use flatten::{Exploded, explode, flatten};
pub use key::{child_key, row_key};
pub use memory::{MemorySink, MemoryWriter};
pub use planner::{LoadPlanner, LoadReport};
pub use sink::{CHILD_INDEX_FIELD, CommitMode, Row, TableManifest, TableSink, TableSpec, TableStats, TableWriter};
