//! Table sink abstraction.
//!
//! A [`TableSink`] hands out one [`TableWriter`] per table touched by a
//! `(tenant, endpoint)` pair. Writers stage rows; nothing is visible in the
//! destination until [`TableWriter::commit`] (or [`TableSink::commit_all`],
//! for a table and its child tables together) runs, and
//! [`TableWriter::abort`] discards the staged rows.
//!
//! Child tables (`Invoices_LineItems`) hold the items of an array field. Each
//! child row records the key of its parent row, and an upsert replaces every
//! child row of the parents it claims.

use serde::Serialize;
use serde_json::{Map, Value};
use tally_core::{Endpoint, LoadPolicy, TENANT_ID_FIELD};

use crate::error::SinkError;
use crate::flatten::SEPARATOR;

/// Position of a child row within its parent's array.
pub const CHILD_INDEX_FIELD: &str = "childIndex";

// ── Types ──────────────────────────────────────────────────────────

/// Destination table of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    /// Endpoint key fields followed by `tenantId`.
    pub primary_key: Vec<String>,
    pub policy: LoadPolicy,
}

impl TableSpec {
    /// Tables are shared by every tenant, so `tenantId` always joins the key.
    #[must_use]
    pub fn for_endpoint(endpoint: Endpoint, policy: LoadPolicy) -> Self {
        let spec = endpoint.spec();
        let mut primary_key: Vec<String> = spec.primary_key.iter().map(ToString::to_string).collect();
        if !primary_key.iter().any(|field| field == TENANT_ID_FIELD) {
            primary_key.push(TENANT_ID_FIELD.to_string());
        }
        Self {
            name: spec.name.to_string(),
            primary_key,
            policy,
        }
    }

    /// Child table holding the items of array field `field`, keyed by this
    /// table's key plus the item position.
    #[must_use]
    pub fn child(&self, field: &str) -> Self {
        let mut primary_key = self.primary_key.clone();
        primary_key.push(CHILD_INDEX_FIELD.to_string());
        Self {
            name: format!("{}{SEPARATOR}{field}", self.name),
            primary_key,
            policy: self.policy,
        }
    }

    /// Prefix shared by the names of this table's child tables.
    #[must_use]
    pub fn child_prefix(&self) -> String {
        format!("{}{SEPARATOR}", self.name)
    }
}

/// One flattened row and its upsert key.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: String,
    /// Key of the parent row, for child tables.
    pub parent: Option<String>,
    pub fields: Map<String, Value>,
}

impl Row {
    #[must_use]
    pub const fn new(key: String, fields: Map<String, Value>) -> Self {
        Self {
            key,
            parent: None,
            fields,
        }
    }

    #[must_use]
    pub const fn child(key: String, parent: String, fields: Map<String, Value>) -> Self {
        Self {
            key,
            parent: Some(parent),
            fields,
        }
    }
}

/// How a commit treats rows already in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Drop every existing row, then insert.
    Replace,
    /// Replace rows with matching keys, and child rows of claimed parents;
    /// keep the rest.
    Upsert,
}

/// Current shape of a destination table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableStats {
    /// Data columns in creation order.
    pub columns: Vec<String>,
    pub rows: usize,
}

/// Metadata of a written table, reported after each commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableManifest {
    pub table: String,
    pub primary_key: Vec<String>,
    pub load_policy: LoadPolicy,
    pub columns: Vec<String>,
    /// Rows in the table after the commit.
    pub rows: usize,
}

// ── Traits ─────────────────────────────────────────────────────────

/// A destination that can hold many tables.
pub trait TableSink: Send + Sync {
    type Writer: TableWriter;

    /// Open a staged writer for `table`, creating the table if needed.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the table or its staging area cannot be created.
    fn begin(&self, table: &TableSpec) -> Result<Self::Writer, SinkError>;

    /// Columns and row count of `table`. Unknown tables report empty stats.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the destination cannot be queried.
    fn stats(&self, table: &str) -> Result<TableStats, SinkError>;

    /// Names of every table in the destination, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the destination cannot be queried.
    fn tables(&self) -> Result<Vec<String>, SinkError>;

    /// Apply several writers of this sink as one unit: either every table
    /// changes or none does. Returns the distinct keys applied per writer,
    /// in order.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if any commit fails; every table is left as it was.
    fn commit_all(&self, writers: Vec<(Self::Writer, CommitMode)>) -> Result<Vec<usize>, SinkError>;
}

/// Staged rows for one table.
pub trait TableWriter: Send {
    /// Stage a batch.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the rows cannot be staged.
    fn write(&mut self, rows: Vec<Row>) -> Result<(), SinkError>;

    /// Claim parent keys: an upsert commit first removes every existing row
    /// whose parent is claimed, whether or not rows for it are staged.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the claims cannot be staged.
    fn claim_parents(&mut self, parents: Vec<String>) -> Result<(), SinkError>;

    /// Atomically apply the staged rows. Within the staged rows the last row
    /// for each key wins. Returns the number of distinct keys applied.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the commit fails; the table is left as it was.
    fn commit(self, mode: CommitMode) -> Result<usize, SinkError>;

    /// Discard the staged rows.
    fn abort(self);
}
