//! Drives one `(tenant, endpoint)` record stream into its table.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::{Map, Value};
use tally_core::{EXTRACTED_AT_FIELD, Endpoint, LoadPolicy, Record, RecordSource};

use crate::error::{LoadError, SinkError};
use crate::flatten::{Exploded, explode};
use crate::key::{child_key, row_key};
use crate::sink::{CHILD_INDEX_FIELD, CommitMode, Row, TableManifest, TableSink, TableSpec, TableWriter};

/// Outcome of one successful [`LoadPlanner::write`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Records pulled from the source.
    pub records: usize,
    pub manifest: TableManifest,
    /// Child tables committed alongside, by name.
    pub children: Vec<TableManifest>,
}

/// Maps endpoints to tables and applies the run's load policy.
///
/// One planner serves a whole run. Under [`LoadPolicy::Full`] the first
/// commit into each table replaces it; later commits in the same run upsert,
/// so tenants sharing a table do not erase each other. Under
/// [`LoadPolicy::Incremental`] every commit upserts.
///
/// Arrays of objects land in child tables named `<Endpoint>_<Field>`. Every
/// parent row staged by a pair claims its children, so an upsert replaces
/// the whole item list of each re-extracted parent.
pub struct LoadPlanner<S: TableSink> {
    sink: Arc<S>,
    policy: LoadPolicy,
    /// Tables already replaced in this run. Also serializes commits.
    replaced: Mutex<HashSet<String>>,
}

impl<S: TableSink> LoadPlanner<S> {
    #[must_use]
    pub fn new(sink: Arc<S>, policy: LoadPolicy) -> Self {
        Self {
            sink,
            policy,
            replaced: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub const fn policy(&self) -> LoadPolicy {
        self.policy
    }

    #[must_use]
    pub const fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    #[must_use]
    pub fn table(&self, endpoint: Endpoint) -> TableSpec {
        TableSpec::for_endpoint(endpoint, self.policy)
    }

    /// Stream every batch of `source` into the endpoint's table and its child
    /// tables.
    ///
    /// Rows are staged as they arrive and committed once the source is
    /// exhausted. A source or sink error discards the staged rows and leaves
    /// the tables unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Source`] when the source fails and
    /// [`LoadError::Sink`] when staging or committing fails.
    pub async fn write<R: RecordSource>(
        &self,
        source: &mut R,
        endpoint: Endpoint,
    ) -> Result<LoadReport, LoadError<R::Error>> {
        let table = self.table(endpoint);
        let mut staging = Staging::begin(self.sink.as_ref(), table)?;
        let mut records = 0usize;

        loop {
            match source.next_batch().await {
                Ok(Some(batch)) => {
                    records += batch.len();
                    if let Err(error) = staging.stage(self.sink.as_ref(), batch) {
                        staging.abort();
                        return Err(error.into());
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    tracing::warn!(
                        table = %staging.table.name,
                        staged = records,
                        "source failed; discarding staged rows"
                    );
                    staging.abort();
                    return Err(LoadError::Source(error));
                }
            }
        }

        let table = staging.table.clone();
        let child_tables = self.commit(staging)?;
        let manifest = self.manifest(table)?;
        let children = child_tables
            .into_iter()
            .map(|child| self.manifest(child))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::info!(
            table = %manifest.table,
            records,
            total = manifest.rows,
            child_tables = children.len(),
            policy = %self.policy,
            "table committed"
        );
        Ok(LoadReport {
            records,
            manifest,
            children,
        })
    }

    fn manifest(&self, table: TableSpec) -> Result<TableManifest, SinkError> {
        let stats = self.sink.stats(&table.name)?;
        Ok(TableManifest {
            table: table.name,
            primary_key: table.primary_key,
            load_policy: self.policy,
            columns: stats.columns,
            rows: stats.rows,
        })
    }

    /// Commit the parent table and every child table in one sink commit:
    /// those staged by this pair and those already in the destination.
    /// Returns the child tables.
    fn commit(&self, staging: Staging<S::Writer>) -> Result<Vec<TableSpec>, SinkError> {
        let mut replaced = self.replaced.lock().unwrap_or_else(PoisonError::into_inner);
        let Staging {
            table,
            writer,
            mut children,
            parents,
        } = staging;

        let prefix = table.child_prefix();
        for name in self.sink.tables()? {
            if let Some(field) = name.strip_prefix(&prefix)
                && !children.contains_key(&name)
            {
                let spec = table.child(field);
                let writer = self.sink.begin(&spec)?;
                children.insert(name, (spec, writer));
            }
        }

        let mut batch = Vec::with_capacity(children.len() + 1);
        let mut modes = Vec::with_capacity(children.len() + 1);
        modes.push(self.mode(&replaced, &table));
        batch.push((writer, modes[0]));
        let mut child_tables = Vec::with_capacity(children.len());
        for (spec, mut writer) in children.into_values() {
            writer.claim_parents(parents.clone())?;
            let mode = self.mode(&replaced, &spec);
            modes.push(mode);
            batch.push((writer, mode));
            child_tables.push(spec);
        }

        let applied = self.sink.commit_all(batch)?;
        for ((spec, mode), keys) in std::iter::once(&table).chain(&child_tables).zip(modes).zip(applied) {
            tracing::debug!(table = %spec.name, keys, ?mode, "rows applied");
            if mode == CommitMode::Replace {
                replaced.insert(spec.name.clone());
            }
        }
        Ok(child_tables)
    }

    /// Under a full load only the first commit into a table replaces it.
    fn mode(&self, replaced: &HashSet<String>, table: &TableSpec) -> CommitMode {
        if self.policy == LoadPolicy::Full && !replaced.contains(&table.name) {
            CommitMode::Replace
        } else {
            CommitMode::Upsert
        }
    }
}

// ── Staging ────────────────────────────────────────────────────────

/// Writers of one pair: the endpoint table and the child tables seen so far.
struct Staging<W> {
    table: TableSpec,
    writer: W,
    /// Child table name to its spec and writer.
    children: BTreeMap<String, (TableSpec, W)>,
    /// Keys of every staged parent row.
    parents: Vec<String>,
}

impl<W: TableWriter> Staging<W> {
    fn begin<S: TableSink<Writer = W>>(sink: &S, table: TableSpec) -> Result<Self, SinkError> {
        let writer = sink.begin(&table)?;
        Ok(Self {
            table,
            writer,
            children: BTreeMap::new(),
            parents: Vec::new(),
        })
    }

    fn stage<S: TableSink<Writer = W>>(&mut self, sink: &S, batch: Vec<Record>) -> Result<(), SinkError> {
        let mut rows = Vec::with_capacity(batch.len());
        let mut child_rows: BTreeMap<String, Vec<Row>> = BTreeMap::new();

        for record in batch {
            let key = row_key(&record, &self.table.primary_key);
            let Exploded { columns, children } = explode(record.into_fields());
            for (field, items) in children {
                let spec = self.table.child(&field);
                let staged = child_rows.entry(spec.name).or_default();
                staged.extend(
                    items
                        .into_iter()
                        .enumerate()
                        .map(|(index, item)| child_row(&self.table, &key, &columns, index, item)),
                );
            }
            self.parents.push(key.clone());
            rows.push(Row::new(key, columns));
        }
        self.writer.write(rows)?;

        for (name, rows) in child_rows {
            let writer = match self.children.entry(name) {
                Entry::Occupied(entry) => &mut entry.into_mut().1,
                Entry::Vacant(entry) => {
                    let spec = self.table.child(&entry.key()[self.table.child_prefix().len()..]);
                    let writer = sink.begin(&spec)?;
                    &mut entry.insert((spec, writer)).1
                }
            };
            writer.write(rows)?;
        }
        Ok(())
    }

    fn abort(self) {
        self.writer.abort();
        for (_, (_, writer)) in self.children {
            writer.abort();
        }
    }
}

/// Child row: the item's own columns, the parent's key fields and
/// extraction time, and the item position.
fn child_row(
    parent: &TableSpec,
    parent_key: &str,
    parent_columns: &Map<String, Value>,
    index: usize,
    mut fields: Map<String, Value>,
) -> Row {
    for name in parent.primary_key.iter().map(String::as_str).chain([EXTRACTED_AT_FIELD]) {
        if let Some(value) = parent_columns.get(name) {
            fields.insert(name.to_string(), value.clone());
        }
    }
    fields.insert(CHILD_INDEX_FIELD.to_string(), Value::from(index));
    Row::child(child_key(parent_key, index), parent_key.to_string(), fields)
}
