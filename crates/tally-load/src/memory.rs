//! In-memory sink.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};

use crate::error::SinkError;
use crate::sink::{CommitMode, Row, TableSink, TableSpec, TableStats, TableWriter};

#[derive(Debug, Default)]
struct Table {
    columns: Vec<String>,
    rows: BTreeMap<String, Map<String, Value>>,
    /// Parent key of each child row.
    parents: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, Table>,
    rejected: HashSet<String>,
}

/// Sink keeping every table in process memory.
///
/// Used for dry runs and tests. Clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    state: Arc<Mutex<State>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later commit to `table` fail.
    pub fn reject(&self, table: &str) {
        lock(&self.state).rejected.insert(table.to_string());
    }

    /// Rows of `table` ordered by key.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Map<String, Value>> {
        lock(&self.state)
            .tables
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Row keys of `table` in order.
    #[must_use]
    pub fn keys(&self, table: &str) -> Vec<String> {
        lock(&self.state)
            .tables
            .get(table)
            .map(|t| t.rows.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Parent key of the child row `key` in `table`.
    #[must_use]
    pub fn parent_of(&self, table: &str, key: &str) -> Option<String> {
        lock(&self.state)
            .tables
            .get(table)
            .and_then(|t| t.parents.get(key).cloned())
    }

    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.state).tables.keys().cloned().collect();
        names.sort();
        names
    }
}

impl TableSink for MemorySink {
    type Writer = MemoryWriter;

    fn begin(&self, table: &TableSpec) -> Result<MemoryWriter, SinkError> {
        lock(&self.state).tables.entry(table.name.clone()).or_default();
        Ok(MemoryWriter {
            state: Arc::clone(&self.state),
            table: table.name.clone(),
            staged: Vec::new(),
            claimed: HashSet::new(),
        })
    }

    fn stats(&self, table: &str) -> Result<TableStats, SinkError> {
        Ok(lock(&self.state)
            .tables
            .get(table)
            .map(|t| TableStats {
                columns: t.columns.clone(),
                rows: t.rows.len(),
            })
            .unwrap_or_default())
    }

    fn tables(&self) -> Result<Vec<String>, SinkError> {
        Ok(self.table_names())
    }

    /// Checks every table before changing any.
    fn commit_all(&self, writers: Vec<(MemoryWriter, CommitMode)>) -> Result<Vec<usize>, SinkError> {
        let mut state = lock(&self.state);
        for (writer, _) in &writers {
            writer.check(&state)?;
        }
        Ok(writers
            .into_iter()
            .map(|(writer, mode)| writer.apply(&mut state, mode))
            .collect())
    }
}

#[derive(Debug)]
pub struct MemoryWriter {
    state: Arc<Mutex<State>>,
    table: String,
    staged: Vec<Row>,
    claimed: HashSet<String>,
}

impl MemoryWriter {
    fn check(&self, state: &State) -> Result<(), SinkError> {
        if state.rejected.contains(&self.table) {
            return Err(SinkError::Rejected {
                table: self.table.clone(),
                reason: "table is read-only".to_string(),
            });
        }
        Ok(())
    }

    fn apply(self, state: &mut State, mode: CommitMode) -> usize {
        let table = state.tables.entry(self.table).or_default();
        match mode {
            CommitMode::Replace => {
                table.rows.clear();
                table.parents.clear();
            }
            CommitMode::Upsert if !self.claimed.is_empty() => {
                let orphaned: Vec<String> = table
                    .parents
                    .iter()
                    .filter(|(_, parent)| self.claimed.contains(*parent))
                    .map(|(key, _)| key.clone())
                    .collect();
                for key in orphaned {
                    table.rows.remove(&key);
                    table.parents.remove(&key);
                }
            }
            CommitMode::Upsert => {}
        }
        let mut applied = HashSet::new();
        for row in self.staged {
            for column in row.fields.keys() {
                if !table.columns.contains(column) {
                    table.columns.push(column.clone());
                }
            }
            applied.insert(row.key.clone());
            match row.parent {
                Some(parent) => table.parents.insert(row.key.clone(), parent),
                None => table.parents.remove(&row.key),
            };
            table.rows.insert(row.key, row.fields);
        }
        applied.len()
    }
}

impl TableWriter for MemoryWriter {
    fn write(&mut self, rows: Vec<Row>) -> Result<(), SinkError> {
        self.staged.extend(rows);
        Ok(())
    }

    fn claim_parents(&mut self, parents: Vec<String>) -> Result<(), SinkError> {
        self.claimed.extend(parents);
        Ok(())
    }

    fn commit(self, mode: CommitMode) -> Result<usize, SinkError> {
        let shared = Arc::clone(&self.state);
        let mut state = lock(&shared);
        self.check(&state)?;
        Ok(self.apply(&mut state, mode))
    }

    fn abort(self) {}
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
