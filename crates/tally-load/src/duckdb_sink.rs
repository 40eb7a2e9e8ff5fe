//! `DuckDB` sink.
//!
//! Each target table has `_key` and `_parent` columns plus one `VARCHAR`
//! column per flattened field, added as new fields appear. Writers stage rows
//! in a temporary table carrying an insertion sequence, and claimed parent
//! keys in a second one. A commit runs in one transaction that adds missing
//! columns, deletes the matching keys and claimed children (or every row, on
//! replace) and inserts the latest staged row per key; `commit_all` does the
//! same for several tables in a single transaction. Column names compare
//! case-insensitively, as `DuckDB` identifiers do; fields of one record that
//! differ only in case share a column and the later value wins.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use duckdb::types::Value as DbValue;
use duckdb::{Connection, params, params_from_iter};

use crate::error::SinkError;
use crate::flatten::cell;
use crate::sink::{CommitMode, Row, TableSink, TableSpec, TableStats, TableWriter};

const KEY_COLUMN: &str = "_key";
const PARENT_COLUMN: &str = "_parent";
const SEQ_COLUMN: &str = "_seq";

const TABLE_COLUMNS_SQL: &str = "SELECT column_name FROM information_schema.columns \
     WHERE table_catalog = current_database() AND table_schema = 'main' AND table_name = ? \
     ORDER BY ordinal_position";
const TABLES_SQL: &str = "SELECT table_name FROM information_schema.tables \
     WHERE table_catalog = current_database() AND table_schema = 'main' \
     AND table_type = 'BASE TABLE' ORDER BY table_name";

#[derive(Debug)]
pub struct DuckDbSink {
    conn: Arc<Mutex<Connection>>,
    stages: AtomicU64,
}

impl DuckDbSink {
    /// Open (or create) a database file, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the directory or database cannot be opened.
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        tracing::debug!(path = %path.display(), "opened DuckDB destination");
        Ok(Self::from_connection(conn))
    }

    /// In-memory database, for tests.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if `DuckDB` fails to initialize.
    pub fn open_in_memory() -> Result<Self, SinkError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            stages: AtomicU64::new(0),
        }
    }

    /// Every row of `table` as column/text pairs, ordered by key.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the table cannot be read.
    pub fn rows(&self, table: &str) -> Result<Vec<BTreeMap<String, Option<String>>>, SinkError> {
        let conn = lock(&self.conn);
        let columns = table_columns(&conn, table)?;
        if columns.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM {} ORDER BY {}",
            column_list(&columns),
            ident(table),
            ident(KEY_COLUMN)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                let mut values = BTreeMap::new();
                for (index, column) in columns.iter().enumerate() {
                    values.insert(column.clone(), row.get::<_, Option<String>>(index)?);
                }
                Ok(values)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Row keys of `table` in order.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the table cannot be read.
    pub fn keys(&self, table: &str) -> Result<Vec<String>, SinkError> {
        Ok(self
            .rows(table)?
            .into_iter()
            .filter_map(|mut row| row.remove(KEY_COLUMN).flatten())
            .collect())
    }
}

impl TableSink for DuckDbSink {
    type Writer = DuckDbWriter;

    fn begin(&self, table: &TableSpec) -> Result<DuckDbWriter, SinkError> {
        let id = self.stages.fetch_add(1, Ordering::Relaxed);
        let stage = format!("_tally_stage_{id}");
        let claims = format!("_tally_claims_{id}");
        let conn = lock(&self.conn);
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {target} ({key} VARCHAR NOT NULL, {parent} VARCHAR);
             CREATE TEMP TABLE {stage_table} ({seq} BIGINT NOT NULL, {key} VARCHAR NOT NULL, {parent} VARCHAR);
             CREATE TEMP TABLE {claims_table} ({parent} VARCHAR NOT NULL);",
            target = ident(&table.name),
            stage_table = ident(&stage),
            claims_table = ident(&claims),
            key = ident(KEY_COLUMN),
            parent = ident(PARENT_COLUMN),
            seq = ident(SEQ_COLUMN),
        ))?;
        if !contains_column(&table_columns(&conn, &table.name)?, PARENT_COLUMN) {
            conn.execute_batch(&format!(
                "ALTER TABLE {} ADD COLUMN {} VARCHAR",
                ident(&table.name),
                ident(PARENT_COLUMN)
            ))?;
        }
        tracing::debug!(table = %table.name, %stage, "staging table created");
        Ok(DuckDbWriter {
            conn: Arc::clone(&self.conn),
            table: table.name.clone(),
            stage,
            claims,
            columns: Vec::new(),
            seq: 0,
        })
    }

    fn stats(&self, table: &str) -> Result<TableStats, SinkError> {
        let conn = lock(&self.conn);
        let mut columns = table_columns(&conn, table)?;
        if columns.is_empty() {
            return Ok(TableStats::default());
        }
        columns.retain(|column| !is_system_column(column));
        let rows: i64 = conn.query_row(&format!("SELECT count(*) FROM {}", ident(table)), [], |row| {
            row.get(0)
        })?;
        Ok(TableStats {
            columns,
            rows: usize::try_from(rows).unwrap_or(0),
        })
    }

    fn tables(&self) -> Result<Vec<String>, SinkError> {
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(TABLES_SQL)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Widens every target, then deletes and inserts for each writer, all in
    /// one transaction. Writers must come from this sink.
    fn commit_all(&self, writers: Vec<(DuckDbWriter, CommitMode)>) -> Result<Vec<usize>, SinkError> {
        let applied = {
            let mut conn = lock(&self.conn);
            let tx = conn.transaction()?;
            for (writer, _) in &writers {
                writer.widen(&tx)?;
            }
            let mut applied = Vec::with_capacity(writers.len());
            for (writer, mode) in &writers {
                applied.push(writer.apply(&tx, *mode)?);
            }
            tx.commit()?;
            applied
        };
        for ((writer, mode), rows) in writers.iter().zip(&applied) {
            tracing::debug!(table = %writer.table, rows, ?mode, "staged rows committed");
        }
        Ok(applied)
    }
}

// ── Writer ─────────────────────────────────────────────────────────

/// Staged writes into one table. Dropping the writer drops its stage.
#[derive(Debug)]
pub struct DuckDbWriter {
    conn: Arc<Mutex<Connection>>,
    table: String,
    stage: String,
    claims: String,
    /// Data columns of the stage, in creation order.
    columns: Vec<String>,
    seq: i64,
}

impl DuckDbWriter {
    /// Add staged columns the target lacks.
    fn widen(&self, conn: &Connection) -> Result<(), SinkError> {
        let existing = table_columns(conn, &self.table)?;
        for column in &self.columns {
            if !contains_column(&existing, column) {
                conn.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} VARCHAR",
                    ident(&self.table),
                    ident(column)
                ))?;
            }
        }
        Ok(())
    }

    /// Delete and insert for one table, inside the caller's transaction.
    /// The target must already be widened.
    fn apply(&self, conn: &Connection, mode: CommitMode) -> Result<usize, SinkError> {
        let target = ident(&self.table);
        let mut names = vec![KEY_COLUMN.to_string(), PARENT_COLUMN.to_string()];
        names.extend(self.columns.iter().cloned());
        let names = column_list(&names);
        let stage = ident(&self.stage);
        let claims = ident(&self.claims);
        let key = ident(KEY_COLUMN);
        let parent = ident(PARENT_COLUMN);

        match mode {
            CommitMode::Replace => conn.execute(&format!("DELETE FROM {target}"), [])?,
            CommitMode::Upsert => conn.execute(
                &format!(
                    "DELETE FROM {target} WHERE {key} IN (SELECT {key} FROM {stage})
                        OR {parent} IN (SELECT {parent} FROM {claims})"
                ),
                [],
            )?,
        };
        let applied = conn.execute(
            &format!(
                "INSERT INTO {target} ({names}) SELECT {names} FROM (
                     SELECT *, row_number() OVER (PARTITION BY {key} ORDER BY {} DESC) AS _rank
                     FROM {stage}
                 ) WHERE _rank = 1",
                ident(SEQ_COLUMN)
            ),
            [],
        )?;
        Ok(applied)
    }
}

impl TableWriter for DuckDbWriter {
    fn write(&mut self, rows: Vec<Row>) -> Result<(), SinkError> {
        if rows.is_empty() {
            return Ok(());
        }
        let conn = lock(&self.conn);
        for row in &rows {
            for column in row.fields.keys() {
                if !contains_column(&self.columns, column) {
                    conn.execute_batch(&format!(
                        "ALTER TABLE {} ADD COLUMN {} VARCHAR",
                        ident(&self.stage),
                        ident(column)
                    ))?;
                    self.columns.push(column.clone());
                }
            }
        }

        let mut names = vec![
            SEQ_COLUMN.to_string(),
            KEY_COLUMN.to_string(),
            PARENT_COLUMN.to_string(),
        ];
        names.extend(self.columns.iter().cloned());
        let placeholders = vec!["?"; names.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            ident(&self.stage),
            column_list(&names)
        ))?;
        for row in rows {
            self.seq += 1;
            let mut cells: Vec<DbValue> = vec![DbValue::Null; self.columns.len()];
            let mut filled = vec![false; self.columns.len()];
            for (field, value) in &row.fields {
                let Some(index) = column_index(&self.columns, field) else {
                    continue;
                };
                let Some(text) = cell(value) else {
                    continue;
                };
                if filled[index] {
                    tracing::warn!(
                        table = %self.table,
                        column = %self.columns[index],
                        %field,
                        "fields differ only in case; keeping the later value"
                    );
                }
                cells[index] = DbValue::Text(text);
                filled[index] = true;
            }
            let mut values = Vec::with_capacity(names.len());
            values.push(DbValue::BigInt(self.seq));
            values.push(DbValue::Text(row.key));
            values.push(row.parent.map_or(DbValue::Null, DbValue::Text));
            values.extend(cells);
            stmt.execute(params_from_iter(values))?;
        }
        Ok(())
    }

    fn claim_parents(&mut self, parents: Vec<String>) -> Result<(), SinkError> {
        if parents.is_empty() {
            return Ok(());
        }
        let conn = lock(&self.conn);
        let mut stmt = conn.prepare(&format!(
            "INSERT INTO {} ({}) VALUES (?)",
            ident(&self.claims),
            ident(PARENT_COLUMN)
        ))?;
        for parent in parents {
            stmt.execute(params![parent])?;
        }
        Ok(())
    }

    fn commit(self, mode: CommitMode) -> Result<usize, SinkError> {
        let applied = {
            let mut conn = lock(&self.conn);
            let tx = conn.transaction()?;
            self.widen(&tx)?;
            let applied = self.apply(&tx, mode)?;
            tx.commit()?;
            applied
        };
        tracing::debug!(table = %self.table, rows = applied, ?mode, "staged rows committed");
        Ok(applied)
    }

    fn abort(self) {
        tracing::debug!(table = %self.table, stage = %self.stage, "staged rows discarded");
    }
}

impl Drop for DuckDbWriter {
    fn drop(&mut self) {
        let conn = lock(&self.conn);
        if let Err(error) = conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {}; DROP TABLE IF EXISTS {};",
            ident(&self.stage),
            ident(&self.claims)
        )) {
            tracing::warn!(stage = %self.stage, %error, "failed to drop staging table");
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, SinkError> {
    let mut stmt = conn.prepare(TABLE_COLUMNS_SQL)?;
    let columns = stmt
        .query_map(params![table], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

fn column_index(columns: &[String], name: &str) -> Option<usize> {
    columns.iter().position(|column| column.eq_ignore_ascii_case(name))
}

fn contains_column(columns: &[String], name: &str) -> bool {
    column_index(columns, name).is_some()
}

fn is_system_column(name: &str) -> bool {
    name == KEY_COLUMN || name == PARENT_COLUMN
}

fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list(columns: &[String]) -> String {
    columns.iter().map(|column| ident(column)).collect::<Vec<_>>().join(", ")
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}
