//! SQLite-backed fact store.
//!
//! # Invariants
//! - Every write call runs inside one `BEGIN IMMEDIATE` transaction.
//! - Id sets are de-duplicated and queried in chunks that stay below the
//!   engine's bound-parameter limit; the merged result is re-sorted.
//! - Stored values that are not text are surfaced as undecodable rows
//!   rather than failing the whole read.

use super::{FactStore, RemovalCounts, StoreError, StoreResult};
use crate::db::{
    open_db_in_memory, open_db_read_only, open_db_with_timeout, DEFAULT_BUSY_TIMEOUT,
};
use crate::model::{EntityId, Fact, FactRow, Resource, Timestamp};
use log::{debug, error, info};
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::{Duration, Instant};

/// Keeps `IN (...)` lists well under `SQLITE_MAX_VARIABLE_NUMBER` on old builds (999).
const MAX_IDS_PER_QUERY: usize = 500;

/// Fact store persisted in one SQLite database.
pub struct SqliteFactStore {
    conn: Connection,
    read_only: bool,
}

impl SqliteFactStore {
    /// Opens (creating if needed) a writable store file.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_with_timeout(
        path: impl AsRef<Path>,
        busy_timeout: Duration,
    ) -> StoreResult<Self> {
        Ok(Self {
            conn: open_db_with_timeout(path, busy_timeout)?,
            read_only: false,
        })
    }

    /// Opens an existing store file as a read-only overlay.
    pub fn open_overlay(path: impl AsRef<Path>, busy_timeout: Duration) -> StoreResult<Self> {
        Ok(Self {
            conn: open_db_read_only(path, busy_timeout)?,
            read_only: true,
        })
    }

    /// Opens a writable in-memory store.
    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self {
            conn: open_db_in_memory()?,
            read_only: false,
        })
    }

    /// Turns this store into a read-only one for the rest of its lifetime.
    ///
    /// Sets `PRAGMA query_only`, so the engine rejects writes as well.
    pub fn into_read_only(self) -> StoreResult<Self> {
        self.conn.execute_batch("PRAGMA query_only = ON;")?;
        Ok(Self {
            conn: self.conn,
            read_only: true,
        })
    }

    /// Underlying connection, for diagnostics and tests.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn connection_mut(&mut self) -> StoreResult<&mut Connection> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        Ok(&mut self.conn)
    }

    pub fn fact_count(&self) -> StoreResult<u64> {
        count_rows(&self.conn, "entities")
    }

    pub fn resource_count(&self) -> StoreResult<u64> {
        count_rows(&self.conn, "resources")
    }

    fn insert_batch(&mut self, rows: &[FactRow], resources: &[Resource]) -> StoreResult<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut insert_fact = tx.prepare_cached(
                "INSERT INTO entities (timestamp, uuid, key, value) VALUES (?1, ?2, ?3, ?4);",
            )?;
            for row in rows {
                insert_fact.execute(params![
                    row.timestamp,
                    row.entity_id.as_str(),
                    row.field_key.as_str(),
                    row.encoded_value.as_str(),
                ])?;
            }

            let mut insert_resource = tx.prepare_cached(
                "INSERT INTO resources (timestamp, uuid, data) VALUES (?1, ?2, ?3);",
            )?;
            for resource in resources {
                insert_resource.execute(params![
                    resource.timestamp,
                    resource.entity_id.as_str(),
                    resource.data.as_slice(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete_timestamp(&mut self, timestamp: Timestamp) -> StoreResult<RemovalCounts> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let facts = tx.execute("DELETE FROM entities WHERE timestamp = ?1;", [timestamp])?;
        let resources = tx.execute("DELETE FROM resources WHERE timestamp = ?1;", [timestamp])?;
        tx.commit()?;
        Ok(RemovalCounts { facts, resources })
    }
}

impl FactStore for SqliteFactStore {
    fn write_batch(&mut self, facts: &[Fact], resources: &[Resource]) -> StoreResult<()> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }
        if facts.is_empty() && resources.is_empty() {
            return Ok(());
        }

        let rows = facts
            .iter()
            .map(FactRow::encode)
            .collect::<Result<Vec<_>, _>>()?;

        let started_at = Instant::now();
        match self.insert_batch(&rows, resources) {
            Ok(()) => {
                debug!(
                    "event=store_write module=store status=ok facts={} resources={} duration_ms={}",
                    rows.len(),
                    resources.len(),
                    started_at.elapsed().as_millis()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event=store_write module=store status=error facts={} resources={} error={}",
                    rows.len(),
                    resources.len(),
                    err
                );
                Err(err)
            }
        }
    }

    fn read_entities(&self, ids: &[EntityId]) -> StoreResult<Vec<FactRow>> {
        let ids = unique_ids(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut rows = Vec::new();
        for chunk in ids.chunks(MAX_IDS_PER_QUERY) {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT timestamp, uuid, key, value
                 FROM entities
                 WHERE uuid IN ({})
                 ORDER BY timestamp ASC, uuid ASC, key ASC, value ASC;",
                placeholders(chunk.len())
            ))?;
            let mut query = stmt.query(params_from_iter(chunk.iter()))?;
            while let Some(row) = query.next()? {
                rows.push(FactRow {
                    timestamp: timestamp_from_sql(row.get_ref(0)?)?,
                    entity_id: row.get(1)?,
                    field_key: row.get(2)?,
                    encoded_value: encoded_value_from_sql(row.get_ref(3)?),
                });
            }
        }
        rows.sort();
        Ok(rows)
    }

    fn read_resources(&self, ids: &[EntityId]) -> StoreResult<Vec<Resource>> {
        let ids = unique_ids(ids);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut resources = Vec::new();
        for chunk in ids.chunks(MAX_IDS_PER_QUERY) {
            let mut stmt = self.conn.prepare(&format!(
                "SELECT timestamp, uuid, data
                 FROM resources
                 WHERE uuid IN ({})
                 ORDER BY timestamp ASC, uuid ASC;",
                placeholders(chunk.len())
            ))?;
            let mut query = stmt.query(params_from_iter(chunk.iter()))?;
            while let Some(row) = query.next()? {
                resources.push(Resource {
                    timestamp: timestamp_from_sql(row.get_ref(0)?)?,
                    entity_id: row.get(1)?,
                    data: bytes_from_sql(row.get_ref(2)?),
                });
            }
        }
        resources.sort();
        Ok(resources)
    }

    fn root_entity(&self) -> StoreResult<Option<EntityId>> {
        let root = self
            .conn
            .query_row(
                "SELECT uuid
                 FROM entities
                 WHERE key = 'text'
                 ORDER BY timestamp ASC, uuid ASC
                 LIMIT 1;",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(root)
    }

    fn remove_at_timestamp(&mut self, timestamp: Timestamp) -> StoreResult<RemovalCounts> {
        if self.read_only {
            return Err(StoreError::ReadOnly);
        }

        let counts = self.delete_timestamp(timestamp)?;
        info!(
            "event=store_remove_timestamp module=store status=ok timestamp={} facts={} resources={}",
            timestamp, counts.facts, counts.resources
        );
        Ok(counts)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Every fact row on `conn` with its `rowid`, in canonical order.
///
/// The rowid addresses exactly one stored row, even when several rows share
/// `(timestamp, uuid, key)`.
pub(crate) fn load_rows_with_rowid(conn: &Connection) -> StoreResult<Vec<(i64, FactRow)>> {
    let mut stmt = conn.prepare(
        "SELECT rowid, timestamp, uuid, key, value
         FROM entities
         ORDER BY timestamp ASC, uuid ASC, key ASC;",
    )?;
    let mut query = stmt.query([])?;
    let mut rows = Vec::new();
    while let Some(row) = query.next()? {
        let rowid: i64 = row.get(0)?;
        rows.push((
            rowid,
            FactRow {
                timestamp: timestamp_from_sql(row.get_ref(1)?)?,
                entity_id: row.get(2)?,
                field_key: row.get(3)?,
                encoded_value: encoded_value_from_sql(row.get_ref(4)?),
            },
        ));
    }
    rows.sort_by(|(left_id, left), (right_id, right)| {
        left.cmp(right).then(left_id.cmp(right_id))
    });
    Ok(rows)
}

fn unique_ids(ids: &[EntityId]) -> Vec<&str> {
    ids.iter()
        .map(String::as_str)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

fn count_rows(conn: &Connection, table: &'static str) -> StoreResult<u64> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })?;
    u64::try_from(count)
        .map_err(|_| StoreError::InvalidData(format!("negative row count in {table}")))
}

/// Accepts integer timestamps and the numeric text some older stores wrote.
fn timestamp_from_sql(value: ValueRef<'_>) -> StoreResult<Timestamp> {
    match value {
        ValueRef::Integer(timestamp) => Ok(timestamp),
        ValueRef::Text(text) => std::str::from_utf8(text)
            .ok()
            .and_then(|text| text.trim().parse::<Timestamp>().ok())
            .ok_or_else(|| {
                StoreError::InvalidData(format!(
                    "non-numeric timestamp `{}`",
                    String::from_utf8_lossy(text)
                ))
            }),
        other => Err(StoreError::InvalidData(format!(
            "unsupported timestamp storage class {:?}",
            other.data_type()
        ))),
    }
}

/// Maps a stored value cell to its encoded text.
///
/// Numeric cells are already valid JSON text. Anything that cannot be text
/// becomes an empty string, which fails to decode and is then isolated to
/// its own field by the reader.
fn encoded_value_from_sql(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Text(text) | ValueRef::Blob(text) => String::from_utf8_lossy(text).into_owned(),
        ValueRef::Integer(number) => number.to_string(),
        ValueRef::Real(number) => number.to_string(),
        ValueRef::Null => String::new(),
    }
}

fn bytes_from_sql(value: ValueRef<'_>) -> Vec<u8> {
    match value {
        ValueRef::Blob(bytes) | ValueRef::Text(bytes) => bytes.to_vec(),
        ValueRef::Integer(number) => number.to_string().into_bytes(),
        ValueRef::Real(number) => number.to_string().into_bytes(),
        ValueRef::Null => Vec::new(),
    }
}
