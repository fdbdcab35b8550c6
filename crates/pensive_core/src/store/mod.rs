//! Append-only fact store contracts and the SQLite implementation.
//!
//! # Responsibility
//! - Persist facts and resources, one storage transaction per write call.
//! - Answer point reads by entity id set in canonical order.
//! - Resolve the root entity and retract whole batches by timestamp.
//!
//! # Invariants
//! - Rows are only ever inserted here; the sole deletion path is
//!   `remove_at_timestamp`. Offline rewrites live in `maintenance`.
//! - A failed write leaves the store exactly as it was.
//! - Empty id sets never reach storage.
//! - Read-only stores reject every write before touching storage.

use crate::db::DbError;
use crate::model::{EntityId, Fact, FactRow, Resource, Timestamp};
use std::error::Error;
use std::fmt::{Display, Formatter};

mod sqlite;

pub(crate) use sqlite::load_rows_with_rowid;
pub use sqlite::SqliteFactStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Error raised by fact store operations.
#[derive(Debug)]
pub enum StoreError {
    /// Storage engine or file system failure. Fatal to the call.
    Db(DbError),
    /// A write was attempted on an overlay store.
    ReadOnly,
    /// A value could not be serialized for storage.
    Encode(serde_json::Error),
    /// A persisted row has a shape the store cannot interpret.
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::ReadOnly => write!(f, "store is read-only"),
            Self::Encode(err) => write!(f, "failed to encode value: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted row: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Encode(err) => Some(err),
            Self::ReadOnly | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encode(value)
    }
}

/// Number of rows removed by a timestamp retraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovalCounts {
    pub facts: usize,
    pub resources: usize,
}

impl RemovalCounts {
    pub fn is_empty(&self) -> bool {
        self.facts == 0 && self.resources == 0
    }
}

/// Durable, append-only log of facts and resources.
pub trait FactStore {
    /// Appends facts and resources in one transaction.
    fn write_batch(&mut self, facts: &[Fact], resources: &[Resource]) -> StoreResult<()>;

    /// Appends facts in one transaction.
    fn write_entities(&mut self, facts: &[Fact]) -> StoreResult<()> {
        self.write_batch(facts, &[])
    }

    /// Appends resources in one transaction.
    fn write_resources(&mut self, resources: &[Resource]) -> StoreResult<()> {
        self.write_batch(&[], resources)
    }

    /// Returns every fact whose entity id is in `ids`, in canonical order.
    fn read_entities(&self, ids: &[EntityId]) -> StoreResult<Vec<FactRow>>;

    /// Returns every resource whose entity id is in `ids`, in canonical order.
    fn read_resources(&self, ids: &[EntityId]) -> StoreResult<Vec<Resource>>;

    /// Entity owning the earliest `text` fact, tie-broken by entity id.
    fn root_entity(&self) -> StoreResult<Option<EntityId>>;

    /// Deletes every fact and resource written at exactly `timestamp`.
    fn remove_at_timestamp(&mut self, timestamp: Timestamp) -> StoreResult<RemovalCounts>;

    fn is_read_only(&self) -> bool;
}
