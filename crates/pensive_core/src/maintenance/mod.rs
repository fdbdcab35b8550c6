//! Offline maintenance on a single store: fact rewrites and batch undo.
//!
//! # Responsibility
//! - Rewrite or delete stored facts through a per-fact transform.
//! - Retract whole write batches by timestamp.
//!
//! # Invariants
//! - One invocation is one storage transaction: applied fully or not at all.
//! - A dry run never writes.
//! - Rows whose value cannot be decoded are never rewritten.

use crate::db::DbError;
use crate::store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

mod migrate;
mod undo;

pub use migrate::{
    migrate_facts, migrate_store_file, normalize_link_ids, FactChange, MigrateOptions,
    MigrationReport,
};
pub use undo::{undo_batch, UndoReport};

pub type MaintenanceResult<T> = Result<T, MaintenanceError>;

/// Error raised by maintenance operations. The store is left untouched.
#[derive(Debug)]
pub enum MaintenanceError {
    Store(StoreError),
    /// The store file to maintain does not exist.
    StoreNotFound(PathBuf),
}

impl Display for MaintenanceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "maintenance aborted: {err}"),
            Self::StoreNotFound(path) => write!(f, "store not found: {}", path.display()),
        }
    }
}

impl Error for MaintenanceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::StoreNotFound(_) => None,
        }
    }
}

impl From<StoreError> for MaintenanceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<DbError> for MaintenanceError {
    fn from(value: DbError) -> Self {
        Self::Store(StoreError::Db(value))
    }
}

impl From<rusqlite::Error> for MaintenanceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(StoreError::from(value))
    }
}

impl From<serde_json::Error> for MaintenanceError {
    fn from(value: serde_json::Error) -> Self {
        Self::Store(StoreError::Encode(value))
    }
}
