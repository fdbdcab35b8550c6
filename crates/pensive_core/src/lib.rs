//! Persistence and merge engine for Pensive notes.
//! Entities are folded on read from an append-only log of timestamped facts.

pub mod client;
pub mod config;
pub mod db;
pub mod logging;
pub mod maintenance;
pub mod model;
pub mod reducer;
pub mod store;

pub use client::{Client, EntityRead};
pub use config::{ConfigError, CoreConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingConfig, LoggingError};
pub use maintenance::{
    migrate_facts, migrate_store_file, normalize_link_ids, undo_batch, MaintenanceError,
    MigrateOptions, MigrationReport, UndoReport,
};
pub use model::{
    EntityId, EntityMap, Fact, FieldMap, MalformedValueError, Resource, ResourceMap, Timestamp,
    Value, WriteRequest,
};
pub use reducer::{ArrayReducer, Reducer, ReducerRegistry, Replace};
pub use store::{FactStore, RemovalCounts, SqliteFactStore, StoreError, StoreResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
