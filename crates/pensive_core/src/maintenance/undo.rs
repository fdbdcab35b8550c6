//! Batch retraction by timestamp.

use super::MaintenanceResult;
use crate::model::Timestamp;
use crate::store::FactStore;
use log::info;
use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UndoReport {
    pub timestamp: Timestamp,
    pub facts: usize,
    pub resources: usize,
}

impl UndoReport {
    /// `true` when nothing was written at the timestamp.
    pub fn is_empty(&self) -> bool {
        self.facts == 0 && self.resources == 0
    }
}

/// Removes every fact and resource written at exactly `timestamp`.
///
/// Retracting a timestamp that holds nothing is a no-op.
pub fn undo_batch<S: FactStore>(
    store: &mut S,
    timestamp: Timestamp,
) -> MaintenanceResult<UndoReport> {
    let removed = store.remove_at_timestamp(timestamp)?;
    let report = UndoReport {
        timestamp,
        facts: removed.facts,
        resources: removed.resources,
    };
    info!(
        "event=undo_batch module=maintenance status=ok timestamp={} facts={} resources={} noop={}",
        timestamp,
        report.facts,
        report.resources,
        report.is_empty()
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::undo_batch;
    use crate::model::{Fact, Resource};
    use crate::store::{FactStore, SqliteFactStore};
    use serde_json::json;

    #[test]
    fn undo_removes_only_the_batch_timestamp() {
        let mut store = SqliteFactStore::open_in_memory().unwrap();
        store
            .write_batch(
                &[
                    Fact::new(10, "a", "text", json!("keep")),
                    Fact::new(20, "a", "text", json!("drop")),
                ],
                &[Resource::new(20, "a", vec![1, 2])],
            )
            .unwrap();

        let report = undo_batch(&mut store, 20).unwrap();
        assert_eq!((report.facts, report.resources), (1, 1));
        assert_eq!(store.fact_count().unwrap(), 1);
        assert_eq!(store.resource_count().unwrap(), 0);
    }

    #[test]
    fn undo_of_unknown_timestamp_is_noop() {
        let mut store = SqliteFactStore::open_in_memory().unwrap();
        assert!(undo_batch(&mut store, 99).unwrap().is_empty());
    }
}
