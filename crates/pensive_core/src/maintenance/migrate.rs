//! Per-fact rewrite of one store.

use super::{MaintenanceError, MaintenanceResult};
use crate::model::{Fact, FactRow, Value};
use crate::reducer::LINK_FIELDS;
use crate::store::{load_rows_with_rowid, SqliteFactStore};
use log::{error, info, warn};
use rusqlite::{params, Connection, TransactionBehavior};
use serde::Serialize;
use std::path::Path;
use std::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrateOptions {
    /// Commit the planned changes. `false` plans and reports only.
    pub apply: bool,
}

impl MigrateOptions {
    pub fn dry_run() -> Self {
        Self { apply: false }
    }

    pub fn apply() -> Self {
        Self { apply: true }
    }
}

/// One fact rewritten by a migration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactChange {
    pub before: Fact,
    pub after: Fact,
}

/// Outcome of one migration run, planned or applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub examined: usize,
    pub updated: Vec<FactChange>,
    pub deleted: Vec<Fact>,
    /// Rows left as they are because their value could not be decoded.
    pub skipped_malformed: usize,
    pub applied: bool,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Runs `transform` over every fact of `store`.
///
/// `None` deletes the fact, a different fact replaces it, an equal fact
/// leaves it alone. Each decision applies to exactly the row it was made
/// for, so rows sharing `(timestamp, entity_id, field_key)` are handled
/// independently.
///
/// A dry run only reads: it works on read-only stores and never takes the
/// write lock.
///
/// # Errors
/// - `Store(ReadOnly)` when applying to an overlay store.
/// - `Store(Db(..))` when storage fails; nothing is changed in that case.
pub fn migrate_facts<F>(
    store: &mut SqliteFactStore,
    transform: F,
    options: MigrateOptions,
) -> MaintenanceResult<MigrationReport>
where
    F: FnMut(&Fact) -> Option<Fact>,
{
    let started_at = Instant::now();
    let result = if options.apply {
        store
            .connection_mut()
            .map_err(MaintenanceError::from)
            .and_then(|conn| apply_migration(conn, transform))
    } else {
        plan_migration(store.connection(), transform)
    };

    match result {
        Ok(report) => {
            info!(
                "event=migrate_facts module=maintenance status=ok apply={} examined={} updated={} deleted={} skipped_malformed={} duration_ms={}",
                report.applied,
                report.examined,
                report.updated.len(),
                report.deleted.len(),
                report.skipped_malformed,
                started_at.elapsed().as_millis()
            );
            Ok(report)
        }
        Err(err) => {
            error!(
                "event=migrate_facts module=maintenance status=error apply={} error={}",
                options.apply, err
            );
            Err(err)
        }
    }
}

/// Opens the store file at `path` and runs [`migrate_facts`] on it.
pub fn migrate_store_file<F>(
    path: impl AsRef<Path>,
    transform: F,
    options: MigrateOptions,
) -> MaintenanceResult<MigrationReport>
where
    F: FnMut(&Fact) -> Option<Fact>,
{
    let path = path.as_ref();
    if !path.is_file() {
        return Err(MaintenanceError::StoreNotFound(path.to_path_buf()));
    }
    let mut store = SqliteFactStore::open(path)?;
    migrate_facts(&mut store, transform, options)
}

enum RowAction {
    Delete,
    Update(FactRow),
}

fn plan_migration<F>(conn: &Connection, transform: F) -> MaintenanceResult<MigrationReport>
where
    F: FnMut(&Fact) -> Option<Fact>,
{
    let rows = load_rows_with_rowid(conn)?;
    let (report, _) = plan_rows(&rows, transform)?;
    Ok(report)
}

fn apply_migration<F>(conn: &mut Connection, transform: F) -> MaintenanceResult<MigrationReport>
where
    F: FnMut(&Fact) -> Option<Fact>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let rows = load_rows_with_rowid(&tx)?;
    let (mut report, actions) = plan_rows(&rows, transform)?;

    {
        let mut delete = tx.prepare_cached("DELETE FROM entities WHERE rowid = ?1;")?;
        let mut update = tx.prepare_cached(
            "UPDATE entities
             SET timestamp = ?1, uuid = ?2, key = ?3, value = ?4
             WHERE rowid = ?5;",
        )?;

        for (rowid, action) in &actions {
            match action {
                RowAction::Delete => {
                    delete.execute([rowid])?;
                }
                RowAction::Update(after) => {
                    update.execute(params![
                        after.timestamp,
                        after.entity_id,
                        after.field_key,
                        after.encoded_value,
                        rowid,
                    ])?;
                }
            }
        }
    }

    tx.commit()?;
    report.applied = true;
    Ok(report)
}

/// Decides the fate of every row without touching storage.
fn plan_rows<F>(
    rows: &[(i64, FactRow)],
    mut transform: F,
) -> MaintenanceResult<(MigrationReport, Vec<(i64, RowAction)>)>
where
    F: FnMut(&Fact) -> Option<Fact>,
{
    let mut report = MigrationReport {
        examined: rows.len(),
        ..MigrationReport::default()
    };
    let mut actions = Vec::new();

    for (rowid, row) in rows {
        let before = match row.decode() {
            Ok(fact) => fact,
            Err(_) => {
                warn!(
                    "event=migrate_fact module=maintenance status=skipped timestamp={} field={} error=malformed_value",
                    row.timestamp, row.field_key
                );
                report.skipped_malformed += 1;
                continue;
            }
        };

        match transform(&before) {
            None => {
                info!(
                    "event=migrate_fact module=maintenance status=planned action=delete timestamp={} field={}",
                    row.timestamp, row.field_key
                );
                actions.push((*rowid, RowAction::Delete));
                report.deleted.push(before);
            }
            Some(after) if after != before => {
                let encoded = FactRow::encode(&after)?;
                info!(
                    "event=migrate_fact module=maintenance status=planned action=update timestamp={} field={} new_timestamp={} new_field={}",
                    row.timestamp, row.field_key, encoded.timestamp, encoded.field_key
                );
                actions.push((*rowid, RowAction::Update(encoded)));
                report.updated.push(FactChange { before, after });
            }
            Some(_) => {}
        }
    }
    Ok((report, actions))
}

/// Rewrites link ids written with dashes into their undashed form.
///
/// Applies to `inbound`/`outbound` facts only. Each op keeps its leading op
/// character and loses every later `-`. The op list is collapsed: empty
/// becomes `null`, a single op becomes that string.
pub fn normalize_link_ids(fact: &Fact) -> Option<Fact> {
    if !LINK_FIELDS.contains(&fact.field_key.as_str()) {
        return Some(fact.clone());
    }

    let ops = match &fact.value {
        Value::String(op) => vec![Value::String(op.clone())],
        Value::Array(ops) => ops.clone(),
        _ => return Some(fact.clone()),
    };
    let mut ops: Vec<Value> = ops
        .into_iter()
        .map(|op| match op {
            Value::String(op) => Value::String(strip_id_dashes(&op)),
            other => other,
        })
        .collect();

    let value = match ops.len() {
        0 => Value::Null,
        1 => ops.remove(0),
        _ => Value::Array(ops),
    };
    Some(Fact {
        value,
        ..fact.clone()
    })
}

fn strip_id_dashes(op: &str) -> String {
    let mut chars = op.chars();
    match chars.next() {
        Some(first) => std::iter::once(first)
            .chain(chars.filter(|c| *c != '-'))
            .collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::normalize_link_ids;
    use crate::model::Fact;
    use serde_json::json;

    fn link(value: serde_json::Value) -> Fact {
        Fact::new(1, "a", "outbound", value)
    }

    #[test]
    fn dashed_ids_lose_dashes_but_keep_op_character() {
        let fact = link(json!("-1234-abcd"));
        assert_eq!(normalize_link_ids(&fact).unwrap().value, json!("-1234abcd"));

        let fact = link(json!(["+ab-cd", ">ef-01"]));
        assert_eq!(
            normalize_link_ids(&fact).unwrap().value,
            json!(["+abcd", ">ef01"])
        );
    }

    #[test]
    fn op_lists_collapse() {
        assert_eq!(normalize_link_ids(&link(json!([]))).unwrap().value, json!(null));
        assert_eq!(
            normalize_link_ids(&link(json!(["+a-b"]))).unwrap().value,
            json!("+ab")
        );
    }

    #[test]
    fn other_fields_and_shapes_are_untouched() {
        let text = Fact::new(1, "a", "text", json!("well-known"));
        assert_eq!(normalize_link_ids(&text), Some(text.clone()));

        let odd = link(json!({"op": "+a-b"}));
        assert_eq!(normalize_link_ids(&odd), Some(odd.clone()));

        let clean = Fact::new(1, "a", "inbound", json!("+abcd"));
        assert_eq!(normalize_link_ids(&clean), Some(clean.clone()));
    }
}
