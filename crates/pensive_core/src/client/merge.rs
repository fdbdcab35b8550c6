//! Canonical multi-store merge and per-field fold.

use crate::model::{EntityMap, FactRow, MalformedValueError, Resource, ResourceMap, Value};
use crate::reducer::ReducerRegistry;
use log::warn;
use std::collections::BTreeMap;

/// Reduced entities plus the fields whose fold failed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityRead {
    pub entities: EntityMap,
    /// One entry per `(entity_id, field_key)` that was dropped from
    /// `entities` because a stored value could not be decoded.
    pub malformed: Vec<MalformedValueError>,
}

/// Concatenates per-store rows (root first) and sorts them canonically.
///
/// Identical rows present in several stores are all kept.
pub(crate) fn merge_rows(per_store: Vec<Vec<FactRow>>) -> Vec<FactRow> {
    let mut rows: Vec<FactRow> = per_store.into_iter().flatten().collect();
    rows.sort();
    rows
}

/// Folds canonically ordered rows per `(entity_id, field_key)`.
///
/// The first undecodable value poisons its own field; later values of that
/// field are ignored and the field is reported instead of returned.
pub(crate) fn fold_rows(rows: &[FactRow], reducers: &ReducerRegistry) -> EntityRead {
    let mut fields: BTreeMap<(&str, &str), Result<Value, MalformedValueError>> = BTreeMap::new();

    for row in rows {
        let slot = fields
            .entry((row.entity_id.as_str(), row.field_key.as_str()))
            .or_insert(Ok(Value::Null));
        if slot.is_err() {
            continue;
        }

        match row.decode_value() {
            Ok(next) => {
                if let Ok(current) = slot {
                    let reducer = reducers.resolve(&row.field_key);
                    *current = reducer.reduce(std::mem::take(current), &next);
                }
            }
            Err(err) => {
                warn!(
                    "event=fold_field module=client status=error timestamp={} field={} error=malformed_value",
                    row.timestamp, row.field_key
                );
                *slot = Err(err);
            }
        }
    }

    let mut read = EntityRead::default();
    for ((entity_id, field_key), state) in fields {
        match state {
            Ok(value) => {
                read.entities
                    .entry(entity_id.to_string())
                    .or_default()
                    .insert(field_key.to_string(), value);
            }
            Err(err) => read.malformed.push(err),
        }
    }
    read
}

/// Last resource per entity id in canonical order.
pub(crate) fn latest_resources(per_store: Vec<Vec<Resource>>) -> ResourceMap {
    let mut resources: Vec<Resource> = per_store.into_iter().flatten().collect();
    resources.sort();

    let mut latest = ResourceMap::new();
    for resource in resources {
        latest.insert(resource.entity_id, resource.data);
    }
    latest
}
