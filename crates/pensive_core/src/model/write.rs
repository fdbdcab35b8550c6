//! Nested read/write shapes exchanged with callers.

use super::fact::{EntityId, Fact, Resource, Timestamp, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field key to (reduced or raw) value.
pub type FieldMap = BTreeMap<String, Value>;

/// Entity id to its fields.
pub type EntityMap = BTreeMap<EntityId, FieldMap>;

/// Entity id to resource bytes.
pub type ResourceMap = BTreeMap<EntityId, Vec<u8>>;

/// One logical write batch. Every fact and resource it produces shares
/// `timestamp`, which is what makes the batch retractable as a unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub timestamp: Timestamp,
    #[serde(default)]
    pub entities: EntityMap,
    #[serde(default)]
    pub resources: ResourceMap,
}

impl WriteRequest {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    /// Adds one field write to the batch, replacing an earlier write of the
    /// same field in this batch.
    pub fn set(
        mut self,
        entity_id: impl Into<EntityId>,
        field_key: impl Into<String>,
        value: Value,
    ) -> Self {
        self.entities
            .entry(entity_id.into())
            .or_default()
            .insert(field_key.into(), value);
        self
    }

    pub fn resource(mut self, entity_id: impl Into<EntityId>, data: Vec<u8>) -> Self {
        self.resources.insert(entity_id.into(), data);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entities.values().all(|fields| fields.is_empty()) && self.resources.is_empty()
    }

    /// Flattens the nested maps into stamped records.
    pub fn to_records(&self) -> (Vec<Fact>, Vec<Resource>) {
        flatten_batch(self.timestamp, &self.entities, &self.resources)
    }
}

/// Stamps nested entity and resource maps with one batch timestamp.
pub fn flatten_batch(
    timestamp: Timestamp,
    entities: &EntityMap,
    resources: &ResourceMap,
) -> (Vec<Fact>, Vec<Resource>) {
    let facts = entities
        .iter()
        .flat_map(|(entity_id, fields)| {
            fields.iter().map(move |(field_key, value)| {
                Fact::new(timestamp, entity_id.clone(), field_key.clone(), value.clone())
            })
        })
        .collect();
    let resources = resources
        .iter()
        .map(|(entity_id, data)| Resource::new(timestamp, entity_id.clone(), data.clone()))
        .collect();
    (facts, resources)
}
