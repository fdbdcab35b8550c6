//! Fact and resource records.
//!
//! # Invariants
//! - `FactRow` field order is the canonical order
//!   `(timestamp, entity_id, field_key, encoded_value)`; the derived `Ord`
//!   relies on it, so fields must not be reordered.
//! - Values are encoded with `serde_json` compact output. Object keys are
//!   emitted sorted, so equal values always encode to equal text.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Milliseconds since the unix epoch, supplied by the writer.
pub type Timestamp = i64;

/// Entity identifier.
///
/// Kept as plain text: stores written by older builds hold both dashed and
/// undashed UUID forms, and reads must accept either.
pub type EntityId = String;

/// JSON-shaped field value.
pub type Value = serde_json::Value;

/// Generates a fresh entity id (UUID v4, undashed form).
///
/// Undashed is the canonical form link ops are normalized to.
pub fn new_entity_id() -> EntityId {
    Uuid::new_v4().simple().to_string()
}

/// Current wall-clock time in epoch milliseconds.
///
/// Clamps to `0` for clocks set before the epoch.
pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|elapsed| Timestamp::try_from(elapsed.as_millis()).ok())
        .unwrap_or(0)
}

/// One timestamped write of one field on one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fact {
    pub timestamp: Timestamp,
    pub entity_id: EntityId,
    pub field_key: String,
    pub value: Value,
}

impl Fact {
    pub fn new(
        timestamp: Timestamp,
        entity_id: impl Into<EntityId>,
        field_key: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            timestamp,
            entity_id: entity_id.into(),
            field_key: field_key.into(),
            value,
        }
    }

    /// Encodes `value` into its stored text form.
    pub fn encode_value(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.value)
    }
}

/// Immutable blob attached to an entity.
///
/// Ordering follows `(timestamp, entity_id, data)`, which is the canonical
/// order used when several stores hold resources for one id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub timestamp: Timestamp,
    pub entity_id: EntityId,
    pub data: Vec<u8>,
}

impl Resource {
    pub fn new(timestamp: Timestamp, entity_id: impl Into<EntityId>, data: Vec<u8>) -> Self {
        Self {
            timestamp,
            entity_id: entity_id.into(),
            data,
        }
    }
}

/// A fact as persisted, with its value still encoded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FactRow {
    pub timestamp: Timestamp,
    pub entity_id: EntityId,
    pub field_key: String,
    pub encoded_value: String,
}

impl FactRow {
    /// Builds the stored form of a fact.
    pub fn encode(fact: &Fact) -> Result<Self, serde_json::Error> {
        Ok(Self {
            timestamp: fact.timestamp,
            entity_id: fact.entity_id.clone(),
            field_key: fact.field_key.clone(),
            encoded_value: fact.encode_value()?,
        })
    }

    pub fn decode_value(&self) -> Result<Value, MalformedValueError> {
        serde_json::from_str(&self.encoded_value).map_err(|err| MalformedValueError {
            timestamp: self.timestamp,
            entity_id: self.entity_id.clone(),
            field_key: self.field_key.clone(),
            message: err.to_string(),
        })
    }

    pub fn decode(&self) -> Result<Fact, MalformedValueError> {
        Ok(Fact {
            timestamp: self.timestamp,
            entity_id: self.entity_id.clone(),
            field_key: self.field_key.clone(),
            value: self.decode_value()?,
        })
    }
}

/// A stored value that could not be decoded.
///
/// Scoped to a single `(entity_id, field_key)` fold; other fields of the
/// same read are unaffected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedValueError {
    pub timestamp: Timestamp,
    pub entity_id: EntityId,
    pub field_key: String,
    pub message: String,
}

impl Display for MalformedValueError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "malformed value for `{}`.`{}` at {}: {}",
            self.entity_id, self.field_key, self.timestamp, self.message
        )
    }
}

impl Error for MalformedValueError {}
