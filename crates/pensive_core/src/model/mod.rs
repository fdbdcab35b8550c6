//! Fact log domain model.
//!
//! # Responsibility
//! - Define the immutable records written to a store (`Fact`, `Resource`).
//! - Define the stored-row shape whose derived ordering is the canonical
//!   merge order.
//! - Define the nested map shapes exchanged with callers.
//!
//! # Invariants
//! - Facts and resources are never mutated once written.
//! - Entities are derived views; nothing here stores an entity.

pub mod fact;
pub mod write;

pub use fact::{
    new_entity_id, now_millis, EntityId, Fact, FactRow, MalformedValueError, Resource, Timestamp,
    Value,
};
pub use write::{flatten_batch, EntityMap, FieldMap, ResourceMap, WriteRequest};
