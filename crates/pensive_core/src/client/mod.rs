//! Merge orchestrator over one writable root store and read-only overlays.
//!
//! # Responsibility
//! - Route every write to the root store as one transaction.
//! - Merge reads across all stores and fold each field with its reducer.
//! - Resolve (and lazily create) the root entity.
//!
//! # Invariants
//! - Overlays are never written through the client.
//! - Read results depend only on the multiset of stored rows, never on the
//!   order stores were listed in or rows were inserted.
//! - Entities without facts are absent from read results, not errors.

use crate::config::CoreConfig;
use crate::model::{
    flatten_batch, new_entity_id, now_millis, EntityId, EntityMap, Fact, FieldMap, ResourceMap,
    Timestamp, Value, WriteRequest,
};
use crate::reducer::ReducerRegistry;
use crate::store::{FactStore, RemovalCounts, SqliteFactStore, StoreResult};
use log::{info, warn};

mod merge;

pub use merge::EntityRead;

/// Text written to a freshly created root entity.
pub const ROOT_ENTITY_TEXT: &str = "Root";

/// Reads and writes entities across a root store and overlay stores.
pub struct Client<S: FactStore = SqliteFactStore> {
    root: S,
    overlays: Vec<S>,
    reducers: ReducerRegistry,
}

impl<S: FactStore> Client<S> {
    /// Overlays are listed highest priority first.
    pub fn new(root: S, overlays: Vec<S>, reducers: ReducerRegistry) -> Self {
        Self {
            root,
            overlays,
            reducers,
        }
    }

    pub fn root_store(&self) -> &S {
        &self.root
    }

    pub fn root_store_mut(&mut self) -> &mut S {
        &mut self.root
    }

    pub fn overlays(&self) -> &[S] {
        &self.overlays
    }

    pub fn reducers(&self) -> &ReducerRegistry {
        &self.reducers
    }

    /// All stores in priority order, root first.
    pub fn stores(&self) -> impl Iterator<Item = &S> {
        std::iter::once(&self.root).chain(self.overlays.iter())
    }

    /// Root entity recorded in the root store, if any.
    pub fn find_root_entity(&self) -> StoreResult<Option<EntityId>> {
        self.root.root_entity()
    }

    /// Returns the root entity, creating `{text: "Root"}` when none exists.
    ///
    /// Two processes racing on an empty store can both create one; the
    /// earliest `text` fact wins on every later resolution.
    pub fn root_entity(&mut self) -> StoreResult<EntityId> {
        if let Some(root) = self.root.root_entity()? {
            return Ok(root);
        }

        let root = new_entity_id();
        let fact = Fact::new(
            now_millis(),
            root.clone(),
            "text",
            Value::String(ROOT_ENTITY_TEXT.to_string()),
        );
        self.root.write_entities(std::slice::from_ref(&fact))?;
        info!(
            "event=root_create module=client status=ok timestamp={}",
            fact.timestamp
        );
        Ok(root)
    }

    /// Reduced fields for `ids`. Malformed fields are dropped and logged.
    pub fn read_entities(&self, ids: &[EntityId]) -> StoreResult<EntityMap> {
        Ok(self.read_entities_detailed(ids)?.entities)
    }

    /// Reduced fields for `ids` plus every field dropped as malformed.
    pub fn read_entities_detailed(&self, ids: &[EntityId]) -> StoreResult<EntityRead> {
        if ids.is_empty() {
            return Ok(EntityRead::default());
        }

        let per_store = self
            .stores()
            .map(|store| store.read_entities(ids))
            .collect::<StoreResult<Vec<_>>>()?;
        let rows = merge::merge_rows(per_store);
        let read = merge::fold_rows(&rows, &self.reducers);

        if !read.malformed.is_empty() {
            warn!(
                "event=read_entities module=client status=degraded ids={} rows={} malformed_fields={}",
                ids.len(),
                rows.len(),
                read.malformed.len()
            );
        }
        Ok(read)
    }

    /// Reduced fields of one entity; empty when it has no facts.
    pub fn read_entity(&self, id: &str) -> StoreResult<FieldMap> {
        let mut entities = self.read_entities(&[id.to_string()])?;
        Ok(entities.remove(id).unwrap_or_default())
    }

    /// Latest resource bytes per id across all stores.
    pub fn read_resources(&self, ids: &[EntityId]) -> StoreResult<ResourceMap> {
        if ids.is_empty() {
            return Ok(ResourceMap::new());
        }

        let per_store = self
            .stores()
            .map(|store| store.read_resources(ids))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(merge::latest_resources(per_store))
    }

    /// Writes one batch stamped with `timestamp` to the root store.
    pub fn write(
        &mut self,
        timestamp: Timestamp,
        entities: &EntityMap,
        resources: &ResourceMap,
    ) -> StoreResult<()> {
        let (facts, resources) = flatten_batch(timestamp, entities, resources);
        self.root.write_batch(&facts, &resources)
    }

    /// Writes a prepared batch to the root store in one transaction.
    pub fn apply(&mut self, request: &WriteRequest) -> StoreResult<()> {
        self.write(request.timestamp, &request.entities, &request.resources)
    }

    /// Retracts the root-store batch written at `timestamp`.
    pub fn undo(&mut self, timestamp: Timestamp) -> StoreResult<RemovalCounts> {
        self.root.remove_at_timestamp(timestamp)
    }
}

impl Client<SqliteFactStore> {
    /// Opens the configured root store read-write and overlays read-only.
    pub fn open(config: &CoreConfig, reducers: ReducerRegistry) -> StoreResult<Self> {
        let busy_timeout = config.busy_timeout();
        let root = SqliteFactStore::open_with_timeout(&config.root_store, busy_timeout)?;
        let overlays = config
            .overlay_stores
            .iter()
            .map(|path| SqliteFactStore::open_overlay(path, busy_timeout))
            .collect::<StoreResult<Vec<_>>>()?;

        info!(
            "event=client_open module=client status=ok overlays={}",
            overlays.len()
        );
        Ok(Self::new(root, overlays, reducers))
    }
}
