//! Resource-to-store mapping index.
//!
//! Maps every base resource id to the root resource owning its store object
//! and to that object's id. Long-running transactions stage additions and
//! removals that only they can see until commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

use quire_types::{ResourceId, TxId, TxScope};

use crate::error::{StoreError, StoreResult};
use crate::layout;

/// Where a resource is stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMapping {
    pub resource_id: ResourceId,
    pub root_id: ResourceId,
    pub object_id: String,
}

impl StoreMapping {
    pub fn new(resource_id: &ResourceId, root_id: &ResourceId) -> Self {
        Self {
            resource_id: resource_id.as_base(),
            root_id: root_id.as_base(),
            object_id: layout::object_id_for(root_id),
        }
    }
}

/// Transaction-aware resource-to-store mapping.
///
/// All lookups are by base id: descriptions, ACLs and mementos live in the
/// same store object as the resource they qualify.
pub trait MappingIndex: Send + Sync {
    /// Mapping visible to `tx` (or committed state when `tx` is `None`).
    fn get(&self, tx: Option<&TxScope>, id: &ResourceId) -> StoreResult<Option<StoreMapping>>;

    /// Record (or replace) the mapping for `mapping.resource_id`.
    fn add(&self, tx: &TxScope, mapping: StoreMapping) -> StoreResult<()>;

    /// Remove the mapping for `id`.
    fn remove(&self, tx: &TxScope, id: &ResourceId) -> StoreResult<()>;

    /// Merge `tx`'s staged changes into committed state.
    fn commit(&self, tx: &TxScope) -> StoreResult<()>;

    /// Drop `tx`'s staged changes.
    fn rollback(&self, tx: &TxScope) -> StoreResult<()>;

    /// Remove every mapping, committed and staged.
    fn reset(&self) -> StoreResult<()>;

    /// Resolve a mapping or fail with `NotFound`.
    fn require(&self, tx: Option<&TxScope>, id: &ResourceId) -> StoreResult<StoreMapping> {
        self.get(tx, id)?
            .ok_or_else(|| StoreError::NotFound(format!("no store mapping for {}", id.as_base())))
    }
}

#[derive(Debug, Default)]
struct MappingState {
    committed: HashMap<ResourceId, StoreMapping>,
    /// `None` marks a staged removal.
    pending: HashMap<TxId, BTreeMap<ResourceId, Option<StoreMapping>>>,
}

/// In-memory [`MappingIndex`].
#[derive(Debug, Default)]
pub struct InMemoryMappingIndex {
    state: RwLock<MappingState>,
}

impl InMemoryMappingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed mappings.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.state.read().map_err(StoreError::poisoned)?.committed.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl MappingIndex for InMemoryMappingIndex {
    fn get(&self, tx: Option<&TxScope>, id: &ResourceId) -> StoreResult<Option<StoreMapping>> {
        let state = self.state.read().map_err(StoreError::poisoned)?;
        let key = id.as_base();
        if let Some(staged) = tx.and_then(|tx| state.pending.get(&tx.id)).and_then(|p| p.get(&key)) {
            return Ok(staged.clone());
        }
        Ok(state.committed.get(&key).cloned())
    }

    fn add(&self, tx: &TxScope, mapping: StoreMapping) -> StoreResult<()> {
        let mut state = self.state.write().map_err(StoreError::poisoned)?;
        let key = mapping.resource_id.as_base();
        if tx.short_lived {
            state.committed.insert(key, mapping);
        } else {
            state.pending.entry(tx.id).or_default().insert(key, Some(mapping));
        }
        Ok(())
    }

    fn remove(&self, tx: &TxScope, id: &ResourceId) -> StoreResult<()> {
        let mut state = self.state.write().map_err(StoreError::poisoned)?;
        let key = id.as_base();
        if tx.short_lived {
            state.committed.remove(&key);
        } else {
            state.pending.entry(tx.id).or_default().insert(key, None);
        }
        Ok(())
    }

    fn commit(&self, tx: &TxScope) -> StoreResult<()> {
        let mut state = self.state.write().map_err(StoreError::poisoned)?;
        let Some(staged) = state.pending.remove(&tx.id) else {
            return Ok(());
        };
        let count = staged.len();
        for (key, change) in staged {
            match change {
                Some(mapping) => {
                    state.committed.insert(key, mapping);
                }
                None => {
                    state.committed.remove(&key);
                }
            }
        }
        debug!(tx = %tx.id, count, "mapping changes committed");
        Ok(())
    }

    fn rollback(&self, tx: &TxScope) -> StoreResult<()> {
        let mut state = self.state.write().map_err(StoreError::poisoned)?;
        state.pending.remove(&tx.id);
        Ok(())
    }

    fn reset(&self) -> StoreResult<()> {
        let mut state = self.state.write().map_err(StoreError::poisoned)?;
        state.committed.clear();
        state.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    #[test]
    fn staged_mapping_visible_only_to_its_tx() {
        let index = InMemoryMappingIndex::new();
        let tx = TxScope::long_running(TxId::new());
        index.add(&tx, StoreMapping::new(&id("ag/x"), &id("ag"))).unwrap();

        assert_eq!(index.get(Some(&tx), &id("ag/x")).unwrap().unwrap().root_id, id("ag"));
        assert!(index.get(None, &id("ag/x")).unwrap().is_none());
        let other = TxScope::long_running(TxId::new());
        assert!(index.get(Some(&other), &id("ag/x")).unwrap().is_none());

        index.commit(&tx).unwrap();
        assert!(index.get(None, &id("ag/x")).unwrap().is_some());
    }

    #[test]
    fn qualified_ids_resolve_through_base() {
        let index = InMemoryMappingIndex::new();
        let tx = TxScope::short_lived(TxId::new());
        index.add(&tx, StoreMapping::new(&id("bin"), &id("bin"))).unwrap();
        let mapping = index.require(None, &id("bin/fcr:metadata")).unwrap();
        assert_eq!(mapping.object_id, "info:fedora/bin");
    }

    #[test]
    fn staged_removal_hides_committed_mapping() {
        let index = InMemoryMappingIndex::new();
        index.add(&TxScope::short_lived(TxId::new()), StoreMapping::new(&id("a"), &id("a"))).unwrap();
        let tx = TxScope::long_running(TxId::new());
        index.remove(&tx, &id("a")).unwrap();
        assert!(index.get(Some(&tx), &id("a")).unwrap().is_none());
        assert!(index.get(None, &id("a")).unwrap().is_some());

        index.rollback(&tx).unwrap();
        assert!(index.get(Some(&tx), &id("a")).unwrap().is_some());
    }

    #[test]
    fn require_reports_not_found() {
        let index = InMemoryMappingIndex::new();
        assert!(matches!(index.require(None, &id("missing")), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn reset_clears_everything() {
        let index = InMemoryMappingIndex::new();
        let tx = TxScope::long_running(TxId::new());
        index.add(&TxScope::short_lived(TxId::new()), StoreMapping::new(&id("a"), &id("a"))).unwrap();
        index.add(&tx, StoreMapping::new(&id("b"), &id("b"))).unwrap();
        index.reset().unwrap();
        assert!(index.is_empty().unwrap());
        assert!(index.get(Some(&tx), &id("b")).unwrap().is_none());
    }
}
