//! Collaborators notified by the kernel but owned elsewhere.
//!
//! Search indexing and event delivery are best-effort: their failures are
//! logged and never undo a transaction.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use quire_store::ResourceHeaders;
use quire_types::{Instant, ResourceId, TxId, TxScope};

use crate::error::{KernelError, KernelResult};

/// Kind of change reported for a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventOperation {
    Create,
    Update,
    Delete,
    Purge,
}

impl fmt::Display for EventOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Purge => "purge",
        };
        f.write_str(name)
    }
}

/// A change to one resource, as delivered after commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceEvent {
    pub tx: TxId,
    pub id: ResourceId,
    pub operations: BTreeSet<EventOperation>,
    pub principal: String,
    pub at: Instant,
}

impl ResourceEvent {
    pub fn new(tx: TxId, id: ResourceId, operation: EventOperation, principal: &str, at: Instant) -> Self {
        Self {
            tx,
            id,
            operations: BTreeSet::from([operation]),
            principal: principal.to_string(),
            at,
        }
    }
}

/// Collects events during a transaction and delivers them on commit.
pub trait EventAccumulator: Send + Sync {
    fn record(&self, event: ResourceEvent) -> KernelResult<()>;

    /// Deliver `tx`'s events.
    fn emit(&self, tx: TxId) -> KernelResult<()>;

    /// Drop `tx`'s events undelivered.
    fn clear(&self, tx: TxId) -> KernelResult<()>;
}

/// Full-text or triple-store search index fed from committed resources.
pub trait SearchIndex: Send + Sync {
    fn add_update(&self, tx: &TxScope, headers: &ResourceHeaders) -> KernelResult<()>;

    fn remove(&self, tx: &TxScope, id: &ResourceId) -> KernelResult<()>;

    fn commit(&self, tx: &TxScope) -> KernelResult<()>;

    fn rollback(&self, tx: &TxScope) -> KernelResult<()>;
}

/// Cache of effective ACLs kept by the authorization layer.
pub trait AuthorizationCache: Send + Sync {
    /// Called whenever the ACL of `id` is written or removed.
    fn invalidate(&self, id: &ResourceId);
}

pub struct NoOpSearchIndex;

impl SearchIndex for NoOpSearchIndex {
    fn add_update(&self, _tx: &TxScope, _headers: &ResourceHeaders) -> KernelResult<()> {
        Ok(())
    }

    fn remove(&self, _tx: &TxScope, _id: &ResourceId) -> KernelResult<()> {
        Ok(())
    }

    fn commit(&self, _tx: &TxScope) -> KernelResult<()> {
        Ok(())
    }

    fn rollback(&self, _tx: &TxScope) -> KernelResult<()> {
        Ok(())
    }
}

pub struct NoOpAuthorizationCache;

impl AuthorizationCache for NoOpAuthorizationCache {
    fn invalidate(&self, _id: &ResourceId) {}
}

#[derive(Debug, Default)]
struct EventState {
    pending: HashMap<TxId, Vec<ResourceEvent>>,
    emitted: Vec<ResourceEvent>,
}

/// Accumulator that keeps delivered events in memory.
///
/// Events for the same resource within one transaction are merged into a
/// single event carrying every operation, stamped with the latest instant.
#[derive(Debug, Default)]
pub struct InMemoryEventAccumulator {
    state: Mutex<EventState>,
}

impl InMemoryEventAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event delivered so far, in delivery order.
    pub fn emitted(&self) -> KernelResult<Vec<ResourceEvent>> {
        Ok(self.state.lock().map_err(KernelError::poisoned)?.emitted.clone())
    }

    pub fn pending_len(&self, tx: TxId) -> KernelResult<usize> {
        let state = self.state.lock().map_err(KernelError::poisoned)?;
        Ok(state.pending.get(&tx).map_or(0, Vec::len))
    }
}

impl EventAccumulator for InMemoryEventAccumulator {
    fn record(&self, event: ResourceEvent) -> KernelResult<()> {
        let mut state = self.state.lock().map_err(KernelError::poisoned)?;
        state.pending.entry(event.tx).or_default().push(event);
        Ok(())
    }

    fn emit(&self, tx: TxId) -> KernelResult<()> {
        let mut state = self.state.lock().map_err(KernelError::poisoned)?;
        let Some(events) = state.pending.remove(&tx) else {
            return Ok(());
        };
        let mut merged: Vec<ResourceEvent> = Vec::new();
        for event in events {
            match merged.iter_mut().find(|m| m.id == event.id) {
                Some(existing) => {
                    existing.operations.extend(event.operations);
                    existing.at = existing.at.max(event.at);
                    existing.principal = event.principal;
                }
                None => merged.push(event),
            }
        }
        state.emitted.extend(merged);
        Ok(())
    }

    fn clear(&self, tx: TxId) -> KernelResult<()> {
        let mut state = self.state.lock().map_err(KernelError::poisoned)?;
        state.pending.remove(&tx);
        Ok(())
    }
}

/// The external services a repository reports to.
#[derive(Clone)]
pub struct Collaborators {
    pub search: Arc<dyn SearchIndex>,
    pub events: Arc<dyn EventAccumulator>,
    pub authorization: Arc<dyn AuthorizationCache>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            search: Arc::new(NoOpSearchIndex),
            events: Arc::new(InMemoryEventAccumulator::new()),
            authorization: Arc::new(NoOpAuthorizationCache),
        }
    }
}
