use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant as MonoInstant};

use tracing::debug;

use quire_types::{ResourceId, TxId};

use crate::error::{KernelError, KernelResult};

/// Exclusive per-resource locks held by transactions until they end.
///
/// Locks are keyed by base id and are reentrant for the owning
/// transaction. A request for several ids is granted all at once or not at
/// all, so a waiting transaction never holds a partial set.
#[derive(Debug, Default)]
pub struct ResourceLockManager {
    held: Mutex<HashMap<ResourceId, TxId>>,
    released: Condvar,
}

impl ResourceLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every id in `ids` for `tx`, waiting up to `wait` for other
    /// transactions to release them.
    pub fn acquire(&self, tx: TxId, ids: &[ResourceId], wait: Duration) -> KernelResult<()> {
        let ids: Vec<ResourceId> = ids.iter().map(ResourceId::as_base).collect();
        let deadline = MonoInstant::now() + wait;
        let mut held = self.held.lock().map_err(KernelError::poisoned)?;
        loop {
            let blocker = ids
                .iter()
                .find_map(|id| held.get(id).filter(|owner| **owner != tx).map(|owner| (id, *owner)));
            let Some((id, owner)) = blocker else {
                for id in ids {
                    held.insert(id, tx);
                }
                return Ok(());
            };
            let now = MonoInstant::now();
            if now >= deadline {
                debug!(%tx, id = %id, %owner, "lock conflict");
                return Err(KernelError::Conflict(format!(
                    "{id} is locked by transaction {owner}"
                )));
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .map_err(KernelError::poisoned)?;
            held = guard;
        }
    }

    /// Release every lock held by `tx`.
    pub fn release_all(&self, tx: TxId) -> KernelResult<usize> {
        let mut held = self.held.lock().map_err(KernelError::poisoned)?;
        let before = held.len();
        held.retain(|_, owner| *owner != tx);
        let released = before - held.len();
        drop(held);
        if released > 0 {
            self.released.notify_all();
            debug!(%tx, released, "locks released");
        }
        Ok(released)
    }

    /// Transaction currently holding `id`.
    pub fn holder(&self, id: &ResourceId) -> KernelResult<Option<TxId>> {
        let held = self.held.lock().map_err(KernelError::poisoned)?;
        Ok(held.get(&id.as_base()).copied())
    }

    /// Ids locked by `tx`, sorted.
    pub fn held_by(&self, tx: TxId) -> KernelResult<Vec<ResourceId>> {
        let held = self.held.lock().map_err(KernelError::poisoned)?;
        let mut ids: Vec<ResourceId> = held
            .iter()
            .filter(|(_, owner)| **owner == tx)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
