use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use quire_types::TxId;

use crate::context::RepositoryContext;
use crate::error::{KernelError, KernelResult};
use crate::transaction::Transaction;

/// Registry of live transactions.
pub struct TransactionManager {
    ctx: Arc<RepositoryContext>,
    transactions: RwLock<HashMap<TxId, Arc<Transaction>>>,
}

impl TransactionManager {
    pub fn new(ctx: Arc<RepositoryContext>) -> Self {
        Self {
            ctx,
            transactions: RwLock::new(HashMap::new()),
        }
    }

    /// Open and register a new (short-lived) transaction.
    pub fn create(&self) -> KernelResult<Arc<Transaction>> {
        let tx = Arc::new(Transaction::new(self.ctx.clone()));
        self.transactions
            .write()
            .map_err(KernelError::poisoned)?
            .insert(tx.id(), tx.clone());
        Ok(tx)
    }

    /// Look up a registered transaction that is still usable.
    pub fn get(&self, id: TxId) -> KernelResult<Arc<Transaction>> {
        let tx = self
            .transactions
            .read()
            .map_err(KernelError::poisoned)?
            .get(&id)
            .cloned()
            .ok_or_else(|| KernelError::NotFound(format!("transaction {id}")))?;
        if tx.is_open() && tx.is_expired() {
            return Err(KernelError::TransactionExpired(id));
        }
        Ok(tx)
    }

    pub fn len(&self) -> KernelResult<usize> {
        Ok(self.transactions.read().map_err(KernelError::poisoned)?.len())
    }

    pub fn is_empty(&self) -> KernelResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Roll back open transactions past their expiry and forget finished
    /// ones. Returns how many were rolled back.
    pub fn sweep(&self) -> KernelResult<usize> {
        let snapshot: Vec<Arc<Transaction>> = self
            .transactions
            .read()
            .map_err(KernelError::poisoned)?
            .values()
            .cloned()
            .collect();

        let mut rolled_back = 0;
        let mut finished = Vec::new();
        for tx in snapshot {
            let state = tx.state()?;
            if state.is_terminal() {
                finished.push(tx.id());
            } else if tx.is_open() && tx.is_expired() {
                if let Err(e) = tx.rollback() {
                    warn!(tx = %tx.id(), error = %e, "rollback of expired transaction failed");
                }
                rolled_back += 1;
                finished.push(tx.id());
            }
        }

        let mut transactions = self.transactions.write().map_err(KernelError::poisoned)?;
        for id in &finished {
            transactions.remove(id);
        }
        if rolled_back > 0 {
            info!(rolled_back, "expired transactions rolled back");
        }
        debug!(removed = finished.len(), remaining = transactions.len(), "transaction sweep done");
        Ok(rolled_back)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::Collaborators;
    use crate::config::QuireConfig;
    use crate::intent::InMemoryIntentLog;
    use crate::transaction::TxState;
    use chrono::{TimeZone, Utc};
    use quire_store::{InMemoryMappingIndex, InMemoryVersionedStore};
    use quire_types::{Instant, ManualClock};

    fn at(secs: i64) -> Instant {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn manager() -> (Arc<ManualClock>, TransactionManager) {
        let clock = Arc::new(ManualClock::new(at(0)));
        let ctx = Arc::new(RepositoryContext::new(
            QuireConfig::default(),
            clock.clone(),
            Arc::new(InMemoryVersionedStore::new()),
            Arc::new(InMemoryMappingIndex::new()),
            Collaborators::default(),
            Arc::new(InMemoryIntentLog::new()),
        ));
        (clock, TransactionManager::new(ctx))
    }

    #[test]
    fn get_finds_created_transaction() {
        let (_, mgr) = manager();
        let tx = mgr.create().unwrap();
        assert_eq!(mgr.get(tx.id()).unwrap().id(), tx.id());
        assert!(matches!(mgr.get(TxId::new()), Err(KernelError::NotFound(_))));
    }

    #[test]
    fn expired_transaction_is_reported_then_swept() {
        let (clock, mgr) = manager();
        let tx = mgr.create().unwrap();
        tx.set_short_lived(false).unwrap();
        clock.set(at(1_000));
        assert!(matches!(mgr.get(tx.id()), Err(KernelError::TransactionExpired(_))));

        assert_eq!(mgr.sweep().unwrap(), 1);
        assert_eq!(tx.state().unwrap(), TxState::RolledBack);
        assert!(mgr.is_empty().unwrap());
    }

    #[test]
    fn sweep_forgets_finished_and_keeps_live() {
        let (_, mgr) = manager();
        let done = mgr.create().unwrap();
        done.commit().unwrap();
        let live = mgr.create().unwrap();
        assert_eq!(mgr.sweep().unwrap(), 0);
        assert_eq!(mgr.len().unwrap(), 1);
        assert!(mgr.get(live.id()).is_ok());
    }
}
