use std::sync::Arc;

use tracing::{info, warn};

use quire_store::{InMemoryMappingIndex, InMemoryVersionedStore, MappingIndex, VersionedObjectStore};
use quire_types::{Clock, ResourceId, SystemClock, TxId};

use crate::collab::Collaborators;
use crate::config::QuireConfig;
use crate::context::RepositoryContext;
use crate::error::KernelResult;
use crate::intent::{FileIntentLog, InMemoryIntentLog, IntentLog};
use crate::manager::TransactionManager;
use crate::rebuild::{RebuildReport, Rebuilder};
use crate::service::ResourceService;
use crate::sweeper::Sweeper;
use crate::transaction::Transaction;

/// High-level Quire repository API.
///
/// Unless the configured sweep interval is zero, a background thread rolls
/// back expired transactions and evicts idle read sessions until the
/// repository is dropped or [`stop_sweeper`](Self::stop_sweeper) is called.
pub struct Repository {
    ctx: Arc<RepositoryContext>,
    transactions: Arc<TransactionManager>,
    service: ResourceService,
    sweeper: Option<Sweeper>,
}

impl Repository {
    /// Open an in-memory repository.
    pub fn open(config: QuireConfig) -> KernelResult<Self> {
        Self::with_backend(
            config,
            Arc::new(SystemClock),
            Arc::new(InMemoryVersionedStore::new()),
            Arc::new(InMemoryMappingIndex::new()),
            Collaborators::default(),
        )
    }

    /// Open a repository over an existing store and mapping index. The
    /// intent log lives at `config.intent_log` when one is set.
    pub fn with_backend(
        config: QuireConfig,
        clock: Arc<dyn Clock>,
        backend: Arc<dyn VersionedObjectStore>,
        mapping: Arc<dyn MappingIndex>,
        collaborators: Collaborators,
    ) -> KernelResult<Self> {
        let intents: Arc<dyn IntentLog> = match &config.intent_log {
            Some(path) => Arc::new(FileIntentLog::open(path)?),
            None => Arc::new(InMemoryIntentLog::new()),
        };
        Self::from_context(RepositoryContext::new(
            config,
            clock,
            backend,
            mapping,
            collaborators,
            intents,
        ))
    }

    pub fn from_context(ctx: RepositoryContext) -> KernelResult<Self> {
        let ctx = Arc::new(ctx);
        let transactions = Arc::new(TransactionManager::new(ctx.clone()));
        let interval = ctx.config.transaction.sweep_interval();
        let sweeper = if interval.is_zero() {
            None
        } else {
            Some(Sweeper::spawn(interval, ctx.clone(), transactions.clone())?)
        };
        Ok(Self {
            service: ResourceService::new(ctx.clone()),
            transactions,
            sweeper,
            ctx,
        })
    }

    pub fn context(&self) -> &RepositoryContext {
        &self.ctx
    }

    pub fn service(&self) -> &ResourceService {
        &self.service
    }

    // ---- Transactions ----

    /// Start a short-lived transaction.
    pub fn begin(&self) -> KernelResult<Arc<Transaction>> {
        self.transactions.create()
    }

    /// Start a long-running transaction that commits only when asked.
    pub fn begin_long_running(&self) -> KernelResult<Arc<Transaction>> {
        let tx = self.transactions.create()?;
        tx.set_short_lived(false)?;
        Ok(tx)
    }

    pub fn transaction(&self, id: TxId) -> KernelResult<Arc<Transaction>> {
        self.transactions.get(id)
    }

    /// Roll back expired transactions. Returns how many were rolled back.
    pub fn sweep(&self) -> KernelResult<usize> {
        self.transactions.sweep()
    }

    pub fn sweeper_running(&self) -> bool {
        self.sweeper.as_ref().is_some_and(Sweeper::is_running)
    }

    /// Stop the background sweeper; [`sweep`](Self::sweep) still works.
    pub fn stop_sweeper(&mut self) {
        if let Some(mut sweeper) = self.sweeper.take() {
            sweeper.stop();
        }
    }

    // ---- Maintenance ----

    pub fn rebuild_all(&self) -> KernelResult<RebuildReport> {
        Rebuilder::new(self.ctx.clone()).rebuild_all()
    }

    /// Repair the indexes of roots whose commit never completed. Returns the
    /// roots that were rebuilt.
    pub fn recover(&self) -> KernelResult<Vec<ResourceId>> {
        let unresolved = self.ctx.intents.unresolved()?;
        if unresolved.is_empty() {
            return Ok(Vec::new());
        }
        let mut roots: Vec<ResourceId> = unresolved.iter().flat_map(|i| i.roots.iter().cloned()).collect();
        roots.sort();
        roots.dedup();
        warn!(intents = unresolved.len(), roots = roots.len(), "recovering unfinished commits");

        Rebuilder::new(self.ctx.clone()).rebuild_roots(&roots)?;
        for intent in &unresolved {
            self.ctx.intents.complete(intent.id)?;
        }
        self.ctx.intents.compact()?;
        info!(roots = roots.len(), "recovery complete");
        Ok(roots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::CreateRequest;
    use quire_types::{Graph, InteractionModel};

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    #[test]
    fn open_and_create() {
        let repo = Repository::open(QuireConfig::default()).unwrap();
        let tx = repo.begin().unwrap();
        repo.service()
            .create(&tx, "alice", &id("a"), CreateRequest::container(InteractionModel::BasicContainer, Graph::new()))
            .unwrap();
        assert!(tx.is_committed());
        assert!(repo.service().get(None, &id("a")).is_ok());
        assert_eq!(repo.service().children(None, &ResourceId::root()).unwrap(), vec![id("a")]);
    }

    #[test]
    fn long_running_transactions_are_registered() {
        let repo = Repository::open(QuireConfig::default()).unwrap();
        let tx = repo.begin_long_running().unwrap();
        assert!(!tx.is_short_lived().unwrap());
        assert_eq!(repo.transaction(tx.id()).unwrap().id(), tx.id());
    }

    #[test]
    fn recover_without_intents_is_a_no_op() {
        let repo = Repository::open(QuireConfig::default()).unwrap();
        assert!(repo.recover().unwrap().is_empty());
    }

    #[test]
    fn file_intent_log_is_used_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let config = QuireConfig {
            intent_log: Some(dir.path().join("intents.log")),
            ..QuireConfig::default()
        };
        let repo = Repository::open(config).unwrap();
        let tx = repo.begin().unwrap();
        repo.service()
            .create(&tx, "alice", &id("a"), CreateRequest::binary(b"x".to_vec()))
            .unwrap();
        assert!(dir.path().join("intents.log").exists());
        assert!(repo.recover().unwrap().is_empty());
    }
}
