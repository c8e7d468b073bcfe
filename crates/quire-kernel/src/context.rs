use std::sync::Arc;

use quire_index::{ContainmentIndex, MembershipIndex, ReferenceIndex};
use quire_store::{MappingIndex, ReadOnlySession, VersionedObjectStore};
use quire_types::{Clock, Instant};

use crate::collab::Collaborators;
use crate::config::QuireConfig;
use crate::intent::IntentLog;
use crate::lock::ResourceLockManager;

/// Everything a transaction works against, shared by all transactions of
/// one repository.
pub struct RepositoryContext {
    pub(crate) config: QuireConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) backend: Arc<dyn VersionedObjectStore>,
    pub(crate) mapping: Arc<dyn MappingIndex>,
    pub(crate) containment: ContainmentIndex,
    pub(crate) references: ReferenceIndex,
    pub(crate) membership: MembershipIndex,
    pub(crate) locks: ResourceLockManager,
    pub(crate) collaborators: Collaborators,
    pub(crate) intents: Arc<dyn IntentLog>,
    /// Committed-state reader for callers outside any transaction.
    pub(crate) reader: ReadOnlySession,
}

impl RepositoryContext {
    pub fn new(
        config: QuireConfig,
        clock: Arc<dyn Clock>,
        backend: Arc<dyn VersionedObjectStore>,
        mapping: Arc<dyn MappingIndex>,
        collaborators: Collaborators,
        intents: Arc<dyn IntentLog>,
    ) -> Self {
        let reader = ReadOnlySession::new(backend.clone(), mapping.clone(), config.store.clone());
        Self {
            containment: ContainmentIndex::new(&config.index),
            references: ReferenceIndex::new(&config.index),
            membership: MembershipIndex::new(&config.index),
            locks: ResourceLockManager::new(),
            config,
            clock,
            backend,
            mapping,
            collaborators,
            intents,
            reader,
        }
    }

    pub fn config(&self) -> &QuireConfig {
        &self.config
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn containment(&self) -> &ContainmentIndex {
        &self.containment
    }

    pub fn references(&self) -> &ReferenceIndex {
        &self.references
    }

    pub fn membership(&self) -> &MembershipIndex {
        &self.membership
    }

    pub fn locks(&self) -> &ResourceLockManager {
        &self.locks
    }

    pub fn reader(&self) -> &ReadOnlySession {
        &self.reader
    }
}
