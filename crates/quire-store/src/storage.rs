use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use quire_types::{Instant, ResourceId, TxScope};
use tracing::{debug, error, info};

use crate::config::VersioningPolicy;
use crate::error::{StoreError, StoreResult};
use crate::headers::ResourceHeaders;
use crate::mapping::{MappingIndex, StoreMapping};
use crate::session::ObjectSession;
use crate::traits::{VersionInfo, VersionNumber, VersionedObjectStore};

/// Read access to stored resources, transactional or not.
pub trait ResourceReader: Send + Sync {
    /// Headers of `id`; memento ids select the matching version.
    fn read_headers(&self, id: &ResourceId) -> StoreResult<ResourceHeaders>;

    /// Content of `id`; `Ok(None)` for tombstones.
    fn read_content(&self, id: &ResourceId) -> StoreResult<Option<Vec<u8>>>;

    /// Sealed versions (mementos) of `id`, oldest first.
    fn list_versions(&self, id: &ResourceId) -> StoreResult<Vec<VersionInfo>>;

    /// Version of `id`'s store object sealed at `instant`.
    fn resolve_version(&self, id: &ResourceId, instant: Instant) -> StoreResult<VersionNumber>;

    /// Whether `id` resolves to stored headers (tombstones included).
    fn exists(&self, id: &ResourceId) -> StoreResult<bool> {
        match self.read_headers(id) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Commit progress of a transaction's storage session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitState {
    CommitNotStarted,
    PrepareStarted,
    Prepared,
    PrepareFailed,
    CommitStarted,
    Committed,
    CommitFailed,
    RollingBack,
    RolledBack,
    RollbackFailed,
}

impl CommitState {
    /// Whether a rollback may start from this state.
    pub fn rollback_allowed(&self) -> bool {
        matches!(
            self,
            Self::CommitNotStarted | Self::Prepared | Self::PrepareFailed | Self::Committed | Self::CommitFailed
        )
    }
}

impl fmt::Display for CommitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct Inner {
    state: CommitState,
    /// Per-root sessions keyed by store object id; iteration order is commit order.
    sessions: BTreeMap<String, ObjectSession>,
    committed: Vec<String>,
}

/// Storage session spanning every store object a transaction touches.
///
/// Each root gets its own [`ObjectSession`]. Commit runs per root in sorted
/// object-id order; roots that already committed are remembered so that a
/// later rollback can revert them.
pub struct StorageSession {
    tx: TxScope,
    backend: Arc<dyn VersionedObjectStore>,
    mapping: Arc<dyn MappingIndex>,
    policy: VersioningPolicy,
    inner: Mutex<Inner>,
}

impl StorageSession {
    pub fn new(
        tx: TxScope,
        backend: Arc<dyn VersionedObjectStore>,
        mapping: Arc<dyn MappingIndex>,
        policy: VersioningPolicy,
    ) -> Self {
        Self {
            tx,
            backend,
            mapping,
            policy,
            inner: Mutex::new(Inner {
                state: CommitState::CommitNotStarted,
                sessions: BTreeMap::new(),
                committed: Vec::new(),
            }),
        }
    }

    pub fn tx(&self) -> &TxScope {
        &self.tx
    }

    pub fn state(&self) -> StoreResult<CommitState> {
        Ok(self.lock()?.state)
    }

    /// Store object ids that committed during this session.
    pub fn committed_objects(&self) -> StoreResult<Vec<String>> {
        Ok(self.lock()?.committed.clone())
    }

    /// Root resources with staged changes.
    pub fn touched_roots(&self) -> StoreResult<Vec<ResourceId>> {
        let inner = self.lock()?;
        Ok(inner
            .sessions
            .values()
            .filter(|s| s.has_changes())
            .map(|s| s.root().clone())
            .collect())
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(StoreError::poisoned)
    }

    fn writable<'a>(&self, inner: &'a mut Inner, root: &ResourceId) -> StoreResult<&'a mut ObjectSession> {
        if inner.state != CommitState::CommitNotStarted {
            return Err(StoreError::InvalidState {
                object_id: format!("tx {}", self.tx.id),
                state: inner.state.to_string(),
                operation: "stage",
            });
        }
        let session = ObjectSession::new(root, self.backend.clone(), self.policy);
        Ok(inner
            .sessions
            .entry(session.object_id().to_string())
            .or_insert(session))
    }

    // ---- Staging ----

    /// Stage a create or update and record the resource's store mapping.
    pub fn stage_resource(&self, headers: &ResourceHeaders, content: Option<&[u8]>) -> StoreResult<()> {
        let mut inner = self.lock()?;
        self.writable(&mut inner, &headers.root)?.stage_resource(headers, content)?;
        self.mapping.add(&self.tx, StoreMapping::new(&headers.id, &headers.root))
    }

    /// Stage a delete that leaves a tombstone.
    pub fn stage_delete(&self, headers: &ResourceHeaders) -> StoreResult<()> {
        let mut inner = self.lock()?;
        self.writable(&mut inner, &headers.root)?.stage_delete(headers)
    }

    /// Stage removal of every trace of a resource, including its mapping.
    pub fn stage_purge(&self, headers: &ResourceHeaders) -> StoreResult<()> {
        let mut inner = self.lock()?;
        self.writable(&mut inner, &headers.root)?.stage_purge(headers)?;
        if !headers.id.is_description() && !headers.id.is_acl() {
            self.mapping.remove(&self.tx, &headers.id)?;
        }
        Ok(())
    }

    /// Seal a version of `id`'s store object on commit.
    pub fn create_version(&self, id: &ResourceId) -> StoreResult<()> {
        let mapping = self.mapping.require(Some(&self.tx), id)?;
        let mut inner = self.lock()?;
        self.writable(&mut inner, &mapping.root_id)?.request_version()
    }

    // ---- Commit protocol ----

    /// Prepare every touched root. A failing root aborts its own staging and
    /// leaves the session in `PrepareFailed`.
    pub fn prepare(&self) -> StoreResult<()> {
        let mut inner = self.lock()?;
        match inner.state {
            CommitState::CommitNotStarted => {}
            CommitState::Prepared => {
                return Err(StoreError::Conflict(format!("tx {} is already prepared", self.tx.id)));
            }
            other => {
                return Err(StoreError::InvalidState {
                    object_id: format!("tx {}", self.tx.id),
                    state: other.to_string(),
                    operation: "prepare",
                });
            }
        }
        inner.state = CommitState::PrepareStarted;
        for session in inner.sessions.values_mut() {
            if let Err(e) = session.prepare() {
                inner.state = CommitState::PrepareFailed;
                return Err(e);
            }
        }
        inner.state = CommitState::Prepared;
        debug!(tx = %self.tx.id, roots = inner.sessions.len(), "storage session prepared");
        Ok(())
    }

    /// Commit every prepared root, then the mapping changes.
    pub fn commit(&self, at: Instant) -> StoreResult<BTreeMap<String, VersionNumber>> {
        let mut inner = self.lock()?;
        if inner.state != CommitState::Prepared {
            return Err(StoreError::InvalidState {
                object_id: format!("tx {}", self.tx.id),
                state: inner.state.to_string(),
                operation: "commit",
            });
        }
        inner.state = CommitState::CommitStarted;
        let mut versions = BTreeMap::new();
        let Inner {
            state,
            sessions,
            committed,
        } = &mut *inner;
        for (object_id, session) in sessions.iter_mut() {
            if !session.has_changes() {
                continue;
            }
            match session.commit(at) {
                Ok(version) => {
                    committed.push(object_id.clone());
                    versions.insert(object_id.clone(), version);
                }
                Err(e) => {
                    error!(tx = %self.tx.id, object_id, committed = committed.len(), error = %e, "store object commit failed");
                    *state = CommitState::CommitFailed;
                    return Err(e);
                }
            }
        }
        if let Err(e) = self.mapping.commit(&self.tx) {
            *state = CommitState::CommitFailed;
            return Err(e);
        }
        *state = CommitState::Committed;
        info!(tx = %self.tx.id, objects = versions.len(), "storage session committed");
        Ok(versions)
    }

    /// Abort uncommitted roots, revert committed ones, and drop staged mappings.
    ///
    /// Every root is attempted even if an earlier one fails.
    pub fn rollback(&self) -> StoreResult<()> {
        let mut inner = self.lock()?;
        if inner.state == CommitState::RolledBack {
            return Ok(());
        }
        if !inner.state.rollback_allowed() {
            return Err(StoreError::InvalidState {
                object_id: format!("tx {}", self.tx.id),
                state: inner.state.to_string(),
                operation: "rollback",
            });
        }
        inner.state = CommitState::RollingBack;
        let mut failures = Vec::new();
        for (object_id, session) in inner.sessions.iter_mut() {
            if let Err(e) = session.rollback() {
                error!(tx = %self.tx.id, object_id, error = %e, "failed to roll back store object");
                failures.push(format!("{object_id}: {e}"));
            }
        }
        if let Err(e) = self.mapping.rollback(&self.tx) {
            failures.push(format!("mapping index: {e}"));
        }
        if failures.is_empty() {
            inner.state = CommitState::RolledBack;
            debug!(tx = %self.tx.id, "storage session rolled back");
            Ok(())
        } else {
            inner.state = CommitState::RollbackFailed;
            Err(StoreError::RollbackFailed(failures.join("; ")))
        }
    }

    fn with_session<T>(
        &self,
        id: &ResourceId,
        read: impl FnOnce(&ObjectSession) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mapping = self.mapping.require(Some(&self.tx), id)?;
        let inner = self.lock()?;
        match inner.sessions.get(&mapping.object_id) {
            Some(session) => read(session),
            None => read(&ObjectSession::new(&mapping.root_id, self.backend.clone(), self.policy)),
        }
    }
}

impl ResourceReader for StorageSession {
    fn read_headers(&self, id: &ResourceId) -> StoreResult<ResourceHeaders> {
        self.with_session(id, |s| s.read_headers(&id.without_memento(), s.version_for(id)?))
    }

    fn read_content(&self, id: &ResourceId) -> StoreResult<Option<Vec<u8>>> {
        self.with_session(id, |s| s.read_content(&id.without_memento(), s.version_for(id)?))
    }

    fn list_versions(&self, id: &ResourceId) -> StoreResult<Vec<VersionInfo>> {
        self.with_session(id, |s| s.versions_of(&id.without_memento()))
    }

    fn resolve_version(&self, id: &ResourceId, instant: Instant) -> StoreResult<VersionNumber> {
        self.with_session(id, |s| s.resolve_version(instant))
    }
}

impl fmt::Debug for StorageSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageSession").field("tx", &self.tx).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::InMemoryMappingIndex;
    use crate::memory::InMemoryVersionedStore;
    use chrono::{TimeZone, Utc};
    use quire_types::{InteractionModel, TxId};

    fn at(secs: i64) -> Instant {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn id(s: &str) -> ResourceId {
        ResourceId::parse(s).unwrap()
    }

    struct Fixture {
        backend: Arc<InMemoryVersionedStore>,
        mapping: Arc<InMemoryMappingIndex>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                backend: Arc::new(InMemoryVersionedStore::new()),
                mapping: Arc::new(InMemoryMappingIndex::new()),
            }
        }

        fn session(&self) -> StorageSession {
            StorageSession::new(
                TxScope::long_running(TxId::new()),
                self.backend.clone(),
                self.mapping.clone(),
                VersioningPolicy::AutoVersion,
            )
        }
    }

    fn container(path: &str, secs: i64) -> ResourceHeaders {
        ResourceHeaders::new(id(path), InteractionModel::BasicContainer, at(secs))
    }

    fn commit(session: &StorageSession, secs: i64) {
        session.prepare().unwrap();
        session.commit(at(secs)).unwrap();
    }

    #[test]
    fn read_your_writes_across_roots() {
        let fx = Fixture::new();
        let tx = fx.session();
        tx.stage_resource(&container("a", 0), Some(b"{}")).unwrap();
        tx.stage_resource(&container("b", 0), Some(b"{}")).unwrap();
        assert!(tx.exists(&id("a")).unwrap());

        let other = fx.session();
        assert!(!other.exists(&id("a")).unwrap());

        commit(&tx, 1);
        assert_eq!(tx.committed_objects().unwrap(), vec!["info:fedora/a", "info:fedora/b"]);
        assert!(other.exists(&id("b")).unwrap());
    }

    #[test]
    fn staging_after_prepare_fails() {
        let fx = Fixture::new();
        let tx = fx.session();
        tx.prepare().unwrap();
        let err = tx.stage_resource(&container("a", 0), None).unwrap_err();
        assert!(matches!(err, StoreError::InvalidState { .. }));
        assert!(matches!(tx.prepare(), Err(StoreError::Conflict(_))));
    }

    #[test]
    fn commit_requires_prepared_state() {
        let fx = Fixture::new();
        let tx = fx.session();
        assert!(matches!(tx.commit(at(0)), Err(StoreError::InvalidState { .. })));
    }

    #[test]
    fn rollback_reverts_committed_roots() {
        let fx = Fixture::new();
        let tx = fx.session();
        tx.stage_resource(&container("a", 0), Some(b"{}")).unwrap();
        commit(&tx, 0);
        tx.rollback().unwrap();
        assert_eq!(tx.state().unwrap(), CommitState::RolledBack);
        assert!(!fx.backend.contains("info:fedora/a").unwrap());
        // Rolling back twice is harmless.
        tx.rollback().unwrap();
    }

    #[test]
    fn rollback_before_commit_discards_staging() {
        let fx = Fixture::new();
        let tx = fx.session();
        tx.stage_resource(&container("a", 0), Some(b"{}")).unwrap();
        tx.rollback().unwrap();
        assert!(fx.mapping.get(Some(tx.tx()), &id("a")).unwrap().is_none());
        assert!(fx.backend.object_ids().unwrap().is_empty());
    }

    #[test]
    fn mementos_resolve_by_instant() {
        let fx = Fixture::new();
        let tx = fx.session();
        tx.stage_resource(&container("a", 0), Some(b"{\"v\":1}")).unwrap();
        commit(&tx, 10);
        let tx = fx.session();
        let mut headers = tx.read_headers(&id("a")).unwrap();
        headers.touch(at(20), None);
        tx.stage_resource(&headers, Some(b"{\"v\":2}")).unwrap();
        commit(&tx, 20);

        let reader = fx.session();
        let versions = reader.list_versions(&id("a")).unwrap();
        assert_eq!(versions.len(), 2);
        let first = id("a").as_memento(versions[0].created);
        assert_eq!(reader.read_content(&first).unwrap().unwrap(), b"{\"v\":1}");
        let missing = id("a").as_memento(at(15));
        assert!(matches!(reader.read_headers(&missing), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn unmapped_resource_is_not_found() {
        let fx = Fixture::new();
        let reader = fx.session();
        assert!(matches!(reader.read_headers(&id("nope")), Err(StoreError::NotFound(_))));
        assert!(!reader.exists(&id("nope")).unwrap());
    }

    #[test]
    fn purge_drops_mapping() {
        let fx = Fixture::new();
        let tx = fx.session();
        let headers = container("a", 0);
        tx.stage_resource(&headers, Some(b"{}")).unwrap();
        commit(&tx, 0);

        let tx = fx.session();
        tx.stage_purge(&headers).unwrap();
        commit(&tx, 1);
        assert!(fx.mapping.get(None, &id("a")).unwrap().is_none());
        assert!(!fx.backend.contains("info:fedora/a").unwrap());
    }

    #[test]
    fn rollback_allowed_flags() {
        assert!(CommitState::CommitNotStarted.rollback_allowed());
        assert!(CommitState::CommitFailed.rollback_allowed());
        assert!(!CommitState::CommitStarted.rollback_allowed());
        assert!(!CommitState::RollbackFailed.rollback_allowed());
    }
}
