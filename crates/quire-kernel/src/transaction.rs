use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Duration;
use tracing::{debug, error, info, warn};

use quire_store::StorageSession;
use quire_types::{Instant, ResourceId, TxId, TxScope};

use crate::context::RepositoryContext;
use crate::error::{KernelError, KernelResult};
use crate::rebuild::Rebuilder;

/// Lifecycle of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxState {
    Open,
    Committing,
    Committed,
    RolledBack,
    /// A downstream component failed while committing.
    Failed,
}

impl TxState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed)
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct TxInner {
    state: TxState,
    short_lived: bool,
    expires_at: Instant,
    storage: Option<Arc<StorageSession>>,
}

/// How far a failed commit got.
enum CommitFailure {
    /// Nothing is durable yet, or the store could revert what was.
    Undone(KernelError),
    /// The store committed but the indexes or the revert did not.
    Partial(String),
}

/// One unit of work spanning the object store and every index.
///
/// Writes go to a lazily opened [`StorageSession`] and to the pending rows
/// of the shadow indexes, keyed by this transaction's id. Commit prepares
/// and commits the store first and the indexes second; rollback unwinds
/// every component and keeps going past individual failures.
pub struct Transaction {
    id: TxId,
    ctx: Arc<RepositoryContext>,
    inner: Mutex<TxInner>,
}

impl Transaction {
    /// A new open transaction. Transactions start short-lived.
    pub fn new(ctx: Arc<RepositoryContext>) -> Self {
        let expires_at = ctx.now() + session_timeout(&ctx);
        let id = TxId::new();
        debug!(tx = %id, "transaction started");
        Self {
            id,
            ctx,
            inner: Mutex::new(TxInner {
                state: TxState::Open,
                short_lived: true,
                expires_at,
                storage: None,
            }),
        }
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn context(&self) -> &RepositoryContext {
        &self.ctx
    }

    fn lock(&self) -> KernelResult<MutexGuard<'_, TxInner>> {
        self.inner.lock().map_err(KernelError::poisoned)
    }

    fn state_error(&self, state: TxState, operation: &'static str) -> KernelError {
        KernelError::TransactionState {
            tx: self.id,
            state: state.to_string(),
            operation,
        }
    }

    fn scope_of(&self, inner: &TxInner) -> TxScope {
        TxScope {
            id: self.id,
            short_lived: inner.short_lived,
        }
    }

    // ---- State ----

    pub fn state(&self) -> KernelResult<TxState> {
        Ok(self.lock()?.state)
    }

    pub fn scope(&self) -> KernelResult<TxScope> {
        let inner = self.lock()?;
        Ok(self.scope_of(&inner))
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state(), Ok(TxState::Open))
    }

    pub fn is_committed(&self) -> bool {
        matches!(self.state(), Ok(TxState::Committed))
    }

    pub fn is_rolled_back(&self) -> bool {
        matches!(self.state(), Ok(TxState::RolledBack))
    }

    pub fn is_short_lived(&self) -> KernelResult<bool> {
        Ok(self.lock()?.short_lived)
    }

    /// Switch between auto-committing and long-running mode. Only allowed
    /// before the first write.
    pub fn set_short_lived(&self, short_lived: bool) -> KernelResult<()> {
        let mut inner = self.lock()?;
        if inner.state != TxState::Open || inner.storage.is_some() {
            return Err(self.state_error(inner.state, "change durability after writing"));
        }
        inner.short_lived = short_lived;
        Ok(())
    }

    // ---- Expiry ----

    pub fn expires_at(&self) -> KernelResult<Instant> {
        Ok(self.lock()?.expires_at)
    }

    pub fn is_expired(&self) -> bool {
        match self.lock() {
            Ok(inner) => self.ctx.now() >= inner.expires_at,
            Err(_) => true,
        }
    }

    /// Make the transaction expire now; the next sweep rolls it back.
    pub fn expire(&self) -> KernelResult<()> {
        self.lock()?.expires_at = self.ctx.now();
        debug!(tx = %self.id, "transaction expired");
        Ok(())
    }

    /// Push expiry a full session timeout past now.
    pub fn refresh(&self) -> KernelResult<Instant> {
        let mut inner = self.lock()?;
        if inner.state != TxState::Open {
            return Err(self.state_error(inner.state, "refresh"));
        }
        inner.expires_at = self.ctx.now() + session_timeout(&self.ctx);
        Ok(inner.expires_at)
    }

    /// Fail unless the transaction can still accept work.
    pub fn ensure_usable(&self, operation: &'static str) -> KernelResult<TxScope> {
        let inner = self.lock()?;
        if inner.state != TxState::Open {
            return Err(self.state_error(inner.state, operation));
        }
        if self.ctx.now() >= inner.expires_at {
            return Err(KernelError::TransactionExpired(self.id));
        }
        Ok(self.scope_of(&inner))
    }

    /// The transaction's storage session, opened on first use.
    pub fn storage(&self) -> KernelResult<Arc<StorageSession>> {
        self.ensure_usable("write")?;
        let mut inner = self.lock()?;
        if let Some(storage) = &inner.storage {
            return Ok(storage.clone());
        }
        let storage = Arc::new(StorageSession::new(
            self.scope_of(&inner),
            self.ctx.backend.clone(),
            self.ctx.mapping.clone(),
            self.ctx.config.store.versioning,
        ));
        inner.storage = Some(storage.clone());
        Ok(storage)
    }

    // ---- Locking ----

    /// Lock `id` (by base id) and the root of the store object holding it.
    pub fn lock_resource(&self, id: &ResourceId) -> KernelResult<()> {
        let scope = self.ensure_usable("lock")?;
        let ids = self.lock_set(&scope, id)?;
        self.acquire(&ids)
    }

    /// Like [`lock_resource`](Self::lock_resource), and also lock every
    /// ancestor path segment that does not exist yet.
    pub fn lock_resource_and_placeholders(&self, id: &ResourceId) -> KernelResult<()> {
        let scope = self.ensure_usable("lock")?;
        let mut ids = self.lock_set(&scope, id)?;
        for ancestor in id.ancestors() {
            if !self.ctx.containment.exists(Some(&scope), &ancestor, true)? {
                ids.push(ancestor);
            }
        }
        self.acquire(&ids)
    }

    fn lock_set(&self, scope: &TxScope, id: &ResourceId) -> KernelResult<Vec<ResourceId>> {
        let mut ids = vec![id.as_base()];
        if let Some(mapping) = self.ctx.mapping.get(Some(scope), id)? {
            if mapping.root_id != id.as_base() {
                ids.push(mapping.root_id);
            }
        }
        Ok(ids)
    }

    fn acquire(&self, ids: &[ResourceId]) -> KernelResult<()> {
        self.ctx
            .locks
            .acquire(self.id, ids, self.ctx.config.transaction.lock_wait())
    }

    // ---- Unit of work ----

    /// Run `work` in this transaction. A short-lived transaction commits
    /// when `work` succeeds and rolls back when it fails; a long-running
    /// one only has its expiry refreshed.
    pub fn do_in_tx<T>(&self, work: impl FnOnce(&Transaction) -> KernelResult<T>) -> KernelResult<T> {
        self.ensure_usable("do work")?;
        if !self.is_short_lived()? {
            self.refresh()?;
            return work(self);
        }
        match work(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.rollback() {
                    warn!(tx = %self.id, error = %rollback, "rollback after failed work also failed");
                }
                Err(e)
            }
        }
    }

    /// Move `Open -> Committing`, exactly once.
    pub fn ensure_committing(&self) -> KernelResult<()> {
        let mut inner = self.lock()?;
        if inner.state != TxState::Open {
            return Err(self.state_error(inner.state, "start committing"));
        }
        inner.state = TxState::Committing;
        Ok(())
    }

    pub fn commit_if_short_lived(&self) -> KernelResult<()> {
        if self.is_short_lived()? {
            self.commit()
        } else {
            Ok(())
        }
    }

    /// Commit the store, then the indexes, then notify collaborators.
    pub fn commit(&self) -> KernelResult<()> {
        let (scope, storage) = {
            let inner = self.lock()?;
            if inner.state != TxState::Open {
                return Err(self.state_error(inner.state, "commit"));
            }
            if self.ctx.now() >= inner.expires_at {
                return Err(KernelError::TransactionExpired(self.id));
            }
            (self.scope_of(&inner), inner.storage.clone())
        };
        self.ensure_committing()?;

        let outcome = self.commit_components(&scope, storage.as_deref());
        let final_state = match &outcome {
            Ok(()) => TxState::Committed,
            Err(_) => TxState::Failed,
        };
        self.lock()?.state = final_state;
        if let Err(e) = self.ctx.locks.release_all(self.id) {
            error!(tx = %self.id, error = %e, "failed to release locks");
        }

        match outcome {
            Ok(()) => {
                info!(tx = %self.id, short_lived = scope.short_lived, "transaction committed");
                Ok(())
            }
            Err(CommitFailure::Undone(e)) => match e {
                KernelError::DigestMismatch(_) => Err(e),
                other => Err(KernelError::Runtime(format!("commit of transaction {} failed: {other}", self.id))),
            },
            Err(CommitFailure::Partial(reason)) => {
                warn!(tx = %self.id, reason = %reason, "partial commit; affected roots need a rebuild");
                Err(KernelError::PartialCommit { tx: self.id, reason })
            }
        }
    }

    fn commit_components(&self, scope: &TxScope, storage: Option<&StorageSession>) -> Result<(), CommitFailure> {
        let now = self.ctx.now();
        let mut intent = None;
        if let Some(storage) = storage {
            let staged = storage
                .prepare()
                .map_err(KernelError::from)
                .and_then(|()| storage.touched_roots().map_err(KernelError::from))
                .and_then(|roots| self.ctx.intents.begin(self.id, &roots, now).map(|id| (id, roots)));
            let (id, roots) = match staged {
                Ok(staged) => staged,
                Err(e) => return Err(self.undo(scope, Some(storage), e)),
            };
            intent = Some(id);
            if let Err(e) = storage.commit(now) {
                let failure = self.undo(scope, Some(storage), e.into());
                if let CommitFailure::Undone(cause) = failure {
                    return Err(self.settle_reverted(scope, id, &roots, cause));
                }
                return Err(failure);
            }
        }

        let indexes = [
            ("containment", self.ctx.containment.commit(scope)),
            ("reference", self.ctx.references.commit(scope)),
            ("membership", self.ctx.membership.commit(scope)),
        ];
        let failures: Vec<String> = indexes
            .into_iter()
            .filter_map(|(name, result)| result.err().map(|e| format!("{name} index: {e}")))
            .collect();
        if !failures.is_empty() {
            for failure in &failures {
                error!(tx = %self.id, failure = %failure, "index commit failed after store commit");
            }
            self.rollback_indexes(scope);
            return Err(CommitFailure::Partial(failures.join("; ")));
        }

        if let Some(storage) = storage {
            match storage.committed_objects() {
                Ok(objects) => {
                    if let Err(e) = self.ctx.reader.invalidate(&objects) {
                        warn!(tx = %self.id, error = %e, "failed to refresh read sessions");
                    }
                }
                Err(e) => warn!(tx = %self.id, error = %e, "failed to list committed objects"),
            }
        }
        if let Some(id) = intent {
            self.complete_intent(id);
        }
        if let Err(e) = self.ctx.collaborators.search.commit(scope) {
            warn!(tx = %self.id, error = %e, "search index commit failed");
        }
        if let Err(e) = self.ctx.collaborators.events.emit(self.id) {
            warn!(tx = %self.id, error = %e, "event delivery failed");
        }
        Ok(())
    }

    /// Resolve the intent of a commit whose store changes were reverted.
    /// Short-lived index rows are already committed, so the reverted roots
    /// are re-indexed from the store first; if that fails the intent stays
    /// open for recovery.
    fn settle_reverted(&self, scope: &TxScope, intent: u64, roots: &[ResourceId], cause: KernelError) -> CommitFailure {
        if scope.short_lived {
            if let Err(e) = Rebuilder::new(self.ctx.clone()).rebuild_roots(roots) {
                error!(tx = %self.id, intent, error = %e, "failed to re-index reverted roots");
                return CommitFailure::Partial(format!("{cause}; re-index: {e}"));
            }
        }
        self.complete_intent(intent);
        CommitFailure::Undone(cause)
    }

    fn complete_intent(&self, id: u64) {
        if let Err(e) = self.ctx.intents.complete(id) {
            warn!(tx = %self.id, intent = id, error = %e, "failed to record intent completion");
        }
    }

    /// Roll back after a failed commit step. A store that cannot revert
    /// roots it already committed leaves a partial commit behind.
    fn undo(&self, scope: &TxScope, storage: Option<&StorageSession>, cause: KernelError) -> CommitFailure {
        error!(tx = %self.id, error = %cause, "commit failed; rolling back");
        let failures = self.rollback_components(scope, storage);
        let store_failed = failures.iter().any(|f| f.starts_with("store"));
        if store_failed {
            CommitFailure::Partial(format!("{cause}; rollback: {}", failures.join("; ")))
        } else {
            CommitFailure::Undone(cause)
        }
    }

    /// Discard pending work, whatever state the transaction is in.
    pub fn rollback(&self) -> KernelResult<()> {
        let (scope, storage) = {
            let mut inner = self.lock()?;
            match inner.state {
                TxState::RolledBack | TxState::Failed => return Ok(()),
                TxState::Open => {}
                other => return Err(self.state_error(other, "roll back")),
            }
            inner.state = TxState::RolledBack;
            (self.scope_of(&inner), inner.storage.clone())
        };
        let failures = self.rollback_components(&scope, storage.as_deref());
        if let Err(e) = self.ctx.locks.release_all(self.id) {
            error!(tx = %self.id, error = %e, "failed to release locks");
        }
        if failures.is_empty() {
            info!(tx = %self.id, "transaction rolled back");
            Ok(())
        } else {
            Err(KernelError::Runtime(format!(
                "rollback of transaction {} incomplete: {}",
                self.id,
                failures.join("; ")
            )))
        }
    }

    fn rollback_components(&self, scope: &TxScope, storage: Option<&StorageSession>) -> Vec<String> {
        let mut failures = Vec::new();
        if let Some(storage) = storage {
            if let Err(e) = storage.rollback() {
                error!(tx = %self.id, component = "store", error = %e, "rollback failed");
                failures.push(format!("store: {e}"));
            }
        }
        failures.extend(self.rollback_indexes(scope));
        let collaborators = &self.ctx.collaborators;
        for (component, result) in [
            ("search", collaborators.search.rollback(scope)),
            ("events", collaborators.events.clear(self.id)),
        ] {
            if let Err(e) = result {
                error!(tx = %self.id, component, error = %e, "rollback failed");
                failures.push(format!("{component}: {e}"));
            }
        }
        failures
    }

    fn rollback_indexes(&self, scope: &TxScope) -> Vec<String> {
        let mut failures = Vec::new();
        for (component, result) in [
            ("containment", self.ctx.containment.rollback(scope)),
            ("reference", self.ctx.references.rollback(scope)),
            ("membership", self.ctx.membership.rollback(scope)),
        ] {
            if let Err(e) = result {
                error!(tx = %self.id, component, error = %e, "rollback failed");
                failures.push(format!("{component}: {e}"));
            }
        }
        failures
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction").field("id", &self.id).finish()
    }
}

fn session_timeout(ctx: &RepositoryContext) -> Duration {
    let secs = ctx.config.transaction.session_timeout_secs.min(i32::MAX as u64);
    Duration::seconds(secs as i64)
}
