use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use quire_types::time::truncate_to_second;
use quire_types::{ContentDigest, Instant, ResourceId};
use tracing::{debug, warn};

use crate::config::VersioningPolicy;
use crate::error::{StoreError, StoreResult};
use crate::headers::ResourceHeaders;
use crate::layout;
use crate::traits::{ChangeSet, Checkpoint, CommitMode, VersionInfo, VersionNumber, VersionedObjectStore};

/// Lifecycle of a per-root staged session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Prepared,
    Committed,
    /// Committed and then reverted.
    RolledBack,
    /// Discarded before reaching the store.
    Aborted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Prepared => "prepared",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
enum Staged {
    Write(Vec<u8>),
    Delete,
}

/// Staged change set for one store object (one resource tree).
///
/// Writes are buffered here and are invisible outside the session until
/// [`commit`](Self::commit). Reads with `version = None` see the buffered
/// writes layered over the object's current state.
pub struct ObjectSession {
    object_id: String,
    root: ResourceId,
    backend: Arc<dyn VersionedObjectStore>,
    policy: VersioningPolicy,
    state: SessionState,
    staged: BTreeMap<String, Staged>,
    archival_group: bool,
    version_requested: bool,
    purge: bool,
    /// Object state before commit, used to revert a committed session.
    prior: Option<Checkpoint>,
    committed_version: Option<VersionNumber>,
}

impl ObjectSession {
    pub fn new(root: &ResourceId, backend: Arc<dyn VersionedObjectStore>, policy: VersioningPolicy) -> Self {
        Self {
            object_id: layout::object_id_for(root),
            root: root.as_base(),
            backend,
            policy,
            state: SessionState::Open,
            staged: BTreeMap::new(),
            archival_group: false,
            version_requested: false,
            purge: false,
            prior: None,
            committed_version: None,
        }
    }

    pub fn object_id(&self) -> &str {
        &self.object_id
    }

    pub fn root(&self) -> &ResourceId {
        &self.root
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn has_changes(&self) -> bool {
        !self.staged.is_empty() || self.version_requested || self.purge
    }

    pub fn committed_version(&self) -> Option<VersionNumber> {
        self.committed_version
    }

    // ---- Staging ----

    /// Stage headers and, when given, new content for a resource.
    ///
    /// A declared digest that does not match `content` is rejected here,
    /// before the bytes are buffered.
    pub fn stage_resource(&mut self, headers: &ResourceHeaders, content: Option<&[u8]>) -> StoreResult<()> {
        self.ensure_open("stage")?;
        self.check_root(headers)?;
        if let Some(content) = content {
            verify_digest(headers, content)?;
        }
        if headers.archival_group && headers.is_object_root() {
            self.archival_group = true;
        }

        let headers_path = layout::headers_path(&self.root, &headers.id)?;
        self.staged.insert(headers_path, Staged::Write(headers.to_json()?));
        if let Some(content) = content {
            let content_path = layout::content_path(&self.root, &headers.id, headers.interaction_model)?;
            self.staged.insert(content_path, Staged::Write(content.to_vec()));
        }
        self.purge = false;
        debug!(object_id = %self.object_id, id = %headers.id, has_content = content.is_some(), "staged resource");
        Ok(())
    }

    /// Stage a deletion: the headers become a tombstone and the content goes.
    pub fn stage_delete(&mut self, headers: &ResourceHeaders) -> StoreResult<()> {
        self.ensure_open("stage delete")?;
        self.check_root(headers)?;
        let tombstone = if headers.deleted {
            headers.clone()
        } else {
            headers.clone().into_tombstone(headers.last_modified)
        };
        let headers_path = layout::headers_path(&self.root, &tombstone.id)?;
        let content_path = layout::content_path(&self.root, &tombstone.id, tombstone.interaction_model)?;
        self.staged.insert(headers_path, Staged::Write(tombstone.to_json()?));
        self.staged.insert(content_path, Staged::Delete);
        debug!(object_id = %self.object_id, id = %tombstone.id, "staged delete");
        Ok(())
    }

    /// Stage removal of every trace of a resource. Purging the root purges
    /// the whole store object.
    pub fn stage_purge(&mut self, headers: &ResourceHeaders) -> StoreResult<()> {
        self.ensure_open("stage purge")?;
        self.check_root(headers)?;
        if headers.is_object_root() {
            self.staged.clear();
            self.purge = true;
            debug!(object_id = %self.object_id, "staged object purge");
            return Ok(());
        }
        let headers_path = layout::headers_path(&self.root, &headers.id)?;
        let content_path = layout::content_path(&self.root, &headers.id, headers.interaction_model)?;
        self.staged.insert(headers_path, Staged::Delete);
        self.staged.insert(content_path, Staged::Delete);
        debug!(object_id = %self.object_id, id = %headers.id, "staged purge");
        Ok(())
    }

    /// Ask for the next commit to seal an immutable version.
    pub fn request_version(&mut self) -> StoreResult<()> {
        self.ensure_open("request version")?;
        self.version_requested = true;
        Ok(())
    }

    // ---- Reads ----

    /// Headers of `id` at `version`, or the current state including staged writes.
    pub fn read_headers(&self, id: &ResourceId, version: Option<VersionNumber>) -> StoreResult<ResourceHeaders> {
        let path = layout::headers_path(&self.root, id)?;
        let data = self
            .read_path(&path, version)?
            .ok_or_else(|| StoreError::NotFound(id.full_id()))?;
        ResourceHeaders::from_json(&data)
    }

    /// Content of `id`. `Ok(None)` for tombstones and content-less resources.
    pub fn read_content(&self, id: &ResourceId, version: Option<VersionNumber>) -> StoreResult<Option<Vec<u8>>> {
        let headers = self.read_headers(id, version)?;
        if headers.deleted {
            return Ok(None);
        }
        let path = layout::content_path(&self.root, &headers.id, headers.interaction_model)?;
        self.read_path(&path, version)
    }

    /// The sealed version a memento id refers to; `None` for other ids.
    pub fn version_for(&self, id: &ResourceId) -> StoreResult<Option<VersionNumber>> {
        match id.memento_instant() {
            Some(instant) => self.resolve_version(instant).map(Some),
            None => Ok(None),
        }
    }

    /// Map a memento instant onto a sealed version.
    ///
    /// Memento instants carry whole seconds, so the latest version sealed
    /// within that second wins.
    pub fn resolve_version(&self, instant: Instant) -> StoreResult<VersionNumber> {
        let instant = truncate_to_second(instant);
        self.backend
            .versions(&self.object_id)?
            .into_iter()
            .rev()
            .find(|v| truncate_to_second(v.created) == instant)
            .map(|v| v.number)
            .ok_or_else(|| StoreError::NotFound(format!("{} has no version at {instant}", self.root)))
    }

    /// Sealed versions in which `id`'s headers changed while it was live.
    pub fn versions_of(&self, id: &ResourceId) -> StoreResult<Vec<VersionInfo>> {
        let path = layout::headers_path(&self.root, id)?;
        let mut versions = Vec::new();
        let mut previous: Option<Vec<u8>> = None;
        for info in self.backend.versions(&self.object_id)? {
            let current = self.backend.read_file(&self.object_id, Some(info.number), &path)?;
            if let Some(data) = &current {
                if current != previous && !ResourceHeaders::from_json(data)?.deleted {
                    versions.push(info);
                }
            }
            previous = current;
        }
        Ok(versions)
    }

    /// Headers of every resource stored in the object.
    pub fn all_headers(&self, version: Option<VersionNumber>) -> StoreResult<Vec<ResourceHeaders>> {
        let mut paths: Vec<String> = if self.purge && version.is_none() {
            Vec::new()
        } else {
            self.backend.list_files(&self.object_id, version)?
        };
        if version.is_none() {
            for (path, staged) in &self.staged {
                match staged {
                    Staged::Write(_) => paths.push(path.clone()),
                    Staged::Delete => paths.retain(|p| p != path),
                }
            }
        }
        paths.sort();
        paths.dedup();
        paths
            .iter()
            .filter(|p| layout::is_headers_path(p))
            .filter_map(|p| self.read_path(p, version).transpose())
            .map(|data| data.and_then(|d| ResourceHeaders::from_json(&d)))
            .collect()
    }

    fn read_path(&self, path: &str, version: Option<VersionNumber>) -> StoreResult<Option<Vec<u8>>> {
        if version.is_none() {
            match self.staged.get(path) {
                Some(Staged::Write(data)) => return Ok(Some(data.clone())),
                Some(Staged::Delete) => return Ok(None),
                None if self.purge => return Ok(None),
                None => {}
            }
        }
        self.backend.read_file(&self.object_id, version, path)
    }

    // ---- Commit protocol ----

    /// Validate the full staged change set. Failure aborts this session only.
    pub fn prepare(&mut self) -> StoreResult<()> {
        match self.state {
            SessionState::Open => {}
            SessionState::Prepared => {
                return Err(StoreError::Conflict(format!("{} is already prepared", self.object_id)));
            }
            other => return Err(self.invalid_state(other, "prepare")),
        }
        if let Err(e) = self.validate() {
            warn!(object_id = %self.object_id, error = %e, "prepare failed; discarding staged changes");
            self.abort();
            return Err(e);
        }
        self.state = SessionState::Prepared;
        Ok(())
    }

    fn validate(&self) -> StoreResult<()> {
        let mut content_paths: BTreeMap<String, &ResourceHeaders> = BTreeMap::new();
        let mut parsed = Vec::new();
        for (path, staged) in &self.staged {
            if let (true, Staged::Write(data)) = (layout::is_headers_path(path), staged) {
                let headers = ResourceHeaders::from_json(data).map_err(|e| StoreError::InvalidChangeSet {
                    object_id: self.object_id.clone(),
                    reason: format!("unreadable headers at {path}: {e}"),
                })?;
                self.check_root(&headers)?;
                parsed.push(headers);
            }
        }
        for headers in &parsed {
            let path = layout::content_path(&self.root, &headers.id, headers.interaction_model)?;
            content_paths.insert(path, headers);
        }
        for (path, staged) in &self.staged {
            let Staged::Write(data) = staged else { continue };
            if layout::is_headers_path(path) {
                continue;
            }
            let headers = content_paths.get(path).ok_or_else(|| StoreError::InvalidChangeSet {
                object_id: self.object_id.clone(),
                reason: format!("content at {path} has no staged headers"),
            })?;
            verify_digest(headers, data)?;
        }
        Ok(())
    }

    /// Apply the prepared change set. Returns the version now current.
    pub fn commit(&mut self, at: Instant) -> StoreResult<VersionNumber> {
        if self.state != SessionState::Prepared {
            return Err(self.invalid_state(self.state, "commit"));
        }
        let result = self.apply(at);
        match result {
            Ok(version) => {
                self.state = SessionState::Committed;
                self.committed_version = Some(version);
                self.staged.clear();
                debug!(object_id = %self.object_id, %version, "object session committed");
                Ok(version)
            }
            Err(e) => {
                self.state = SessionState::Aborted;
                Err(StoreError::CommitFailed {
                    object_id: self.object_id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn apply(&mut self, at: Instant) -> StoreResult<VersionNumber> {
        let prior = self.backend.checkpoint(&self.object_id)?;
        let prior_version = prior.version;
        self.prior = Some(prior);
        if self.purge {
            self.backend.purge(&self.object_id)?;
            return Ok(prior_version.unwrap_or(VersionNumber(0)));
        }
        let mut changes = ChangeSet::default();
        for (path, staged) in std::mem::take(&mut self.staged) {
            match staged {
                Staged::Write(data) => {
                    changes.writes.insert(path, data);
                }
                Staged::Delete => {
                    changes.deletes.insert(path);
                }
            }
        }
        let archival_group = self.archival_group || self.root_is_archival_group()?;
        let mode = if self.policy == VersioningPolicy::AutoVersion || archival_group || self.version_requested {
            CommitMode::NewVersion
        } else {
            CommitMode::MutableHead
        };
        self.backend.commit(&self.object_id, &changes, mode, at)
    }

    fn root_is_archival_group(&self) -> StoreResult<bool> {
        let path = layout::headers_path(&self.root, &self.root)?;
        match self.backend.read_file(&self.object_id, None, &path)? {
            Some(data) => Ok(ResourceHeaders::from_json(&data)?.archival_group),
            None => Ok(false),
        }
    }

    /// Discard staged changes, or revert an already committed session.
    pub fn rollback(&mut self) -> StoreResult<()> {
        match self.state {
            SessionState::Open | SessionState::Prepared => {
                self.abort();
                Ok(())
            }
            SessionState::Committed => {
                if self.purge {
                    return Err(StoreError::RollbackFailed(format!(
                        "{} was purged and cannot be restored",
                        self.object_id
                    )));
                }
                let prior = self.prior.clone().unwrap_or_default();
                self.backend.restore(&self.object_id, &prior)?;
                self.state = SessionState::RolledBack;
                debug!(object_id = %self.object_id, prior = ?prior.version, "committed session reverted");
                Ok(())
            }
            SessionState::RolledBack | SessionState::Aborted => Ok(()),
        }
    }

    fn abort(&mut self) {
        self.staged.clear();
        self.purge = false;
        self.version_requested = false;
        self.state = SessionState::Aborted;
    }

    fn ensure_open(&self, operation: &'static str) -> StoreResult<()> {
        if self.state == SessionState::Open {
            Ok(())
        } else {
            Err(self.invalid_state(self.state, operation))
        }
    }

    fn check_root(&self, headers: &ResourceHeaders) -> StoreResult<()> {
        let base = headers.id.as_base();
        if headers.root != self.root || !(base == self.root || self.root.is_ancestor_of(&base)) {
            return Err(StoreError::OutsideRoot {
                id: headers.id.clone(),
                root: self.root.clone(),
            });
        }
        Ok(())
    }

    fn invalid_state(&self, state: SessionState, operation: &'static str) -> StoreError {
        StoreError::InvalidState {
            object_id: self.object_id.clone(),
            state: state.to_string(),
            operation,
        }
    }
}

impl fmt::Debug for ObjectSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectSession")
            .field("object_id", &self.object_id)
            .field("state", &self.state)
            .field("staged", &self.staged.len())
            .finish()
    }
}

fn verify_digest(headers: &ResourceHeaders, content: &[u8]) -> StoreResult<()> {
    if let Some(expected) = headers.content_digest {
        let computed = ContentDigest::compute(content);
        if computed != expected {
            return Err(StoreError::DigestMismatch {
                id: headers.id.clone(),
                expected,
                computed,
            });
        }
    }
    Ok(())
}
