use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use quire_types::{ContentDigest, Instant};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::{ChangeSet, Checkpoint, CommitMode, VersionInfo, VersionNumber, VersionedObjectStore};

type FileMap = BTreeMap<String, ContentDigest>;

#[derive(Clone, Debug)]
struct SealedVersion {
    info: VersionInfo,
    files: FileMap,
}

#[derive(Clone, Debug, Default)]
struct StoredObject {
    versions: Vec<SealedVersion>,
    head: Option<FileMap>,
}

impl StoredObject {
    fn latest(&self) -> Option<&SealedVersion> {
        self.versions.last()
    }

    fn next_number(&self) -> VersionNumber {
        self.latest()
            .map(|v| v.info.number.next())
            .unwrap_or(VersionNumber(1))
    }

    fn files_at(&self, version: Option<VersionNumber>) -> Option<&FileMap> {
        match version {
            None => self.head.as_ref().or_else(|| self.latest().map(|v| &v.files)),
            Some(number) => self
                .versions
                .iter()
                .find(|v| v.info.number == number)
                .map(|v| &v.files),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, StoredObject>,
    /// File bodies keyed by digest, shared across objects and versions.
    blobs: HashMap<ContentDigest, Arc<Vec<u8>>>,
}

/// In-memory versioned object store.
///
/// Intended for tests and embedding. File bodies are content-addressed, so a
/// body that appears in many versions (or many objects) is held once.
#[derive(Debug, Default)]
pub struct InMemoryVersionedStore {
    state: RwLock<State>,
}

impl InMemoryVersionedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct file bodies held.
    pub fn blob_count(&self) -> StoreResult<usize> {
        let state = self.state.read().map_err(StoreError::poisoned)?;
        Ok(state.blobs.len())
    }
}

impl VersionedObjectStore for InMemoryVersionedStore {
    fn contains(&self, object_id: &str) -> StoreResult<bool> {
        let state = self.state.read().map_err(StoreError::poisoned)?;
        Ok(state.objects.contains_key(object_id))
    }

    fn object_ids(&self) -> StoreResult<Vec<String>> {
        let state = self.state.read().map_err(StoreError::poisoned)?;
        Ok(state.objects.keys().cloned().collect())
    }

    fn commit(
        &self,
        object_id: &str,
        changes: &ChangeSet,
        mode: CommitMode,
        at: Instant,
    ) -> StoreResult<VersionNumber> {
        let mut state = self.state.write().map_err(StoreError::poisoned)?;
        let State { objects, blobs } = &mut *state;
        let object = objects.entry(object_id.to_string()).or_default();

        if changes.is_empty() && object.head.is_none() {
            if let Some(latest) = object.latest() {
                return Ok(latest.info.number);
            }
        }

        let mut files = object.files_at(None).cloned().unwrap_or_default();
        for path in &changes.deletes {
            files.remove(path);
        }
        for (path, data) in &changes.writes {
            let digest = ContentDigest::compute(data);
            blobs.entry(digest).or_insert_with(|| Arc::new(data.clone()));
            files.insert(path.clone(), digest);
        }

        let number = object.next_number();
        match mode {
            CommitMode::NewVersion => {
                object.head = None;
                object.versions.push(SealedVersion {
                    info: VersionInfo { number, created: at },
                    files,
                });
            }
            CommitMode::MutableHead => {
                object.head = Some(files);
            }
        }
        debug!(object_id, version = %number, ?mode, writes = changes.writes.len(), deletes = changes.deletes.len(), "object committed");
        Ok(number)
    }

    fn versions(&self, object_id: &str) -> StoreResult<Vec<VersionInfo>> {
        let state = self.state.read().map_err(StoreError::poisoned)?;
        Ok(state
            .objects
            .get(object_id)
            .map(|o| o.versions.iter().map(|v| v.info.clone()).collect())
            .unwrap_or_default())
    }

    fn has_mutable_head(&self, object_id: &str) -> StoreResult<bool> {
        let state = self.state.read().map_err(StoreError::poisoned)?;
        Ok(state.objects.get(object_id).is_some_and(|o| o.head.is_some()))
    }

    fn list_files(&self, object_id: &str, version: Option<VersionNumber>) -> StoreResult<Vec<String>> {
        let state = self.state.read().map_err(StoreError::poisoned)?;
        Ok(state
            .objects
            .get(object_id)
            .and_then(|o| o.files_at(version))
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn read_file(
        &self,
        object_id: &str,
        version: Option<VersionNumber>,
        path: &str,
    ) -> StoreResult<Option<Vec<u8>>> {
        let state = self.state.read().map_err(StoreError::poisoned)?;
        let Some(digest) = state
            .objects
            .get(object_id)
            .and_then(|o| o.files_at(version))
            .and_then(|files| files.get(path))
        else {
            return Ok(None);
        };
        let blob = state.blobs.get(digest).ok_or_else(|| {
            StoreError::Serialization(format!("missing body {digest} for {object_id}/{path}"))
        })?;
        Ok(Some(blob.as_ref().clone()))
    }

    fn checkpoint(&self, object_id: &str) -> StoreResult<Checkpoint> {
        let state = self.state.read().map_err(StoreError::poisoned)?;
        Ok(state
            .objects
            .get(object_id)
            .map(|o| Checkpoint {
                version: o.latest().map(|v| v.info.number),
                head: o.head.clone(),
            })
            .unwrap_or_default())
    }

    fn restore(&self, object_id: &str, checkpoint: &Checkpoint) -> StoreResult<()> {
        let mut state = self.state.write().map_err(StoreError::poisoned)?;
        if checkpoint.is_absent() {
            state.objects.remove(object_id);
            debug!(object_id, "object restored to absent");
            return Ok(());
        }
        if let Some(head) = &checkpoint.head {
            if let Some((path, digest)) = head.iter().find(|(_, d)| !state.blobs.contains_key(*d)) {
                return Err(StoreError::NotFound(format!("body {digest} for {object_id}/{path}")));
            }
        }
        let object = state
            .objects
            .get_mut(object_id)
            .ok_or_else(|| StoreError::NotFound(object_id.to_string()))?;
        if let Some(number) = checkpoint.version {
            if !object.versions.iter().any(|v| v.info.number == number) {
                return Err(StoreError::NotFound(format!("{object_id} {number}")));
            }
        }
        object.versions.retain(|v| checkpoint.version.is_some_and(|n| v.info.number <= n));
        object.head = checkpoint.head.clone();
        debug!(object_id, version = ?checkpoint.version, head = checkpoint.head.is_some(), "object restored");
        Ok(())
    }

    fn purge(&self, object_id: &str) -> StoreResult<bool> {
        let mut state = self.state.write().map_err(StoreError::poisoned)?;
        Ok(state.objects.remove(object_id).is_some())
    }
}
