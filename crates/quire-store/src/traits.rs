use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use quire_types::{ContentDigest, Instant};

use crate::error::StoreResult;

/// Monotonic per-object version number, starting at 1.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionNumber(pub u64);

impl VersionNumber {
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A sealed, immutable version of a store object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub number: VersionNumber,
    pub created: Instant,
}

/// File-level changes applied to a store object in one commit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub writes: BTreeMap<String, Vec<u8>>,
    pub deletes: BTreeSet<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty()
    }
}

/// State of an object just before a commit: its latest sealed version and
/// the file digests of its mutable head. Restoring it undoes that commit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Checkpoint {
    pub version: Option<VersionNumber>,
    pub head: Option<BTreeMap<String, ContentDigest>>,
}

impl Checkpoint {
    /// The object did not exist.
    pub fn is_absent(&self) -> bool {
        self.version.is_none() && self.head.is_none()
    }
}

/// How a commit lands in the object's history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitMode {
    /// Seal the result (including any mutable head) as a new version.
    NewVersion,
    /// Apply on top of the mutable head without sealing.
    MutableHead,
}

/// Contract of the external versioned, content-addressable object store.
///
/// One store object holds one resource tree. Implementations must make each
/// `commit` atomic per object: either every file change lands or none do.
/// `version = None` on reads means "current state": the mutable head if one
/// exists, otherwise the latest sealed version.
pub trait VersionedObjectStore: Send + Sync {
    /// Whether the object exists.
    fn contains(&self, object_id: &str) -> StoreResult<bool>;

    /// Every object id in the store, sorted.
    fn object_ids(&self) -> StoreResult<Vec<String>>;

    /// Apply `changes` and return the version now current.
    ///
    /// In [`CommitMode::MutableHead`] the returned number is the one the head
    /// will receive when it is sealed.
    fn commit(
        &self,
        object_id: &str,
        changes: &ChangeSet,
        mode: CommitMode,
        at: Instant,
    ) -> StoreResult<VersionNumber>;

    /// Sealed versions, oldest first.
    fn versions(&self, object_id: &str) -> StoreResult<Vec<VersionInfo>>;

    /// Whether unsealed changes sit on the mutable head.
    fn has_mutable_head(&self, object_id: &str) -> StoreResult<bool>;

    /// Paths present in the given version (or current state).
    fn list_files(&self, object_id: &str, version: Option<VersionNumber>) -> StoreResult<Vec<String>>;

    /// Read one file. `Ok(None)` when the object or file does not exist.
    fn read_file(
        &self,
        object_id: &str,
        version: Option<VersionNumber>,
        path: &str,
    ) -> StoreResult<Option<Vec<u8>>>;

    /// Capture the object's current state for a later [`restore`](Self::restore).
    fn checkpoint(&self, object_id: &str) -> StoreResult<Checkpoint>;

    /// Put the object back to `checkpoint`: later versions are discarded and
    /// the mutable head becomes the captured one. An absent checkpoint
    /// removes the object.
    fn restore(&self, object_id: &str, checkpoint: &Checkpoint) -> StoreResult<()>;

    /// Remove the object and its history. Returns `true` if it existed.
    fn purge(&self, object_id: &str) -> StoreResult<bool>;

    /// Latest sealed version, if any.
    fn latest_version(&self, object_id: &str) -> StoreResult<Option<VersionNumber>> {
        Ok(self.versions(object_id)?.last().map(|v| v.number))
    }
}
