#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};

use quire_kernel::{
    AuthorizationCache, Collaborators, CreateRequest, InMemoryEventAccumulator, NoOpSearchIndex, QuireConfig,
    Repository, Transaction,
};
use quire_store::{
    ChangeSet, Checkpoint, CommitMode, InMemoryMappingIndex, InMemoryVersionedStore, StoreError, StoreResult, VersionInfo,
    VersionNumber, VersionedObjectStore,
};
use quire_types::{Graph, Instant, InteractionModel, ManualClock, ResourceId};

pub fn at(secs: i64) -> Instant {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn id(s: &str) -> ResourceId {
    ResourceId::parse(s).unwrap()
}

/// Authorization cache that remembers what it was told to forget.
#[derive(Default)]
pub struct RecordingAuthorization {
    pub invalidated: Mutex<Vec<ResourceId>>,
}

impl AuthorizationCache for RecordingAuthorization {
    fn invalidate(&self, id: &ResourceId) {
        self.invalidated.lock().unwrap().push(id.clone());
    }
}

/// Store that can be told to fail commits or reverts of chosen objects.
#[derive(Default)]
pub struct FlakyStore {
    inner: InMemoryVersionedStore,
    fail_commit: Mutex<BTreeSet<String>>,
    fail_rollback: Mutex<BTreeSet<String>>,
}

impl FlakyStore {
    pub fn fail_commit_of(&self, id: &ResourceId) {
        self.fail_commit.lock().unwrap().insert(id.full_id());
    }

    pub fn fail_rollback_of(&self, id: &ResourceId) {
        self.fail_rollback.lock().unwrap().insert(id.full_id());
    }

    pub fn heal(&self) {
        self.fail_commit.lock().unwrap().clear();
        self.fail_rollback.lock().unwrap().clear();
    }
}

impl VersionedObjectStore for FlakyStore {
    fn contains(&self, object_id: &str) -> StoreResult<bool> {
        self.inner.contains(object_id)
    }

    fn object_ids(&self) -> StoreResult<Vec<String>> {
        self.inner.object_ids()
    }

    fn commit(&self, object_id: &str, changes: &ChangeSet, mode: CommitMode, at: Instant) -> StoreResult<VersionNumber> {
        if self.fail_commit.lock().unwrap().contains(object_id) {
            return Err(StoreError::Io(std::io::Error::other("disk full")));
        }
        self.inner.commit(object_id, changes, mode, at)
    }

    fn versions(&self, object_id: &str) -> StoreResult<Vec<VersionInfo>> {
        self.inner.versions(object_id)
    }

    fn has_mutable_head(&self, object_id: &str) -> StoreResult<bool> {
        self.inner.has_mutable_head(object_id)
    }

    fn list_files(&self, object_id: &str, version: Option<VersionNumber>) -> StoreResult<Vec<String>> {
        self.inner.list_files(object_id, version)
    }

    fn read_file(&self, object_id: &str, version: Option<VersionNumber>, path: &str) -> StoreResult<Option<Vec<u8>>> {
        self.inner.read_file(object_id, version, path)
    }

    fn checkpoint(&self, object_id: &str) -> StoreResult<Checkpoint> {
        self.inner.checkpoint(object_id)
    }

    fn restore(&self, object_id: &str, checkpoint: &Checkpoint) -> StoreResult<()> {
        if self.fail_rollback.lock().unwrap().contains(object_id) {
            return Err(StoreError::Io(std::io::Error::other("store unreachable")));
        }
        self.inner.restore(object_id, checkpoint)
    }

    fn purge(&self, object_id: &str) -> StoreResult<bool> {
        self.inner.purge(object_id)
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub store: Arc<FlakyStore>,
    pub events: Arc<InMemoryEventAccumulator>,
    pub authorization: Arc<RecordingAuthorization>,
    pub repo: Repository,
}

pub fn harness() -> Harness {
    harness_with(QuireConfig::default())
}

pub fn harness_with(config: QuireConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(at(0)));
    let store = Arc::new(FlakyStore::default());
    let events = Arc::new(InMemoryEventAccumulator::new());
    let authorization = Arc::new(RecordingAuthorization::default());
    let collaborators = Collaborators {
        search: Arc::new(NoOpSearchIndex),
        events: events.clone(),
        authorization: authorization.clone(),
    };
    let repo = Repository::with_backend(
        config,
        clock.clone(),
        store.clone(),
        Arc::new(InMemoryMappingIndex::new()),
        collaborators,
    )
    .unwrap();
    Harness {
        clock,
        store,
        events,
        authorization,
        repo,
    }
}

impl Harness {
    pub fn long_running(&self) -> Arc<Transaction> {
        self.repo.begin_long_running().unwrap()
    }

    /// Create `path` in its own short-lived transaction.
    pub fn create(&self, path: &str, request: CreateRequest) {
        let tx = self.repo.begin().unwrap();
        self.repo.service().create(&tx, "alice", &id(path), request).unwrap();
    }

    pub fn create_container(&self, path: &str, model: InteractionModel, graph: Graph) {
        self.create(path, CreateRequest::container(model, graph));
    }

    pub fn members(&self, subject: &ResourceId) -> Vec<(String, String)> {
        let mut triples: Vec<(String, String)> = self
            .repo
            .service()
            .membership_of(None, subject)
            .unwrap()
            .into_iter()
            .map(|t| (t.predicate, t.object.as_iri().unwrap_or_default().to_string()))
            .collect();
        triples.sort();
        triples
    }
}
