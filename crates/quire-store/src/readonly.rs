use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant as MonoInstant};

use quire_types::{Instant, ResourceId};
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::headers::ResourceHeaders;
use crate::mapping::MappingIndex;
use crate::session::ObjectSession;
use crate::storage::ResourceReader;
use crate::traits::{VersionInfo, VersionNumber, VersionedObjectStore};

struct Cached {
    session: Arc<ObjectSession>,
    last_used: MonoInstant,
}

/// Non-transactional reader over committed state.
///
/// Per-object sessions are cached and reused. A session idle for longer
/// than the configured window is dropped, and once the cache is full the
/// least recently used one makes room.
pub struct ReadOnlySession {
    backend: Arc<dyn VersionedObjectStore>,
    mapping: Arc<dyn MappingIndex>,
    config: StoreConfig,
    cache: Mutex<HashMap<String, Cached>>,
}

impl ReadOnlySession {
    pub fn new(backend: Arc<dyn VersionedObjectStore>, mapping: Arc<dyn MappingIndex>, config: StoreConfig) -> Self {
        Self {
            backend,
            mapping,
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Number of cached per-object sessions.
    pub fn open_sessions(&self) -> StoreResult<usize> {
        Ok(self.cache.lock().map_err(StoreError::poisoned)?.len())
    }

    /// Drop sessions idle for at least the configured window.
    pub fn evict_idle(&self) -> StoreResult<usize> {
        let mut cache = self.cache.lock().map_err(StoreError::poisoned)?;
        Ok(evict_older_than(&mut cache, self.config.read_session_idle()))
    }

    /// Forget every cached session, e.g. after a commit touched their objects.
    pub fn invalidate(&self, object_ids: &[String]) -> StoreResult<()> {
        let mut cache = self.cache.lock().map_err(StoreError::poisoned)?;
        for object_id in object_ids {
            cache.remove(object_id);
        }
        Ok(())
    }

    fn session_for(&self, id: &ResourceId) -> StoreResult<Arc<ObjectSession>> {
        let mapping = self.mapping.require(None, id)?;
        let mut cache = self.cache.lock().map_err(StoreError::poisoned)?;
        let now = MonoInstant::now();
        if let Some(cached) = cache.get_mut(&mapping.object_id) {
            cached.last_used = now;
            return Ok(cached.session.clone());
        }

        evict_older_than(&mut cache, self.config.read_session_idle());
        if cache.len() >= self.config.max_read_sessions.max(1) {
            let lru = cache
                .iter()
                .min_by_key(|(_, c)| c.last_used)
                .map(|(k, _)| k.clone());
            if let Some(key) = lru {
                cache.remove(&key);
            }
        }
        let session = Arc::new(ObjectSession::new(&mapping.root_id, self.backend.clone(), self.config.versioning));
        cache.insert(
            mapping.object_id,
            Cached {
                session: session.clone(),
                last_used: now,
            },
        );
        Ok(session)
    }
}

fn evict_older_than(cache: &mut HashMap<String, Cached>, idle: Duration) -> usize {
    let before = cache.len();
    cache.retain(|_, c| c.last_used.elapsed() < idle);
    let evicted = before - cache.len();
    if evicted > 0 {
        debug!(evicted, "evicted idle read sessions");
    }
    evicted
}

impl ResourceReader for ReadOnlySession {
    fn read_headers(&self, id: &ResourceId) -> StoreResult<ResourceHeaders> {
        let session = self.session_for(id)?;
        session.read_headers(&id.without_memento(), session.version_for(id)?)
    }

    fn read_content(&self, id: &ResourceId) -> StoreResult<Option<Vec<u8>>> {
        let session = self.session_for(id)?;
        session.read_content(&id.without_memento(), session.version_for(id)?)
    }

    fn list_versions(&self, id: &ResourceId) -> StoreResult<Vec<VersionInfo>> {
        self.session_for(id)?.versions_of(&id.without_memento())
    }

    fn resolve_version(&self, id: &ResourceId, instant: Instant) -> StoreResult<VersionNumber> {
        self.session_for(id)?.resolve_version(instant)
    }
}
