use std::time::Duration;

use serde::{Deserialize, Serialize};

/// When commits to a store object produce immutable versions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersioningPolicy {
    /// Every commit seals a new immutable version.
    #[default]
    AutoVersion,
    /// Commits accumulate on a mutable head until a version is requested.
    OnDemand,
}

/// Configuration for the object version store.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub versioning: VersioningPolicy,
    /// Idle time after which a cached read-only object session is closed.
    pub read_session_idle_secs: u64,
    /// Upper bound on cached read-only object sessions.
    pub max_read_sessions: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            versioning: VersioningPolicy::AutoVersion,
            read_session_idle_secs: 600,
            max_read_sessions: 512,
        }
    }
}

impl StoreConfig {
    pub fn read_session_idle(&self) -> Duration {
        Duration::from_secs(self.read_session_idle_secs)
    }

    pub fn auto_versioning(&self) -> bool {
        self.versioning == VersioningPolicy::AutoVersion
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = StoreConfig::default();
        assert!(c.auto_versioning());
        assert_eq!(c.read_session_idle(), Duration::from_secs(600));
        assert_eq!(c.max_read_sessions, 512);
    }
}
