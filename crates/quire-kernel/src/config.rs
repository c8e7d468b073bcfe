use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use quire_index::IndexConfig;
use quire_store::StoreConfig;

use crate::error::{KernelError, KernelResult};

/// Transaction lifetime and locking settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Idle time after which an open transaction expires.
    pub session_timeout_secs: u64,
    /// How long a lock request waits for another transaction. Zero fails fast.
    pub lock_wait_ms: u64,
    /// How often the background sweeper runs. Zero disables it.
    pub sweep_interval_ms: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 180,
            lock_wait_ms: 0,
            sweep_interval_ms: 60_000,
        }
    }
}

impl TransactionConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Top-level repository configuration, loaded from TOML.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuireConfig {
    pub transaction: TransactionConfig,
    pub store: StoreConfig,
    pub index: IndexConfig,
    /// Commit intent log file. Without one, intents are kept in memory.
    pub intent_log: Option<PathBuf>,
}

impl QuireConfig {
    pub fn from_toml_str(text: &str) -> KernelResult<Self> {
        toml::from_str(text).map_err(|e| KernelError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> KernelResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| KernelError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> KernelResult<String> {
        toml::to_string_pretty(self).map_err(|e| KernelError::Config(e.to_string()))
    }
}
