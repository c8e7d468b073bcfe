use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Unique identifier for a transaction (UUID v7 for time-ordering).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(uuid::Uuid);

impl TxId {
    /// Generate a new time-ordered transaction ID (UUID v7).
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7())
    }

    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }

    /// Short representation (first 8 characters of UUID).
    pub fn short_id(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for TxId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| TypeError::InvalidTxId(e.to_string()))
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.short_id())
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What stores and indexes need to know about the calling transaction.
///
/// Short-lived scopes write straight to committed state; long-running
/// scopes stage pending rows keyed by `id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TxScope {
    pub id: TxId,
    pub short_lived: bool,
}

impl TxScope {
    pub fn long_running(id: TxId) -> Self {
        Self {
            id,
            short_lived: false,
        }
    }

    pub fn short_lived(id: TxId) -> Self {
        Self {
            id,
            short_lived: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_time_ordered() {
        let a = TxId::new();
        let b = TxId::new();
        assert_ne!(a, b);
        assert!(a < b);
    }

    #[test]
    fn parse_roundtrip() {
        let id = TxId::new();
        let parsed: TxId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!("not-a-uuid".parse::<TxId>().is_err());
    }

    #[test]
    fn short_id_is_eight_chars() {
        assert_eq!(TxId::new().short_id().len(), 8);
    }
}
