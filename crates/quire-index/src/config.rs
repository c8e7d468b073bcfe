use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Relational platform the index tables are rendered for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbPlatform {
    #[default]
    H2,
    Postgres,
    MySql,
    MariaDb,
}

impl DbPlatform {
    pub const ALL: [DbPlatform; 4] = [Self::H2, Self::Postgres, Self::MySql, Self::MariaDb];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::H2 => "h2",
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::MariaDb => "mariadb",
        }
    }
}

impl fmt::Display for DbPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbPlatform {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "h2" => Ok(Self::H2),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" => Ok(Self::MySql),
            "mariadb" => Ok(Self::MariaDb),
            other => Err(IndexError::UnknownPlatform(other.to_string())),
        }
    }
}

/// Configuration for the shadow indexes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Rows fetched per page by paginated reads.
    pub page_size: usize,
    pub platform: DbPlatform,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            page_size: 50_000,
            platform: DbPlatform::default(),
        }
    }
}
