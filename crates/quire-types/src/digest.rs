use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

const PREFIX: &str = "blake3:";

/// BLAKE3 digest of a content file, rendered as `blake3:<hex>`.
///
/// The store addresses file bodies by digest, so identical content is kept
/// once no matter how many versions reference it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    /// Digest of raw bytes.
    pub fn compute(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn from_hash(hash: [u8; 32]) -> Self {
        Self(hash)
    }

    /// Verify that `data` produces this digest.
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl FromStr for ContentDigest {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| TypeError::InvalidDigest(format!("missing {PREFIX} prefix: {s}")))?;
        let bytes = hex::decode(hex_part).map_err(|e| TypeError::InvalidDigest(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| TypeError::InvalidDigest(format!("expected 32 bytes, got {}", b.len())))?;
        Ok(Self(arr))
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.to_string()
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.to_hex())
    }
}

impl fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentDigest({})", self.short_hex())
    }
}
