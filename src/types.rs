//! Header identity types shared by every stage of the monitor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of the hex prefix used in human-facing messages ("0x" + 16 digits)
pub const HASH_PREFIX_LEN: usize = 18;

/// Fixed-width 32-byte header identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    /// Build a hash from raw bytes
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Full `0x`-prefixed lowercase hex form
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Truncated prefix for log lines and failure messages
    pub fn short(&self) -> String {
        let mut full = self.to_hex();
        full.truncate(HASH_PREFIX_LEN);
        full
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({}...)", self.short())
    }
}

impl FromStr for BlockHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| format!("invalid hash {s:?}: {e}"))?;
        let fixed: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            format!("invalid hash {s:?}: expected 32 bytes, got {}", b.len())
        })?;
        Ok(Self(fixed))
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Minimal identity of one delivered block header.
///
/// Created once per delivered event and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub number: u64,
    pub hash: BlockHash,
    pub parent_hash: BlockHash,
    pub observed_at: DateTime<Utc>,
}

impl BlockRecord {
    /// Record a header observed now
    pub fn new(number: u64, hash: BlockHash, parent_hash: BlockHash) -> Self {
        Self::observed(number, hash, parent_hash, Utc::now())
    }

    /// Record a header with an explicit observation time
    pub fn observed(
        number: u64,
        hash: BlockHash,
        parent_hash: BlockHash,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            number,
            hash,
            parent_hash,
            observed_at,
        }
    }
}

impl fmt::Display for BlockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} ({}... parent {}...)",
            self.number,
            self.hash.short(),
            self.parent_hash.short()
        )
    }
}

/// Which of the two monitored feeds a value belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedId {
    A,
    B,
}

impl FeedId {
    pub fn other(self) -> Self {
        match self {
            FeedId::A => FeedId::B,
            FeedId::B => FeedId::A,
        }
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedId::A => f.write_str("A"),
            FeedId::B => f.write_str("B"),
        }
    }
}
