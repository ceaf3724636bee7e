//! Fixed-size digest used as the cache's item key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of shards a [`Hash`] selects between, keyed by its first byte.
pub const SHARD_COUNT: usize = 256;

/// A 16-byte digest identifying one cached item.
///
/// The cache does not compute this digest itself — callers hash whatever
/// they use to name an item (a URL, a content hash, ...) and pass the
/// result in. The first byte selects the shard in every sharded table
/// this crate keeps (metadata shards, per-tier segment-index shards).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash(pub [u8; 16]);

impl Hash {
    /// Index of the shard this hash belongs to, in `0..SHARD_COUNT`.
    #[inline]
    #[must_use]
    pub fn shard(&self) -> usize {
        self.0[0] as usize
    }
}

impl From<[u8; 16]> for Hash {
    fn from(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
