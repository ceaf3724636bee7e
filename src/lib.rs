//! # tiercache
//!
//! An embeddable, multi-tier, segmented blob cache for large opaque
//! payloads keyed by a fixed-size digest.
//!
//! Items are divided into fixed-size segments; segments are stored in
//! append-only block files on one or more storage tiers (typically
//! memory, SSD, HDD) that differ only in directory and capacity. A
//! per-item auxiliary record carries application-defined metadata used
//! to support bulk, predicate-driven deletion.
//!
//! This crate is the core of such a cache: the metadata plane (sharded
//! item/aux tables with per-shard locking, durable snapshotting, and
//! parallel batch predicate deletion) and the block store (mmap-backed,
//! append-only, block-rotation allocator with capacity-driven
//! reclamation). It does not provide a network interface, a CLI, or a
//! promotion/eviction policy between tiers — composing tiers and
//! choosing what runs where is left to the embedder.
//!
//! ## Quick start
//!
//! ```rust
//! use tiercache::{Auxiliary, Cache, CacheConfig, DeviceConfig, Hash};
//! use std::collections::HashMap;
//! use std::path::Path;
//!
//! #[derive(Default)]
//! struct ContentTypeIndex(HashMap<Hash, u32>);
//!
//! impl Auxiliary for ContentTypeIndex {
//!     type Payload = u32;
//!     fn add(&mut self, key: Hash, payload: u32) { self.0.insert(key, payload); }
//!     fn get(&self, key: Hash) -> Option<&u32> { self.0.get(&key) }
//!     fn del(&mut self, key: Hash) { self.0.remove(&key); }
//!     fn load(&mut self, _path: &Path) {}
//!     fn dump(&self, _path: &Path) {}
//! }
//!
//! # fn main() -> tiercache::error::Result<()> {
//! # let dir = tempfile::tempdir().unwrap();
//! let config = CacheConfig {
//!     meta_dir: dir.path().join("meta"),
//!     action_parallel: 4,
//!     devices: vec![DeviceConfig {
//!         name: "mem".into(),
//!         dir: dir.path().join("mem"),
//!         capacity: 64 * 1024 * 1024,
//!     }],
//! };
//!
//! let cache: Cache<ContentTypeIndex> =
//!     Cache::open(&config, Box::new(|_shard| ContentTypeIndex::default()))?;
//!
//! let key = Hash([0u8; 16]);
//! cache.add_item(key, 0, 13, 1 /* e.g. a content-type tag */);
//! cache.add_segment(key, 0, b"this is 1.jpg");
//!
//! let (data, misses) = cache.get(key, 0, -1);
//! assert_eq!(data, vec![b"this is 1.jpg".to_vec()]);
//! assert!(misses.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod aux;
pub mod cache;
pub mod config;
pub mod device;
pub mod error;
pub mod hash;
pub mod meta;
pub mod parallel;
pub mod storage;
pub mod util;

pub use aux::{Auxiliary, AuxFactory};
pub use cache::{Cache, Matcher};
pub use config::{CacheConfig, DeviceConfig};
pub use device::{Device, Locator};
pub use error::{Error, Result};
pub use hash::Hash;
pub use meta::Item;

/// On-disk format tag embedded in every snapshot and block filename.
/// Bumping this invalidates all prior on-disk state; there is no migration.
pub const FORMAT_VERSION: u64 = 1000;
