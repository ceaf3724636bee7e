//! The metadata plane: 256 sharded item/aux tables with per-shard
//! locking, durable snapshotting, and parallel batch predicate deletion.

use crate::aux::{Auxiliary, AuxFactory};
use crate::error::Result;
use crate::hash::{Hash, SHARD_COUNT};
use crate::parallel::{build_pool, for_each_shard};
use crate::util::{load_or_default, safe_dump};
use crate::FORMAT_VERSION;
use parking_lot::RwLock;
use rayon::ThreadPool;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// The per-item record a metadata shard owns.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Item {
    /// Absolute expiry time in seconds. Informational only — nothing in
    /// this crate enforces it; no background expiry runs.
    pub expire: i64,
    /// Total byte length of the logical blob.
    pub size: i64,
    /// Fixed segment length in bytes, chosen at item creation and
    /// immutable for the item's lifetime.
    pub seg_size: u32,
    /// Segment indices already written. `i` covers
    /// `[i * seg_size, (i + 1) * seg_size)`; the last segment may be short.
    pub segments: HashSet<u32>,
}

const MAX_SEG_SIZE: i64 = 1024 * 1024 * 64;
const MIN_SEG_SIZE: i64 = 1024 * 1024;
const DEFAULT_SEG_COUNT: i64 = 1024;

/// `clamp(size / 1024, 1 MiB, 64 MiB)`.
#[must_use]
pub fn seg_size_for(size: i64) -> u32 {
    (size / DEFAULT_SEG_COUNT).clamp(MIN_SEG_SIZE, MAX_SEG_SIZE) as u32
}

struct MetaShard<A: Auxiliary> {
    items_path: PathBuf,
    aux_path: PathBuf,
    lock: RwLock<ShardState<A>>,
}

struct ShardState<A: Auxiliary> {
    items: FxHashMap<Hash, Item>,
    aux: A,
}

impl<A: Auxiliary> MetaShard<A> {
    fn open(dir: &std::path::Path, idx: usize, mut aux: A) -> Result<Self> {
        let items_path = dir.join(format!("{FORMAT_VERSION}-{idx}.item"));
        let aux_path = dir.join(format!("{FORMAT_VERSION}-{idx}.aux"));

        aux.load(&aux_path);
        let items: FxHashMap<Hash, Item> = load_or_default(&items_path, FxHashMap::default)?;

        Ok(Self {
            items_path,
            aux_path,
            lock: RwLock::new(ShardState { items, aux }),
        })
    }
}

/// 256 shards of items and their auxiliaries, indexed by `hash[0]`.
pub struct MetaPlane<A: Auxiliary> {
    shards: Vec<MetaShard<A>>,
    pool: ThreadPool,
}

impl<A: Auxiliary> MetaPlane<A> {
    /// Constructs all 256 shards, invoking `factory(idx)` for each to
    /// obtain its auxiliary instance, then loading persisted state.
    pub fn open(
        dir: impl Into<PathBuf>,
        action_parallel: usize,
        factory: AuxFactory<A>,
    ) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| crate::error::Error::io(&dir, e))?;

        let mut shards = Vec::with_capacity(SHARD_COUNT);
        for idx in 0..SHARD_COUNT {
            shards.push(MetaShard::open(&dir, idx, factory(idx))?);
        }

        Ok(Self {
            shards,
            pool: build_pool(action_parallel),
        })
    }

    fn shard(&self, key: Hash) -> &MetaShard<A> {
        &self.shards[key.shard()]
    }

    /// Returns a clone of `key`'s item record, if present.
    pub fn get(&self, key: Hash) -> Option<Item> {
        self.shard(key).lock.read().items.get(&key).cloned()
    }

    /// Overwrites any prior record for `key` with `item`, and forwards
    /// `payload` to the shard's auxiliary.
    pub fn add_item(&self, key: Hash, item: Item, payload: A::Payload) {
        let shard = self.shard(key);
        let mut state = shard.lock.write();
        state.items.insert(key, item);
        state.aux.add(key, payload);
    }

    /// Validates and records segment `start..end` of `key`, invoking
    /// `write_fn(segment_index)` while still holding the shard write
    /// lock if — and only if — the segment is new.
    ///
    /// `write_fn` will be invoked at most once, under this shard's write
    /// lock; it may acquire tier locks but must not reach back into this
    /// same metadata shard (doing so would deadlock). This is what lets
    /// a racing `add_segment` for the same `(key, start)` be rejected
    /// deterministically instead of both callers observing "absent" and
    /// double-writing.
    pub fn add_segment(
        &self,
        key: Hash,
        start: i64,
        end: i64,
        write_fn: impl FnOnce(u32),
    ) {
        let shard = self.shard(key);
        let mut state = shard.lock.write();

        let Some(item) = state.items.get_mut(&key) else {
            return;
        };

        let seg_size = i64::from(item.seg_size);
        if end - start > seg_size || start % seg_size != 0 {
            return;
        }

        let seg = (start / seg_size) as u32;
        if item.segments.contains(&seg) {
            return;
        }

        write_fn(seg);
        item.segments.insert(seg);
    }

    /// Removes `key` from both the item table and the auxiliary.
    pub fn del(&self, key: Hash) {
        let shard = self.shard(key);
        let mut state = shard.lock.write();
        state.items.remove(&key);
        state.aux.del(key);
    }

    /// For each shard, in parallel: takes the read lock, runs `matcher`
    /// against the shard's auxiliary to get the keys to drop, releases
    /// the read lock, then takes the write lock to drop them. The
    /// read/write split exists because `matcher` may be expensive and
    /// must not block that shard's readers for its whole duration.
    pub fn del_batch(&self, matcher: impl Fn(&A) -> Vec<Hash> + Send + Sync) {
        for_each_shard(&self.pool, self.shards.len(), |idx| {
            let shard = &self.shards[idx];

            let keys = {
                let state = shard.lock.read();
                matcher(&state.aux)
            };

            let mut state = shard.lock.write();
            for key in keys {
                state.items.remove(&key);
                state.aux.del(key);
            }
        });
    }

    /// Snapshots every shard's items, then asks each shard's auxiliary
    /// to dump itself, using up to `action_parallel` workers.
    pub fn dump(&self) -> Result<()> {
        let errors = parking_lot::Mutex::new(Vec::<crate::error::Error>::new());

        for_each_shard(&self.pool, self.shards.len(), |idx| {
            let shard = &self.shards[idx];
            let state = shard.lock.read();
            if let Err(e) = safe_dump(&shard.items_path, &state.items) {
                errors.lock().push(e);
                return;
            }
            state.aux.dump(&shard.aux_path);
        });

        match errors.into_inner().into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// A trivial in-memory auxiliary for tests: tracks a `u32` tag per key.
    #[derive(Default)]
    struct TagAux {
        tags: HashMap<Hash, u32>,
    }

    impl Auxiliary for TagAux {
        type Payload = u32;

        fn add(&mut self, key: Hash, payload: u32) {
            self.tags.insert(key, payload);
        }

        fn get(&self, key: Hash) -> Option<&u32> {
            self.tags.get(&key)
        }

        fn del(&mut self, key: Hash) {
            self.tags.remove(&key);
        }

        fn load(&mut self, _path: &std::path::Path) {}
        fn dump(&self, _path: &std::path::Path) {}
    }

    fn key(byte: u8) -> Hash {
        Hash([byte; 16])
    }

    fn open_plane(dir: &std::path::Path) -> MetaPlane<TagAux> {
        MetaPlane::open(dir, 2, Box::new(|_idx| TagAux::default())).unwrap()
    }

    fn item(size: i64) -> Item {
        Item {
            expire: 0,
            size,
            seg_size: seg_size_for(size),
            segments: HashSet::new(),
        }
    }

    #[test]
    fn seg_size_clamps() {
        assert_eq!(seg_size_for(0), MIN_SEG_SIZE as u32);
        assert_eq!(seg_size_for(i64::MAX), MAX_SEG_SIZE as u32);
    }

    #[test]
    fn add_item_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let plane = open_plane(dir.path());
        plane.add_item(key(1), item(13), 42);

        let got = plane.get(key(1)).unwrap();
        assert_eq!(got.size, 13);
    }

    #[test]
    fn add_item_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let plane = open_plane(dir.path());
        plane.add_item(key(1), item(13), 1);
        plane.add_segment(key(1), 0, 13, |_| {});

        plane.add_item(key(1), item(99), 2); // overwrite resets segments
        let got = plane.get(key(1)).unwrap();
        assert_eq!(got.size, 99);
        assert!(got.segments.is_empty());
    }

    #[test]
    fn add_segment_misaligned_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let plane = open_plane(dir.path());
        plane.add_item(key(1), item(3 * MIN_SEG_SIZE), 0);

        let calls = Mutex::new(0);
        plane.add_segment(key(1), 1, MIN_SEG_SIZE + 1, |_| {
            *calls.lock().unwrap() += 1;
        });
        assert_eq!(*calls.lock().unwrap(), 0);
        assert!(plane.get(key(1)).unwrap().segments.is_empty());
    }

    #[test]
    fn add_segment_duplicate_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let plane = open_plane(dir.path());
        plane.add_item(key(1), item(MIN_SEG_SIZE), 0);

        let calls = Mutex::new(0);
        let bump = |_: u32| *calls.lock().unwrap() += 1;
        plane.add_segment(key(1), 0, MIN_SEG_SIZE, bump);
        plane.add_segment(key(1), 0, MIN_SEG_SIZE, bump);

        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn del_batch_matches_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let plane = open_plane(dir.path());
        plane.add_item(key(1), item(MIN_SEG_SIZE), 7);
        plane.add_item(key(2), item(MIN_SEG_SIZE), 9);

        plane.del_batch(|aux| {
            aux.tags
                .iter()
                .filter(|(_, &tag)| tag == 7)
                .map(|(k, _)| *k)
                .collect()
        });

        assert!(plane.get(key(1)).is_none());
        assert!(plane.get(key(2)).is_some());
    }

    #[test]
    fn dump_and_reopen_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        {
            let plane = open_plane(dir.path());
            plane.add_item(key(3), item(MIN_SEG_SIZE), 1);
            plane.dump().unwrap();
        }

        let plane = open_plane(dir.path());
        let got = plane.get(key(3)).unwrap();
        assert_eq!(got.size, MIN_SEG_SIZE);
    }
}
