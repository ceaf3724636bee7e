//! A storage tier: one [`BlockStore`] plus 256 segment-index shards.

use crate::error::Result;
use crate::hash::{Hash, SHARD_COUNT};
use crate::parallel::{build_pool, for_each_shard};
use crate::storage::{BlockStore, SegmentGuard};
use crate::util::{load_or_default, safe_dump};
use crate::FORMAT_VERSION;
use parking_lot::RwLock;
use rayon::ThreadPool;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where one segment's bytes live: which block, at what offset, how long.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Locator {
    /// Identifier of the block containing the bytes.
    pub block_id: u64,
    /// Byte offset within the block.
    pub offset: u64,
    /// Byte length of the segment payload.
    pub size: u64,
}

type SegmentMap = FxHashMap<Hash, FxHashMap<u32, Locator>>;

struct DevBucket {
    snapshot_path: PathBuf,
    lock: RwLock<BucketState>,
}

struct BucketState {
    segments: SegmentMap,
    block_map: FxHashMap<u64, Vec<(Hash, u32)>>,
}

impl DevBucket {
    fn open(dir: &Path, idx: usize, known_blocks: &[u64]) -> Result<Self> {
        let snapshot_path = dir.join(format!("{FORMAT_VERSION}-{idx:02}.bkt"));
        let mut segments: SegmentMap = load_or_default(&snapshot_path, FxHashMap::default)?;

        // Open question resolved (see DESIGN.md): drop locators referencing
        // blocks the store did not rediscover, instead of leaving them
        // dangling until the next reclamation scan happens to touch them.
        let known: FxHashSet<u64> = known_blocks.iter().copied().collect();
        segments.retain(|_, segs| {
            segs.retain(|_, loc| known.contains(&loc.block_id));
            !segs.is_empty()
        });

        let mut block_map: FxHashMap<u64, Vec<(Hash, u32)>> = FxHashMap::default();
        for (key, segs) in &segments {
            for (&seg_idx, loc) in segs {
                block_map.entry(loc.block_id).or_default().push((*key, seg_idx));
            }
        }

        Ok(Self {
            snapshot_path,
            lock: RwLock::new(BucketState { segments, block_map }),
        })
    }
}

/// One storage tier: a block store plus its 256 segment-index shards.
pub struct Device {
    /// Tier name, informational only.
    pub name: String,
    buckets: Vec<DevBucket>,
    store: BlockStore,
    pool: ThreadPool,
}

impl Device {
    /// Opens (or creates) a tier rooted at `dir` with the given `name`,
    /// `capacity` in bytes, and worker count for bulk operations.
    pub fn open(
        name: impl Into<String>,
        dir: impl Into<PathBuf>,
        capacity: u64,
        action_parallel: usize,
    ) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| crate::error::Error::io(&dir, e))?;

        let store = BlockStore::open(&dir, capacity)?;
        let known_blocks = store.block_ids();

        let mut buckets = Vec::with_capacity(SHARD_COUNT);
        for idx in 0..SHARD_COUNT {
            buckets.push(DevBucket::open(&dir, idx, &known_blocks)?);
        }

        Ok(Self {
            name: name.into(),
            buckets,
            store,
            pool: build_pool(action_parallel),
        })
    }

    fn bucket(&self, key: Hash) -> &DevBucket {
        &self.buckets[key.shard()]
    }

    /// This tier's fixed block size in bytes, derived from its capacity.
    pub(crate) fn store_block_size(&self) -> u64 {
        self.store.block_size()
    }

    /// Looks up segment `seg` of `key`; returns a zero-copy view on hit.
    pub fn get(&self, key: Hash, seg: u32) -> Option<SegmentGuard<'_>> {
        let bucket = self.bucket(key);
        let state = bucket.lock.read();
        let loc = *state.segments.get(&key)?.get(&seg)?;
        drop(state);
        self.store.get(loc.block_id, loc.offset, loc.size)
    }

    /// Writes `data` as segment `seg` of `key` into this tier's block
    /// store and records the resulting locator.
    pub fn add(&self, key: Hash, seg: u32, data: &[u8]) -> Result<()> {
        let (block_id, offset) = self.store.add(data)?;
        let loc = Locator {
            block_id,
            offset,
            size: data.len() as u64,
        };

        let bucket = self.bucket(key);
        let mut state = bucket.lock.write();
        state.segments.entry(key).or_default().insert(seg, loc);
        state.block_map.entry(block_id).or_default().push((key, seg));
        Ok(())
    }

    /// Drops every segment of `key` from this tier.
    pub fn del(&self, key: Hash) {
        let bucket = self.bucket(key);
        bucket.lock.write().segments.remove(&key);
    }

    /// Removes every `(key, seg)` pair that referenced `block_id` from
    /// every bucket. Called after a block has been reclaimed so no
    /// locator can outlive the bytes it points to.
    pub fn del_block(&self, block_id: u64) {
        for bucket in &self.buckets {
            let mut state = bucket.lock.write();
            let Some(keys) = state.block_map.remove(&block_id) else {
                continue;
            };
            for (key, seg) in keys {
                if let Some(segs) = state.segments.get_mut(&key) {
                    segs.remove(&seg);
                    if segs.is_empty() {
                        state.segments.remove(&key);
                    }
                }
            }
        }
    }

    /// Reclaims over-capacity blocks from this tier's store and purges
    /// every locator that referenced them. Returns the reclaimed block ids.
    pub fn reclaim(&self) -> Result<Vec<u64>> {
        let reclaimed = self.store.clear()?;
        for &block_id in &reclaimed {
            self.del_block(block_id);
        }
        Ok(reclaimed)
    }

    /// Snapshots every bucket's segment index using up to
    /// `action_parallel` workers.
    pub fn dump(&self) -> Result<()> {
        let errors = parking_lot::Mutex::new(Vec::<crate::error::Error>::new());

        for_each_shard(&self.pool, self.buckets.len(), |idx| {
            let bucket = &self.buckets[idx];
            let state = bucket.lock.read();
            if let Err(e) = safe_dump(&bucket.snapshot_path, &state.segments) {
                errors.lock().push(e);
            }
        });

        match errors.into_inner().into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Closes the block store (unmapping every block, no snapshot) and
    /// then dumps the segment indexes. Preserving this order is
    /// intentional: the dumped indexes reference blocks that will be
    /// re-mmapped on the next `open`, which is sound even though the
    /// store closed first.
    pub fn close(&self) -> Result<()> {
        self.store.close();
        self.dump()
    }
}
