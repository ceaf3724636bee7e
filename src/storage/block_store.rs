//! mmap-backed, append-only, block-rotation allocator.
//!
//! One [`BlockStore`] belongs to each tier ([`crate::device::Device`]).
//! Blocks are fixed-capacity mmap'd files; `add` always appends into the
//! current block or rotates to a fresh one, never grows a block in
//! place — each block's size is fixed at allocation time.

use super::guard::SegmentGuard;
use crate::error::{Error, Result};
use crate::FORMAT_VERSION;
use memmap2::MmapMut;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

/// Lower bound on the computed block size, regardless of tier capacity.
pub const MIN_BLOCK_SIZE: u64 = 1024 * 1024;
/// Upper bound on the computed block size, regardless of tier capacity.
pub const MAX_BLOCK_SIZE: u64 = 1024 * 1024 * 1024 * 10;
/// Tier capacity is divided by this to derive the block size.
const DEFAULT_BLOCK_COUNT: u64 = 1024;

/// `clamp(capacity / 1024, 1 MiB, 10 GiB)`, computed once at store construction.
#[must_use]
pub fn block_size_for_capacity(capacity: u64) -> u64 {
    (capacity / DEFAULT_BLOCK_COUNT).clamp(MIN_BLOCK_SIZE, MAX_BLOCK_SIZE)
}

pub(super) struct Block {
    pub(super) mmap: MmapMut,
    pub(super) capacity: u64,
}

/// The mutable state behind a [`BlockStore`]'s single `RwLock`: the block
/// table and the write cursor, per the crate's lock-order contract (one
/// lock covers both).
///
/// Kept as a `BTreeMap`, not a hashed table: `clear` needs the
/// smallest-id (oldest) block on every iteration, which a `BTreeMap`
/// gives for free via `.iter().next()` — a hashed map has no ordering to
/// exploit there and would force an O(n) scan per reclamation instead.
pub(crate) struct BlockStoreInner {
    pub(super) blocks: BTreeMap<u64, Block>,
    resident_size: u64,
    next_block_id: u64,
    current_block: Option<u64>,
    current_offset: u64,
}

/// mmap-backed append-only block allocator for one storage tier.
pub struct BlockStore {
    dir: PathBuf,
    capacity: u64,
    block_size: u64,
    inner: RwLock<BlockStoreInner>,
}

impl BlockStore {
    /// Opens (or creates) the block store rooted at `dir` with the given
    /// tier `capacity` in bytes, discovering and mmapping any block
    /// files already present.
    pub fn open(dir: impl Into<PathBuf>, capacity: u64) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;

        let block_size = block_size_for_capacity(capacity);
        let mut blocks = BTreeMap::new();
        let mut resident_size = 0u64;
        let mut max_id = 0u64;

        for entry in std::fs::read_dir(&dir).map_err(|e| Error::io(&dir, e))? {
            let entry = entry.map_err(|e| Error::io(&dir, e))?;
            let path = entry.path();
            let Some(id) = parse_block_id(&path) else {
                continue;
            };

            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|e| Error::io(&path, e))?;
            // SAFETY: `file` is open read/write and was sized by a prior
            // `add`/allocation; mapping its current length is always valid.
            let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| Error::io(&path, e))?;
            let len = mmap.len() as u64;

            resident_size += len;
            max_id = max_id.max(id);
            blocks.insert(id, Block { mmap, capacity: len });
        }

        tracing::debug!(
            dir = %dir.display(),
            discovered = blocks.len(),
            resident_size,
            block_size,
            "block store opened"
        );

        Ok(Self {
            dir,
            capacity,
            block_size,
            inner: RwLock::new(BlockStoreInner {
                blocks,
                resident_size,
                next_block_id: max_id + 1,
                current_block: None,
                current_offset: 0,
            }),
        })
    }

    /// The block size this store computed at construction.
    #[must_use]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Total bytes resident across all blocks.
    #[must_use]
    pub fn resident_size(&self) -> u64 {
        self.inner.read().resident_size
    }

    /// Capacity of a specific block, if it is present.
    #[must_use]
    pub fn block_capacity(&self, block_id: u64) -> Option<u64> {
        self.inner.read().blocks.get(&block_id).map(|b| b.capacity)
    }

    /// Every block id currently resident, smallest (oldest) first.
    #[must_use]
    pub fn block_ids(&self) -> Vec<u64> {
        self.inner.read().blocks.keys().copied().collect()
    }

    /// Copies `data` into the current block, rotating to a fresh block
    /// first if there is no room (or `data` is larger than `block_size`,
    /// in which case a dedicated oversize block is allocated). Returns
    /// the pre-copy `(block_id, offset)` locator.
    #[tracing::instrument(level = "trace", skip(self, data))]
    pub fn add(&self, data: &[u8]) -> Result<(u64, u64)> {
        let size = data.len() as u64;
        let mut inner = self.inner.write();

        let needs_oversize = size > self.block_size;
        let needs_rotation = !needs_oversize
            && (inner.current_block.is_none() || inner.current_offset + size > self.block_size);

        if needs_oversize {
            self.allocate_block(&mut inner, size)?;
        } else if needs_rotation {
            self.allocate_block(&mut inner, self.block_size)?;
        }

        let block_id = inner.current_block.expect("block allocated above");
        let offset = inner.current_offset;

        let block = inner.blocks.get_mut(&block_id).expect("just allocated");
        let start = offset as usize;
        block.mmap[start..start + data.len()].copy_from_slice(data);
        inner.current_offset += size;

        Ok((block_id, offset))
    }

    fn allocate_block(&self, inner: &mut BlockStoreInner, capacity: u64) -> Result<()> {
        let id = inner.next_block_id;
        inner.next_block_id += 1;

        let path = self.block_path(id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| Error::io(&path, e))?;
        file.set_len(capacity).map_err(|e| Error::io(&path, e))?;

        // SAFETY: `file` was just truncated to `capacity`, so the entire
        // mapped range is backed by allocated file space.
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| Error::io(&path, e))?;

        inner.resident_size += capacity;
        inner.blocks.insert(id, Block { mmap, capacity });
        inner.current_block = Some(id);
        inner.current_offset = 0;

        tracing::debug!(block_id = id, capacity, "allocated block");
        Ok(())
    }

    /// Returns a zero-copy view of `size` bytes at `offset` within
    /// `block_id`, or `None` if that block is not (or no longer) present.
    pub fn get(&self, block_id: u64, offset: u64, size: u64) -> Option<SegmentGuard<'_>> {
        let inner = self.inner.read();
        if !inner.blocks.contains_key(&block_id) {
            return None;
        }
        Some(SegmentGuard {
            inner,
            block_id,
            offset: offset as usize,
            size: size as usize,
        })
    }

    /// While resident size exceeds capacity, reclaims the oldest
    /// (smallest-id) block: unmaps it, deletes its file, and removes it
    /// from the table. Returns every reclaimed block id so the caller
    /// (the owning [`crate::device::Device`]) can purge segment locators
    /// referencing them before those ids could be reused.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn clear(&self) -> Result<Vec<u64>> {
        let mut inner = self.inner.write();
        let mut reclaimed = Vec::new();

        while inner.resident_size > self.capacity {
            let Some((&id, _)) = inner.blocks.iter().next() else {
                break;
            };
            let block = inner.blocks.remove(&id).expect("just observed");
            inner.resident_size -= block.capacity;

            let path = self.block_path(id);
            drop(block); // unmap before removing the file
            std::fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;

            tracing::debug!(block_id = id, "reclaimed block");
            reclaimed.push(id);
        }

        Ok(reclaimed)
    }

    /// Unmaps every block. No snapshot is taken — locators survive only
    /// through metadata/segment-index persistence, not through this store.
    pub fn close(&self) {
        let mut inner = self.inner.write();
        for (id, block) in &mut inner.blocks {
            if let Err(e) = block.mmap.flush() {
                tracing::error!(block_id = id, error = %e, "failed to flush block on close");
            }
        }
        inner.blocks.clear();
    }

    fn block_path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("{FORMAT_VERSION}-{id:016x}.dat"))
    }
}

fn parse_block_id(path: &Path) -> Option<u64> {
    let stem = path.file_name()?.to_str()?;
    let stem = stem.strip_suffix(".dat")?;
    let (version, hex_id) = stem.split_once('-')?;
    if version.parse::<u64>().ok()? != FORMAT_VERSION {
        return None;
    }
    u64::from_str_radix(hex_id, 16).ok()
}
