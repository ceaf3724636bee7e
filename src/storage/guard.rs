//! Zero-copy guard for bytes borrowed from a [`super::block_store::BlockStore`].

use super::block_store::BlockStoreInner;
use parking_lot::RwLockReadGuard;
use std::ops::Deref;

/// A borrowed view into one segment's bytes inside a block store.
///
/// Holds the store's read lock for as long as the guard is alive, which
/// is how this crate satisfies the "borrowed views from `Get` must not
/// be invalidated by concurrent reclamation" requirement: [`BlockStore::clear`]
/// takes the write lock, so it cannot reclaim the block this guard points
/// into until the guard (and the read lock it holds) is dropped.
///
/// [`BlockStore::clear`]: super::block_store::BlockStore::clear
pub struct SegmentGuard<'a> {
    pub(super) inner: RwLockReadGuard<'a, BlockStoreInner>,
    pub(super) block_id: u64,
    pub(super) offset: usize,
    pub(super) size: usize,
}

impl Deref for SegmentGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        let block = self
            .inner
            .blocks
            .get(&self.block_id)
            .expect("block referenced by a live SegmentGuard cannot be reclaimed");
        &block.mmap[self.offset..self.offset + self.size]
    }
}

impl AsRef<[u8]> for SegmentGuard<'_> {
    fn as_ref(&self) -> &[u8] {
        self
    }
}
