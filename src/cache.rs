//! Cache composition: an ordered tier list over the metadata plane.

use crate::aux::{Auxiliary, AuxFactory};
use crate::config::CacheConfig;
use crate::device::Device;
use crate::error::Result;
use crate::hash::Hash;
use crate::meta::{seg_size_for, Item, MetaPlane};

/// Caller-supplied predicate used by [`Cache::del_batch`]: given one
/// shard's auxiliary, returns the keys in that shard to evict.
pub type Matcher<A> = dyn Fn(&A) -> Vec<Hash> + Send + Sync;

/// An embeddable, multi-tier, segmented blob cache.
///
/// `A` is the concrete auxiliary type every metadata shard uses; see
/// [`Auxiliary`]. Tier 0 is the highest-priority tier: reads probe tiers
/// in the order they were configured, and writes always go to tier 0.
pub struct Cache<A: Auxiliary> {
    meta: MetaPlane<A>,
    devices: Vec<Device>,
}

impl<A: Auxiliary> Cache<A> {
    /// Opens a cache from `config`, constructing the metadata plane (via
    /// `aux_factory`) and every configured tier, in order.
    pub fn open(config: &CacheConfig, aux_factory: AuxFactory<A>) -> Result<Self> {
        let meta = MetaPlane::open(&config.meta_dir, config.action_parallel, aux_factory)?;

        let mut devices = Vec::with_capacity(config.devices.len());
        for dev_conf in &config.devices {
            devices.push(Device::open(
                &dev_conf.name,
                &dev_conf.dir,
                dev_conf.capacity,
                config.action_parallel,
            )?);
        }

        Ok(Self { meta, devices })
    }

    /// Registers a new item under `key`, computing `seg_size` from
    /// `size` and storing `aux_payload` in the owning metadata shard.
    /// A second call for the same key overwrites the prior record and
    /// resets its segment set to empty.
    pub fn add_item(&self, key: Hash, expire: i64, size: i64, aux_payload: A::Payload) {
        let item = Item {
            expire,
            size,
            seg_size: seg_size_for(size),
            segments: std::collections::HashSet::new(),
        };
        self.meta.add_item(key, item, aux_payload);
    }

    /// Writes `data` as the segment starting at byte `start` of `key`,
    /// delegating the byte write to the highest-priority tier. A no-op
    /// if `key` is unknown, the offset is misaligned, or the segment was
    /// already written.
    pub fn add_segment(&self, key: Hash, start: i64, data: &[u8]) {
        let Some(top_tier) = self.devices.first() else {
            return;
        };

        let end = start + data.len() as i64;
        let data_len = data.len();
        self.meta.add_segment(key, start, end, |seg| {
            // Physical I/O failures are fatal per the crate's error
            // contract; there is no recoverable path from inside this
            // closure, which runs under the metadata shard's write lock.
            if let Err(e) = top_tier.add(key, seg, data) {
                panic!("fatal I/O writing segment {seg} ({data_len} bytes): {e}");
            }
        });
    }

    /// Looks up `key` and returns the bytes covering `[start, end)`
    /// (`end = -1` means "to end of item"), probing tiers in order for
    /// each segment. Segments found in no tier are reported as
    /// `[start, end)` byte ranges instead. Returns `(empty, empty)` for
    /// an unknown key.
    pub fn get(&self, key: Hash, start: i64, end: i64) -> (Vec<Vec<u8>>, Vec<(i64, i64)>) {
        let Some(item) = self.meta.get(key) else {
            return (Vec::new(), Vec::new());
        };

        let end = if end == -1 { item.size } else { end };
        let seg_size = i64::from(item.seg_size);
        let start_seg = (start / seg_size) as u32;
        // `end` is an exclusive bound; the last segment it covers is the
        // one containing byte `end - 1`, not `end` itself. Using
        // `end / seg_size` directly over-counts by one whenever `end` is
        // an exact multiple of `seg_size` (e.g. `end == item.size`),
        // enumerating a segment index the item never has (the invariant
        // `i * seg_size < item.size` excludes it) and reporting it as a
        // spurious zero-length miss range. `start == end` is its own case
        // ("covers exactly one segment, the one containing start").
        let end_seg = if end <= start {
            start_seg
        } else {
            ((end - 1) / seg_size) as u32
        };

        let mut data = Vec::new();
        let mut misses = Vec::new();

        for seg in start_seg..=end_seg {
            let mut found = false;
            for device in &self.devices {
                if let Some(view) = device.get(key, seg) {
                    data.push(view.to_vec());
                    found = true;
                    break;
                }
            }

            if !found {
                let range_start = i64::from(seg) * seg_size;
                let range_end = (range_start + seg_size).min(item.size);
                misses.push((range_start, range_end));
            }
        }

        (data, misses)
    }

    /// Removes `key` from the metadata plane and from every tier.
    pub fn del(&self, key: Hash) {
        self.meta.del(key);
        for device in &self.devices {
            device.del(key);
        }
    }

    /// Runs `matcher` against every metadata shard's auxiliary in
    /// parallel and deletes the matched keys from the metadata plane.
    ///
    /// Tier segment indexes for those keys are **not** purged here — they
    /// become orphan locators, reclaimed lazily the next time their
    /// block is reclaimed. This mirrors the source this crate is modeled
    /// on: bulk predicate deletes are expected to be frequent and cheap,
    /// so they skip the tier-side sweep that `Del` performs.
    pub fn del_batch(&self, matcher: impl Fn(&A) -> Vec<Hash> + Send + Sync) {
        self.meta.del_batch(matcher);
    }

    /// Reclaims over-capacity blocks on every tier, purging locators
    /// that referenced them. Not part of the source's public surface,
    /// but required to actually exercise `BlockStore::clear` — the
    /// source leaves invoking it up to an external driver (see
    /// `DESIGN.md`).
    pub fn reclaim(&self) -> Result<()> {
        for device in &self.devices {
            device.reclaim()?;
        }
        Ok(())
    }

    /// Snapshots the metadata plane, then every tier.
    pub fn dump(&self) -> Result<()> {
        self.meta.dump()?;
        for device in &self.devices {
            device.dump()?;
        }
        Ok(())
    }

    /// Closes every tier (which dumps on its way out). Must be called to
    /// flush snapshots — in-memory state since the last `dump`/`close`
    /// is otherwise lost.
    pub fn close(&self) -> Result<()> {
        for device in &self.devices {
            device.close()?;
        }
        Ok(())
    }
}
