//! End-to-end scenarios reachable through the public API: miss on an
//! empty cache, write-then-read, predicate delete, and partial hits.
//! Tier fallthrough and reclamation consistency need access to a tier's
//! block store directly and live as unit tests in `src/cache.rs` instead.

use std::collections::HashMap;
use std::path::Path;

use tiercache::{Auxiliary, Cache, CacheConfig, DeviceConfig, Hash};

const JPG_TAG: u32 = 0xbeef;

#[derive(Default)]
struct TypeIndex(HashMap<Hash, u32>);

impl Auxiliary for TypeIndex {
    type Payload = u32;

    fn add(&mut self, key: Hash, payload: u32) {
        self.0.insert(key, payload);
    }

    fn get(&self, key: Hash) -> Option<&u32> {
        self.0.get(&key)
    }

    fn del(&mut self, key: Hash) {
        self.0.remove(&key);
    }

    fn load(&mut self, _path: &Path) {}
    fn dump(&self, _path: &Path) {}
}

fn digest(input: &str) -> Hash {
    // Stable, distinct 16-byte keys for tests; the cache never interprets
    // the digest beyond its first byte, so a real hash function isn't needed.
    let mut bytes = [0u8; 16];
    for (i, b) in input.bytes().enumerate() {
        bytes[i % 16] ^= b.wrapping_add(i as u8);
    }
    Hash(bytes)
}

fn single_tier_config(dir: &tempfile::TempDir, capacity: u64) -> CacheConfig {
    CacheConfig {
        meta_dir: dir.path().join("meta"),
        action_parallel: 4,
        devices: vec![DeviceConfig {
            name: "mem".into(),
            dir: dir.path().join("mem"),
            capacity,
        }],
    }
}

#[test]
fn scenario_miss_on_empty_cache() {
    let dir = tempfile::tempdir().unwrap();
    let config = single_tier_config(&dir, 16 * 1024 * 1024);
    let cache: Cache<TypeIndex> =
        Cache::open(&config, Box::new(|_| TypeIndex::default())).unwrap();

    let (data, misses) = cache.get(digest("unknown"), 0, -1);
    assert!(data.is_empty());
    assert!(misses.is_empty());
}

#[test]
fn scenario_write_and_read() {
    let dir = tempfile::tempdir().unwrap();
    let config = single_tier_config(&dir, 16 * 1024 * 1024);
    let cache: Cache<TypeIndex> =
        Cache::open(&config, Box::new(|_| TypeIndex::default())).unwrap();

    let key = digest("http://www.test.com/1.jpg");
    let data = b"this is 1.jpg";
    cache.add_item(key, 3600, data.len() as i64, JPG_TAG);
    cache.add_segment(key, 0, data);

    let (got, misses) = cache.get(key, 0, -1);
    assert_eq!(got, vec![data.to_vec()]);
    assert!(misses.is_empty());
}

#[test]
fn scenario_predicate_delete() {
    let dir = tempfile::tempdir().unwrap();
    let config = single_tier_config(&dir, 16 * 1024 * 1024);
    let cache: Cache<TypeIndex> =
        Cache::open(&config, Box::new(|_| TypeIndex::default())).unwrap();

    let key = digest("http://www.test.com/1.jpg");
    let data = b"this is 1.jpg";
    cache.add_item(key, 3600, data.len() as i64, JPG_TAG);
    cache.add_segment(key, 0, data);

    cache.del_batch(|aux: &TypeIndex| {
        aux.0
            .iter()
            .filter(|(_, &tag)| tag == JPG_TAG)
            .map(|(k, _)| *k)
            .collect()
    });

    let (got, misses) = cache.get(key, 0, -1);
    assert!(got.is_empty());
    assert!(misses.is_empty());
}

#[test]
fn scenario_partial_hit_reports_missing_segment() {
    let dir = tempfile::tempdir().unwrap();
    let config = single_tier_config(&dir, 64 * 1024 * 1024);
    let cache: Cache<TypeIndex> =
        Cache::open(&config, Box::new(|_| TypeIndex::default())).unwrap();

    let seg_size = tiercache::meta::seg_size_for(3 * 1024 * 1024) as i64;
    let size = 3 * seg_size;
    let key = digest("partial");
    cache.add_item(key, 3600, size, 0);

    let chunk = vec![1u8; seg_size as usize];
    cache.add_segment(key, 0, &chunk);
    cache.add_segment(key, 2 * seg_size, &chunk);
    // Segment 1 deliberately left unwritten.

    let (got, misses) = cache.get(key, 0, 3 * seg_size);
    assert_eq!(got.len(), 2);
    assert_eq!(misses, vec![(seg_size, 2 * seg_size)]);
}
