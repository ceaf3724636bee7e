//! Fixed-worker-count parallel for-each-shard, used by `dump` and
//! `del_batch` across both the metadata plane and each device.
//!
//! The source this crate is modeled on dispatches shard indices over a
//! channel to exactly `ActionParallel` goroutines and waits for all of
//! them to drain. A `rayon::ThreadPool` sized to the same worker count
//! gives the same "exactly N workers, operation returns only once every
//! shard has been handled" contract without hand-rolling the channel and
//! wait group.

use rayon::ThreadPool;

/// Runs `handler` once per index in `0..count`, using at most
/// `workers` threads, and returns only once every index has been
/// processed. Ordering across indices is unspecified.
pub fn for_each_shard<F>(pool: &ThreadPool, count: usize, handler: F)
where
    F: Fn(usize) + Send + Sync,
{
    pool.install(|| {
        use rayon::prelude::*;
        (0..count).into_par_iter().for_each(handler);
    });
}

/// Builds a dedicated thread pool with exactly `workers` threads
/// (minimum 1), matching `action_parallel` from the cache configuration.
pub fn build_pool(workers: usize) -> ThreadPool {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("tiercache-worker-{i}"))
        .build()
        .expect("failed to build tiercache worker pool")
}
