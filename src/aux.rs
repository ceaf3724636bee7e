//! The auxiliary capability: an external, per-shard index over items,
//! consulted by [`crate::cache::Matcher`]s during predicate-driven batch
//! deletion.
//!
//! The source this crate is modeled on (a Go cache) expresses this as a
//! dynamically-typed interface (`interface{}` payloads, runtime casts
//! inside implementations). In a statically typed crate that becomes a
//! generic trait parameterized by the payload type, so implementations
//! and the [`crate::cache::Cache`] they plug into agree on a concrete
//! type at compile time instead of down-casting at runtime.

use crate::hash::Hash;
use std::path::Path;

/// Per-shard, application-defined index over items.
///
/// One instance lives in each of the 256 metadata shards, constructed by
/// an [`AuxFactory`]. Its lifetime matches the shard's: loaded at
/// startup, mutated alongside items, dumped at shutdown/`Dump`.
pub trait Auxiliary: Send + Sync {
    /// Opaque, application-defined payload associated 1:1 with a [`Hash`].
    type Payload;

    /// Associates `payload` with `key`, replacing any prior association.
    fn add(&mut self, key: Hash, payload: Self::Payload);

    /// Retrieves the payload associated with `key`, if any.
    fn get(&self, key: Hash) -> Option<&Self::Payload>;

    /// Removes any association for `key`. A no-op if `key` is absent.
    fn del(&mut self, key: Hash);

    /// Loads persisted state from `path`.
    ///
    /// Implementations with no persistent state perform no I/O and
    /// return successfully — this call must always be total.
    fn load(&mut self, path: &Path);

    /// Persists state to `path`.
    ///
    /// As with [`Auxiliary::load`], implementations with no persistent
    /// state perform no I/O.
    fn dump(&self, path: &Path);
}

/// Constructs the [`Auxiliary`] instance for shard `idx` (`0..256`).
///
/// Called exactly once per shard at [`crate::meta::MetaPlane`] construction.
pub type AuxFactory<A> = Box<dyn Fn(usize) -> A + Send + Sync>;
