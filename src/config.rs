//! Layered configuration for a [`crate::cache::Cache`].
//!
//! Layered via `figment`: defaults, then an optional TOML file, then
//! environment variables (`TIERCACHE_*`), each layer overriding the last.

use crate::error::Result;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for one storage tier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Human-readable tier name (e.g. `"mem"`, `"ssd"`, `"hdd"`). Informational only.
    pub name: String,
    /// Directory the tier's block files and segment-index snapshots live in.
    pub dir: PathBuf,
    /// Capacity in bytes; the block store reclaims the oldest blocks once
    /// resident size exceeds this.
    pub capacity: u64,
}

/// Top-level cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory metadata (item + aux) snapshots live in.
    pub meta_dir: PathBuf,
    /// Worker count for bulk for-each-shard operations (`dump`, `del_batch`).
    pub action_parallel: usize,
    /// Ordered tier list; index 0 is the highest-priority tier (writes go there).
    pub devices: Vec<DeviceConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            meta_dir: PathBuf::from("./tiercache-meta"),
            action_parallel: 4,
            devices: Vec::new(),
        }
    }
}

impl CacheConfig {
    /// Builds a configuration from defaults, an optional TOML file, and
    /// `TIERCACHE_*` environment variable overrides.
    pub fn load(toml_path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(CacheConfig::default()));

        if let Some(path) = toml_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("TIERCACHE_").split("_"));

        Ok(figment.extract()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_devices() {
        let conf = CacheConfig::default();
        assert!(conf.devices.is_empty());
        assert_eq!(conf.action_parallel, 4);
    }

    #[test]
    fn loads_overrides_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiercache.toml");
        std::fs::write(
            &path,
            r#"
            meta_dir = "/tmp/meta"
            action_parallel = 8

            [[devices]]
            name = "mem"
            dir = "/tmp/mem"
            capacity = 1048576
            "#,
        )
        .unwrap();

        let conf = CacheConfig::load(Some(&path)).unwrap();
        assert_eq!(conf.action_parallel, 8);
        assert_eq!(conf.devices.len(), 1);
        assert_eq!(conf.devices[0].name, "mem");
    }
}
