//! Atomic snapshot-to-disk: the only durability primitive metadata and
//! device snapshots use.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Serializes `value` and atomically replaces `path` with the result.
///
/// Writes to `<path>.tmp` first, `fsync`s the temp file, then renames it
/// onto `path`. Any failure here is a fatal, unrecoverable error for the
/// caller (see the crate-level error-handling contract) — this function
/// only reports it, it does not retry or degrade.
pub fn safe_dump<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp_path = tmp_path_for(path);

    let file = File::create(&tmp_path).map_err(|e| Error::io(&tmp_path, e))?;
    let mut writer = BufWriter::new(file);
    bincode::serialize_into(&mut writer, value).map_err(Error::Encode)?;
    writer.flush().map_err(|e| Error::io(&tmp_path, e))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| Error::io(&tmp_path, e))?;
    drop(writer);

    fs::rename(&tmp_path, path).map_err(|e| Error::io(path, e))?;

    tracing::trace!(path = %path.display(), "safe_dump complete");
    Ok(())
}

/// Loads a value previously written by [`safe_dump`].
///
/// A missing file is not an error — it means this is the first run for
/// this shard/bucket — and yields `default()` instead. Any other I/O or
/// decode failure is fatal.
pub fn load_or_default<T, F>(path: &Path, default: F) -> Result<T>
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(default()),
        Err(e) => return Err(Error::io(path, e)),
    };

    let reader = BufReader::new(file);
    bincode::deserialize_from(reader).map_err(Error::Decode)
}

fn tmp_path_for(path: &Path) -> std::path::PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tmp.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn round_trips_through_rename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.bin");

        let mut map = HashMap::new();
        map.insert("a".to_string(), 1u32);
        map.insert("b".to_string(), 2u32);

        safe_dump(&path, &map).unwrap();
        assert!(path.exists());
        assert!(!tmp_path_for(&path).exists());

        let loaded: HashMap<String, u32> = load_or_default(&path, HashMap::new).unwrap();
        assert_eq!(loaded, map);
    }

    #[test]
    fn missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.bin");

        let loaded: HashMap<String, u32> = load_or_default(&path, HashMap::new).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn overwrite_replaces_prior_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.bin");

        safe_dump(&path, &vec![1, 2, 3]).unwrap();
        safe_dump(&path, &vec![4, 5]).unwrap();

        let loaded: Vec<i32> = load_or_default(&path, Vec::new).unwrap();
        assert_eq!(loaded, vec![4, 5]);
    }
}
