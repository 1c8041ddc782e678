//! Hash cache: remembered digests keyed by absolute path.
//!
//! The cache is an optimization. Losing it costs a re-hash of every input,
//! never correctness, so loading tolerates any failure and persisting
//! happens once when the handle closes.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use dumbcas_types::Digest;

use crate::error::Result;
use crate::fsutil;

const CACHE_FILE: &str = "cache";

/// Remembered hash for one path. A freshly inserted record is zero-valued
/// until [`CacheRecord::refresh`] fills it in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<Digest>,
    /// File size in bytes at the time of hashing.
    #[serde(default)]
    pub size: i64,
    /// File mtime in seconds at the time of hashing.
    #[serde(default)]
    pub timestamp: i64,
    /// Wall-clock seconds of the last time this record was validated.
    #[serde(default)]
    pub last_tested: i64,
}

impl CacheRecord {
    /// Bring the record up to date for a file that currently has `size`
    /// bytes and mtime `mtime`. When size and mtime both match the record,
    /// the stored digest is reused without touching the file contents.
    /// Returns the digest and whether the file was re-hashed.
    pub fn refresh(
        &mut self,
        full_path: &Path,
        size: i64,
        mtime: i64,
        now: i64,
    ) -> Result<(Digest, bool)> {
        if let Some(sha1) = self.sha1 {
            if self.size == size && self.timestamp == mtime {
                self.last_tested = now;
                return Ok((sha1, false));
            }
        }

        let mut file = File::open(full_path)?;
        let digest = Digest::from_reader(&mut file)?;
        self.sha1 = Some(digest);
        self.size = size;
        self.timestamp = mtime;
        self.last_tested = now;
        Ok((digest, true))
    }
}

/// Path-keyed record store persisted as one JSON file at `<store>/cache`.
#[derive(Debug)]
pub struct HashCache {
    path: PathBuf,
    entries: HashMap<String, CacheRecord>,
}

impl HashCache {
    /// Load the cache for a store. Always returns a usable cache; a missing
    /// or unreadable file only costs re-hashing and is logged.
    pub fn load(store_root: &Path) -> Self {
        let path = store_root.join(CACHE_FILE);
        let entries = match fs::read(&path) {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(cache = %path.display(), error = %e, "discarding unreadable hash cache");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!(cache = %path.display(), error = %e, "failed to read hash cache; every file will be re-hashed");
                HashMap::new()
            }
        };
        Self { path, entries }
    }

    /// Record for `path`, inserting a zero-valued one for new paths. The
    /// caller mutates the returned record in place.
    pub fn find(&mut self, path: &str) -> &mut CacheRecord {
        self.entries.entry(path.to_string()).or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persist the cache atomically and consume the handle.
    pub fn close(self) -> Result<()> {
        let data = serde_json::to_vec(&self.entries)?;
        fsutil::write_atomic(&self.path, &data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_file_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = HashCache::load(tmp.path());
        assert!(cache.is_empty());
    }

    #[test]
    fn load_corrupt_file_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(CACHE_FILE), b"not json {").unwrap();
        let cache = HashCache::load(tmp.path());
        assert!(cache.is_empty());
    }

    #[test]
    fn close_then_reload_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("data.txt");
        fs::write(&file, b"cached content").unwrap();

        let mut cache = HashCache::load(tmp.path());
        let record = cache.find(&file.to_string_lossy());
        let (digest, hashed) = record.refresh(&file, 14, 1_000, 2_000).unwrap();
        assert!(hashed);
        assert_eq!(digest, Digest::compute(b"cached content"));
        cache.close().unwrap();

        let mut reloaded = HashCache::load(tmp.path());
        assert_eq!(reloaded.len(), 1);
        let record = reloaded.find(&file.to_string_lossy());
        assert_eq!(record.sha1, Some(digest));
        assert_eq!(record.size, 14);
        assert_eq!(record.timestamp, 1_000);
    }

    #[test]
    fn unchanged_file_skips_the_contents() {
        // Point the record at a path that cannot be opened: the fast path
        // must succeed anyway because it never reads the file.
        let mut record = CacheRecord {
            sha1: Some(Digest::compute(b"previous")),
            size: 8,
            timestamp: 500,
            last_tested: 1_000,
        };
        let (digest, hashed) = record
            .refresh(Path::new("/no/such/file"), 8, 500, 2_000)
            .unwrap();
        assert!(!hashed);
        assert_eq!(digest, Digest::compute(b"previous"));
        assert_eq!(record.last_tested, 2_000);
    }

    #[test]
    fn changed_mtime_forces_rehash() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("data.txt");
        fs::write(&file, b"fresh").unwrap();

        let mut record = CacheRecord {
            sha1: Some(Digest::compute(b"stale")),
            size: 5,
            timestamp: 100,
            last_tested: 100,
        };
        let (digest, hashed) = record.refresh(&file, 5, 200, 2_000).unwrap();
        assert!(hashed);
        assert_eq!(digest, Digest::compute(b"fresh"));
        assert_eq!(record.timestamp, 200);
    }

    #[test]
    fn zero_record_is_always_hashed() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("empty");
        fs::write(&file, b"").unwrap();

        // A zero-valued record matches (0, 0) metadata but carries no
        // digest, so the file must still be hashed once.
        let mut record = CacheRecord::default();
        let (digest, hashed) = record.refresh(&file, 0, 0, 1_000).unwrap();
        assert!(hashed);
        assert_eq!(digest, Digest::compute(b""));
    }

    #[test]
    fn refresh_missing_file_errors() {
        let mut record = CacheRecord::default();
        assert!(record
            .refresh(Path::new("/no/such/file"), 1, 1, 1_000)
            .is_err());
    }
}
