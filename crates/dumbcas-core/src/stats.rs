//! Archive run statistics.
//!
//! The counters are plain atomic cells: stages add with relaxed ordering
//! while the progress reporter reads. A snapshot is taken field by field,
//! so its fields are not mutually consistent mid-run.

use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

#[derive(Debug, Default)]
pub struct Stats {
    pub found: AtomicU64,
    pub found_bytes: AtomicU64,
    pub hashed: AtomicU64,
    pub hashed_bytes: AtomicU64,
    pub cached: AtomicU64,
    pub cached_bytes: AtomicU64,
    pub archived: AtomicU64,
    pub archived_bytes: AtomicU64,
    pub skipped: AtomicU64,
    pub skipped_bytes: AtomicU64,
    pub errors: AtomicU64,
}

impl Stats {
    pub fn add_error(&self) {
        self.errors.fetch_add(1, Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            found: self.found.load(Relaxed),
            found_bytes: self.found_bytes.load(Relaxed),
            hashed: self.hashed.load(Relaxed),
            hashed_bytes: self.hashed_bytes.load(Relaxed),
            cached: self.cached.load(Relaxed),
            cached_bytes: self.cached_bytes.load(Relaxed),
            archived: self.archived.load(Relaxed),
            archived_bytes: self.archived_bytes.load(Relaxed),
            skipped: self.skipped.load(Relaxed),
            skipped_bytes: self.skipped_bytes.load(Relaxed),
            errors: self.errors.load(Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub found: u64,
    pub found_bytes: u64,
    pub hashed: u64,
    pub hashed_bytes: u64,
    pub cached: u64,
    pub cached_bytes: u64,
    pub archived: u64,
    pub archived_bytes: u64,
    pub skipped: u64,
    pub skipped_bytes: u64,
    pub errors: u64,
}

fn to_mb(bytes: u64) -> f64 {
    bytes as f64 / 1024.0 / 1024.0
}

impl StatsSnapshot {
    /// One-line run summary, byte counts rendered in MiB.
    pub fn progress_line(&self) -> String {
        format!(
            "{}({:.1}mb) {}({:.1}mb) hashed {}({:.1}mb) in cache {}({:.1}mb) archived {}({:.1}mb) skipped {} errors",
            self.found,
            to_mb(self.found_bytes),
            self.hashed,
            to_mb(self.hashed_bytes),
            self.cached,
            to_mb(self.cached_bytes),
            self.archived,
            to_mb(self.archived_bytes),
            self.skipped,
            to_mb(self.skipped_bytes),
            self.errors,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = Stats::default();
        stats.found.fetch_add(3, Relaxed);
        stats.found_bytes.fetch_add(2 * 1024 * 1024, Relaxed);
        stats.add_error();

        let snap = stats.snapshot();
        assert_eq!(snap.found, 3);
        assert_eq!(snap.found_bytes, 2 * 1024 * 1024);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.archived, 0);
    }

    #[test]
    fn progress_line_format() {
        let snap = StatsSnapshot {
            found: 2,
            found_bytes: 2 * 1024 * 1024,
            hashed: 2,
            hashed_bytes: 1024 * 1024 + 512 * 1024,
            cached: 0,
            cached_bytes: 0,
            archived: 1,
            archived_bytes: 1024 * 1024,
            skipped: 1,
            skipped_bytes: 512 * 1024,
            errors: 0,
        };
        assert_eq!(
            snap.progress_line(),
            "2(2.0mb) 2(1.5mb) hashed 0(0.0mb) in cache 1(1.0mb) archived 1(0.5mb) skipped 0 errors"
        );
    }
}
