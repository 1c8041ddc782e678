//! Lazy enumeration of one directory tree.
//!
//! Only regular files are emitted; directories are structure, not content.
//! Symlinks inside a tree are neither followed nor recorded. Per-entry
//! failures surface as `Err` items so the caller can count and skip them.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;

use crate::error::{DumbcasError, Result};

/// A regular file discovered under an input root.
#[derive(Debug, Clone)]
pub struct FileItem {
    pub full_path: PathBuf,
    /// Path relative to the walked root, native separators.
    pub rel_path: String,
    pub size: i64,
    /// mtime in seconds since the epoch.
    pub mtime: i64,
}

pub(crate) fn mtime_seconds(meta: &std::fs::Metadata) -> i64 {
    match meta.modified() {
        Ok(t) => chrono::DateTime::<chrono::Utc>::from(t).timestamp(),
        Err(_) => 0,
    }
}

/// Walk `root`, yielding every regular file beneath it in name-sorted order.
pub fn walk_tree(root: &Path) -> impl Iterator<Item = Result<FileItem>> {
    let root_owned = root.to_path_buf();
    let mut builder = WalkBuilder::new(root);
    builder.follow_links(false);
    builder.hidden(false);
    builder.ignore(false);
    builder.git_global(false);
    builder.git_ignore(false);
    builder.git_exclude(false);
    builder.parents(false);
    builder.require_git(false);
    builder.sort_by_file_name(std::ffi::OsStr::cmp);

    builder.build().filter_map(move |entry| {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => return Some(Err(DumbcasError::Other(format!("walk error: {e}")))),
        };
        let is_file = entry.file_type().is_some_and(|ft| ft.is_file());
        if !is_file {
            return None;
        }
        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                return Some(Err(DumbcasError::Other(format!(
                    "stat {}: {e}",
                    entry.path().display()
                ))))
            }
        };
        let rel = entry.path().strip_prefix(&root_owned).unwrap_or(entry.path());
        let rel_path = rel.to_string_lossy().into_owned();
        if rel_path.is_empty() {
            return None;
        }
        Some(Ok(FileItem {
            full_path: entry.path().to_path_buf(),
            rel_path,
            size: meta.len() as i64,
            mtime: mtime_seconds(&meta),
        }))
    })
}
