use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique temp path next to `dest`, so the final rename stays within one
/// filesystem.
pub(crate) fn temp_sibling(dest: &Path) -> PathBuf {
    let unique = TEMP_COUNTER.fetch_add(1, Relaxed);
    let name = dest.file_name().unwrap_or_default().to_string_lossy();
    dest.with_file_name(format!(".tmp.{name}.{unique}"))
}

/// Publish `data` at `dest` atomically: write a temp sibling, then rename.
/// Parent directories are created as needed. An existing `dest` is replaced.
pub(crate) fn write_atomic(dest: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_sibling(dest);
    fs::write(&tmp, data)?;
    if let Err(e) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}
