//! The archive pipeline: enumerate → hash → archive.
//!
//! Three stages run as scoped threads linked by bounded channels; ordering
//! is preserved end to end because every link is single-producer
//! single-consumer. A stage closes its output by dropping the sender when
//! its input drains or cancellation fires; per-item failures are counted
//! and skipped, never fatal. The driver consumes the final manifest digest,
//! registers the node, and reports progress on a five-second tick.

use std::fs::File;
use std::path::{Component, Path, PathBuf, MAIN_SEPARATOR_STR};
use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use tracing::{info, warn};

use dumbcas_types::Digest;

use crate::cancel::CancelToken;
use crate::cas::{AddStatus, CasTable};
use crate::cache::HashCache;
use crate::entry::Entry;
use crate::error::{DumbcasError, Result};
use crate::nodes::{Node, NodesTable};
use crate::stats::{Stats, StatsSnapshot};
use crate::walk::{self, FileItem};

/// Queue depths between the stages: enumerate → hash → archive → driver.
const FOUND_QUEUE: usize = 128_000;
const HASHED_QUEUE: usize = 4_096;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

pub struct ArchiveRequest<'a> {
    /// Store root directory.
    pub root: &'a Path,
    /// File listing one input path per line.
    pub to_archive: &'a Path,
    /// Comment embedded in the resulting node.
    pub comment: &'a str,
}

#[derive(Debug)]
pub struct ArchiveOutcome {
    /// Relative path of the registered node.
    pub node: String,
    /// Digest of the stored manifest blob.
    pub manifest: Digest,
    pub stats: StatsSnapshot,
}

/// A hashed file queued for archiving.
struct HashedItem {
    full_path: PathBuf,
    rel_path: String,
    sha1: Digest,
    size: i64,
}

/// Read the input list: one path per line, surrounding whitespace trimmed,
/// blank lines skipped.
fn read_input_list(path: &Path) -> Result<Vec<String>> {
    let data = std::fs::read_to_string(path).map_err(|e| DumbcasError::InputList {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    Ok(data
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

/// Expand `$VAR` and `${VAR}` against the environment. Unset variables
/// expand to the empty string, matching the behavior input lists were
/// written for. A lone `$` or an unterminated `${` is kept verbatim.
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos + 1..];
        if let Some(braced) = rest.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => {
                    out.push_str(&std::env::var(&braced[..end]).unwrap_or_default());
                    rest = &braced[end + 1..];
                }
                None => {
                    out.push_str("${");
                    rest = braced;
                }
            }
        } else {
            let end = rest
                .char_indices()
                .find(|(_, c)| !(c.is_ascii_alphanumeric() || *c == '_'))
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            if end == 0 {
                out.push('$');
            } else {
                out.push_str(&std::env::var(&rest[..end]).unwrap_or_default());
                rest = &rest[end..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Lexically normalize a path: drop `.` components, resolve `..` against
/// preceding normal components, without touching the filesystem.
fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(Component::ParentDir),
            },
            other => out.push(other),
        }
    }
    out
}

/// Absolutize and normalize the raw input list: environment expansion,
/// separator normalization, resolution against the list file's directory.
fn cleanup_list(rel_dir: &Path, inputs: &[String]) -> Vec<PathBuf> {
    inputs
        .iter()
        .map(|raw| {
            let expanded = expand_env(raw);
            let native = expanded.replace('/', MAIN_SEPARATOR_STR);
            let path = PathBuf::from(native);
            let abs = if path.is_absolute() {
                path
            } else {
                rel_dir.join(path)
            };
            clean_path(&abs)
        })
        .collect()
}

/// Send with a cancellation escape hatch; a blocked send must wake up when
/// the run is interrupted. Returns `false` when the item was not delivered.
fn send_item<T>(out: &Sender<T>, item: T, stats: &Stats, cancel: &CancelToken) -> bool {
    select! {
        recv(cancel.receiver()) -> _ => {
            stats.add_error();
            false
        }
        send(out, item) -> res => res.is_ok(),
    }
}

/// Stage A: stat each input, drain directory trees, emit files.
fn enumerate_stage(inputs: &[PathBuf], out: Sender<FileItem>, stats: &Stats, cancel: &CancelToken) {
    for input in inputs {
        if cancel.is_cancelled() {
            stats.add_error();
            return;
        }
        // Top-level inputs are followed through symlinks.
        let meta = match std::fs::metadata(input) {
            Ok(m) => m,
            Err(e) => {
                stats.add_error();
                warn!(input = %input.display(), error = %e, "failed to process input");
                continue;
            }
        };
        if meta.is_dir() {
            for item in walk::walk_tree(input) {
                match item {
                    Ok(item) => {
                        stats.found.fetch_add(1, Relaxed);
                        stats.found_bytes.fetch_add(item.size as u64, Relaxed);
                        if !send_item(&out, item, stats, cancel) {
                            return;
                        }
                    }
                    Err(e) => {
                        stats.add_error();
                        warn!(input = %input.display(), error = %e, "failed to process entry");
                    }
                }
            }
        } else {
            let rel_path = match input.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => {
                    stats.add_error();
                    warn!(input = %input.display(), "input has no file name");
                    continue;
                }
            };
            stats.found.fetch_add(1, Relaxed);
            stats.found_bytes.fetch_add(meta.len(), Relaxed);
            let item = FileItem {
                full_path: input.clone(),
                rel_path,
                size: meta.len() as i64,
                mtime: walk::mtime_seconds(&meta),
            };
            if !send_item(&out, item, stats, cancel) {
                return;
            }
        }
    }
    info!("done enumerating inputs");
}

/// Stage B: refresh each file's cache record, emitting its digest. Owns the
/// hash cache for the whole run and persists it on exit.
fn hash_stage(
    store_root: &Path,
    input: Receiver<FileItem>,
    out: Sender<HashedItem>,
    stats: &Stats,
    cancel: &CancelToken,
) {
    let mut cache = HashCache::load(store_root);
    loop {
        let item = select! {
            recv(cancel.receiver()) -> _ => {
                stats.add_error();
                break;
            }
            recv(input) -> msg => match msg {
                Ok(item) => item,
                Err(_) => break, // input drained
            },
        };

        let key = item.full_path.to_string_lossy().into_owned();
        let record = cache.find(&key);
        let now = Utc::now().timestamp();
        let sha1 = match record.refresh(&item.full_path, item.size, item.mtime, now) {
            Ok((digest, true)) => {
                stats.hashed.fetch_add(1, Relaxed);
                stats.hashed_bytes.fetch_add(item.size as u64, Relaxed);
                digest
            }
            Ok((digest, false)) => {
                stats.cached.fetch_add(1, Relaxed);
                stats.cached_bytes.fetch_add(item.size as u64, Relaxed);
                digest
            }
            Err(e) => {
                stats.add_error();
                warn!(path = %item.full_path.display(), error = %e, "failed to hash");
                continue;
            }
        };

        let hashed = HashedItem {
            full_path: item.full_path,
            rel_path: item.rel_path,
            sha1,
            size: item.size,
        };
        if !send_item(&out, hashed, stats, cancel) {
            break;
        }
    }
    if let Err(e) = cache.close() {
        warn!(error = %e, "failed to persist hash cache");
    }
    info!("done hashing");
}

/// Store one file's contents in the blob table.
fn archive_item(cas: &CasTable, item: &HashedItem, stats: &Stats) {
    let mut file = match File::open(&item.full_path) {
        Ok(f) => f,
        Err(e) => {
            stats.add_error();
            warn!(path = %item.full_path.display(), error = %e, "failed to archive");
            return;
        }
    };
    match cas.add_entry(&mut file, &item.sha1) {
        Ok(AddStatus::Added) => {
            stats.archived.fetch_add(1, Relaxed);
            stats.archived_bytes.fetch_add(item.size as u64, Relaxed);
        }
        Ok(AddStatus::AlreadyExists) => {
            stats.skipped.fetch_add(1, Relaxed);
            stats.skipped_bytes.fetch_add(item.size as u64, Relaxed);
        }
        Err(e) => {
            stats.add_error();
            warn!(path = %item.full_path.display(), error = %e, "failed to archive");
        }
    }
}

/// Stage C: store each blob, accumulate the manifest tree, then store the
/// manifest itself and emit its digest. `None` signals a manifest failure.
fn archive_stage(
    cas: &CasTable,
    input: Receiver<HashedItem>,
    out: Sender<Option<Digest>>,
    stats: &Stats,
    cancel: &CancelToken,
) {
    let mut root = Entry::default();
    loop {
        let item = select! {
            recv(cancel.receiver()) -> _ => {
                stats.add_error();
                return;
            }
            recv(input) -> msg => match msg {
                Ok(item) => item,
                Err(_) => break, // input drained
            },
        };
        root.insert(&item.rel_path, item.sha1, item.size);
        archive_item(cas, &item, stats);
    }

    // The input draining and the cancellation firing can race; an
    // interrupted run must not publish a manifest.
    if cancel.is_cancelled() {
        stats.add_error();
        return;
    }

    // Every blob is in; the serialized manifest becomes a blob as well.
    let stored = root
        .encode()
        .and_then(|data| cas.add_bytes(&data).map(|r| (r, data.len() as u64)));
    match stored {
        Ok(((digest, status), len)) => {
            match status {
                AddStatus::Added => {
                    stats.archived.fetch_add(1, Relaxed);
                    stats.archived_bytes.fetch_add(len, Relaxed);
                }
                AddStatus::AlreadyExists => {
                    stats.skipped.fetch_add(1, Relaxed);
                    stats.skipped_bytes.fetch_add(len, Relaxed);
                }
            }
            let _ = out.send(Some(digest));
        }
        Err(e) => {
            stats.add_error();
            warn!(error = %e, "failed to store manifest");
            let _ = out.send(None);
        }
    }
}

/// Run a full archive: parse the input list, drive the pipeline, register
/// the node. `progress` is invoked every five seconds with a fresh
/// snapshot. An outcome whose stats carry a non-zero error count means the
/// node exists but some inputs were skipped.
pub fn run(
    req: &ArchiveRequest<'_>,
    cancel: &CancelToken,
    mut progress: Option<&mut dyn FnMut(&StatsSnapshot)>,
) -> Result<ArchiveOutcome> {
    let to_archive = std::path::absolute(req.to_archive)?;
    let mut raw_inputs = read_input_list(&to_archive)?;
    // The list file itself is always part of the backup set.
    raw_inputs.push(to_archive.to_string_lossy().into_owned());
    info!(
        count = raw_inputs.len(),
        list = %to_archive.display(),
        "found entries to back up"
    );
    let rel_dir = to_archive.parent().unwrap_or(Path::new(MAIN_SEPARATOR_STR));
    let inputs = cleanup_list(rel_dir, &raw_inputs);
    let basename = to_archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "backup".to_string());

    let cas = CasTable::new(req.root)?;
    let nodes = NodesTable::new(req.root)?;
    let stats = Stats::default();

    std::thread::scope(|s| {
        let (found_tx, found_rx) = bounded::<FileItem>(FOUND_QUEUE);
        let (hashed_tx, hashed_rx) = bounded::<HashedItem>(HASHED_QUEUE);
        let (manifest_tx, manifest_rx) = bounded::<Option<Digest>>(1);

        {
            let (inputs, stats, cancel) = (&inputs, &stats, cancel.clone());
            s.spawn(move || enumerate_stage(inputs, found_tx, stats, &cancel));
        }
        {
            let (root, stats, cancel) = (req.root, &stats, cancel.clone());
            s.spawn(move || hash_stage(root, found_rx, hashed_tx, stats, &cancel));
        }
        {
            let (cas, stats, cancel) = (&cas, &stats, cancel.clone());
            s.spawn(move || archive_stage(cas, hashed_rx, manifest_tx, stats, &cancel));
        }

        let ticker = tick(PROGRESS_INTERVAL);
        loop {
            select! {
                recv(cancel.receiver()) -> _ => {
                    return Err(DumbcasError::Interrupted);
                }
                recv(ticker) -> _ => {
                    if let Some(cb) = progress.as_deref_mut() {
                        cb(&stats.snapshot());
                    }
                }
                recv(manifest_rx) -> msg => {
                    return match msg {
                        _ if cancel.is_cancelled() => Err(DumbcasError::Interrupted),
                        Ok(Some(manifest)) => {
                            let node = Node {
                                entry: manifest,
                                comment: req.comment.to_string(),
                            };
                            let rel_path = nodes.add_entry(&node, &basename)?;
                            Ok(ArchiveOutcome {
                                node: rel_path,
                                manifest,
                                stats: stats.snapshot(),
                            })
                        }
                        Ok(None) | Err(_) => {
                            let errors = stats.snapshot().errors;
                            if errors != 0 {
                                Err(DumbcasError::Other(format!("got {errors} errors")))
                            } else {
                                Err(DumbcasError::Other(
                                    "archive stage produced no manifest".to_string(),
                                ))
                            }
                        }
                    };
                }
            }
        }
    })
}
