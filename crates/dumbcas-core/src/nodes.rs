//! Nodes table: the catalog of backup sessions.
//!
//! Each node is one small JSON file under `<store>/nodes/`, bucketed by UTC
//! month and stamped to the second; a growing `(<n>)` suffix keeps names
//! unique within a second. `tags/<basename>` always points at the most
//! recent node with that basename.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use dumbcas_types::Digest;

use crate::error::Result;
use crate::fsutil;

const NODES_SUBDIR: &str = "nodes";
pub const TAGS_DIR: &str = "tags";

/// One backup session: the digest of its manifest blob plus a comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub entry: Digest,
    #[serde(default)]
    pub comment: String,
}

/// A node paired with its table-relative path (`/`-separated).
#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub rel_path: String,
    pub node: Node,
}

#[derive(Debug, Clone)]
pub struct NodesTable {
    root: PathBuf,
}

impl NodesTable {
    /// Open (creating if necessary) the nodes table under `store_root`.
    pub fn new(store_root: &Path) -> Result<Self> {
        let root = store_root.join(NODES_SUBDIR);
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Register `node` under a fresh time-bucketed name derived from
    /// `basename`, then rebind `tags/<basename>`. Returns the node's
    /// relative path.
    pub fn add_entry(&self, node: &Node, basename: &str) -> Result<String> {
        let now = Utc::now();
        let month = now.format("%Y-%m").to_string();
        let stamp = now.format("%Y-%m-%d_%H-%M-%S").to_string();
        let data = serde_json::to_vec(node)?;

        let mut suffix = 0u32;
        let rel_path = loop {
            let name = if suffix == 0 {
                format!("{stamp}_{basename}")
            } else {
                format!("{stamp}_{basename}({suffix})")
            };
            let candidate = self.root.join(&month).join(&name);
            if !candidate.exists() {
                fsutil::write_atomic(&candidate, &data)?;
                break format!("{month}/{name}");
            }
            suffix += 1;
        };

        fsutil::write_atomic(&self.root.join(TAGS_DIR).join(basename), &data)?;
        debug!(node = %rel_path, "registered node");
        Ok(rel_path)
    }

    /// Read one node by its table-relative path.
    pub fn read(&self, rel_path: &str) -> Result<Node> {
        let data = fs::read(self.root.join(rel_path))?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Lazily iterate every node in the table, bucket by bucket in sorted
    /// order. Each call returns a fresh iterator; iterating while the table
    /// mutates yields an unspecified subset.
    pub fn enumerate(&self) -> Result<NodeIter> {
        let mut buckets = Vec::new();
        for dir_entry in fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            if dir_entry.file_type()?.is_dir() {
                buckets.push((
                    dir_entry.file_name().to_string_lossy().into_owned(),
                    dir_entry.path(),
                ));
            }
        }
        buckets.sort();
        Ok(NodeIter {
            root: self.root.clone(),
            buckets: buckets.into_iter(),
            current: None,
        })
    }
}

/// Iterator over all nodes in a table.
pub struct NodeIter {
    root: PathBuf,
    buckets: std::vec::IntoIter<(String, PathBuf)>,
    current: Option<(String, std::vec::IntoIter<String>)>,
}

impl Iterator for NodeIter {
    type Item = Result<NodeEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((bucket, names)) = self.current.as_mut() {
                if let Some(name) = names.next() {
                    let rel_path = format!("{bucket}/{name}");
                    let result = fs::read(self.root.join(bucket).join(&name))
                        .map_err(Into::into)
                        .and_then(|data| {
                            serde_json::from_slice(&data).map_err(Into::into)
                        })
                        .map(|node| NodeEntry { rel_path, node });
                    return Some(result);
                }
                self.current = None;
            }
            let (bucket, path) = self.buckets.next()?;
            let mut names = Vec::new();
            match fs::read_dir(&path) {
                Ok(entries) => {
                    for entry in entries {
                        match entry {
                            Ok(e) => {
                                let name = e.file_name().to_string_lossy().into_owned();
                                // Temp files are not nodes.
                                if !name.starts_with(".tmp.") {
                                    names.push(name);
                                }
                            }
                            Err(e) => return Some(Err(e.into())),
                        }
                    }
                }
                Err(e) => return Some(Err(e.into())),
            }
            names.sort();
            self.current = Some((bucket, names.into_iter()));
        }
    }
}
