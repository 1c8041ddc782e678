//! Backup manifests: a recursive tree whose leaves reference blobs by
//! digest. Serialized as canonical JSON (sorted keys, optional fields
//! omitted) so identical trees always produce identical manifest blobs.

use std::collections::BTreeMap;
use std::path::MAIN_SEPARATOR;

use serde::{Deserialize, Serialize};

use dumbcas_types::Digest;

use crate::cas::CasTable;
use crate::error::Result;

/// One manifest node. A file leaf carries `sha1`/`size`; a directory
/// carries `files`. Both may be present on the same node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<Digest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, Entry>,
}

impl Entry {
    /// Insert a file leaf at `rel_path` (native separators), creating
    /// intermediate directory entries along the way.
    pub fn insert(&mut self, rel_path: &str, digest: Digest, size: i64) {
        let mut cur = self;
        for comp in rel_path.split(MAIN_SEPARATOR).filter(|c| !c.is_empty()) {
            cur = cur.files.entry(comp.to_string()).or_default();
        }
        cur.sha1 = Some(digest);
        cur.size = Some(size);
    }

    pub fn is_file(&self) -> bool {
        self.sha1.is_some()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Entry> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Fetch the manifest blob for `digest` and decode it.
pub fn load_entry(cas: &CasTable, digest: &Digest) -> Result<Entry> {
    let data = cas.read(digest)?;
    Entry::decode(&data)
}
