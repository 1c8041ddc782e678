use dumbcas_types::Digest;

use crate::cas::CasTable;
use crate::entry::Entry;
use crate::nodes::{Node, NodesTable};

/// Digests produced by [`archive_fixture`].
pub struct FixtureDigests {
    pub file1: Digest,
    pub file2: Digest,
    pub manifest: Digest,
    pub node_rel_path: String,
}

/// Populate a store with the canonical test tree:
/// `file1` = `content1`, `dir1/dir2/file2` = `content2`,
/// registered as one node named `fictious`.
pub fn archive_fixture(cas: &CasTable, nodes: &NodesTable) -> FixtureDigests {
    let (file1, _) = cas.add_bytes(b"content1").unwrap();
    let (file2, _) = cas.add_bytes(b"content2").unwrap();

    let mut root = Entry::default();
    root.insert("file1", file1, 8);
    root.insert(
        &format!(
            "dir1{sep}dir2{sep}file2",
            sep = std::path::MAIN_SEPARATOR
        ),
        file2,
        8,
    );
    let (manifest, _) = cas.add_bytes(&root.encode().unwrap()).unwrap();

    let node = Node {
        entry: manifest,
        comment: "useful comment".to_string(),
    };
    let node_rel_path = nodes.add_entry(&node, "fictious").unwrap();

    FixtureDigests {
        file1,
        file2,
        manifest,
        node_rel_path,
    }
}

/// Fresh empty store in a tempdir.
pub fn temp_store() -> (tempfile::TempDir, CasTable, NodesTable) {
    let tmp = tempfile::tempdir().unwrap();
    let cas = CasTable::new(tmp.path()).unwrap();
    let nodes = NodesTable::new(tmp.path()).unwrap();
    (tmp, cas, nodes)
}
