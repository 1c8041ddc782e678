//! Content-addressed blob table.
//!
//! Blobs live under `<store>/cas/<xx>/<38-hex>`: the first two hex characters
//! of the digest select a shard directory, the remaining 38 name the file.
//! Writes go through a temp sibling and a rename, so a blob is either fully
//! present or absent. The digest is trusted on the write path; verification
//! is an offline concern.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::debug;

use dumbcas_types::Digest;

use crate::error::{DumbcasError, Result};
use crate::fsutil;

const CAS_SUBDIR: &str = "cas";

/// Outcome of inserting a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddStatus {
    Added,
    /// A blob with this digest is already stored; treated as success by
    /// deduplication accounting.
    AlreadyExists,
}

#[derive(Debug, Clone)]
pub struct CasTable {
    root: PathBuf,
}

impl CasTable {
    /// Open (creating if necessary) the blob table under `store_root`.
    pub fn new(store_root: &Path) -> Result<Self> {
        let root = store_root.join(CAS_SUBDIR);
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Filesystem location of a blob, whether or not it exists yet.
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        let hex = digest.to_hex();
        self.root.join(digest.shard_prefix()).join(&hex[2..])
    }

    /// Store the stream under `digest`. The stream is copied to a temp file
    /// in the shard directory and renamed into place; if the destination
    /// already exists the copy is discarded and `AlreadyExists` is returned.
    pub fn add_entry<R: Read>(&self, reader: &mut R, digest: &Digest) -> Result<AddStatus> {
        let dest = self.blob_path(digest);
        if dest.exists() {
            return Ok(AddStatus::AlreadyExists);
        }

        // Shard directory is created lazily on first write.
        if let Some(shard) = dest.parent() {
            fs::create_dir_all(shard)?;
        }

        let tmp = fsutil::temp_sibling(&dest);
        let copied = File::create(&tmp).and_then(|mut out| io::copy(reader, &mut out));
        if let Err(e) = copied {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        // A concurrent writer may have landed the blob while we copied.
        if dest.exists() {
            let _ = fs::remove_file(&tmp);
            return Ok(AddStatus::AlreadyExists);
        }
        if let Err(e) = fs::rename(&tmp, &dest) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(blob = %digest, "stored blob");
        Ok(AddStatus::Added)
    }

    /// Hash `data` and store it, returning the digest alongside the status.
    pub fn add_bytes(&self, data: &[u8]) -> Result<(Digest, AddStatus)> {
        let digest = Digest::compute(data);
        let status = self.add_entry(&mut &data[..], &digest)?;
        Ok((digest, status))
    }

    /// Open a stored blob for reading.
    pub fn open(&self, digest: &Digest) -> Result<File> {
        match File::open(self.blob_path(digest)) {
            Ok(f) => Ok(f),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(DumbcasError::BlobNotFound(*digest))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read a stored blob whole.
    pub fn read(&self, digest: &Digest) -> Result<Vec<u8>> {
        match fs::read(self.blob_path(digest)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(DumbcasError::BlobNotFound(*digest))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, digest: &Digest) -> bool {
        self.blob_path(digest).is_file()
    }

    /// Lazily iterate every stored digest, shard by shard. Each call returns
    /// a fresh iterator; iterating while blobs are inserted sees an
    /// unspecified subset of the concurrent writes.
    pub fn enumerate(&self) -> Result<BlobIter> {
        let mut shards = Vec::new();
        for dir_entry in fs::read_dir(&self.root)? {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            if name.len() == 2
                && name.chars().all(|c| c.is_ascii_hexdigit())
                && dir_entry.file_type()?.is_dir()
            {
                shards.push((name, dir_entry.path()));
            }
        }
        shards.sort();
        Ok(BlobIter {
            shards: shards.into_iter(),
            current: None,
        })
    }
}

/// Iterator over all blobs in a table.
pub struct BlobIter {
    shards: std::vec::IntoIter<(String, PathBuf)>,
    current: Option<(String, fs::ReadDir)>,
}

impl Iterator for BlobIter {
    type Item = Result<Digest>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((prefix, entries)) = self.current.as_mut() {
                for entry in entries.by_ref() {
                    let entry = match entry {
                        Ok(e) => e,
                        Err(e) => return Some(Err(e.into())),
                    };
                    let name = entry.file_name().to_string_lossy().into_owned();
                    // Skip temp files and anything else that is not a blob.
                    match Digest::parse(&format!("{prefix}{name}")) {
                        Ok(digest) => return Some(Ok(digest)),
                        Err(_) => continue,
                    }
                }
                self.current = None;
            }
            let (prefix, path) = self.shards.next()?;
            match fs::read_dir(&path) {
                Ok(rd) => self.current = Some((prefix, rd)),
                Err(e) => return Some(Err(e.into())),
            }
        }
    }
}
