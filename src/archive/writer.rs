// ABOUTME: Archive writer: appends deduplicated staging directories into one tar file.
// ABOUTME: Owns the blob digest ledger; a digest is persisted at most once per archive.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use super::{ArchiveError, Index, CopiedImage, INDEX_FILE, SHARED_BLOB_DIR};
use crate::types::Digest;

/// Writes one archive file.
///
/// `commit_image` is not safe for concurrent use; callers serialize commits
/// behind a single writer lock while copying stays fully concurrent.
pub struct Writer {
    path: PathBuf,
    builder: tar::Builder<File>,
    ledger: HashSet<Digest>,
    index_written: bool,
}

impl Writer {
    /// Create a new archive at `path`. Fails if the path already exists.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let path = path.into();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => ArchiveError::AlreadyExists(path.clone()),
                _ => ArchiveError::Io(e),
            })?;
        Ok(Self {
            path,
            builder: tar::Builder::new(file),
            ledger: HashSet::new(),
            index_written: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a content digest has already been persisted to this archive.
    pub fn contains_blob(&self, digest: &Digest) -> bool {
        self.ledger.contains(digest)
    }

    /// Number of distinct content digests persisted so far.
    pub fn blob_count(&self) -> usize {
        self.ledger.len()
    }

    /// Append one staged image directory, deduplicating against the ledger.
    ///
    /// Every digest the image introduces (layers, config, manifest) that is
    /// already in the ledger has its staged file deleted instead of being
    /// re-written; new digests enter the ledger and their files are kept.
    /// Deletion is best effort: a failure leaves stray bytes in the staging
    /// dir but the archive never re-references them.
    pub fn commit_image(
        &mut self,
        staging: &Path,
        copied: &CopiedImage,
    ) -> Result<(), ArchiveError> {
        if self.index_written {
            return Err(ArchiveError::IndexAlreadyWritten);
        }

        let mut to_delete: Vec<PathBuf> = Vec::new();
        for instance in &copied.images {
            if self.ledger.contains(&instance.digest) {
                // Whole instance directory is already in the archive.
                to_delete.push(staging.join(instance.digest.encoded()));
            }
        }
        for blob in copied.blob_digests() {
            if self.ledger.contains(blob) {
                to_delete.push(
                    staging
                        .join(SHARED_BLOB_DIR)
                        .join(blob.algorithm())
                        .join(blob.encoded()),
                );
            } else {
                self.ledger.insert(blob.clone());
            }
        }

        for path in &to_delete {
            match fs::metadata(path) {
                Ok(meta) => {
                    let removed = if meta.is_dir() {
                        fs::remove_dir_all(path)
                    } else {
                        fs::remove_file(path)
                    };
                    if let Err(e) = removed {
                        tracing::warn!("failed to clean duplicated file {:?}: {}", path, e);
                    }
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!("failed to stat duplicated file {:?}: {}", path, e);
                }
            }
        }

        // Append the surviving staging tree at the archive root so shared
        // blob directories from different images merge on extraction.
        for entry in fs::read_dir(staging)? {
            let entry = entry?;
            let name = entry.file_name();
            if entry.file_type()?.is_dir() {
                self.builder.append_dir_all(&name, entry.path())?;
            } else {
                self.builder.append_path_with_name(entry.path(), &name)?;
            }
        }
        tracing::debug!(
            "committed {}/{}:{} ({} blobs in ledger)",
            copied.project,
            copied.name,
            copied.tag,
            self.ledger.len()
        );
        Ok(())
    }

    /// Serialize the archive index into the archive. Callable exactly once.
    pub fn write_index(&mut self, index: &Index) -> Result<(), ArchiveError> {
        if self.index_written {
            return Err(ArchiveError::IndexAlreadyWritten);
        }
        let data = index.marshal()?;
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        );
        self.builder
            .append_data(&mut header, INDEX_FILE, data.as_slice())?;
        self.index_written = true;
        Ok(())
    }

    /// Finalize the archive structure and flush to disk.
    ///
    /// Consuming `self` makes a double close unrepresentable; closing before
    /// the index was written is an error.
    pub fn finish(self) -> Result<(), ArchiveError> {
        if !self.index_written {
            return Err(ArchiveError::IndexNotWritten);
        }
        let file = self.builder.into_inner()?;
        file.sync_all()?;
        Ok(())
    }
}
