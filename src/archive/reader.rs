// ABOUTME: Archive reader: extracts the serialized index or the whole tree.
// ABOUTME: Re-opens the tar file per operation; no state is shared between reads.

use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use super::{ArchiveError, INDEX_FILE};

/// Read-only view of an existing archive file.
pub struct Reader {
    path: PathBuf,
}

impl Reader {
    /// Open an existing archive, verifying it is a readable tar file.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let path = path.into();
        if !path.is_file() {
            return Err(ArchiveError::NotFound(path));
        }
        let reader = Self { path };
        // Probe the first header so a malformed file fails here, not later.
        let file = File::open(&reader.path)?;
        let mut archive = tar::Archive::new(file);
        let mut entries = archive
            .entries()
            .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
        if let Some(Err(e)) = entries.next() {
            return Err(ArchiveError::Corrupt(e.to_string()));
        }
        Ok(reader)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the raw serialized index bytes.
    ///
    /// The index is appended last at save time, so the last matching entry
    /// wins if an archive was ever amended.
    pub fn read_index(&self) -> Result<Vec<u8>, ArchiveError> {
        let file = File::open(&self.path)?;
        let mut archive = tar::Archive::new(file);
        let mut found: Option<Vec<u8>> = None;
        for entry in archive
            .entries()
            .map_err(|e| ArchiveError::Corrupt(e.to_string()))?
        {
            let mut entry = entry.map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
            let path = entry.path().map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
            if is_root_index(&path) {
                let mut data = Vec::with_capacity(entry.size() as usize);
                entry.read_to_end(&mut data)?;
                found = Some(data);
            }
        }
        found.ok_or_else(|| ArchiveError::Corrupt("archive has no index entry".to_string()))
    }

    /// Extract the whole archive into `dest`, merging shared blob dirs.
    pub fn unpack(&self, dest: &Path) -> Result<(), ArchiveError> {
        let file = File::open(&self.path)?;
        let mut archive = tar::Archive::new(file);
        archive
            .unpack(dest)
            .map_err(|e| ArchiveError::Corrupt(e.to_string()))?;
        Ok(())
    }
}

fn is_root_index(path: &Path) -> bool {
    let mut components = path
        .components()
        .filter(|c| !matches!(c, Component::CurDir));
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if name == INDEX_FILE
    )
}
