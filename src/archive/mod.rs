// ABOUTME: Content-addressed archive container: writer with blob dedup, reader, index.
// ABOUTME: One tar file holds per-image staging trees, a shared blob dir and one index.

mod index;
mod reader;
mod writer;

pub use index::{CopiedImage, ImageDescriptor, ImageInstance, Index, INDEX_VERSION};
pub use reader::Reader;
pub use writer::Writer;

use std::path::PathBuf;
use thiserror::Error;

/// Shared blob directory name inside staging dirs and the archive.
pub const SHARED_BLOB_DIR: &str = "share";

/// Name of the serialized index entry inside the archive.
pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("archive not found: {0}")]
    NotFound(PathBuf),

    #[error("corrupt archive: {0}")]
    Corrupt(String),

    #[error("archive index was already written")]
    IndexAlreadyWritten,

    #[error("archive index has not been written")]
    IndexNotWritten,

    #[error("archive writer is already closed")]
    Closed,

    #[error("index serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
