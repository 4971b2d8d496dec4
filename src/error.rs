// ABOUTME: Application-wide error types for stowage.
// ABOUTME: Aggregate run failures plus conversions from component errors.

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum Error {
    /// At least one image failed during a save run. Carries the failed
    /// image-list lines for reporting.
    #[error("some images failed to copy")]
    CopyFailed(Vec<String>),

    /// At least one image failed during a validate run.
    #[error("some images failed to validate")]
    ValidateFailed(Vec<String>),

    /// At least one image failed during a load run.
    #[error("some images failed to load")]
    LoadFailed(Vec<String>),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Failed image-list lines for aggregate failures, empty otherwise.
    pub fn failed_lines(&self) -> &[String] {
        match self {
            Error::CopyFailed(lines) | Error::ValidateFailed(lines) | Error::LoadFailed(lines) => {
                lines
            }
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
