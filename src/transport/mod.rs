// ABOUTME: Transport endpoint boundary: readable sources and writable destinations.
// ABOUTME: Pipelines consume these traits; registry wire transports plug in behind them.

mod archive_source;
mod oci_dir;

pub use archive_source::ArchiveSource;
pub use oci_dir::{DirProvider, OciDirDestination, OciDirSource};

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::archive::{CopiedImage, ImageDescriptor, ImageInstance};
use crate::types::{Digest, ImageRef, ParseDigestError, PlatformSet};

pub const DOCKER_V2S1_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v1+json";
pub const DOCKER_V2S1_SIGNED_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";
pub const DOCKER_V2S2_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

/// Docker schema-v1 manifests change digest when re-serialized, so archives
/// holding them can only be validated by reference.
pub fn is_legacy_schema1(mime: &str) -> bool {
    mime == DOCKER_V2S1_MEDIA_TYPE || mime == DOCKER_V2S1_SIGNED_MEDIA_TYPE
}

pub fn is_manifest_list(mime: &str) -> bool {
    mime == DOCKER_LIST_MEDIA_TYPE || mime == OCI_INDEX_MEDIA_TYPE
}

/// Trust and transport options supplied by configuration, threaded through
/// every copy. Registry transports honor them; local ones have no use for
/// them.
#[derive(Debug, Clone, Default)]
pub struct SecurityPolicy {
    pub insecure_skip_tls_verify: bool,
    pub remove_signatures: bool,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no image available for the requested platform set")]
    NoMatchingPlatform,

    #[error("endpoint not initialized")]
    NotInitialized,

    #[error("image layout not found: {0}")]
    LayoutNotFound(PathBuf),

    #[error("tag {0} not present in layout index")]
    TagNotFound(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("invalid digest: {0}")]
    Digest(#[from] ParseDigestError),

    #[error("blob {digest} failed verification, computed {computed}")]
    DigestMismatch { digest: Digest, computed: Digest },

    #[error("missing blob: {0}")]
    MissingBlob(Digest),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A readable image at some endpoint (registry, OCI layout, archive).
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Fetch and resolve metadata. Must be called before any other
    /// operation; blob transfer does not happen here.
    async fn init(&mut self) -> Result<(), TransportError>;

    /// Transfer the platform-filtered image into `dest`.
    ///
    /// Fails with [`TransportError::NoMatchingPlatform`] when the filter
    /// matches no instance of a resolved multi-arch image.
    async fn copy(
        &mut self,
        dest: &dyn ImageDestination,
        platforms: &PlatformSet,
        policy: &SecurityPolicy,
    ) -> Result<(), TransportError>;

    /// Result of a completed copy; empty before `copy` succeeds.
    fn copied_image(&self) -> CopiedImage;

    /// Expected manifest digests after platform filtering, for index lookup.
    fn image_descriptor(&self, platforms: &PlatformSet) -> ImageDescriptor;

    /// Media type of the top-level manifest fetched during `init`.
    fn mime(&self) -> &str;

    fn reference(&self) -> &ImageRef;

    /// Display reference without the transport prefix.
    fn display_name(&self) -> String {
        self.reference().to_string()
    }

    /// Display reference including the transport prefix.
    fn transport_name(&self) -> String;
}

/// A writable image target. Sources drive it through the blob/manifest
/// sinks during `copy`.
#[async_trait]
pub trait ImageDestination: Send + Sync {
    async fn init(&mut self) -> Result<(), TransportError>;

    /// Root directory of the staged content.
    fn directory(&self) -> &Path;

    fn reference(&self) -> &ImageRef;

    fn display_name(&self) -> String {
        self.reference().to_string()
    }

    /// Store a blob by content digest, verifying it. A blob already staged
    /// under the same digest is left alone.
    async fn put_blob(&self, digest: &Digest, data: &[u8]) -> Result<(), TransportError>;

    /// Store a blob from a local file, hard-linking when possible.
    async fn link_blob(&self, digest: &Digest, src: &Path) -> Result<(), TransportError>;

    /// Store one per-architecture manifest and its instance metadata.
    async fn put_manifest(
        &self,
        instance: &ImageInstance,
        raw: &[u8],
    ) -> Result<(), TransportError>;
}

/// Builds endpoints for pipelines. The in-tree implementation is
/// directory-backed; a registry-backed provider satisfies the same trait.
#[async_trait]
pub trait EndpointProvider: Send + Sync {
    async fn source(&self, reference: &ImageRef) -> Result<Box<dyn ImageSource>, TransportError>;

    async fn destination(
        &self,
        reference: &ImageRef,
    ) -> Result<Box<dyn ImageDestination>, TransportError>;
}
