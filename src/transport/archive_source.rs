// ABOUTME: Source endpoint reading an image back out of an unpacked archive tree.
// ABOUTME: Drives the load flow; blob paths come from the shared blob dir.

use async_trait::async_trait;
use std::path::PathBuf;

use super::{ImageDestination, ImageSource, SecurityPolicy, TransportError};
use crate::archive::{CopiedImage, ImageDescriptor, SHARED_BLOB_DIR};
use crate::types::{Digest, ImageRef, PlatformSet};

/// Reads one indexed image from an unpacked archive directory.
///
/// The caller looks the image up in the archive index first; the entry
/// carries all digests, so `init` only has to verify the staged files
/// survived extraction.
pub struct ArchiveSource {
    reference: ImageRef,
    root: PathBuf,
    entry: CopiedImage,
    copied: Option<CopiedImage>,
    initialized: bool,
}

impl ArchiveSource {
    pub fn new(reference: ImageRef, root: impl Into<PathBuf>, entry: CopiedImage) -> Self {
        Self {
            reference,
            root: root.into(),
            entry,
            copied: None,
            initialized: false,
        }
    }

    fn shared_blob_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join(SHARED_BLOB_DIR)
            .join(digest.algorithm())
            .join(digest.encoded())
    }

    fn manifest_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(digest.encoded()).join("manifest.json")
    }
}

#[async_trait]
impl ImageSource for ArchiveSource {
    async fn init(&mut self) -> Result<(), TransportError> {
        for instance in &self.entry.images {
            if !self.manifest_path(&instance.digest).is_file()
                && !self.shared_blob_path(&instance.digest).is_file()
            {
                return Err(TransportError::MissingBlob(instance.digest.clone()));
            }
        }
        self.initialized = true;
        Ok(())
    }

    async fn copy(
        &mut self,
        dest: &dyn ImageDestination,
        platforms: &PlatformSet,
        _policy: &SecurityPolicy,
    ) -> Result<(), TransportError> {
        if !self.initialized {
            return Err(TransportError::NotInitialized);
        }
        let selected: Vec<_> = self
            .entry
            .images
            .iter()
            .filter(|i| platforms.matches(&i.arch, &i.os))
            .cloned()
            .collect();
        if selected.is_empty() {
            return Err(TransportError::NoMatchingPlatform);
        }

        let mut copied = CopiedImage::empty(&self.reference);
        for instance in selected {
            if let Some(ref config) = instance.config {
                dest.link_blob(config, &self.shared_blob_path(config)).await?;
            }
            for layer in &instance.layers {
                dest.link_blob(layer, &self.shared_blob_path(layer)).await?;
            }
            let manifest_path = self.manifest_path(&instance.digest);
            let raw = if manifest_path.is_file() {
                tokio::fs::read(&manifest_path).await?
            } else {
                tokio::fs::read(self.shared_blob_path(&instance.digest)).await?
            };
            dest.put_manifest(&instance, &raw).await?;
            copied.images.push(instance);
        }
        self.copied = Some(copied);
        Ok(())
    }

    fn copied_image(&self) -> CopiedImage {
        self.copied
            .clone()
            .unwrap_or_else(|| CopiedImage::empty(&self.reference))
    }

    fn image_descriptor(&self, platforms: &PlatformSet) -> ImageDescriptor {
        ImageDescriptor {
            digests: self
                .entry
                .images
                .iter()
                .filter(|i| platforms.matches(&i.arch, &i.os))
                .map(|i| i.digest.clone())
                .collect(),
        }
    }

    fn mime(&self) -> &str {
        self.entry
            .images
            .first()
            .map(|i| i.media_type.as_str())
            .unwrap_or_default()
    }

    fn reference(&self) -> &ImageRef {
        &self.reference
    }

    fn transport_name(&self) -> String {
        format!("archive:{}", self.root.display())
    }
}
