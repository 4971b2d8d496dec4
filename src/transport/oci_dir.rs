// ABOUTME: Directory-backed transport endpoints: OCI layout source, staged destination.
// ABOUTME: The destination writes the staging layout the archive writer commits.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use oci_spec::image::{Descriptor, ImageIndex, ImageManifest, MediaType};

use super::{
    EndpointProvider, ImageDestination, ImageSource, OCI_MANIFEST_MEDIA_TYPE, SecurityPolicy,
    TransportError, is_manifest_list,
};
use crate::archive::{CopiedImage, ImageDescriptor, ImageInstance, SHARED_BLOB_DIR};
use crate::types::{Digest, ImageRef, PlatformSet};

const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

/// One resolved per-architecture instance with its local blob paths.
#[derive(Debug, Clone)]
struct ResolvedInstance {
    instance: ImageInstance,
    manifest_raw: Vec<u8>,
    config_path: Option<PathBuf>,
    layer_paths: Vec<PathBuf>,
}

/// Reads an image out of a standard OCI image layout directory
/// (`index.json` + `blobs/<alg>/<hex>`).
pub struct OciDirSource {
    reference: ImageRef,
    layout_dir: PathBuf,
    mime: String,
    resolved: Vec<ResolvedInstance>,
    copied: Option<CopiedImage>,
    initialized: bool,
}

impl OciDirSource {
    pub fn new(reference: ImageRef, layout_dir: impl Into<PathBuf>) -> Self {
        Self {
            reference,
            layout_dir: layout_dir.into(),
            mime: String::new(),
            resolved: Vec::new(),
            copied: None,
            initialized: false,
        }
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.layout_dir
            .join("blobs")
            .join(digest.algorithm())
            .join(digest.encoded())
    }

    fn read_blob(&self, digest: &Digest) -> Result<Vec<u8>, TransportError> {
        let path = self.blob_path(digest);
        std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TransportError::MissingBlob(digest.clone())
            } else {
                TransportError::Io(e)
            }
        })
    }

    /// Pick the index descriptor matching our tag. A single-entry index
    /// without ref.name annotations is accepted as-is.
    fn select_descriptor<'a>(
        &self,
        index: &'a ImageIndex,
    ) -> Result<&'a Descriptor, TransportError> {
        let tagged = index.manifests().iter().find(|d| {
            d.annotations()
                .as_ref()
                .and_then(|a| a.get(REF_NAME_ANNOTATION))
                .is_some_and(|name| name == self.reference.tag())
        });
        if let Some(descriptor) = tagged {
            return Ok(descriptor);
        }
        match index.manifests().as_slice() {
            [only] => Ok(only),
            _ => Err(TransportError::TagNotFound(
                self.reference.tag().to_string(),
            )),
        }
    }

    fn resolve_manifest(
        &self,
        descriptor: &Descriptor,
    ) -> Result<ResolvedInstance, TransportError> {
        let digest: Digest = descriptor.digest().as_ref().parse()?;
        let raw = self.read_blob(&digest)?;
        let manifest = ImageManifest::from_reader(raw.as_slice())
            .map_err(|e| TransportError::InvalidManifest(e.to_string()))?;

        let config_digest: Digest = manifest.config().digest().as_ref().parse()?;
        let mut layers = Vec::with_capacity(manifest.layers().len());
        let mut layer_paths = Vec::with_capacity(manifest.layers().len());
        for layer in manifest.layers() {
            let layer_digest: Digest = layer.digest().as_ref().parse()?;
            layer_paths.push(self.blob_path(&layer_digest));
            layers.push(layer_digest);
        }

        let (arch, os, variant) = match descriptor.platform() {
            Some(platform) => (
                platform.architecture().to_string(),
                platform.os().to_string(),
                platform.variant().clone().unwrap_or_default(),
            ),
            // Single-manifest images carry the platform in the config blob.
            None => self.platform_from_config(&config_digest)?,
        };

        let media_type = match manifest.media_type() {
            Some(mt) => mt.to_string(),
            None => descriptor.media_type().to_string(),
        };
        let media_type = if media_type.is_empty() {
            OCI_MANIFEST_MEDIA_TYPE.to_string()
        } else {
            media_type
        };

        Ok(ResolvedInstance {
            config_path: Some(self.blob_path(&config_digest)),
            layer_paths,
            manifest_raw: raw,
            instance: ImageInstance {
                digest,
                config: Some(config_digest),
                layers,
                arch,
                os,
                variant,
                media_type,
            },
        })
    }

    fn platform_from_config(
        &self,
        config_digest: &Digest,
    ) -> Result<(String, String, String), TransportError> {
        let raw = self.read_blob(config_digest)?;
        let value: serde_json::Value = serde_json::from_slice(&raw)
            .map_err(|e| TransportError::InvalidManifest(format!("config blob: {e}")))?;
        let arch = value
            .get("architecture")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let os = value
            .get("os")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let variant = value
            .get("variant")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        Ok((arch, os, variant))
    }

    fn selected<'a>(&'a self, platforms: &PlatformSet) -> Vec<&'a ResolvedInstance> {
        self.resolved
            .iter()
            .filter(|r| platforms.matches(&r.instance.arch, &r.instance.os))
            .collect()
    }
}

#[async_trait]
impl ImageSource for OciDirSource {
    async fn init(&mut self) -> Result<(), TransportError> {
        let index_path = self.layout_dir.join("index.json");
        if !index_path.is_file() {
            return Err(TransportError::LayoutNotFound(self.layout_dir.clone()));
        }
        let index = ImageIndex::from_file(&index_path)
            .map_err(|e| TransportError::InvalidManifest(e.to_string()))?;
        let descriptor = self.select_descriptor(&index)?.clone();
        self.mime = descriptor.media_type().to_string();

        if is_manifest_list(&self.mime) || *descriptor.media_type() == MediaType::ImageIndex {
            let digest: Digest = descriptor.digest().as_ref().parse()?;
            let raw = self.read_blob(&digest)?;
            let nested = ImageIndex::from_reader(raw.as_slice())
                .map_err(|e| TransportError::InvalidManifest(e.to_string()))?;
            for child in nested.manifests() {
                self.resolved.push(self.resolve_manifest(child)?);
            }
        } else {
            self.resolved.push(self.resolve_manifest(&descriptor)?);
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
        let selected = self.selected(platforms);
        if selected.is_empty() {
            return Err(TransportError::NoMatchingPlatform);
        }

        let mut copied = CopiedImage::empty(&self.reference);
        for resolved in selected {
            if let (Some(config), Some(path)) =
                (&resolved.instance.config, &resolved.config_path)
            {
                dest.link_blob(config, path).await?;
            }
            for (layer, path) in resolved.instance.layers.iter().zip(&resolved.layer_paths) {
                dest.link_blob(layer, path).await?;
            }
            dest.put_manifest(&resolved.instance, &resolved.manifest_raw)
                .await?;
            copied.images.push(resolved.instance.clone());
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
                .selected(platforms)
                .iter()
                .map(|r| r.instance.digest.clone())
                .collect(),
        }
    }

    fn mime(&self) -> &str {
        &self.mime
    }

    fn reference(&self) -> &ImageRef {
        &self.reference
    }

    fn transport_name(&self) -> String {
        format!("oci:{}", self.layout_dir.display())
    }
}

// Staged-layout metadata written next to each manifest. Kept minimal; the
// archive index is the authoritative catalog.
#[derive(Serialize)]
struct LayoutMarker {
    #[serde(rename = "imageLayoutVersion")]
    image_layout_version: &'static str,
}

#[derive(Serialize)]
struct StagedIndex {
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    manifests: Vec<StagedDescriptor>,
}

#[derive(Serialize)]
struct StagedDescriptor {
    #[serde(rename = "mediaType")]
    media_type: String,
    digest: String,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform: Option<StagedPlatform>,
    annotations: HashMap<String, String>,
}

#[derive(Serialize)]
struct StagedPlatform {
    architecture: String,
    os: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    variant: String,
}

/// Writes the staging layout the archive writer commits: one directory per
/// instance (named by manifest digest hex) plus a shared blob tree.
pub struct OciDirDestination {
    reference: ImageRef,
    dir: PathBuf,
    initialized: bool,
}

impl OciDirDestination {
    pub fn new(reference: ImageRef, dir: impl Into<PathBuf>) -> Self {
        Self {
            reference,
            dir: dir.into(),
            initialized: false,
        }
    }

    fn shared_blob_path(&self, digest: &Digest) -> PathBuf {
        self.dir
            .join(SHARED_BLOB_DIR)
            .join(digest.algorithm())
            .join(digest.encoded())
    }
}

#[async_trait]
impl ImageDestination for OciDirDestination {
    async fn init(&mut self) -> Result<(), TransportError> {
        tokio::fs::create_dir_all(self.dir.join(SHARED_BLOB_DIR)).await?;
        self.initialized = true;
        Ok(())
    }

    fn directory(&self) -> &Path {
        &self.dir
    }

    fn reference(&self) -> &ImageRef {
        &self.reference
    }

    async fn put_blob(&self, digest: &Digest, data: &[u8]) -> Result<(), TransportError> {
        if !self.initialized {
            return Err(TransportError::NotInitialized);
        }
        let target = self.shared_blob_path(digest);
        if target.exists() {
            return Ok(());
        }
        if digest.algorithm() == "sha256" {
            let computed = Digest::sha256_of(data);
            if computed != *digest {
                return Err(TransportError::DigestMismatch {
                    digest: digest.clone(),
                    computed,
                });
            }
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, data).await?;
        Ok(())
    }

    async fn link_blob(&self, digest: &Digest, src: &Path) -> Result<(), TransportError> {
        if !self.initialized {
            return Err(TransportError::NotInitialized);
        }
        if !src.is_file() {
            return Err(TransportError::MissingBlob(digest.clone()));
        }
        let target = self.shared_blob_path(digest);
        if target.exists() {
            return Ok(());
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // Hard links avoid copying layer bytes twice on the same filesystem.
        if std::fs::hard_link(src, &target).is_err() {
            tokio::fs::copy(src, &target).await?;
        }
        Ok(())
    }

    async fn put_manifest(
        &self,
        instance: &ImageInstance,
        raw: &[u8],
    ) -> Result<(), TransportError> {
        if !self.initialized {
            return Err(TransportError::NotInitialized);
        }
        // Manifest bytes live in the shared blob tree like any other blob,
        // so cross-image dedup covers them too.
        self.put_blob(&instance.digest, raw).await?;

        let instance_dir = self.dir.join(instance.digest.encoded());
        tokio::fs::create_dir_all(&instance_dir).await?;
        tokio::fs::write(instance_dir.join("manifest.json"), raw).await?;

        let layout = serde_json::to_vec(&LayoutMarker {
            image_layout_version: "1.0.0",
        })
        .map_err(|e| TransportError::InvalidManifest(e.to_string()))?;
        tokio::fs::write(instance_dir.join("oci-layout"), layout).await?;

        let mut annotations = HashMap::new();
        annotations.insert(
            REF_NAME_ANNOTATION.to_string(),
            self.reference.tag().to_string(),
        );
        let staged = StagedIndex {
            schema_version: 2,
            manifests: vec![StagedDescriptor {
                media_type: instance.media_type.clone(),
                digest: instance.digest.to_string(),
                size: raw.len() as u64,
                platform: Some(StagedPlatform {
                    architecture: instance.arch.clone(),
                    os: instance.os.clone(),
                    variant: instance.variant.clone(),
                }),
                annotations,
            }],
        };
        let staged = serde_json::to_vec_pretty(&staged)
            .map_err(|e| TransportError::InvalidManifest(e.to_string()))?;
        tokio::fs::write(instance_dir.join("index.json"), staged).await?;
        Ok(())
    }
}

/// Directory-backed endpoint provider: sources come from a tree of OCI
/// layouts (`<root>/<project>/<name>`), destinations go under a target
/// root (`<root>/<project>/<name>/<tag>`).
pub struct DirProvider {
    source_root: PathBuf,
    destination_root: PathBuf,
}

impl DirProvider {
    pub fn new(source_root: impl Into<PathBuf>, destination_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            destination_root: destination_root.into(),
        }
    }
}

#[async_trait]
impl EndpointProvider for DirProvider {
    async fn source(&self, reference: &ImageRef) -> Result<Box<dyn ImageSource>, TransportError> {
        let layout = self
            .source_root
            .join(reference.project())
            .join(reference.name());
        Ok(Box::new(OciDirSource::new(reference.clone(), layout)))
    }

    async fn destination(
        &self,
        reference: &ImageRef,
    ) -> Result<Box<dyn ImageDestination>, TransportError> {
        let dir = self
            .destination_root
            .join(reference.project())
            .join(reference.name())
            .join(reference.tag());
        Ok(Box::new(OciDirDestination::new(reference.clone(), dir)))
    }
}
