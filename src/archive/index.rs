// ABOUTME: Persistent catalog of every image committed to one archive.
// ABOUTME: Answers digest-exact and reference-only lookups for validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::ArchiveError;
use crate::types::{Digest, ImageRef};

/// Current index format version.
pub const INDEX_VERSION: u32 = 1;

/// One per-architecture image instance produced by a completed copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInstance {
    /// Manifest digest of this instance.
    pub digest: Digest,
    /// Config blob digest, absent for manifest formats without one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Digest>,
    /// Layer blob digests in manifest order.
    pub layers: Vec<Digest>,
    pub arch: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub variant: String,
    pub media_type: String,
}

/// The result of one completed image transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopiedImage {
    pub registry: String,
    pub project: String,
    pub name: String,
    pub tag: String,
    /// Per-architecture instances, in the order they were copied.
    pub images: Vec<ImageInstance>,
}

impl CopiedImage {
    /// Empty result for an image reference, used when a copy is skipped.
    pub fn empty(reference: &ImageRef) -> Self {
        Self {
            registry: reference.registry().to_string(),
            project: reference.project().to_string(),
            name: reference.name().to_string(),
            tag: reference.tag().to_string(),
            images: Vec::new(),
        }
    }

    /// The complete set of per-architecture manifest digests.
    pub fn digest_set(&self) -> BTreeSet<&Digest> {
        self.images.iter().map(|i| &i.digest).collect()
    }

    /// Every content digest this image introduces into an archive: all
    /// layers, the config blob if present, and the manifest digest itself.
    pub fn blob_digests(&self) -> BTreeSet<&Digest> {
        let mut blobs = BTreeSet::new();
        for instance in &self.images {
            for layer in &instance.layers {
                blobs.insert(layer);
            }
            if let Some(ref config) = instance.config {
                blobs.insert(config);
            }
            blobs.insert(&instance.digest);
        }
        blobs
    }
}

/// The expected manifest-digest set for one image, filtered by platform.
/// Built from freshly fetched source metadata during validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub digests: BTreeSet<Digest>,
}

/// Catalog of all images committed to one archive.
///
/// Created empty at save start, appended under the writer lock, serialized
/// once on close. On validate it is deserialized once and only read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    pub version: u32,
    pub time: DateTime<Utc>,
    images: Vec<CopiedImage>,
}

impl Index {
    pub fn new() -> Self {
        Self {
            version: INDEX_VERSION,
            time: Utc::now(),
            images: Vec::new(),
        }
    }

    /// Add a completed image record. Duplicate manifests across entries are
    /// expected and additive; no dedup happens here.
    pub fn append(&mut self, image: CopiedImage) {
        self.images.push(image);
    }

    /// True iff an entry's complete per-architecture digest set matches.
    ///
    /// An empty descriptor only matches an empty entry; platform-skipped
    /// saves append those, which keeps save→validate round trips clean.
    pub fn has(&self, descriptor: &ImageDescriptor) -> bool {
        let want: BTreeSet<&Digest> = descriptor.digests.iter().collect();
        self.images.iter().any(|entry| entry.digest_set() == want)
    }

    /// True iff any entry matches the identity triple, ignoring digests.
    /// Used for manifest schemas whose digest is not reproducible.
    pub fn has_reference(&self, project: &str, name: &str, tag: &str) -> bool {
        self.images
            .iter()
            .any(|e| e.project == project && e.name == name && e.tag == tag)
    }

    /// First entry matching the identity triple, used by the load flow.
    pub fn find_reference(&self, project: &str, name: &str, tag: &str) -> Option<&CopiedImage> {
        self.images
            .iter()
            .find(|e| e.project == project && e.name == name && e.tag == tag)
    }

    pub fn images(&self) -> &[CopiedImage] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn marshal(&self) -> Result<Vec<u8>, ArchiveError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn unmarshal(data: &[u8]) -> Result<Self, ArchiveError> {
        Ok(serde_json::from_slice(data)?)
    }
}

impl Default for Index {
    fn default() -> Self {
        Self::new()
    }
}
