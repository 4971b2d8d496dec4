// ABOUTME: Validation semantics across manifest schemas, using mock endpoints.
// ABOUTME: Legacy schema-v1 matches by reference; modern manifests by digest set.

mod common;

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use stowage::archive::{CopiedImage, ImageDescriptor, ImageInstance};
use stowage::error::Error;
use stowage::pipeline::{Saver, Validator};
use stowage::transport::{
    DOCKER_V2S1_SIGNED_MEDIA_TYPE, EndpointProvider, ImageDestination, ImageSource,
    OCI_MANIFEST_MEDIA_TYPE, SecurityPolicy, TransportError,
};
use stowage::types::{Digest, ImageRef, PlatformSet};

/// Source whose saved manifest digest and freshly probed digest can differ,
/// the way schema-v1 digests drift between pulls.
struct MockSource {
    reference: ImageRef,
    mime: &'static str,
    saved: Digest,
    probe: Digest,
}

#[async_trait]
impl ImageSource for MockSource {
    async fn init(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn copy(
        &mut self,
        _dest: &dyn ImageDestination,
        _platforms: &PlatformSet,
        _policy: &SecurityPolicy,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    fn copied_image(&self) -> CopiedImage {
        let mut copied = CopiedImage::empty(&self.reference);
        copied.images.push(ImageInstance {
            digest: self.saved.clone(),
            config: None,
            layers: Vec::new(),
            arch: "amd64".into(),
            os: "linux".into(),
            variant: String::new(),
            media_type: self.mime.to_string(),
        });
        copied
    }

    fn image_descriptor(&self, _platforms: &PlatformSet) -> ImageDescriptor {
        ImageDescriptor {
            digests: [self.probe.clone()].into(),
        }
    }

    fn mime(&self) -> &str {
        self.mime
    }

    fn reference(&self) -> &ImageRef {
        &self.reference
    }

    fn transport_name(&self) -> String {
        format!("mock:{}", self.reference)
    }
}

struct MockProvider {
    mime: &'static str,
    saved: Digest,
    probe: Digest,
}

#[async_trait]
impl EndpointProvider for MockProvider {
    async fn source(&self, reference: &ImageRef) -> Result<Box<dyn ImageSource>, TransportError> {
        Ok(Box::new(MockSource {
            reference: reference.clone(),
            mime: self.mime,
            saved: self.saved.clone(),
            probe: self.probe.clone(),
        }))
    }

    async fn destination(
        &self,
        _reference: &ImageRef,
    ) -> Result<Box<dyn ImageDestination>, TransportError> {
        Err(TransportError::NotInitialized)
    }
}

fn mock(mime: &'static str, saved: &Digest, probe: &Digest) -> Arc<MockProvider> {
    Arc::new(MockProvider {
        mime,
        saved: saved.clone(),
        probe: probe.clone(),
    })
}

#[tokio::test]
async fn schema1_images_validate_by_reference_despite_digest_drift() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = tmp.path().join("images.tar");
    let saved = Digest::sha256_of(b"schema1 manifest as pulled at save time");
    let drifted = Digest::sha256_of(b"schema1 manifest re-serialized later");

    let lines = ["legacy/app:v1"];
    Saver::new(
        common::opts(&lines, &["amd64"]),
        mock(DOCKER_V2S1_SIGNED_MEDIA_TYPE, &saved, &saved),
        &archive,
    )
    .run(CancellationToken::new())
    .await
    .unwrap();

    // The probe digest no longer matches what was saved, but schema-v1
    // lookups go by the identity triple alone.
    Validator::new(
        common::opts(&lines, &["amd64"]),
        mock(DOCKER_V2S1_SIGNED_MEDIA_TYPE, &saved, &drifted),
        &archive,
    )
    .run(CancellationToken::new())
    .await
    .unwrap();
}

#[tokio::test]
async fn modern_images_validate_by_exact_digest_set() {
    let tmp = tempfile::tempdir().unwrap();
    let archive = tmp.path().join("images.tar");
    let saved = Digest::sha256_of(b"oci manifest");
    let altered = Digest::sha256_of(b"oci manifest, but not the one saved");

    let lines = ["modern/app:v1"];
    Saver::new(
        common::opts(&lines, &["amd64"]),
        mock(OCI_MANIFEST_MEDIA_TYPE, &saved, &saved),
        &archive,
    )
    .run(CancellationToken::new())
    .await
    .unwrap();

    // Matching digest passes.
    Validator::new(
        common::opts(&lines, &["amd64"]),
        mock(OCI_MANIFEST_MEDIA_TYPE, &saved, &saved),
        &archive,
    )
    .run(CancellationToken::new())
    .await
    .unwrap();

    // Same reference with a different digest fails: identity is not enough.
    let err = Validator::new(
        common::opts(&lines, &["amd64"]),
        mock(OCI_MANIFEST_MEDIA_TYPE, &saved, &altered),
        &archive,
    )
    .run(CancellationToken::new())
    .await
    .unwrap_err();
    assert!(matches!(&err, Error::ValidateFailed(lines) if lines == &vec!["modern/app:v1"]));
}
