// ABOUTME: Shared fixtures for integration tests.
// ABOUTME: Builds OCI image layouts on disk and inspects produced archives.
#![allow(dead_code)]

use serde_json::json;
use std::fs;
use std::path::Path;

use stowage::pipeline::PipelineOpts;
use stowage::transport::SecurityPolicy;
use stowage::types::{Digest, PlatformSet};

pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";
pub const OCI_LAYER: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Write `data` into a layout's blob store, returning its digest.
pub fn write_blob(layout: &Path, data: &[u8]) -> Digest {
    let digest = Digest::sha256_of(data);
    let dir = layout.join("blobs").join(digest.algorithm());
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(digest.encoded()), data).unwrap();
    digest
}

/// Build one OCI image layout under `<root>/<project>/<name>`.
///
/// One manifest is written per `(arch, os)` pair, all referencing the same
/// layer contents. A single platform produces a plain manifest entry whose
/// platform lives only in the config blob; multiple platforms produce a
/// nested image index. Returns the per-platform manifest digests.
pub fn write_layout(
    root: &Path,
    project: &str,
    name: &str,
    tag: &str,
    platforms: &[(&str, &str)],
    layers: &[&[u8]],
) -> Vec<Digest> {
    let layout = root.join(project).join(name);
    fs::create_dir_all(&layout).unwrap();

    let mut descriptors = Vec::new();
    let mut manifest_digests = Vec::new();
    for (arch, os) in platforms {
        let config = json!({
            "architecture": arch,
            "os": os,
            "config": { "Labels": { "fixture": format!("{project}/{name}:{tag}") } },
            "rootfs": { "type": "layers", "diff_ids": [] },
        });
        let config_raw = serde_json::to_vec(&config).unwrap();
        let config_digest = write_blob(&layout, &config_raw);

        let layer_entries: Vec<_> = layers
            .iter()
            .map(|data| {
                let digest = write_blob(&layout, data);
                json!({
                    "mediaType": OCI_LAYER,
                    "digest": digest.to_string(),
                    "size": data.len(),
                })
            })
            .collect();

        let manifest = json!({
            "schemaVersion": 2,
            "mediaType": OCI_MANIFEST,
            "config": {
                "mediaType": OCI_CONFIG,
                "digest": config_digest.to_string(),
                "size": config_raw.len(),
            },
            "layers": layer_entries,
        });
        let manifest_raw = serde_json::to_vec(&manifest).unwrap();
        let manifest_digest = write_blob(&layout, &manifest_raw);
        descriptors.push(json!({
            "mediaType": OCI_MANIFEST,
            "digest": manifest_digest.to_string(),
            "size": manifest_raw.len(),
            "platform": { "architecture": arch, "os": os },
        }));
        manifest_digests.push(manifest_digest);
    }

    let top = if descriptors.len() == 1 {
        let mut descriptor = descriptors.pop().unwrap();
        let fields = descriptor.as_object_mut().unwrap();
        fields.remove("platform");
        fields.insert(
            "annotations".into(),
            json!({ "org.opencontainers.image.ref.name": tag }),
        );
        json!({ "schemaVersion": 2, "manifests": [descriptor] })
    } else {
        let nested = json!({
            "schemaVersion": 2,
            "mediaType": OCI_INDEX,
            "manifests": descriptors,
        });
        let nested_raw = serde_json::to_vec(&nested).unwrap();
        let nested_digest = write_blob(&layout, &nested_raw);
        json!({
            "schemaVersion": 2,
            "manifests": [{
                "mediaType": OCI_INDEX,
                "digest": nested_digest.to_string(),
                "size": nested_raw.len(),
                "annotations": { "org.opencontainers.image.ref.name": tag },
            }],
        })
    };
    fs::write(
        layout.join("index.json"),
        serde_json::to_vec_pretty(&top).unwrap(),
    )
    .unwrap();
    manifest_digests
}

/// Pipeline options over a fixed image list, filtering to `archs` on linux.
pub fn opts(lines: &[&str], archs: &[&str]) -> PipelineOpts {
    PipelineOpts {
        images: lines.iter().map(|s| s.to_string()).collect(),
        platforms: PlatformSet::new(archs.iter().copied(), ["linux"]),
        jobs: 2,
        timeout: None,
        policy: SecurityPolicy::default(),
        source_registry: None,
        source_project: None,
    }
}

/// All entry paths inside a tar archive, as strings.
pub fn tar_paths(archive: &Path) -> Vec<String> {
    let file = fs::File::open(archive).unwrap();
    let mut tar = tar::Archive::new(file);
    tar.entries()
        .unwrap()
        .map(|entry| {
            entry
                .unwrap()
                .path()
                .unwrap()
                .to_string_lossy()
                .into_owned()
        })
        .collect()
}

/// How many times a shared blob file appears in the archive.
pub fn count_shared_blob(archive: &Path, digest: &Digest) -> usize {
    let needle = format!("share/{}/{}", digest.algorithm(), digest.encoded());
    tar_paths(archive)
        .iter()
        .filter(|path| path.as_str() == needle)
        .count()
}
