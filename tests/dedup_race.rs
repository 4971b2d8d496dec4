// ABOUTME: Randomized concurrency check for archive blob dedup.
// ABOUTME: Any pool size and image count must persist a shared layer exactly once.

mod common;

use proptest::prelude::*;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use stowage::archive::{Index, Reader};
use stowage::pipeline::{Saver, Validator};
use stowage::transport::{DirProvider, EndpointProvider};
use stowage::types::Digest;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(10))]

    #[test]
    fn shared_base_layer_is_stored_once(
        n_images in 2usize..6,
        jobs in 1usize..6,
        seed in 0u8..=255,
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (count, entries) = rt.block_on(async move {
            let tmp = tempfile::tempdir().unwrap();
            let src = tmp.path().join("src");
            let base = vec![seed; 64];

            let mut lines = Vec::new();
            for i in 0..n_images {
                let name = format!("img{i}");
                let unique = format!("unique layer {i} seed {seed}").into_bytes();
                common::write_layout(
                    &src,
                    "library",
                    &name,
                    "v1",
                    &[("amd64", "linux")],
                    &[&base, &unique],
                );
                lines.push(format!("{name}:v1"));
            }

            let archive = tmp.path().join("images.tar");
            let line_refs: Vec<&str> = lines.iter().map(String::as_str).collect();
            let mut opts = common::opts(&line_refs, &["amd64"]);
            opts.jobs = jobs;
            let provider: Arc<dyn EndpointProvider> =
                Arc::new(DirProvider::new(&src, tmp.path().join("dst")));

            Saver::new(opts.clone(), Arc::clone(&provider), &archive)
                .run(CancellationToken::new())
                .await
                .unwrap();
            Validator::new(opts, provider, &archive)
                .run(CancellationToken::new())
                .await
                .unwrap();

            let index =
                Index::unmarshal(&Reader::open(&archive).unwrap().read_index().unwrap()).unwrap();
            let count = common::count_shared_blob(&archive, &Digest::sha256_of(&base));
            (count, index.len())
        });
        prop_assert_eq!(count, 1);
        prop_assert_eq!(entries, n_images);
    }
}
