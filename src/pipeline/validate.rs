// ABOUTME: Validate pipeline: archive index vs fresh source metadata, no blob transfer.
// ABOUTME: Legacy schema-v1 images match by reference; everything else by digest set.

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{FailedImages, PipelineOpts, UnitError};
use crate::archive::{Index, Reader};
use crate::dispatch::{WorkUnit, WorkerPool};
use crate::error::{Error, Result};
use crate::transport::{EndpointProvider, ImageSource, is_legacy_schema1};
use crate::types::PlatformSet;

struct ValidateUnit {
    source: Box<dyn ImageSource>,
}

/// Checks every listed image against an existing archive's index.
pub struct Validator {
    opts: PipelineOpts,
    provider: Arc<dyn EndpointProvider>,
    archive_path: PathBuf,
    failed: Arc<FailedImages>,
}

impl Validator {
    pub fn new(
        opts: PipelineOpts,
        provider: Arc<dyn EndpointProvider>,
        archive_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            opts,
            provider,
            archive_path: archive_path.into(),
            failed: Arc::new(FailedImages::new()),
        }
    }

    pub fn failed_images(&self) -> Vec<String> {
        self.failed.lines()
    }

    /// Run the validate flow. The index is read once; workers only do
    /// metadata fetches and in-memory lookups.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let reader = Reader::open(&self.archive_path)?;
        let raw = reader.read_index()?;
        let index = Arc::new(Index::unmarshal(&raw)?);
        info!(
            "loaded archive index: {} image(s) in {:?}",
            index.len(),
            self.archive_path
        );

        let pool = {
            let index = Arc::clone(&index);
            let failed = Arc::clone(&self.failed);
            let platforms = self.opts.platforms.clone();
            let cancel = cancel.clone();
            WorkerPool::start(self.opts.jobs, cancel.clone(), move |unit| {
                process_unit(
                    Arc::clone(&index),
                    platforms.clone(),
                    Arc::clone(&failed),
                    cancel.clone(),
                    unit,
                )
            })
        };

        for (i, line) in self.opts.images.iter().enumerate() {
            let reference = match self.opts.resolve_line(line) {
                Ok(reference) => reference,
                Err(e) => {
                    warn!("Ignore image list line {:?}: {}", line, e);
                    continue;
                }
            };
            let source = match self.provider.source(&reference).await {
                Ok(source) => source,
                Err(e) => {
                    error!("failed to init source image [{}]: {}", reference, e);
                    self.failed.record(line);
                    continue;
                }
            };
            let dispatched = pool
                .dispatch(WorkUnit {
                    id: i + 1,
                    line: line.clone(),
                    timeout: self.opts.timeout,
                    payload: ValidateUnit { source },
                })
                .await;
            if !dispatched {
                break;
            }
        }
        pool.wait().await;

        if !self.failed.is_empty() {
            self.failed.report("Validate");
            return Err(Error::ValidateFailed(self.failed.lines()));
        }
        Ok(())
    }
}

async fn process_unit(
    index: Arc<Index>,
    platforms: PlatformSet,
    failed: Arc<FailedImages>,
    cancel: CancellationToken,
    unit: WorkUnit<ValidateUnit>,
) {
    let WorkUnit {
        id,
        line,
        timeout,
        payload,
    } = unit;
    let mut source = payload.source;

    let work = async {
        match timeout {
            Some(limit) => {
                tokio::time::timeout(limit, validate_image(&index, &platforms, id, &mut source))
                    .await
                    .unwrap_or_else(|_| Err(UnitError::Timeout(limit.as_secs())))
            }
            None => validate_image(&index, &platforms, id, &mut source).await,
        }
    };
    let result = tokio::select! {
        result = work => result,
        _ = cancel.cancelled() => Err(UnitError::Cancelled),
    };

    if let Err(e) = result {
        error!(img = id, "failed to validate [{}]: {}", line, e);
        failed.record(&line);
    }
}

async fn validate_image(
    index: &Index,
    platforms: &PlatformSet,
    id: usize,
    source: &mut Box<dyn ImageSource>,
) -> std::result::Result<(), UnitError> {
    source
        .init()
        .await
        .map_err(|e| UnitError::transport("failed to init source", source.display_name(), e))?;

    let reference = source.reference();
    let found = if is_legacy_schema1(source.mime()) {
        // Schema-v1 digests change when the manifest is re-serialized
        // during copy, so only the identity triple can be compared.
        index.has_reference(reference.project(), reference.name(), reference.tag())
    } else {
        index.has(&source.image_descriptor(platforms))
    };

    if !found {
        error!(
            img = id,
            "Image [{}] does not exist in archive index",
            source.display_name()
        );
        return Err(UnitError::NotInArchive(source.display_name()));
    }
    info!(img = id, "PASS: [{}]", source.display_name());
    Ok(())
}
