// ABOUTME: Load pipeline: unpack an archive once, then copy each image to its target.
// ABOUTME: Index lookups map list lines onto unpacked content; misses are failures.

use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{FailedImages, PipelineOpts, UnitError};
use crate::archive::{Index, Reader};
use crate::dispatch::{WorkUnit, WorkerPool};
use crate::error::{Error, Result};
use crate::transport::{
    ArchiveSource, EndpointProvider, ImageDestination, ImageSource, SecurityPolicy,
    TransportError,
};
use crate::types::PlatformSet;

struct LoadUnit {
    source: ArchiveSource,
    destination: Box<dyn ImageDestination>,
}

/// Restores images from an archive into destination endpoints.
pub struct Loader {
    opts: PipelineOpts,
    provider: Arc<dyn EndpointProvider>,
    archive_path: PathBuf,
    failed: Arc<FailedImages>,
}

impl Loader {
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

    /// Run the load flow. The archive is unpacked once into a cache dir
    /// that lives for the whole run and is removed at the end.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let reader = Reader::open(&self.archive_path)?;
        let raw = reader.read_index()?;
        let index = Index::unmarshal(&raw)?;

        let cache = tempfile::Builder::new().prefix("stowage-load-").tempdir()?;
        reader.unpack(cache.path())?;
        info!(
            "unpacked archive {:?}: {} image(s) indexed",
            self.archive_path,
            index.len()
        );

        let pool = {
            let failed = Arc::clone(&self.failed);
            let platforms = self.opts.platforms.clone();
            let policy = self.opts.policy.clone();
            let cancel = cancel.clone();
            WorkerPool::start(self.opts.jobs, cancel.clone(), move |unit| {
                process_unit(
                    platforms.clone(),
                    policy.clone(),
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
            let Some(entry) =
                index.find_reference(reference.project(), reference.name(), reference.tag())
            else {
                error!("Image [{}] does not exist in archive index", reference);
                self.failed.record(line);
                continue;
            };
            let source = ArchiveSource::new(reference.clone(), cache.path(), entry.clone());
            let destination = match self.provider.destination(&reference).await {
                Ok(destination) => destination,
                Err(e) => {
                    error!("failed to init dest image [{}]: {}", reference, e);
                    self.failed.record(line);
                    continue;
                }
            };
            let dispatched = pool
                .dispatch(WorkUnit {
                    id: i + 1,
                    line: line.clone(),
                    timeout: self.opts.timeout,
                    payload: LoadUnit {
                        source,
                        destination,
                    },
                })
                .await;
            if !dispatched {
                break;
            }
        }
        pool.wait().await;

        if !self.failed.is_empty() {
            self.failed.report("Load");
            return Err(Error::LoadFailed(self.failed.lines()));
        }
        Ok(())
    }
}

async fn process_unit(
    platforms: PlatformSet,
    policy: SecurityPolicy,
    failed: Arc<FailedImages>,
    cancel: CancellationToken,
    unit: WorkUnit<LoadUnit>,
) {
    let WorkUnit {
        id,
        line,
        timeout,
        payload,
    } = unit;
    let LoadUnit {
        mut source,
        mut destination,
    } = payload;

    let work = async {
        match timeout {
            Some(limit) => tokio::time::timeout(
                limit,
                load_image(&platforms, &policy, id, &mut source, destination.as_mut()),
            )
            .await
            .unwrap_or_else(|_| Err(UnitError::Timeout(limit.as_secs()))),
            None => load_image(&platforms, &policy, id, &mut source, destination.as_mut()).await,
        }
    };
    let result = tokio::select! {
        result = work => result,
        _ = cancel.cancelled() => Err(UnitError::Cancelled),
    };

    if let Err(e) = result {
        error!(img = id, "failed to load [{}]: {}", line, e);
        failed.record(&line);
    }
}

async fn load_image(
    platforms: &PlatformSet,
    policy: &SecurityPolicy,
    id: usize,
    source: &mut ArchiveSource,
    destination: &mut dyn ImageDestination,
) -> std::result::Result<(), UnitError> {
    source
        .init()
        .await
        .map_err(|e| UnitError::transport("failed to init source", source.display_name(), e))?;
    info!(img = id, "Loading [{}]", source.display_name());

    destination.init().await.map_err(|e| {
        UnitError::transport("failed to init destination", source.display_name(), e)
    })?;

    match source.copy(&*destination, platforms, policy).await {
        Ok(()) => {
            info!(
                img = id,
                "Loaded [{}] into {:?}",
                source.display_name(),
                destination.directory()
            );
            Ok(())
        }
        Err(TransportError::NoMatchingPlatform) => {
            warn!(
                img = id,
                "Skip load image [{}]: no image available for the requested platform set",
                source.display_name()
            );
            Ok(())
        }
        Err(e) => Err(UnitError::transport(
            "failed to copy",
            source.display_name(),
            e,
        )),
    }
}
