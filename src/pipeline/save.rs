// ABOUTME: Save pipeline: concurrent copy into staging dirs, serialized archive commit.
// ABOUTME: Copying runs at full pool width; ledger, append and index share one lock.

use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{FailedImages, PipelineOpts, UnitError};
use crate::archive::{ArchiveError, Index, Writer};
use crate::dispatch::{WorkUnit, WorkerPool};
use crate::error::{Error, Result};
use crate::transport::{
    EndpointProvider, ImageDestination, ImageSource, OciDirDestination, SecurityPolicy,
    TransportError,
};
use crate::types::PlatformSet;

/// Archive writer and in-memory index behind the single writer lock.
/// Holding them together keeps ledger state, index state and on-disk bytes
/// mutually consistent.
struct ArchiveState {
    writer: Option<Writer>,
    index: Index,
}

struct SaveUnit {
    source: Box<dyn ImageSource>,
    destination: OciDirDestination,
    staging: TempDir,
}

/// Copies every listed image into a new archive file.
pub struct Saver {
    opts: PipelineOpts,
    provider: Arc<dyn EndpointProvider>,
    archive_path: PathBuf,
    failed: Arc<FailedImages>,
}

impl Saver {
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

    /// Image-list lines that failed in the last run.
    pub fn failed_images(&self) -> Vec<String> {
        self.failed.lines()
    }

    /// Run the save flow. Archive lifecycle errors are fatal; per-image
    /// failures are collected and reported as [`Error::CopyFailed`].
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let writer = Writer::create(&self.archive_path)?;
        let state = Arc::new(Mutex::new(ArchiveState {
            writer: Some(writer),
            index: Index::new(),
        }));

        let pool = {
            let state = Arc::clone(&state);
            let failed = Arc::clone(&self.failed);
            let platforms = self.opts.platforms.clone();
            let policy = self.opts.policy.clone();
            let cancel = cancel.clone();
            WorkerPool::start(self.opts.jobs, cancel.clone(), move |unit| {
                process_unit(
                    Arc::clone(&state),
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
            let source = match self.provider.source(&reference).await {
                Ok(source) => source,
                Err(e) => {
                    error!("failed to init source image [{}]: {}", reference, e);
                    self.failed.record(line);
                    continue;
                }
            };
            let staging = match tempfile::Builder::new().prefix("stowage-save-").tempdir() {
                Ok(staging) => staging,
                Err(e) => {
                    error!("failed to create staging dir for [{}]: {}", reference, e);
                    self.failed.record(line);
                    continue;
                }
            };
            debug!("created staging dir {:?}", staging.path());
            let destination = OciDirDestination::new(reference, staging.path());
            let dispatched = pool
                .dispatch(WorkUnit {
                    id: i + 1,
                    line: line.clone(),
                    timeout: self.opts.timeout,
                    payload: SaveUnit {
                        source,
                        destination,
                        staging,
                    },
                })
                .await;
            if !dispatched {
                // Run was cancelled; remaining lines are not enqueued.
                break;
            }
        }
        pool.wait().await;

        // Write the index and close the archive even when some units
        // failed; partial archives are valid and useful.
        {
            let mut guard = state.lock().await;
            let state = &mut *guard;
            let writer = state.writer.as_mut().ok_or(ArchiveError::Closed)?;
            writer.write_index(&state.index)?;
            let writer = state.writer.take().ok_or(ArchiveError::Closed)?;
            writer.finish()?;
        }

        if !self.failed.is_empty() {
            self.failed.report("Save");
            return Err(Error::CopyFailed(self.failed.lines()));
        }
        Ok(())
    }
}

async fn process_unit(
    state: Arc<Mutex<ArchiveState>>,
    platforms: PlatformSet,
    policy: SecurityPolicy,
    failed: Arc<FailedImages>,
    cancel: CancellationToken,
    unit: WorkUnit<SaveUnit>,
) {
    let WorkUnit {
        id,
        line,
        timeout,
        payload,
    } = unit;
    let SaveUnit {
        mut source,
        mut destination,
        staging,
    } = payload;

    let work = async {
        match timeout {
            Some(limit) => tokio::time::timeout(
                limit,
                save_image(&state, &platforms, &policy, id, &mut source, &mut destination),
            )
            .await
            .unwrap_or_else(|_| Err(UnitError::Timeout(limit.as_secs()))),
            None => save_image(&state, &platforms, &policy, id, &mut source, &mut destination).await,
        }
    };
    let result = tokio::select! {
        result = work => result,
        _ = cancel.cancelled() => Err(UnitError::Cancelled),
    };

    if let Err(e) = result {
        error!(img = id, "failed to save [{}]: {}", line, e);
        failed.record(&line);
    }
    // Staging directory is removed whether the unit succeeded or failed.
    drop(staging);
}

async fn save_image(
    state: &Mutex<ArchiveState>,
    platforms: &PlatformSet,
    policy: &SecurityPolicy,
    id: usize,
    source: &mut Box<dyn ImageSource>,
    destination: &mut OciDirDestination,
) -> std::result::Result<(), UnitError> {
    source
        .init()
        .await
        .map_err(|e| UnitError::transport("failed to init source", source.display_name(), e))?;
    info!(img = id, "Saving [{}]", source.display_name());

    destination.init().await.map_err(|e| {
        UnitError::transport("failed to init destination", source.display_name(), e)
    })?;

    match source.copy(&*destination, platforms, policy).await {
        Ok(()) => {}
        Err(TransportError::NoMatchingPlatform) => {
            // Still committed below: the empty index entry lets a later
            // validate run with the same platform filter pass this image.
            warn!(
                img = id,
                "Skip save image [{}]: no image available for the requested platform set",
                source.display_name()
            );
        }
        Err(e) => {
            return Err(UnitError::transport(
                "failed to copy",
                source.display_name(),
                e,
            ));
        }
    }

    // Copy is done; everything below runs under the single writer lock.
    let copied = source.copied_image();
    let mut guard = state.lock().await;
    debug!(img = id, "Compressing [{}]", source.display_name());
    let state = &mut *guard;
    let writer = state
        .writer
        .as_mut()
        .ok_or(UnitError::Archive(ArchiveError::Closed))?;
    writer
        .commit_image(destination.directory(), &copied)
        .map_err(UnitError::Archive)?;
    state.index.append(copied);
    Ok(())
}
