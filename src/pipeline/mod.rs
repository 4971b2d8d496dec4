// ABOUTME: Save, validate and load pipelines plus shared run bookkeeping.
// ABOUTME: Per-unit failures land in FailedImages; runs aggregate at the end.

mod load;
mod save;
mod validate;

pub use load::Loader;
pub use save::Saver;
pub use validate::Validator;

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::archive::ArchiveError;
use crate::transport::{SecurityPolicy, TransportError};
use crate::types::{ImageRef, ParseRefError, PlatformSet};

/// Configuration shared by all three pipelines.
#[derive(Debug, Clone)]
pub struct PipelineOpts {
    /// Raw image-list lines, already stripped of blanks and comments.
    pub images: Vec<String>,
    pub platforms: PlatformSet,
    /// Worker pool size; clamped by the dispatcher.
    pub jobs: usize,
    /// Optional per-image timeout.
    pub timeout: Option<Duration>,
    pub policy: SecurityPolicy,
    /// Override the registry of source images.
    pub source_registry: Option<String>,
    /// Override the project of source images.
    pub source_project: Option<String>,
}

impl PipelineOpts {
    /// Resolve one image-list line, applying the source overrides.
    pub fn resolve_line(&self, line: &str) -> Result<ImageRef, ParseRefError> {
        Ok(ImageRef::parse(line)?.with_overrides(
            self.source_registry.as_deref(),
            self.source_project.as_deref(),
        ))
    }
}

/// Image-list lines whose unit failed, keyed by the raw line.
///
/// Written from many workers during a run, read only after the pool has
/// drained.
#[derive(Debug, Default)]
pub struct FailedImages {
    set: Mutex<BTreeSet<String>>,
}

impl FailedImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, line: &str) {
        self.set.lock().insert(line.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.set.lock().is_empty()
    }

    pub fn lines(&self) -> Vec<String> {
        self.set.lock().iter().cloned().collect()
    }

    /// Log the final failed-image report for the operator.
    pub fn report(&self, verb: &str) {
        let lines = self.lines();
        if !lines.is_empty() {
            tracing::error!("{} failed image list:\n{}", verb, lines.join("\n"));
        }
    }

    /// Write the failed lines to a report file, one per line.
    pub fn write_report(&self, path: &Path) -> std::io::Result<()> {
        let mut data = self.lines().join("\n");
        data.push('\n');
        std::fs::write(path, data)
    }
}

/// Per-unit failure, caught at the unit boundary and recorded; never
/// unwinds into the dispatcher.
#[derive(Debug, Error)]
pub(crate) enum UnitError {
    #[error("{stage} [{reference}]: {source}")]
    Transport {
        stage: &'static str,
        reference: String,
        source: TransportError,
    },

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("image [{0}] does not exist in archive index")]
    NotInArchive(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("run cancelled")]
    Cancelled,
}

impl UnitError {
    pub(crate) fn transport(
        stage: &'static str,
        reference: String,
        source: TransportError,
    ) -> Self {
        Self::Transport {
            stage,
            reference,
            source,
        }
    }
}

/// Drop blank lines and `#` comments from a raw image list.
pub fn filter_list_lines<I>(lines: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    lines
        .into_iter()
        .filter_map(|line| {
            let line = line.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                None
            } else {
                Some(line.to_string())
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_filtering_drops_blanks_and_comments() {
        let lines = filter_list_lines(["nginx:1.25", "", "  ", "# comment", "  redis:7  "]);
        assert_eq!(lines, vec!["nginx:1.25", "redis:7"]);
    }

    #[test]
    fn failed_images_dedupe_and_sort() {
        let failed = FailedImages::new();
        failed.record("b:2");
        failed.record("a:1");
        failed.record("b:2");
        assert_eq!(failed.lines(), vec!["a:1", "b:2"]);
    }

    #[test]
    fn report_file_holds_one_line_per_failure() {
        let failed = FailedImages::new();
        failed.record("nginx:1.25");
        failed.record("redis:7");
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("failed.txt");
        failed.write_report(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "nginx:1.25\nredis:7\n");
    }

    #[test]
    fn resolve_line_applies_overrides() {
        let opts = PipelineOpts {
            images: vec![],
            platforms: PlatformSet::any(),
            jobs: 1,
            timeout: None,
            policy: SecurityPolicy::default(),
            source_registry: Some("mirror.internal".into()),
            source_project: None,
        };
        let r = opts.resolve_line("nginx:1.25").unwrap();
        assert_eq!(r.registry(), "mirror.internal");
        assert_eq!(r.project(), "library");
    }
}
