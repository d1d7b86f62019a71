//! Bulk refresh of every template artifact.

use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Instant,
};

use futures::{StreamExt, stream};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::domain::types::OutputFormat;

use super::templates::{Ensured, SOURCE_EXTENSION, TemplateService};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrebuildFailure {
    pub artifact: PathBuf,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct PrebuildReport {
    pub rendered: usize,
    pub fresh: usize,
    pub failed: Vec<PrebuildFailure>,
}

impl PrebuildReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PrebuildOptions {
    pub formats: Vec<OutputFormat>,
    pub concurrency: NonZeroUsize,
    pub force: bool,
}

/// Stems of every `*.typ` file below `root`, relative to it, sorted.
pub fn template_stems(root: &Path) -> Vec<PathBuf> {
    let mut stems: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(
                    target = "rendergate::prebuild",
                    error = %err,
                    "skipping unreadable template entry"
                );
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry.path().extension().and_then(|value| value.to_str()) == Some(SOURCE_EXTENSION)
        })
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(root)
                .ok()
                .map(|relative| relative.with_extension(""))
        })
        .collect();
    stems.sort();
    stems
}

/// Ensure every template has a current artifact in every requested format.
/// All templates are attempted; failures are collected in the report.
pub async fn prebuild(service: &TemplateService, options: &PrebuildOptions) -> PrebuildReport {
    let started_at = Instant::now();
    let stems = template_stems(service.templates_root());
    let jobs: Vec<(PathBuf, OutputFormat)> = stems
        .iter()
        .flat_map(|stem| {
            options
                .formats
                .iter()
                .map(move |format| (stem.clone(), *format))
        })
        .collect();

    let report = Mutex::new(PrebuildReport::default());
    stream::iter(jobs)
        .for_each_concurrent(options.concurrency.get(), |(stem, format)| {
            let report = &report;
            async move {
                let artifact = PathBuf::from(format!("{}.{}", stem.display(), format.extension()));
                let outcome = service.ensure(&stem, format, options.force).await;
                let Ok(mut report) = report.lock() else {
                    return;
                };
                match outcome {
                    Ok(Ensured::Fresh { .. }) => report.fresh += 1,
                    Ok(Ensured::Rendered(_)) => report.rendered += 1,
                    Err(err) => {
                        warn!(
                            target = "rendergate::prebuild",
                            op = "prebuild::ensure",
                            result = "error",
                            artifact = %artifact.display(),
                            error = %err,
                            "artifact could not be built"
                        );
                        report.failed.push(PrebuildFailure {
                            artifact,
                            message: err.to_string(),
                        });
                    }
                }
            }
        })
        .await;

    let report = report
        .into_inner()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    info!(
        target = "rendergate::prebuild",
        op = "prebuild::run",
        templates = stems.len(),
        rendered = report.rendered,
        fresh = report.fresh,
        failed = report.failed.len(),
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "prebuild finished"
    );
    report
}
