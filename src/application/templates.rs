//! Cached rendering of resident templates.
//!
//! `templates/<stem>.typ` is rendered into `prebuilt/<stem>.<ext>` and the
//! artifact is reused until the source changes.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::Instant,
};

use metrics::counter;
use tokio::fs;
use tracing::{debug, info};

use crate::{
    cache::{ArtifactLocks, freshness, persist_artifact},
    domain::types::{Freshness, OutputFormat, RenderOutput, RenderRequest},
};

use super::{
    error::GatewayError,
    paths::{PathResolver, ResolvedPath},
    render::RenderDispatcher,
};

pub const SOURCE_EXTENSION: &str = "typ";

/// Whether a response was served from an existing artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

impl CacheOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TemplateArtifact {
    pub output: RenderOutput,
    pub cache: CacheOutcome,
}

/// Result of bringing one artifact up to date.
#[derive(Debug, Clone)]
pub enum Ensured {
    /// The artifact on disk was already current.
    Fresh { artifact: PathBuf },
    /// The artifact was rendered and written.
    Rendered(RenderOutput),
}

#[derive(Clone)]
pub struct TemplateService {
    templates: PathResolver,
    prebuilt: PathResolver,
    dispatcher: RenderDispatcher,
    locks: Option<ArtifactLocks>,
}

impl TemplateService {
    /// `locks` enables single-flight rendering per artifact path.
    pub fn new(
        templates: PathResolver,
        prebuilt: PathResolver,
        dispatcher: RenderDispatcher,
        locks: Option<ArtifactLocks>,
    ) -> Self {
        Self {
            templates,
            prebuilt,
            dispatcher,
            locks,
        }
    }

    pub fn templates_root(&self) -> &Path {
        self.templates.root()
    }

    /// Serve the artifact named by a client identifier such as `reports/q1.pdf`.
    pub async fn fetch(&self, identifier: &str) -> Result<TemplateArtifact, GatewayError> {
        let requested = self.templates.resolve(identifier)?;
        let format = requested
            .relative
            .extension()
            .and_then(|value| value.to_str())
            .and_then(OutputFormat::from_extension)
            .ok_or_else(|| {
                GatewayError::bad_request(format!(
                    "unsupported output format for `{identifier}`; expected .pdf or .svg"
                ))
            })?;
        let stem = requested.relative.with_extension("");

        match self.ensure(&stem, format, false).await? {
            Ensured::Fresh { artifact } => {
                let bytes = fs::read(&artifact).await?;
                Ok(TemplateArtifact {
                    output: RenderOutput::new(bytes, format),
                    cache: CacheOutcome::Hit,
                })
            }
            Ensured::Rendered(output) => Ok(TemplateArtifact {
                output,
                cache: CacheOutcome::Miss,
            }),
        }
    }

    /// Make `prebuilt/<stem>.<ext>` current, rendering it when stale or when
    /// `force` is set.
    pub async fn ensure(
        &self,
        stem: &Path,
        format: OutputFormat,
        force: bool,
    ) -> Result<Ensured, GatewayError> {
        let source = self
            .templates
            .resolve_path(&with_suffix(stem, SOURCE_EXTENSION))?;
        let artifact = self
            .prebuilt
            .resolve_path(&with_suffix(stem, format.extension()))?;

        let _guard = match &self.locks {
            Some(locks) => Some(locks.acquire(&artifact.absolute).await),
            None => None,
        };

        let freshness = freshness::check(&source.absolute, &artifact.absolute).await?;
        debug!(
            target = "rendergate::cache",
            op = "cache::freshness",
            source = %source.relative.display(),
            artifact = %artifact.relative.display(),
            freshness = freshness.as_str(),
            "artifact freshness evaluated"
        );

        match freshness {
            Freshness::SourceMissing => Err(GatewayError::not_found(format!(
                "template `{}`",
                source.relative.display()
            ))),
            Freshness::Fresh if !force => {
                counter!("rendergate_artifact_fresh_total", "format" => format.as_str())
                    .increment(1);
                Ok(Ensured::Fresh {
                    artifact: artifact.absolute,
                })
            }
            Freshness::Fresh | Freshness::Stale => {
                counter!("rendergate_artifact_stale_total", "format" => format.as_str())
                    .increment(1);
                let output = self.render(&source, &artifact, format).await?;
                Ok(Ensured::Rendered(output))
            }
        }
    }

    async fn render(
        &self,
        source: &ResolvedPath,
        artifact: &ResolvedPath,
        format: OutputFormat,
    ) -> Result<RenderOutput, GatewayError> {
        let started_at = Instant::now();
        let request = RenderRequest::new(self.templates.root(), &source.absolute, format);
        let output = self.dispatcher.dispatch(request).await?;
        persist_artifact(&artifact.absolute, &output.bytes).await?;

        info!(
            target = "rendergate::cache",
            op = "cache::regenerate",
            result = "ok",
            artifact = %artifact.relative.display(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "artifact regenerated"
        );
        Ok(output)
    }
}

/// `report.v2` + `pdf` gives `report.v2.pdf`; `Path::with_extension` would
/// replace `v2` instead.
fn with_suffix(stem: &Path, extension: &str) -> PathBuf {
    let mut name = OsString::from(stem.as_os_str());
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}
