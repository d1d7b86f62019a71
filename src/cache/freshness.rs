//! Freshness decisions for prebuilt artifacts.

use std::{io, path::Path, time::SystemTime};

use tokio::fs;

use crate::{application::paths::is_absent, domain::types::Freshness};

/// Decide cache validity from the two modification times.
///
/// Equal timestamps count as fresh so coarse filesystem clocks do not force
/// a re-render right after a write.
pub fn evaluate(source: Option<SystemTime>, artifact: Option<SystemTime>) -> Freshness {
    match (source, artifact) {
        (None, _) => Freshness::SourceMissing,
        (Some(_), None) => Freshness::Stale,
        (Some(source), Some(artifact)) if artifact < source => Freshness::Stale,
        (Some(_), Some(_)) => Freshness::Fresh,
    }
}

/// Stat both paths and evaluate them.
pub async fn check(source: &Path, artifact: &Path) -> io::Result<Freshness> {
    let source = modified_at(source, false).await?;
    if source.is_none() {
        return Ok(Freshness::SourceMissing);
    }
    let artifact = modified_at(artifact, true).await?;
    Ok(evaluate(source, artifact))
}

/// Modification time of a regular file, `None` when it does not exist.
///
/// With `require_content`, an empty file also counts as missing: an interrupted
/// write must not be served as a valid artifact.
async fn modified_at(path: &Path, require_content: bool) -> io::Result<Option<SystemTime>> {
    let metadata = match fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(err) if is_absent(&err) => return Ok(None),
        Err(err) => return Err(err),
    };
    if !metadata.is_file() || (require_content && metadata.len() == 0) {
        return Ok(None);
    }
    metadata.modified().map(Some)
}
