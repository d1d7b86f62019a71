//! Persistence of rendered artifacts into the prebuilt tree.

use std::{
    io::{self, Write},
    path::Path,
};

use tempfile::NamedTempFile;
use tokio::{fs, task};
use tracing::debug;

const TEMP_PREFIX: &str = ".rendergate-";

/// Write `bytes` to `path`, creating missing parent directories.
///
/// The bytes land in a temporary sibling first and are then renamed over the
/// destination, so a reader sees either the previous artifact or the new one.
/// Concurrent writers are not coordinated here; the last rename wins.
pub async fn persist_artifact(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| io::Error::other(format!("`{}` has no parent", path.display())))?;
    fs::create_dir_all(&parent).await?;

    let destination = path.to_path_buf();
    let payload = bytes.to_vec();
    let written = payload.len();
    task::spawn_blocking(move || write_then_rename(&parent, &destination, &payload))
        .await
        .map_err(io::Error::other)??;

    debug!(
        target = "rendergate::cache",
        op = "cache::persist_artifact",
        path = %path.display(),
        bytes = written,
        "artifact written"
    );
    Ok(())
}

fn write_then_rename(parent: &Path, destination: &Path, payload: &[u8]) -> io::Result<()> {
    let mut staged: NamedTempFile = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(parent)?;
    staged.write_all(payload)?;
    staged.as_file().sync_all()?;
    staged
        .persist(destination)
        .map(|_| ())
        .map_err(|err| err.error)
}
