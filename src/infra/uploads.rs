//! Staging of uploaded source files for on-demand renders.
//!
//! Every request writes into its own `batch-*` directory below the staging
//! root, so two requests uploading `main.typ` at the same time never see each
//! other's files. A batch is removed by [`UploadBatch::close`]; dropping an
//! unclosed batch removes it as well.

use std::{
    io,
    num::NonZeroU64,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use metrics::counter;
use tempfile::TempDir;
use tokio::{fs, io::AsyncWriteExt, task};
use tracing::{debug, warn};

use crate::application::{
    error::GatewayError,
    paths::{PathResolver, ResolvedPath},
};

/// Per-file size limit for staged uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSizeLimit {
    Bounded(NonZeroU64),
    Unbounded,
}

impl FileSizeLimit {
    fn allows(self, size: u64) -> bool {
        match self {
            FileSizeLimit::Bounded(limit) => size <= limit.get(),
            FileSizeLimit::Unbounded => true,
        }
    }
}

/// The staging directory all upload batches live under.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
    limit: FileSizeLimit,
}

impl StagingArea {
    /// Create the staging directory if needed.
    pub fn new(root: impl AsRef<Path>, limit: FileSizeLimit) -> io::Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        let root = std::fs::canonicalize(root.as_ref())?;
        Ok(Self { root, limit })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open a fresh, private batch directory.
    pub fn open_batch(&self) -> io::Result<UploadBatch> {
        let dir = tempfile::Builder::new()
            .prefix("batch-")
            .tempdir_in(&self.root)?;
        let resolver = PathResolver::new(dir.path())?;
        Ok(UploadBatch {
            dir: Some(dir),
            resolver,
            limit: self.limit,
            staged: Vec::new(),
        })
    }
}

/// Files uploaded by one request.
pub struct UploadBatch {
    dir: Option<TempDir>,
    resolver: PathResolver,
    limit: FileSizeLimit,
    staged: Vec<ResolvedPath>,
}

impl UploadBatch {
    /// Batch directory.
    pub fn path(&self) -> &Path {
        self.resolver.root()
    }

    /// Staged files in upload order.
    pub fn files(&self) -> &[ResolvedPath] {
        &self.staged
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Resolve a client identifier against the batch directory.
    pub fn resolve(&self, identifier: &str) -> Result<ResolvedPath, GatewayError> {
        self.resolver.resolve(identifier)
    }

    pub fn contains(&self, path: &ResolvedPath) -> bool {
        self.staged
            .iter()
            .any(|staged| staged.absolute == path.absolute)
    }

    /// Stream one uploaded file into the batch.
    ///
    /// A later upload with the same name replaces the earlier content.
    pub async fn stage<S>(&mut self, filename: &str, stream: S) -> Result<ResolvedPath, GatewayError>
    where
        S: Stream<Item = Result<Bytes, GatewayError>>,
    {
        let target = self.resolver.resolve(filename)?;
        if let Some(parent) = target.absolute.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| name_conflict(filename, err))?;
        }

        let mut file = fs::File::create(&target.absolute)
            .await
            .map_err(|err| name_conflict(filename, err))?;

        // Record before writing so a failure below still leaves the path to
        // the batch cleanup.
        if !self.contains(&target) {
            self.staged.push(target.clone());
        }
        let mut written: u64 = 0;

        pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    drop(file);
                    self.discard(&target).await;
                    return Err(err);
                }
            };
            written = written.saturating_add(chunk.len() as u64);
            if !self.limit.allows(written) {
                drop(file);
                self.discard(&target).await;
                return Err(GatewayError::payload_too_large(format!(
                    "file `{filename}` exceeds the upload size limit"
                )));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(
            target = "rendergate::uploads",
            op = "uploads::stage",
            file = %target.relative.display(),
            bytes = written,
            "upload staged"
        );
        Ok(target)
    }

    async fn discard(&mut self, target: &ResolvedPath) {
        self.staged.retain(|staged| staged.absolute != target.absolute);
        if let Err(err) = fs::remove_file(&target.absolute).await {
            record_cleanup_failure(&target.absolute, &err);
        }
    }

    /// Delete every staged file once, then the batch directory.
    ///
    /// Returns the number of files removed. All removals are attempted even
    /// after a failure; the first failure is returned.
    pub async fn close(mut self) -> io::Result<usize> {
        let staged = std::mem::take(&mut self.staged);
        let mut removed = 0;
        let mut first_error = None;

        for file in &staged {
            match fs::remove_file(&file.absolute).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    record_cleanup_failure(&file.absolute, &err);
                    first_error.get_or_insert(err);
                }
            }
        }

        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            let closed = task::spawn_blocking(move || dir.close())
                .await
                .unwrap_or_else(|err| Err(io::Error::other(err)));
            if let Err(err) = closed {
                record_cleanup_failure(&path, &err);
                first_error.get_or_insert(err);
            }
        }

        debug!(
            target = "rendergate::uploads",
            op = "uploads::close",
            removed,
            "upload batch closed"
        );

        match first_error {
            Some(err) => Err(err),
            None => Ok(removed),
        }
    }
}

impl Drop for UploadBatch {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let path = dir.path().to_path_buf();
        warn!(
            target = "rendergate::uploads",
            op = "uploads::drop",
            batch = %path.display(),
            files = self.staged.len(),
            "upload batch dropped without close"
        );
        if let Err(err) = dir.close() {
            record_cleanup_failure(&path, &err);
        }
    }
}

fn record_cleanup_failure(path: &Path, err: &io::Error) {
    counter!("rendergate_upload_cleanup_failure_total").increment(1);
    warn!(
        target = "rendergate::uploads",
        op = "uploads::cleanup",
        result = "error",
        path = %path.display(),
        error = %err,
        "failed to remove staged upload"
    );
}

/// Upload names that collide with each other (`a` and `a/main.typ`) are the
/// client's mistake, not an I/O failure.
fn name_conflict(filename: &str, err: io::Error) -> GatewayError {
    match err.kind() {
        io::ErrorKind::AlreadyExists
        | io::ErrorKind::NotADirectory
        | io::ErrorKind::IsADirectory => GatewayError::bad_request(format!(
            "file `{filename}` conflicts with another uploaded path"
        )),
        _ => err.into(),
    }
}
