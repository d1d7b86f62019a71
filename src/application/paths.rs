//! Confinement of client-supplied relative identifiers to a root directory.
//!
//! Identifiers are normalized lexically (both `/` and `\` separate segments,
//! `.` is dropped, `..` pops) and any identifier that would climb above the
//! root is rejected before the filesystem is touched. Percent-encoded forms
//! are decoded repeatedly for the check, so `%2e%2e` and `%252e%252e` are
//! caught as well. Finally the deepest existing ancestor of the candidate is
//! canonicalized and must still sit below the canonical root, which stops
//! symlinks pointing elsewhere.

use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};

use metrics::counter;
use percent_encoding::percent_decode_str;
use tracing::warn;

use super::error::GatewayError;

const MAX_DECODE_ROUNDS: usize = 4;

/// A path proven to live below a resolver's root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    /// Normalized path relative to the root.
    pub relative: PathBuf,
    /// Absolute path below the canonical root.
    pub absolute: PathBuf,
}

#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
}

impl PathResolver {
    /// Build a resolver for an existing directory.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = fs::canonicalize(root.as_ref())?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                format!("`{}` is not a directory", root.display()),
            ));
        }
        Ok(Self { root })
    }

    /// Canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an untrusted identifier such as a URL segment or upload filename.
    pub fn resolve(&self, identifier: &str) -> Result<ResolvedPath, GatewayError> {
        let relative = match normalize_identifier(identifier) {
            Ok(relative) => relative,
            Err(Rejection::Empty) => {
                return Err(GatewayError::bad_request("path must not be empty"));
            }
            Err(Rejection::Escapes) => return Err(self.reject(identifier)),
        };
        self.confine(identifier, relative)
    }

    /// Resolve a relative path that was derived from an earlier resolution.
    pub fn resolve_path(&self, relative: &Path) -> Result<ResolvedPath, GatewayError> {
        let display = relative.to_string_lossy();
        let mut normalized = PathBuf::new();
        for component in relative.components() {
            match component {
                Component::Normal(segment) => normalized.push(segment),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(self.reject(&display));
                }
            }
        }
        if normalized.as_os_str().is_empty() {
            return Err(GatewayError::bad_request("path must not be empty"));
        }
        self.confine(&display, normalized)
    }

    fn confine(&self, identifier: &str, relative: PathBuf) -> Result<ResolvedPath, GatewayError> {
        let candidate = self.root.join(&relative);

        let mut existing = candidate.as_path();
        let mut missing = Vec::new();
        let canonical = loop {
            match fs::canonicalize(existing) {
                Ok(canonical) => break canonical,
                Err(err) if is_absent(&err) => {
                    if fs::symlink_metadata(existing).is_ok() {
                        // Dangling symlink: its target is unknown, so it cannot be trusted.
                        return Err(self.reject(identifier));
                    }
                    let Some(name) = existing.file_name() else {
                        return Err(self.reject(identifier));
                    };
                    missing.push(name.to_owned());
                    match existing.parent() {
                        Some(parent) => existing = parent,
                        None => return Err(self.reject(identifier)),
                    }
                }
                Err(err) => return Err(GatewayError::Io(err)),
            }
        };

        if !canonical.starts_with(&self.root) {
            return Err(self.reject(identifier));
        }

        let mut absolute = canonical;
        for name in missing.into_iter().rev() {
            absolute.push(name);
        }

        let relative = absolute
            .strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .unwrap_or(relative);

        Ok(ResolvedPath { relative, absolute })
    }

    fn reject(&self, identifier: &str) -> GatewayError {
        counter!("rendergate_path_traversal_total").increment(1);
        warn!(
            target = "rendergate::security",
            identifier = %identifier,
            root = %self.root.display(),
            "rejected path escaping its root"
        );
        GatewayError::path_traversal(identifier)
    }
}

/// Lookups through a missing entry or through a regular file both mean "absent".
pub(crate) fn is_absent(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
    )
}

#[derive(Debug, PartialEq, Eq)]
enum Rejection {
    Empty,
    Escapes,
}

fn normalize_identifier(identifier: &str) -> Result<PathBuf, Rejection> {
    let mut form = identifier.to_owned();
    for _ in 0..MAX_DECODE_ROUNDS {
        lexical_segments(&form)?;
        let decoded = percent_decode_str(&form).decode_utf8_lossy().into_owned();
        if decoded == form {
            break;
        }
        form = decoded;
    }
    lexical_segments(&form)?;

    let segments = lexical_segments(identifier)?;
    if segments.is_empty() {
        return Err(Rejection::Empty);
    }
    Ok(segments.into_iter().collect())
}

fn lexical_segments(form: &str) -> Result<Vec<&str>, Rejection> {
    if form.contains('\0') || form.starts_with(['/', '\\']) || has_drive_prefix(form) {
        return Err(Rejection::Escapes);
    }

    let mut segments = Vec::new();
    for segment in form.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(Rejection::Escapes);
                }
            }
            other => segments.push(other),
        }
    }
    Ok(segments)
}

fn has_drive_prefix(form: &str) -> bool {
    let bytes = form.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
