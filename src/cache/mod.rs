//! Prebuilt artifact cache.
//!
//! Artifacts live under the prebuilt root, mirroring the template tree with
//! output extensions. An artifact is reused while its modification time is not
//! older than its source document; there is no eviction, staleness is the only
//! invalidation signal.

mod flight;
pub mod freshness;
mod writer;

pub use flight::{ArtifactGuard, ArtifactLocks};
pub use writer::persist_artifact;
