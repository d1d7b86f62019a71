//! Render dispatch.
//!
//! Rendering is a pure, path-in bytes-out operation delegated to a
//! [`RenderEngine`]. Engines are synchronous; the [`RenderDispatcher`] moves
//! each call onto the blocking pool and bounds how many run at once.

mod dispatcher;
mod typst;

pub use dispatcher::RenderDispatcher;
pub use typst::TypstCli;

use crate::domain::{error::RenderFailure, types::RenderRequest};

/// External collaborator that turns a source document into artifact bytes.
pub trait RenderEngine: Send + Sync + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, RenderFailure>;
}
