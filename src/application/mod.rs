//! Gateway services: authentication, path confinement, rendering and the
//! request flows built from them.

pub mod auth;
pub mod compile;
pub mod error;
pub mod paths;
pub mod prebuild;
pub mod render;
pub mod templates;
