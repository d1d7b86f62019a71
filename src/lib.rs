//! Render-cache gateway for Typst documents.
//!
//! Uploaded documents are compiled on demand; resident templates are compiled
//! into a prebuilt tree and re-rendered only when their source changes.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
