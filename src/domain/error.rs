use thiserror::Error;

/// Diagnostic raised when the render engine could not produce an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RenderFailure {
    message: String,
}

impl RenderFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Raised when a format name or extension is outside the supported set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported output format `{0}`")]
pub struct UnknownFormat(pub String);
