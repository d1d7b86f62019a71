use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("configuration error: {message}")]
    Configuration { message: String },
    #[error("workspace `{path}` is unusable: {source}")]
    Workspace {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl InfraError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }

    pub fn workspace(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Workspace {
            path: path.display().to_string(),
            source,
        }
    }
}
