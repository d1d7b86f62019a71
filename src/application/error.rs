use std::{error::Error as StdError, io};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{domain::error::RenderFailure, infra::error::InfraError};

/// Diagnostic chain attached to failed responses for the logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Request-level failures of the gateway, each mapped to one HTTP status.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("missing or invalid token")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("path `{identifier}` escapes its root directory")]
    PathTraversal { identifier: String },
    #[error("{0} not found")]
    NotFound(String),
    #[error("payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("render failed: {0}")]
    Render(#[from] RenderFailure),
    #[error("io failure: {0}")]
    Io(#[from] io::Error),
}

impl GatewayError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn path_traversal(identifier: impl Into<String>) -> Self {
        Self::PathTraversal {
            identifier: identifier.into(),
        }
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::PayloadTooLarge(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::BadRequest(_) | GatewayError::PathTraversal { .. } => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Render(_) | GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body returned to the caller. Engine diagnostics and validation details are
    /// surfaced verbatim; filesystem details and traversal payloads are not.
    fn presentation_message(&self) -> String {
        match self {
            GatewayError::Unauthorized => "Unauthorized".to_string(),
            GatewayError::BadRequest(message) => message.clone(),
            GatewayError::PathTraversal { .. } => "Invalid path".to_string(),
            GatewayError::NotFound(what) => format!("{what} not found"),
            GatewayError::PayloadTooLarge(message) => message.clone(),
            GatewayError::Render(failure) => failure.message().to_string(),
            GatewayError::Io(_) => "I/O failure during request".to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let report = ErrorReport::from_error("application::error::GatewayError", status, &self);
        let mut response = (status, self.presentation_message()).into_response();
        report.attach(&mut response);
        response
    }
}

/// Process-level failures reported by the binary before exiting.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
