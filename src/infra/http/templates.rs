//! `GET /{*file}`: serve prebuilt template artifacts, rendering stale ones.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Response,
};

use crate::application::error::GatewayError;

use super::{GatewayState, artifact_response, bearer_token};

pub(super) async fn health() -> &'static str {
    "Server is up!"
}

pub(super) async fn fetch_template(
    State(state): State<GatewayState>,
    Path(file): Path<String>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    if state.protect_templates {
        state.auth.authorize(bearer_token(&headers))?;
    }

    let artifact = state.templates.fetch(&file).await?;
    Ok(artifact_response(artifact.output, Some(artifact.cache)))
}
