//! `POST /pdf` and `POST /svg`: render uploaded documents without caching.

use axum::{
    extract::{
        Multipart, State,
        multipart::{Field, MultipartError},
    },
    http::{HeaderMap, StatusCode},
    response::Response,
};
use futures::StreamExt;
use tracing::warn;

use crate::{
    application::{
        compile::{CompileForm, settle},
        error::GatewayError,
    },
    domain::types::OutputFormat,
    infra::uploads::UploadBatch,
};

use super::{GatewayState, artifact_response, bearer_token};

const SOURCE: &str = "infra::http::compile";
const INPUT_FIELD_PREFIX: &str = "input.";

pub(super) async fn compile_pdf(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, GatewayError> {
    compile(state, &headers, multipart, OutputFormat::Pdf).await
}

pub(super) async fn compile_svg(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Response, GatewayError> {
    compile(state, &headers, multipart, OutputFormat::Svg).await
}

async fn compile(
    state: GatewayState,
    headers: &HeaderMap,
    mut multipart: Multipart,
    format: OutputFormat,
) -> Result<Response, GatewayError> {
    let mut batch = state.staging.open_batch()?;

    // The whole body is consumed before any check so every uploaded file is
    // inside the batch when it is closed.
    let outcome = match read_form(&mut multipart, &mut batch).await {
        Ok(mut form) => {
            if form.token.is_none() {
                form.token = bearer_token(headers).map(str::to_owned);
            }
            state.compile.compile(&batch, &form, format).await
        }
        Err(err) => Err(err),
    };

    let output = settle(outcome, batch).await?;
    Ok(artifact_response(output, None))
}

async fn read_form(
    multipart: &mut Multipart,
    batch: &mut UploadBatch,
) -> Result<CompileForm, GatewayError> {
    let mut form = CompileForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.file_name().map(str::to_owned) {
            // An empty file input still arrives as a part with an empty name.
            Some(filename) if filename.is_empty() => continue,
            Some(filename) => {
                let stream = field.map(|chunk| chunk.map_err(multipart_error));
                batch.stage(&filename, stream).await?;
                continue;
            }
            None => {}
        }

        let name = field.name().unwrap_or_default().to_owned();
        match name.as_str() {
            "mainFile" => form.main_file = Some(text(field).await?),
            "data" => form.data = Some(text(field).await?),
            "token" => {
                form.token = Some(text(field).await?).filter(|value| !value.is_empty());
            }
            other => {
                if let Some(input) = other.strip_prefix(INPUT_FIELD_PREFIX) {
                    let value = text(field).await?;
                    form.inputs.insert(input.to_string(), value);
                }
            }
        }
    }

    Ok(form)
}

async fn text(field: Field<'_>) -> Result<String, GatewayError> {
    field.text().await.map_err(multipart_error)
}

fn multipart_error(err: MultipartError) -> GatewayError {
    let status = err.status();
    warn!(
        target = SOURCE,
        status = status.as_u16(),
        error = %err,
        "failed to read multipart payload"
    );
    match status {
        StatusCode::PAYLOAD_TOO_LARGE => {
            GatewayError::payload_too_large("request body exceeds the upload limit")
        }
        _ => GatewayError::bad_request(format!("invalid multipart body: {err}")),
    }
}
