//! On-demand compilation of uploaded documents.

use std::{io, path::PathBuf};

use tracing::{debug, warn};

use crate::{
    domain::types::{OutputFormat, RenderInputs, RenderOutput, RenderRequest},
    infra::uploads::UploadBatch,
};

use super::{auth::AuthGate, error::GatewayError, render::RenderDispatcher};

/// Text fields of an on-demand compile request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileForm {
    pub main_file: Option<String>,
    pub data: Option<String>,
    pub token: Option<String>,
    /// Extra render inputs taken from `input.<name>` fields.
    pub inputs: RenderInputs,
}

impl CompileForm {
    /// Inputs handed to the engine. An explicit `data` field wins over an
    /// `input.data` field.
    fn render_inputs(&self) -> Result<RenderInputs, GatewayError> {
        let mut inputs = RenderInputs::new();
        for (name, value) in &self.inputs {
            if name.is_empty() || name.contains('=') {
                return Err(GatewayError::bad_request(format!(
                    "invalid input name `{name}`"
                )));
            }
            inputs.insert(name.clone(), value.clone());
        }
        if let Some(data) = &self.data {
            inputs.insert("data".to_string(), data.clone());
        }
        Ok(inputs)
    }
}

#[derive(Clone)]
pub struct CompileService {
    workspace_root: PathBuf,
    dispatcher: RenderDispatcher,
    auth: AuthGate,
}

impl CompileService {
    pub fn new(workspace_root: PathBuf, dispatcher: RenderDispatcher, auth: AuthGate) -> Self {
        Self {
            workspace_root,
            dispatcher,
            auth,
        }
    }

    /// Render the batch's main file. The batch itself is left to the caller,
    /// which must pass it to [`settle`] afterwards.
    pub async fn compile(
        &self,
        batch: &UploadBatch,
        form: &CompileForm,
        format: OutputFormat,
    ) -> Result<RenderOutput, GatewayError> {
        self.auth.authorize(form.token.as_deref())?;

        let main_file = form
            .main_file
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| GatewayError::bad_request("mainFile is required"))?;
        if batch.is_empty() {
            return Err(GatewayError::bad_request("no files were uploaded"));
        }
        let inputs = form.render_inputs()?;

        let main = batch.resolve(main_file)?;
        if !batch.contains(&main) {
            return Err(GatewayError::bad_request(format!(
                "mainFile `{main_file}` is not among the uploaded files"
            )));
        }

        debug!(
            target = "rendergate::compile",
            op = "compile::render",
            format = format.as_str(),
            main_file = %main.relative.display(),
            files = batch.files().len(),
            "compiling uploaded document"
        );

        let request =
            RenderRequest::new(&self.workspace_root, main.absolute, format).with_inputs(inputs);
        let output = self.dispatcher.dispatch(request).await?;
        Ok(output)
    }
}

/// Close the batch and combine the render outcome with the cleanup outcome.
///
/// A request error always wins; a cleanup error after a successful render
/// fails the request.
pub async fn settle(
    outcome: Result<RenderOutput, GatewayError>,
    batch: UploadBatch,
) -> Result<RenderOutput, GatewayError> {
    let cleanup: io::Result<usize> = batch.close().await;
    match (outcome, cleanup) {
        (Err(err), Err(cleanup_err)) => {
            warn!(
                target = "rendergate::compile",
                op = "compile::settle",
                error = %cleanup_err,
                "cleanup failed after an unsuccessful request"
            );
            Err(err)
        }
        (Err(err), Ok(_)) => Err(err),
        (Ok(output), Ok(_)) => Ok(output),
        (Ok(_), Err(cleanup_err)) => Err(GatewayError::Io(cleanup_err)),
    }
}
