use std::{
    num::NonZeroUsize,
    path::PathBuf,
    sync::Arc,
};

use tower_http::cors::CorsLayer;

use crate::{
    application::{
        auth::AuthGate, compile::CompileService, paths::PathResolver,
        render::{RenderDispatcher, RenderEngine}, templates::TemplateService,
    },
    cache::ArtifactLocks,
    config::Settings,
    infra::{
        error::InfraError,
        uploads::{FileSizeLimit, StagingArea},
    },
};

/// Everything needed to assemble the gateway, independent of how it was configured.
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub workspace_root: PathBuf,
    pub upload_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub prebuilt_dir: PathBuf,
    pub file_limit: FileSizeLimit,
    /// Whole-request limit for multipart bodies; `None` disables it.
    pub request_limit: Option<usize>,
    pub auth_token: Option<String>,
    pub protect_templates: bool,
    pub single_flight: bool,
    pub max_concurrency: NonZeroUsize,
    /// Allowed CORS origins; empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl GatewayOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        let workspace = &settings.workspace;
        Self {
            workspace_root: workspace.root.clone(),
            upload_dir: workspace.upload_path(),
            templates_dir: workspace.templates_path(),
            prebuilt_dir: workspace.prebuilt_path(),
            file_limit: settings
                .uploads
                .max_file_bytes
                .map_or(FileSizeLimit::Unbounded, FileSizeLimit::Bounded),
            request_limit: settings
                .uploads
                .max_request_bytes
                .and_then(|limit| usize::try_from(limit.get()).ok()),
            auth_token: settings.auth.token.clone(),
            protect_templates: settings.auth.protect_templates,
            single_flight: settings.cache.single_flight,
            max_concurrency: settings.render.max_concurrency,
            cors_origins: settings.server.cors_origins.clone(),
        }
    }
}

#[derive(Clone)]
pub struct GatewayState {
    pub compile: CompileService,
    pub templates: TemplateService,
    pub staging: StagingArea,
    pub auth: AuthGate,
    pub protect_templates: bool,
    pub request_limit: Option<usize>,
    pub cors: CorsLayer,
}

impl GatewayState {
    /// Create the workspace directories and wire the services around `engine`.
    pub fn build(options: GatewayOptions, engine: Arc<dyn RenderEngine>) -> Result<Self, InfraError> {
        for dir in [
            &options.workspace_root,
            &options.templates_dir,
            &options.prebuilt_dir,
        ] {
            std::fs::create_dir_all(dir).map_err(|err| InfraError::workspace(dir, err))?;
        }

        let workspace_root = std::fs::canonicalize(&options.workspace_root)
            .map_err(|err| InfraError::workspace(&options.workspace_root, err))?;
        let staging = StagingArea::new(&options.upload_dir, options.file_limit)
            .map_err(|err| InfraError::workspace(&options.upload_dir, err))?;
        // Uploads render with the workspace root as the engine root.
        if !staging.root().starts_with(&workspace_root) {
            return Err(InfraError::configuration(format!(
                "upload directory `{}` must be inside the workspace root `{}`",
                staging.root().display(),
                workspace_root.display()
            )));
        }
        let templates = PathResolver::new(&options.templates_dir)
            .map_err(|err| InfraError::workspace(&options.templates_dir, err))?;
        let prebuilt = PathResolver::new(&options.prebuilt_dir)
            .map_err(|err| InfraError::workspace(&options.prebuilt_dir, err))?;

        let dispatcher = RenderDispatcher::new(engine, options.max_concurrency);
        let auth = AuthGate::new(options.auth_token.as_deref());
        let locks = options.single_flight.then(ArtifactLocks::new);
        let cors = super::cors::cors_layer(&options.cors_origins)?;

        Ok(Self {
            compile: CompileService::new(workspace_root, dispatcher.clone(), auth.clone()),
            templates: TemplateService::new(templates, prebuilt, dispatcher, locks),
            staging,
            auth,
            protect_templates: options.protect_templates,
            request_limit: options.request_limit,
            cors,
        })
    }
}
