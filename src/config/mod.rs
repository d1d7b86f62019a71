//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    fmt,
    net::SocketAddr,
    num::{NonZeroU64, NonZeroUsize},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::domain::types::OutputFormat;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "rendergate";
const ENV_PREFIX: &str = "RENDERGATE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_WORKSPACE_ROOT: &str = "./files";
const DEFAULT_UPLOAD_DIR: &str = "upload";
const DEFAULT_TEMPLATES_DIR: &str = "templates";
const DEFAULT_PREBUILT_DIR: &str = "prebuilt";
const DEFAULT_MAX_FILE_BYTES: u64 = 1_000_000;
const DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_TYPST_CLI_PATH: &str = "typst";
const DEFAULT_RENDER_CONCURRENCY: u64 = 4;

/// Command-line arguments for the rendergate binary.
#[derive(Debug, Parser)]
#[command(
    name = "rendergate",
    version,
    about = "Render-cache gateway for Typst documents"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "RENDERGATE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP gateway.
    Serve(Box<ServeArgs>),
    /// Render every template artifact that is missing or stale.
    Prebuild(PrebuildArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct PrebuildArgs {
    #[command(flatten)]
    pub workspace: WorkspaceOverrides,

    #[command(flatten)]
    pub render: RenderOverrides,

    /// Output formats to build; repeat for several. Defaults to every format.
    #[arg(long = "format", value_name = "FORMAT")]
    pub formats: Vec<OutputFormat>,

    /// Maximum number of templates rendered at once. Defaults to render.max_concurrency.
    #[arg(long, value_name = "COUNT")]
    pub concurrency: Option<NonZeroUsize>,

    /// Re-render artifacts even when they are fresh.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub force: bool,
}

impl PrebuildArgs {
    /// Requested formats, or all of them when none were given.
    pub fn formats(&self) -> Vec<OutputFormat> {
        if self.formats.is_empty() {
            OutputFormat::ALL.to_vec()
        } else {
            let mut formats = Vec::with_capacity(self.formats.len());
            for format in &self.formats {
                if !formats.contains(format) {
                    formats.push(*format);
                }
            }
            formats
        }
    }
}

#[derive(Debug, Args, Default, Clone)]
pub struct WorkspaceOverrides {
    /// Override the workspace root directory.
    #[arg(long = "workspace-root", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub workspace_root: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Override the Typst CLI executable path.
    #[arg(long = "render-typst-cli-path", value_name = "PATH")]
    pub typst_cli_path: Option<PathBuf>,

    /// Override the number of renders allowed to run at once.
    #[arg(long = "render-max-concurrency", value_name = "COUNT")]
    pub max_concurrency: Option<u64>,

    /// Additional font directory; repeat for several.
    #[arg(long = "render-font-path", value_name = "PATH")]
    pub font_paths: Vec<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub workspace: WorkspaceOverrides,

    #[command(flatten)]
    pub render: RenderOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Allow a CORS origin (repeatable); without any, every origin is allowed.
    #[arg(long = "cors-origin", value_name = "ORIGIN")]
    pub cors_origins: Vec<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the per-file upload limit in bytes.
    #[arg(long = "uploads-max-file-bytes", value_name = "BYTES")]
    pub uploads_max_file_bytes: Option<u64>,

    /// Accept uploads of any size.
    #[arg(
        long = "uploads-unbounded",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub uploads_unbounded: Option<bool>,

    /// Override the maximum multipart request size in bytes.
    #[arg(long = "uploads-max-request-bytes", value_name = "BYTES")]
    pub uploads_max_request_bytes: Option<u64>,

    /// Require the token on cached template requests as well.
    #[arg(
        long = "auth-protect-templates",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub auth_protect_templates: Option<bool>,

    /// Toggle per-artifact single-flight rendering.
    #[arg(
        long = "cache-single-flight",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_single_flight: Option<bool>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub workspace: WorkspaceSettings,
    pub uploads: UploadSettings,
    pub auth: AuthSettings,
    pub render: RenderSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    /// Origins allowed by CORS; empty allows any origin.
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Directory layout. Sub-directories are relative to `root` unless absolute.
#[derive(Debug, Clone)]
pub struct WorkspaceSettings {
    pub root: PathBuf,
    pub upload_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub prebuilt_dir: PathBuf,
}

impl WorkspaceSettings {
    pub fn upload_path(&self) -> PathBuf {
        self.under(&self.upload_dir)
    }

    pub fn templates_path(&self) -> PathBuf {
        self.under(&self.templates_dir)
    }

    pub fn prebuilt_path(&self) -> PathBuf {
        self.under(&self.prebuilt_dir)
    }

    fn under(&self, dir: &Path) -> PathBuf {
        // `join` keeps an absolute `dir` as is.
        self.root.join(dir)
    }
}

/// Upload limits; `None` means unbounded.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub max_file_bytes: Option<NonZeroU64>,
    pub max_request_bytes: Option<NonZeroU64>,
}

#[derive(Clone)]
pub struct AuthSettings {
    pub token: Option<String>,
    pub protect_templates: bool,
}

impl fmt::Debug for AuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSettings")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("protect_templates", &self.protect_templates)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub typst_cli_path: PathBuf,
    pub max_concurrency: NonZeroUsize,
    pub font_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub single_flight: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    load_from(cli, None)
}

/// Variant of [`load`] reading variables from `environment` instead of the process.
fn load_from(
    cli: &CliArgs,
    environment: Option<config::Map<String, String>>,
) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .source(environment),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Prebuild(args)) => {
            raw.apply_workspace_overrides(&args.workspace);
            raw.apply_render_overrides(&args.render);
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    workspace: RawWorkspaceSettings,
    uploads: RawUploadSettings,
    auth: RawAuthSettings,
    render: RawRenderSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if !overrides.cors_origins.is_empty() {
            self.server.cors_origins = Some(RawList::Listed(overrides.cors_origins.clone()));
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(limit) = overrides.uploads_max_file_bytes {
            self.uploads.max_file_bytes = Some(limit);
        }
        if let Some(unbounded) = overrides.uploads_unbounded {
            self.uploads.unbounded = Some(unbounded);
        }
        if let Some(limit) = overrides.uploads_max_request_bytes {
            self.uploads.max_request_bytes = Some(limit);
        }
        if let Some(protect) = overrides.auth_protect_templates {
            self.auth.protect_templates = Some(protect);
        }
        if let Some(single_flight) = overrides.cache_single_flight {
            self.cache.single_flight = Some(single_flight);
        }

        self.apply_workspace_overrides(&overrides.workspace);
        self.apply_render_overrides(&overrides.render);
    }

    fn apply_workspace_overrides(&mut self, overrides: &WorkspaceOverrides) {
        if let Some(root) = overrides.workspace_root.as_ref() {
            self.workspace.root = Some(root.clone());
        }
    }

    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(path) = overrides.typst_cli_path.as_ref() {
            self.render.typst_cli_path = Some(path.clone());
        }
        if let Some(value) = overrides.max_concurrency {
            self.render.max_concurrency = Some(value);
        }
        if !overrides.font_paths.is_empty() {
            self.render.font_paths = Some(RawList::Listed(overrides.font_paths.clone()));
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            workspace,
            uploads,
            auth,
            render,
            cache,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let workspace = build_workspace_settings(workspace)?;
        let uploads = build_upload_settings(uploads)?;
        let auth = build_auth_settings(auth);
        let render = build_render_settings(render)?;
        let cache = CacheSettings {
            single_flight: cache.single_flight.unwrap_or(true),
        };

        Ok(Self {
            server,
            logging,
            workspace,
            uploads,
            auth,
            render,
            cache,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.host", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    let mut cors_origins: Vec<String> = server
        .cors_origins
        .map(RawList::into_items)
        .unwrap_or_default();
    cors_origins.retain(|origin| !origin.is_empty());
    if cors_origins.iter().any(|origin| origin == "*") {
        cors_origins.clear();
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        cors_origins,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_workspace_settings(
    workspace: RawWorkspaceSettings,
) -> Result<WorkspaceSettings, LoadError> {
    Ok(WorkspaceSettings {
        root: non_empty_path(workspace.root, DEFAULT_WORKSPACE_ROOT, "workspace.root")?,
        upload_dir: non_empty_path(
            workspace.upload_dir,
            DEFAULT_UPLOAD_DIR,
            "workspace.upload_dir",
        )?,
        templates_dir: non_empty_path(
            workspace.templates_dir,
            DEFAULT_TEMPLATES_DIR,
            "workspace.templates_dir",
        )?,
        prebuilt_dir: non_empty_path(
            workspace.prebuilt_dir,
            DEFAULT_PREBUILT_DIR,
            "workspace.prebuilt_dir",
        )?,
    })
}

fn build_upload_settings(uploads: RawUploadSettings) -> Result<UploadSettings, LoadError> {
    if uploads.unbounded.unwrap_or(false) {
        return Ok(UploadSettings {
            max_file_bytes: None,
            max_request_bytes: None,
        });
    }

    let max_file_bytes = NonZeroU64::new(uploads.max_file_bytes.unwrap_or(DEFAULT_MAX_FILE_BYTES))
        .ok_or_else(|| {
            LoadError::invalid(
                "uploads.max_file_bytes",
                "must be greater than zero; set uploads.unbounded to lift the limit",
            )
        })?;

    let max_request_bytes_value = uploads
        .max_request_bytes
        .unwrap_or(DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES);
    let max_request_bytes = NonZeroU64::new(max_request_bytes_value).ok_or_else(|| {
        LoadError::invalid("uploads.max_request_bytes", "must be greater than zero")
    })?;
    usize::try_from(max_request_bytes_value).map_err(|_| {
        LoadError::invalid(
            "uploads.max_request_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(UploadSettings {
        max_file_bytes: Some(max_file_bytes),
        max_request_bytes: Some(max_request_bytes),
    })
}

fn build_auth_settings(auth: RawAuthSettings) -> AuthSettings {
    let token = auth.token.filter(|value| !value.trim().is_empty());

    AuthSettings {
        token,
        protect_templates: auth.protect_templates.unwrap_or(false),
    }
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let typst_cli_path = non_empty_path(
        render.typst_cli_path,
        DEFAULT_TYPST_CLI_PATH,
        "render.typst_cli_path",
    )?;
    let max_concurrency = non_zero_usize(
        render.max_concurrency.unwrap_or(DEFAULT_RENDER_CONCURRENCY),
        "render.max_concurrency",
    )?;
    let font_paths = render
        .font_paths
        .map(RawList::into_items)
        .unwrap_or_default()
        .into_iter()
        .filter(|path| !path.as_os_str().is_empty())
        .collect();

    Ok(RenderSettings {
        typst_cli_path,
        max_concurrency,
        font_paths,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    cors_origins: Option<RawList<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkspaceSettings {
    root: Option<PathBuf>,
    upload_dir: Option<PathBuf>,
    templates_dir: Option<PathBuf>,
    prebuilt_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUploadSettings {
    max_file_bytes: Option<u64>,
    unbounded: Option<bool>,
    max_request_bytes: Option<u64>,
}

#[derive(Clone, Deserialize, Default)]
#[serde(default)]
struct RawAuthSettings {
    token: Option<String>,
    protect_templates: Option<bool>,
}

impl fmt::Debug for RawAuthSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawAuthSettings")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("protect_templates", &self.protect_templates)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    typst_cli_path: Option<PathBuf>,
    max_concurrency: Option<u64>,
    font_paths: Option<RawList<PathBuf>>,
}

/// A list given either as a sequence (config files) or as one
/// comma-separated string (environment).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawList<T> {
    Listed(Vec<T>),
    Joined(String),
}

impl<T: From<String>> RawList<T> {
    fn into_items(self) -> Vec<T> {
        match self {
            Self::Listed(items) => items,
            Self::Joined(joined) => joined
                .split(',')
                .map(|part| T::from(part.trim().to_string()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    single_flight: Option<bool>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_empty_path(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    let path = value.unwrap_or_else(|| PathBuf::from(default));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "path must not be empty"));
    }
    Ok(path)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
