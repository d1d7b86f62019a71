#![allow(dead_code)]

use std::{
    num::{NonZeroU64, NonZeroUsize},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response, header},
};
use rendergate::{
    application::render::RenderEngine,
    domain::{error::RenderFailure, types::RenderRequest},
    infra::{
        http::{GatewayOptions, GatewayState, build_router},
        uploads::FileSizeLimit,
    },
};
use tempfile::TempDir;
use tower::ServiceExt;

pub const TOKEN: &str = "correct-horse-battery-staple";
const BOUNDARY: &str = "rendergate-test-boundary";

/// In-process engine: echoes the main file and counts invocations.
#[derive(Default)]
pub struct FakeEngine {
    calls: AtomicUsize,
    requests: Mutex<Vec<RenderRequest>>,
}

impl FakeEngine {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RenderRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl RenderEngine for FakeEngine {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, RenderFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        let source = std::fs::read_to_string(&request.main_file)
            .map_err(|err| RenderFailure::new(format!("cannot read source: {err}")))?;
        if source.contains("#fail") {
            return Err(RenderFailure::new("error: unknown variable: boom"));
        }
        Ok(format!("{}|{source}", request.format).into_bytes())
    }
}

pub struct Gateway {
    pub dir: TempDir,
    pub engine: Arc<FakeEngine>,
    pub router: Router,
}

pub struct GatewayConfig {
    pub token: Option<&'static str>,
    pub protect_templates: bool,
    pub max_file_bytes: Option<u64>,
    pub cors_origins: Vec<&'static str>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            token: Some(TOKEN),
            protect_templates: false,
            max_file_bytes: Some(1_000_000),
            cors_origins: Vec::new(),
        }
    }
}

pub fn gateway() -> Gateway {
    gateway_with(GatewayConfig::default())
}

pub fn gateway_with(config: GatewayConfig) -> Gateway {
    let dir = TempDir::new().expect("temp dir");
    let root = dir.path().join("files");
    std::fs::create_dir_all(root.join("templates/reports")).expect("templates dir");
    std::fs::write(root.join("templates/report.typ"), "= Quarterly report").expect("template");
    std::fs::write(root.join("templates/reports/q1.typ"), "= Q1").expect("nested template");

    let engine = Arc::new(FakeEngine::default());
    let state = GatewayState::build(options(&root, &config), engine.clone()).expect("gateway state");

    Gateway {
        dir,
        engine,
        router: build_router(state),
    }
}

/// Gateway options rooted at `root`, with the workspace laid out below it.
pub fn options(root: &Path, config: &GatewayConfig) -> GatewayOptions {
    GatewayOptions {
        workspace_root: root.to_path_buf(),
        upload_dir: root.join("upload"),
        templates_dir: root.join("templates"),
        prebuilt_dir: root.join("prebuilt"),
        file_limit: config
            .max_file_bytes
            .and_then(NonZeroU64::new)
            .map_or(FileSizeLimit::Unbounded, FileSizeLimit::Bounded),
        request_limit: Some(10 * 1024 * 1024),
        auth_token: config.token.map(str::to_string),
        protect_templates: config.protect_templates,
        single_flight: true,
        max_concurrency: NonZeroUsize::new(2).expect("non-zero"),
        cors_origins: config.cors_origins.iter().map(|origin| origin.to_string()).collect(),
    }
}

impl Gateway {
    pub fn root(&self) -> PathBuf {
        self.dir.path().join("files")
    }

    pub fn staged_entries(&self) -> usize {
        count_files(&self.root().join("upload"))
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should respond")
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .uri(uri)
                .body(Body::empty())
                .expect("request should build"),
        )
        .await
    }
}

/// Number of entries anywhere below `dir`, excluding `dir` itself.
pub fn count_files(dir: &Path) -> usize {
    walkdir::WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .count()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should collect")
        .to_vec()
}

pub enum Part<'a> {
    File { name: &'a str, content: &'a [u8] },
    Text { name: &'a str, value: &'a str },
}

pub fn multipart_request(uri: &str, parts: &[Part<'_>], bearer: Option<&str>) -> Request<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File { name, content } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"files\"; filename=\"{name}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(content);
            }
            Part::Text { name, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}")
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body)).expect("request should build")
}
