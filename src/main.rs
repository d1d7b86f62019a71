use std::{process, sync::Arc};

use rendergate::{
    application::{
        error::AppError,
        paths::PathResolver,
        prebuild::{PrebuildOptions, prebuild},
        render::{RenderDispatcher, RenderEngine, TypstCli},
        templates::TemplateService,
    },
    cache::ArtifactLocks,
    config,
    infra::{
        error::InfraError,
        http::{self, GatewayOptions, GatewayState},
        telemetry,
    },
};
use tokio::sync::watch;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli().map_err(|err| {
        AppError::from(InfraError::configuration(format!(
            "failed to load configuration: {err}"
        )))
    })?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Prebuild(args) => run_prebuild(settings, args).await,
    }
}

fn typst_engine(settings: &config::Settings) -> Arc<dyn RenderEngine> {
    Arc::new(
        TypstCli::new(settings.render.typst_cli_path.clone())
            .with_font_paths(settings.render.font_paths.clone()),
    )
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let state = GatewayState::build(
        GatewayOptions::from_settings(&settings),
        typst_engine(&settings),
    )?;
    if !state.auth.is_configured() {
        warn!(
            target = "rendergate::auth",
            "auth.token is not set; every POST /pdf and POST /svg request will be rejected"
        );
    }
    info!(
        target = "rendergate::serve",
        addr = %settings.server.addr,
        workspace = %settings.workspace.root.display(),
        render_concurrency = settings.render.max_concurrency.get(),
        single_flight = settings.cache.single_flight,
        "starting gateway"
    );

    serve_http(&settings, state).await
}

async fn serve_http(settings: &config::Settings, state: GatewayState) -> Result<(), AppError> {
    let router = http::build_router(state);
    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let mut server_rx = shutdown_rx.clone();
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            let _ = server_rx.wait_for(|stop| *stop).await;
        },
    );

    let grace = settings.server.graceful_shutdown;
    let mut drain_rx = shutdown_rx;
    let drain_deadline = async move {
        let _ = drain_rx.wait_for(|stop| *stop).await;
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = drain_deadline => {
            warn!(
                target = "rendergate::serve",
                grace_seconds = grace.as_secs(),
                "graceful shutdown window elapsed; dropping open connections"
            );
        }
    }

    info!(target = "rendergate::serve", "gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!(target = "rendergate::serve", "shutdown signal received");
}

async fn run_prebuild(
    settings: config::Settings,
    args: config::PrebuildArgs,
) -> Result<(), AppError> {
    let workspace = &settings.workspace;
    let templates_dir = workspace.templates_path();
    let prebuilt_dir = workspace.prebuilt_path();
    std::fs::create_dir_all(&prebuilt_dir)
        .map_err(|err| AppError::from(InfraError::workspace(&prebuilt_dir, err)))?;

    let templates = PathResolver::new(&templates_dir)
        .map_err(|err| AppError::from(InfraError::workspace(&templates_dir, err)))?;
    let prebuilt = PathResolver::new(&prebuilt_dir)
        .map_err(|err| AppError::from(InfraError::workspace(&prebuilt_dir, err)))?;

    let concurrency = args.concurrency.unwrap_or(settings.render.max_concurrency);
    let dispatcher = RenderDispatcher::new(typst_engine(&settings), concurrency);
    let service = TemplateService::new(
        templates,
        prebuilt,
        dispatcher,
        Some(ArtifactLocks::new()),
    );

    let options = PrebuildOptions {
        formats: args.formats(),
        concurrency,
        force: args.force,
    };
    info!(
        target = "rendergate::prebuild",
        templates = %templates_dir.display(),
        formats = ?options.formats,
        concurrency = concurrency.get(),
        force = options.force,
        "starting prebuild"
    );

    let report = prebuild(&service, &options).await;
    if report.is_success() {
        return Ok(());
    }

    for failure in &report.failed {
        error!(
            target = "rendergate::prebuild",
            artifact = %failure.artifact.display(),
            error = %failure.message,
            "artifact failed"
        );
    }
    Err(AppError::unexpected(format!(
        "{} of {} artifacts failed to build",
        report.failed.len(),
        report.failed.len() + report.rendered + report.fresh
    )))
}
