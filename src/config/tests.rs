use super::*;

#[test]
fn defaults_match_the_documented_layout() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr, "127.0.0.1:5000".parse::<SocketAddr>().expect("addr"));
    assert_eq!(settings.server.graceful_shutdown, Duration::from_secs(30));
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert_eq!(settings.workspace.upload_path(), PathBuf::from("./files/upload"));
    assert_eq!(
        settings.workspace.templates_path(),
        PathBuf::from("./files/templates")
    );
    assert_eq!(
        settings.workspace.prebuilt_path(),
        PathBuf::from("./files/prebuilt")
    );
    assert_eq!(
        settings.uploads.max_file_bytes.map(NonZeroU64::get),
        Some(DEFAULT_MAX_FILE_BYTES)
    );
    assert_eq!(
        settings.uploads.max_request_bytes.map(NonZeroU64::get),
        Some(DEFAULT_UPLOAD_REQUEST_LIMIT_BYTES)
    );
    assert!(settings.auth.token.is_none());
    assert!(!settings.auth.protect_templates);
    assert_eq!(settings.render.typst_cli_path, PathBuf::from("typst"));
    assert_eq!(settings.render.max_concurrency.get(), 4);
    assert!(settings.render.font_paths.is_empty());
    assert!(settings.cache.single_flight);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn absolute_subdirectories_ignore_the_root() {
    let mut raw = RawSettings::default();
    raw.workspace.root = Some(PathBuf::from("/srv/render"));
    raw.workspace.prebuilt_dir = Some(PathBuf::from("/var/cache/rendergate"));

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.workspace.upload_path(),
        PathBuf::from("/srv/render/upload")
    );
    assert_eq!(
        settings.workspace.prebuilt_path(),
        PathBuf::from("/var/cache/rendergate")
    );
}

#[test]
fn unbounded_uploads_drop_both_limits() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        uploads_unbounded: Some(true),
        uploads_max_file_bytes: Some(10),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.uploads.max_file_bytes.is_none());
    assert!(settings.uploads.max_request_bytes.is_none());
}

#[test]
fn zero_file_limit_is_rejected() {
    let mut raw = RawSettings::default();
    raw.uploads.max_file_bytes = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero limit");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "uploads.max_file_bytes",
            ..
        }
    ));
}

#[test]
fn zero_render_concurrency_is_rejected() {
    let mut raw = RawSettings::default();
    raw.apply_render_overrides(&RenderOverrides {
        max_concurrency: Some(0),
        ..Default::default()
    });

    let err = Settings::from_raw(raw).expect_err("zero concurrency");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "render.max_concurrency",
            ..
        }
    ));
}

#[test]
fn blank_token_counts_as_unset() {
    let mut raw = RawSettings::default();
    raw.auth.token = Some("   ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.auth.token.is_none());

    let mut raw = RawSettings::default();
    raw.auth.token = Some(" s3cret ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.auth.token.as_deref(), Some(" s3cret "));
}

fn environment(pairs: &[(&str, &str)]) -> config::Map<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[test]
fn environment_token_is_kept_verbatim() {
    let cli = CliArgs::parse_from(["rendergate"]);
    for secret in ["007", "1.50", "TRUE", "1e3"] {
        let settings = load_from(
            &cli,
            Some(environment(&[("RENDERGATE__AUTH__TOKEN", secret)])),
        )
        .expect("valid settings");
        assert_eq!(settings.auth.token.as_deref(), Some(secret));
    }
}

#[test]
fn cors_origins_come_from_a_comma_separated_variable() {
    let cli = CliArgs::parse_from(["rendergate"]);
    let settings = load_from(
        &cli,
        Some(environment(&[(
            "RENDERGATE__SERVER__CORS_ORIGINS",
            "https://app.example, https://admin.example",
        )])),
    )
    .expect("valid settings");
    assert_eq!(
        settings.server.cors_origins,
        vec!["https://app.example", "https://admin.example"]
    );

    let settings = load_from(
        &cli,
        Some(environment(&[(
            "RENDERGATE__SERVER__CORS_ORIGINS",
            "https://app.example,*",
        )])),
    )
    .expect("valid settings");
    assert!(settings.server.cors_origins.is_empty());
}

#[test]
fn environment_values_still_parse_into_typed_settings() {
    let cli = CliArgs::parse_from(["rendergate"]);
    let settings = load_from(
        &cli,
        Some(environment(&[
            ("RENDERGATE__SERVER__PORT", "8081"),
            ("RENDERGATE__RENDER__MAX_CONCURRENCY", "2"),
            ("RENDERGATE__CACHE__SINGLE_FLIGHT", "false"),
            ("RENDERGATE__RENDER__FONT_PATHS", "/fonts/a, /fonts/b"),
        ])),
    )
    .expect("valid settings");

    assert_eq!(settings.server.addr.port(), 8081);
    assert_eq!(settings.render.max_concurrency.get(), 2);
    assert!(!settings.cache.single_flight);
    assert_eq!(
        settings.render.font_paths,
        vec![PathBuf::from("/fonts/a"), PathBuf::from("/fonts/b")]
    );
}

#[test]
fn token_is_redacted_from_debug_output() {
    let mut raw = RawSettings::default();
    raw.auth.token = Some("s3cret".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");

    let rendered = format!("{settings:?}");
    assert!(!rendered.contains("s3cret"));
    assert!(rendered.contains("<redacted>"));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["rendergate"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "rendergate",
        "serve",
        "--server-port",
        "8080",
        "--workspace-root",
        "/srv/files",
        "--render-font-path",
        "/fonts/a",
        "--render-font-path",
        "/fonts/b",
        "--cache-single-flight",
        "false",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            let overrides = serve.overrides;
            assert_eq!(overrides.server_port, Some(8080));
            assert_eq!(
                overrides.workspace.workspace_root.as_deref(),
                Some(std::path::Path::new("/srv/files"))
            );
            assert_eq!(overrides.render.font_paths.len(), 2);
            assert_eq!(overrides.cache_single_flight, Some(false));

            let mut raw = RawSettings::default();
            raw.apply_serve_overrides(&overrides);
            let settings = Settings::from_raw(raw).expect("valid settings");
            assert!(!settings.cache.single_flight);
            assert_eq!(settings.workspace.root, PathBuf::from("/srv/files"));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_prebuild_arguments() {
    let args = CliArgs::parse_from([
        "rendergate",
        "prebuild",
        "--format",
        "svg",
        "--format",
        "svg",
        "--concurrency",
        "8",
        "--force",
    ]);

    match args.command.expect("prebuild command") {
        Command::Prebuild(prebuild) => {
            assert_eq!(prebuild.formats(), vec![OutputFormat::Svg]);
            assert_eq!(prebuild.concurrency.map(NonZeroUsize::get), Some(8));
            assert!(prebuild.force);
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn prebuild_defaults_to_every_format() {
    let args = CliArgs::parse_from(["rendergate", "prebuild"]);
    match args.command.expect("prebuild command") {
        Command::Prebuild(prebuild) => {
            assert_eq!(prebuild.formats(), OutputFormat::ALL.to_vec());
            assert!(prebuild.concurrency.is_none());
            assert!(!prebuild.force);
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn unknown_prebuild_format_is_a_usage_error() {
    let result = CliArgs::try_parse_from(["rendergate", "prebuild", "--format", "png"]);
    assert!(result.is_err());
}
