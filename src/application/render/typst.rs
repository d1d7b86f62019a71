use std::{
    fs,
    io::ErrorKind,
    path::PathBuf,
    process::{Command, Stdio},
    time::Instant,
};

use tracing::{debug, warn};

use crate::domain::{
    error::RenderFailure,
    types::{OutputFormat, RenderRequest},
};

use super::RenderEngine;

/// Render engine backed by the `typst` command-line compiler.
#[derive(Debug, Clone)]
pub struct TypstCli {
    cli_path: PathBuf,
    font_paths: Vec<PathBuf>,
}

impl TypstCli {
    pub fn new(cli_path: PathBuf) -> Self {
        Self {
            cli_path,
            font_paths: Vec::new(),
        }
    }

    pub fn with_font_paths(mut self, font_paths: Vec<PathBuf>) -> Self {
        self.font_paths = font_paths;
        self
    }

    fn command(&self, request: &RenderRequest, output: &PathBuf) -> Command {
        let mut command = Command::new(&self.cli_path);
        command
            .arg("compile")
            .arg("--root")
            .arg(&request.root)
            .arg("--format")
            .arg(request.format.as_str())
            .arg("--diagnostic-format")
            .arg("short");
        if request.format == OutputFormat::Svg {
            // An SVG response is a single image.
            command.arg("--pages").arg("1");
        }
        for font_path in &self.font_paths {
            command.arg("--font-path").arg(font_path);
        }
        for (key, value) in &request.inputs {
            command.arg("--input").arg(format!("{key}={value}"));
        }
        command
            .arg(&request.main_file)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        command
    }
}

impl RenderEngine for TypstCli {
    fn name(&self) -> &'static str {
        "typst-cli"
    }

    fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, RenderFailure> {
        let started_at = Instant::now();
        let scratch = tempfile::Builder::new()
            .prefix("rendergate-")
            .tempdir()
            .map_err(|err| RenderFailure::new(format!("failed to prepare output directory: {err}")))?;
        let output_path = scratch
            .path()
            .join(format!("output.{}", request.format.extension()));

        let output = self
            .command(request, &output_path)
            .output()
            .map_err(|err| {
                warn!(
                    target = "rendergate::render::typst",
                    op = "typst::compile",
                    result = "error",
                    error_code = "spawn_cli",
                    cli_path = %self.cli_path.display(),
                    error = %err,
                    "Failed to spawn Typst CLI"
                );
                if err.kind() == ErrorKind::NotFound {
                    RenderFailure::new(format!(
                        "render engine `{}` is not installed",
                        self.cli_path.display()
                    ))
                } else {
                    RenderFailure::new(format!("failed to start render engine: {err}"))
                }
            })?;

        if !output.status.success() {
            let exit_code = output.status.code().map(i64::from).unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            debug!(
                target = "rendergate::render::typst",
                op = "typst::compile",
                result = "error",
                exit_code,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Typst CLI reported errors"
            );
            let message = if stderr.is_empty() {
                format!("render engine exited with status {exit_code}")
            } else {
                stderr
            };
            return Err(RenderFailure::new(message));
        }

        fs::read(&output_path)
            .map_err(|err| RenderFailure::new(format!("failed to read rendered output: {err}")))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::{collections::BTreeMap, os::unix::fs::PermissionsExt, path::Path};

    use tempfile::TempDir;

    use super::*;

    fn install_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).expect("write script");
        let mut perms = fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("set perms");
        path
    }

    fn fake_typst(dir: &Path, args_file: &Path) -> PathBuf {
        let script = format!(
            r#"#!/bin/sh
set -eu
echo "$@" > "{args_file}"
for last; do :; done
printf '%s' "rendered:$last" > "$last"
"#,
            args_file = args_file.display()
        );
        install_script(dir, "fake-typst", &script)
    }

    #[test]
    fn passes_root_format_and_inputs() {
        let dir = TempDir::new().expect("temp dir");
        let args_path = dir.path().join("args.log");
        let engine = TypstCli::new(fake_typst(dir.path(), &args_path))
            .with_font_paths(vec![PathBuf::from("/fonts")]);

        let inputs = BTreeMap::from([("data".to_string(), "{\"n\":1}".to_string())]);
        let request = RenderRequest::new("/srv/files", "/srv/files/upload/main.typ", OutputFormat::Svg)
            .with_inputs(inputs);
        let bytes = engine.render(&request).expect("render");

        assert!(String::from_utf8_lossy(&bytes).starts_with("rendered:"));
        assert!(String::from_utf8_lossy(&bytes).ends_with("output.svg"));

        let args = fs::read_to_string(&args_path).expect("args");
        assert!(args.starts_with("compile --root /srv/files --format svg"), "{args}");
        assert!(args.contains("--pages 1"), "{args}");
        assert!(args.contains("--font-path /fonts"), "{args}");
        assert!(args.contains("--input data={\"n\":1}"), "{args}");
        assert!(args.contains("/srv/files/upload/main.typ"), "{args}");
    }

    #[test]
    fn pdf_renders_every_page() {
        let dir = TempDir::new().expect("temp dir");
        let args_path = dir.path().join("args.log");
        let engine = TypstCli::new(fake_typst(dir.path(), &args_path));

        engine
            .render(&RenderRequest::new("/srv", "/srv/a.typ", OutputFormat::Pdf))
            .expect("render");

        let args = fs::read_to_string(&args_path).expect("args");
        assert!(args.contains("--format pdf"), "{args}");
        assert!(!args.contains("--pages"), "{args}");
    }

    #[test]
    fn surfaces_compiler_diagnostics() {
        let dir = TempDir::new().expect("temp dir");
        let script = install_script(
            dir.path(),
            "failing-typst",
            "#!/bin/sh\necho \"main.typ:3:1: error: unknown variable: foo\" >&2\nexit 1\n",
        );
        let engine = TypstCli::new(script);

        let failure = engine
            .render(&RenderRequest::new("/srv", "/srv/main.typ", OutputFormat::Pdf))
            .expect_err("compile error");
        assert_eq!(failure.message(), "main.typ:3:1: error: unknown variable: foo");
    }

    #[test]
    fn missing_binary_is_a_render_failure() {
        let engine = TypstCli::new(PathBuf::from("/nonexistent/typst"));
        let failure = engine
            .render(&RenderRequest::new("/srv", "/srv/main.typ", OutputFormat::Pdf))
            .expect_err("missing binary");
        assert!(failure.message().contains("not installed"));
    }
}
