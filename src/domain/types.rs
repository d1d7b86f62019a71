//! Render values shared by the gateway layers.

use std::{collections::BTreeMap, fmt, path::PathBuf, str::FromStr};

use bytes::Bytes;

use super::error::UnknownFormat;

/// Artifact formats the render engine can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Pdf,
    Svg,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 2] = [OutputFormat::Pdf, OutputFormat::Svg];

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Pdf => "pdf",
            OutputFormat::Svg => "svg",
        }
    }

    /// File extension used for cached artifacts of this format.
    pub fn extension(self) -> &'static str {
        self.as_str()
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Pdf => "application/pdf",
            OutputFormat::Svg => "image/svg+xml",
        }
    }

    /// Map a file extension (without the dot, any ASCII case) to a format.
    pub fn from_extension(extension: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.extension().eq_ignore_ascii_case(extension))
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = UnknownFormat;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::from_extension(value.trim()).ok_or_else(|| UnknownFormat(value.to_string()))
    }
}

/// Named string inputs forwarded to the document as `sys.inputs`.
pub type RenderInputs = BTreeMap<String, String>;

/// A single render job: which document to compile, where, and into what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// Directory the engine may read from; the main file must live below it.
    pub root: PathBuf,
    pub main_file: PathBuf,
    pub format: OutputFormat,
    pub inputs: RenderInputs,
}

impl RenderRequest {
    pub fn new(root: impl Into<PathBuf>, main_file: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            root: root.into(),
            main_file: main_file.into(),
            format,
            inputs: RenderInputs::new(),
        }
    }

    pub fn with_inputs(mut self, inputs: RenderInputs) -> Self {
        self.inputs = inputs;
        self
    }
}

/// Raw artifact bytes together with the format they were rendered in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOutput {
    pub bytes: Bytes,
    pub format: OutputFormat,
}

impl RenderOutput {
    pub fn new(bytes: impl Into<Bytes>, format: OutputFormat) -> Self {
        Self {
            bytes: bytes.into(),
            format,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }
}

/// Cache validity of an artifact relative to its source document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    SourceMissing,
}

impl Freshness {
    pub fn as_str(self) -> &'static str {
        match self {
            Freshness::Fresh => "fresh",
            Freshness::Stale => "stale",
            Freshness::SourceMissing => "source_missing",
        }
    }
}
