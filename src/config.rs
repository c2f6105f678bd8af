//! Configuration for the render pipeline.
//!
//! Every process-wide setting lives in [`RenderConfig`], built once at start
//! up (via [`RenderConfig::builder()`] or [`RenderConfig::from_env()`]) and
//! then shared read-only, typically behind an `Arc`. Nothing in the pipeline
//! mutates it.
//!
//! # Design choice: builder over constructor
//! Most callers only change the two directory roots. The builder lets them
//! do that and rely on documented defaults for rendering and timeouts, and
//! `build()` is the single place where ranges are validated.

use crate::error::RenderError;
use crate::progress::ProgressCallback;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default main-document names, tried in order inside a template folder.
pub const DEFAULT_TEMPLATE_PRIORITY: [&str; 3] = ["oferta1.docx", "wolftax.docx", "Dok1.docx"];

pub const DPI_RANGE: (u32, u32) = (72, 600);
pub const QUALITY_RANGE: (u8, u8) = (1, 100);

/// Configuration shared by every render request.
///
/// # Example
/// ```rust
/// use offer_render::RenderConfig;
///
/// let config = RenderConfig::builder()
///     .templates_root("/srv/offers/templates")
///     .products_root("/srv/offers/products")
///     .dpi(150)
///     .build()
///     .unwrap();
/// assert_eq!(config.jpeg_quality, 85);
/// ```
#[derive(Clone)]
pub struct RenderConfig {
    /// Directory holding one sub-directory per template. Default: `templates`.
    pub templates_root: PathBuf,

    /// Directory holding one sub-directory per product id. Default: `products`.
    pub products_root: PathBuf,

    /// Where per-request workspaces are created. Default: the system temp dir.
    pub workspace_root: Option<PathBuf>,

    /// Rasterisation density. Range: 72–600. Default: 100.
    ///
    /// 100 DPI gives an A4 page of roughly 830 × 1170 px, enough for an
    /// on-screen offer preview while keeping each JPEG around 100–200 KB.
    pub dpi: u32,

    /// JPEG quality. Range: 1–100. Default: 85.
    pub jpeg_quality: u8,

    /// Upper bound on one document-to-PDF conversion, in seconds. Default: 60.
    ///
    /// LibreOffice occasionally hangs on a damaged document or a stale
    /// profile lock. The process is killed when this expires.
    pub conversion_timeout_secs: u64,

    /// Upper bound on the converter availability probe, in seconds. Default: 5.
    pub probe_timeout_secs: u64,

    /// Main-document names tried in order when a template folder has no
    /// `template.json` manifest.
    pub template_priority: Vec<String>,

    /// Office converter executable. Default: `libreoffice`.
    pub converter_program: String,

    /// Path to the pdfium shared library, or a directory holding it. If None,
    /// the system library search path is used. [`RenderConfig::from_env`]
    /// fills this from `PDFIUM_LIB_PATH`.
    pub pdfium_library: Option<PathBuf>,

    /// Receives stage and page events. Not part of `Debug` output.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            templates_root: PathBuf::from("templates"),
            products_root: PathBuf::from("products"),
            workspace_root: None,
            dpi: 100,
            jpeg_quality: 85,
            conversion_timeout_secs: 60,
            probe_timeout_secs: 5,
            template_priority: DEFAULT_TEMPLATE_PRIORITY
                .iter()
                .map(|s| s.to_string())
                .collect(),
            converter_program: "libreoffice".to_string(),
            pdfium_library: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for RenderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderConfig")
            .field("templates_root", &self.templates_root)
            .field("products_root", &self.products_root)
            .field("workspace_root", &self.workspace_root)
            .field("dpi", &self.dpi)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("conversion_timeout_secs", &self.conversion_timeout_secs)
            .field("probe_timeout_secs", &self.probe_timeout_secs)
            .field("template_priority", &self.template_priority)
            .field("converter_program", &self.converter_program)
            .field("pdfium_library", &self.pdfium_library)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn RenderProgressCallback>"),
            )
            .finish()
    }
}

impl RenderConfig {
    /// Create a new builder for `RenderConfig`.
    pub fn builder() -> RenderConfigBuilder {
        RenderConfigBuilder {
            config: Self::default(),
        }
    }

    /// Build a configuration from process environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `TEMPLATES_ROOT` | `templates_root` |
    /// | `PRODUCTS_ROOT` | `products_root` |
    /// | `OFFER_WORKSPACE_ROOT` | `workspace_root` |
    /// | `DPI` | `dpi` |
    /// | `JPEG_QUALITY` | `jpeg_quality` |
    /// | `CONVERSION_TIMEOUT` | `conversion_timeout_secs` |
    /// | `CONVERTER_PROGRAM` | `converter_program` |
    /// | `PDFIUM_LIB_PATH` | `pdfium_library` |
    ///
    /// Unset variables keep their defaults; unparsable or out-of-range values
    /// are a [`RenderError::InvalidConfig`].
    pub fn from_env() -> Result<Self, RenderError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`from_env`](Self::from_env) over an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RenderError> {
        let mut builder = Self::builder();
        if let Some(v) = lookup("TEMPLATES_ROOT") {
            builder = builder.templates_root(v);
        }
        if let Some(v) = lookup("PRODUCTS_ROOT") {
            builder = builder.products_root(v);
        }
        if let Some(v) = lookup("OFFER_WORKSPACE_ROOT") {
            builder = builder.workspace_root(v);
        }
        if let Some(v) = lookup("DPI") {
            builder = builder.dpi(parse_var("DPI", &v)?);
        }
        if let Some(v) = lookup("JPEG_QUALITY") {
            builder = builder.jpeg_quality(parse_var("JPEG_QUALITY", &v)?);
        }
        if let Some(v) = lookup("CONVERSION_TIMEOUT") {
            builder = builder.conversion_timeout_secs(parse_var("CONVERSION_TIMEOUT", &v)?);
        }
        if let Some(v) = lookup("CONVERTER_PROGRAM") {
            builder = builder.converter_program(v);
        }
        if let Some(v) = lookup("PDFIUM_LIB_PATH") {
            builder = builder.pdfium_library(v);
        }
        builder.build()
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T, RenderError> {
    value.trim().parse().map_err(|_| {
        RenderError::InvalidConfig(format!("{key} must be a number, got '{value}'"))
    })
}

/// Builder for [`RenderConfig`].
#[derive(Debug)]
pub struct RenderConfigBuilder {
    config: RenderConfig,
}

impl RenderConfigBuilder {
    pub fn templates_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.templates_root = path.into();
        self
    }

    pub fn products_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.products_root = path.into();
        self
    }

    pub fn workspace_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.workspace_root = Some(path.into());
        self
    }

    /// Not clamped; [`build`](Self::build) rejects values outside 72–600.
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality;
        self
    }

    pub fn conversion_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conversion_timeout_secs = secs;
        self
    }

    pub fn probe_timeout_secs(mut self, secs: u64) -> Self {
        self.config.probe_timeout_secs = secs;
        self
    }

    pub fn template_priority<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.template_priority = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn converter_program(mut self, program: impl Into<String>) -> Self {
        self.config.converter_program = program.into();
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.config.progress_callback = Some(callback);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<RenderConfig, RenderError> {
        let c = &self.config;
        check_dpi(c.dpi)?;
        check_quality(c.jpeg_quality)?;
        if c.conversion_timeout_secs == 0 {
            return Err(RenderError::InvalidConfig(
                "Conversion timeout must be ≥ 1 second".into(),
            ));
        }
        if c.probe_timeout_secs == 0 {
            return Err(RenderError::InvalidConfig(
                "Probe timeout must be ≥ 1 second".into(),
            ));
        }
        if c.converter_program.trim().is_empty() {
            return Err(RenderError::InvalidConfig(
                "Converter program must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

pub(crate) fn check_dpi(dpi: u32) -> Result<(), RenderError> {
    let (lo, hi) = DPI_RANGE;
    if dpi < lo || dpi > hi {
        return Err(RenderError::InvalidConfig(format!(
            "DPI must be {lo}–{hi}, got {dpi}"
        )));
    }
    Ok(())
}

pub(crate) fn check_quality(quality: u8) -> Result<(), RenderError> {
    let (lo, hi) = QUALITY_RANGE;
    if quality < lo || quality > hi {
        return Err(RenderError::InvalidConfig(format!(
            "JPEG quality must be {lo}–{hi}, got {quality}"
        )));
    }
    Ok(())
}
