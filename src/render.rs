//! Render orchestration: template → repair → expand → PDF → JPEG → package.
//!
//! ## Failure policy
//!
//! Every stage either completes or ends the request with a [`RenderError`];
//! nothing is retried. Repair is the one exception: a template the repair
//! cannot process is copied through unchanged, because an unrepaired
//! template still expands correctly when its tags happen to be intact.
//!
//! ## Workspace
//!
//! Each request works in its own `tempfile::TempDir`. The directory is
//! removed when the request returns, on success, error or panic alike, so
//! a timed-out conversion leaves no artifacts behind.

use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::output::{RenderOutput, RenderStats};
use crate::pipeline::context::ExpansionContext;
use crate::pipeline::expand::TemplateExpander;
use crate::pipeline::input::{resolve_template, ResolvedTemplate};
use crate::pipeline::package::package;
use crate::pipeline::pdf::{DocumentConverter, SofficeConverter};
use crate::pipeline::render::{PdfiumRasterizer, Rasterizer};
use crate::pipeline::Stage;
use crate::repair::{repair_archive, MemberOutcome};
use crate::request::RenderRequest;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{info, warn};

/// File names inside a request workspace.
const REPAIRED_TEMPLATE: &str = "template.docx";
const EXPANDED_DOCUMENT: &str = "rendered.docx";

/// Runs render requests against one configuration and one set of external
/// collaborators. Cheap to share: wrap it in an `Arc` and call
/// [`render`](Self::render) from as many tasks as needed.
#[derive(Clone)]
pub struct Renderer {
    config: Arc<RenderConfig>,
    expander: Arc<dyn TemplateExpander>,
    converter: Arc<dyn DocumentConverter>,
    rasterizer: Arc<dyn Rasterizer>,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Converter availability and effective settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub converter_available: bool,
    pub converter_program: String,
    pub templates_root: PathBuf,
    pub products_root: PathBuf,
    pub dpi: u32,
    pub jpeg_quality: u8,
}

impl Renderer {
    /// A renderer using LibreOffice and pdfium as configured in `config`.
    pub fn new(config: Arc<RenderConfig>, expander: Arc<dyn TemplateExpander>) -> Self {
        let converter = Arc::new(SofficeConverter::from_config(&config));
        let rasterizer = Arc::new(PdfiumRasterizer::new(config.pdfium_library.clone()));
        Self {
            config,
            expander,
            converter,
            rasterizer,
        }
    }

    pub fn with_converter(mut self, converter: Arc<dyn DocumentConverter>) -> Self {
        self.converter = converter;
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Render one request.
    ///
    /// # Errors
    /// Any [`RenderError`]; [`RenderError::stage`] tells which stage failed.
    pub async fn render(&self, request: &RenderRequest) -> Result<RenderOutput, RenderError> {
        let template = request.template.as_str();
        if let Some(cb) = &self.config.progress_callback {
            cb.on_render_start(template);
        }

        let result = self.render_inner(request).await;

        match &result {
            Ok(output) => {
                if let Some(cb) = &self.config.progress_callback {
                    cb.on_render_complete(template, output.page_count);
                }
            }
            Err(e) => {
                warn!("Render of '{}' failed at {}: {}", template, e.stage(), e);
                if let Some(cb) = &self.config.progress_callback {
                    cb.on_render_failed(template, e.stage(), &e.to_string());
                }
            }
        }
        result
    }

    async fn render_inner(&self, request: &RenderRequest) -> Result<RenderOutput, RenderError> {
        let total_start = Instant::now();
        let mut stats = RenderStats::default();
        let name = request.template.as_str();
        info!("Starting render: {}", name);

        // ── Step 1: Resolve template ─────────────────────────────────────
        let start = Instant::now();
        let template = resolve_template(name, &self.config)?;
        stats.resolve_ms = elapsed_ms(start);
        self.enter(name, Stage::TemplateResolved);

        let workspace = self.workspace()?;
        let ws = workspace.path();

        // ── Step 2: Repair tags ──────────────────────────────────────────
        let start = Instant::now();
        let repaired = ws.join(REPAIRED_TEMPLATE);
        stats.repair_strategy = repair_into(&template, &repaired).await?;
        stats.repair_ms = elapsed_ms(start);
        self.enter(name, Stage::Repaired);

        // ── Step 3: Expand ───────────────────────────────────────────────
        let start = Instant::now();
        let context = ExpansionContext::build(request, &self.config.products_root)?;
        let expanded = ws.join(EXPANDED_DOCUMENT);
        self.expander.expand(&repaired, &context, &expanded).await?;
        stats.expand_ms = elapsed_ms(start);
        self.enter(name, Stage::Expanded);

        // ── Step 4: Convert to PDF ───────────────────────────────────────
        let start = Instant::now();
        let pdf = self.converter.convert(&expanded, ws).await?;
        stats.convert_ms = elapsed_ms(start);
        self.enter(name, Stage::PdfReady);

        // ── Step 5: Rasterise ────────────────────────────────────────────
        let start = Instant::now();
        let pages = self
            .rasterizer
            .rasterize(&pdf, template.dpi, template.jpeg_quality)
            .await?;
        if pages.is_empty() {
            return Err(RenderError::RasterFailed {
                page: 0,
                detail: "the PDF has no pages".into(),
            });
        }
        if let Some(cb) = &self.config.progress_callback {
            for page in &pages {
                cb.on_page_rendered(page.page_num, pages.len(), page.jpeg.len());
            }
        }
        stats.rasterize_ms = elapsed_ms(start);
        self.enter(name, Stage::ImagesReady);

        // ── Step 6: Package ──────────────────────────────────────────────
        let start = Instant::now();
        let packaged = package(&pages, name, request.return_mode)?;
        stats.package_ms = elapsed_ms(start);
        stats.total_ms = elapsed_ms(total_start);
        self.enter(name, Stage::Packaged);

        info!(
            "Render complete: '{}', {} pages, {}ms total",
            name,
            pages.len(),
            stats.total_ms
        );

        Ok(RenderOutput {
            body: packaged.body,
            content_type: packaged.content_type,
            file_name: packaged.file_name,
            page_count: pages.len(),
            stats,
        })
    }

    /// Render `request` and write the body to `path` atomically.
    pub async fn render_to_file(
        &self,
        request: &RenderRequest,
        path: impl AsRef<Path>,
    ) -> Result<RenderOutput, RenderError> {
        let output = self.render(request).await?;
        let path = path.as_ref();
        let write_err = |e| RenderError::workspace(format!("writing {}", path.display()), e);

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
        let tmp_path = path.with_extension("part");
        tokio::fs::write(&tmp_path, &output.body)
            .await
            .map_err(write_err)?;
        tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
        Ok(output)
    }

    /// Probe the converter and report the effective configuration.
    pub async fn health(&self) -> HealthReport {
        let c = &self.config;
        HealthReport {
            status: "ok",
            converter_available: self.converter.probe().await,
            converter_program: c.converter_program.clone(),
            templates_root: std::path::absolute(&c.templates_root)
                .unwrap_or_else(|_| c.templates_root.clone()),
            products_root: std::path::absolute(&c.products_root)
                .unwrap_or_else(|_| c.products_root.clone()),
            dpi: c.dpi,
            jpeg_quality: c.jpeg_quality,
        }
    }

    fn enter(&self, template: &str, stage: Stage) {
        info!("'{}': {}", template, stage);
        if let Some(cb) = &self.config.progress_callback {
            cb.on_stage(template, stage);
        }
    }

    fn workspace(&self) -> Result<TempDir, RenderError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("offer-render-");
        match &self.config.workspace_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| RenderError::workspace("creating request workspace", e))
    }
}

/// Repair the template's main document into `dest`, or copy it through
/// unchanged if repair fails. Returns the strategy used for the main member.
async fn repair_into(template: &ResolvedTemplate, dest: &Path) -> Result<Option<String>, RenderError> {
    let src = template.main.clone();
    let out = dest.to_path_buf();
    let repaired = tokio::task::spawn_blocking(move || repair_archive(&src, &out))
        .await
        .map_err(|e| RenderError::Internal(format!("Repair task panicked: {}", e)))?;

    match repaired {
        Ok(report) => Ok(match report.main() {
            Some(MemberOutcome::Repaired { strategy, .. }) => Some(strategy.to_string()),
            _ => None,
        }),
        Err(e) => {
            warn!(
                "Repair of {} failed, using the original: {}",
                template.main.display(),
                e
            );
            tokio::fs::copy(&template.main, dest)
                .await
                .map_err(|e| RenderError::workspace("copying template", e))?;
            Ok(None)
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

/// Synchronous wrapper around [`Renderer::render`].
///
/// Creates a temporary tokio runtime internally.
pub fn render_sync(renderer: &Renderer, request: &RenderRequest) -> Result<RenderOutput, RenderError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| RenderError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(renderer.render(request))
}
