//! Integration tests for the render pipeline with in-process collaborators.
//!
//! The expander copies the template, the converter writes a stub PDF and the
//! rasterizer fabricates JPEG bytes, so these run without LibreOffice or
//! pdfium. `tests/e2e.rs` covers the real tools.

use async_trait::async_trait;
use offer_render::pipeline::pdf::expected_pdf_path;
use offer_render::{
    DocumentConverter, ExpansionContext, InlineImage, Missing, PageImage, ProductItem,
    Rasterizer, RenderConfig, RenderError, RenderProgressCallback, RenderRequest, Renderer,
    ReturnMode, Stage, TemplateExpander,
};
use serde_json::json;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Copies the template and remembers the context it was given.
#[derive(Default)]
struct RecordingExpander {
    seen: Mutex<Option<serde_json::Value>>,
}

#[async_trait]
impl TemplateExpander for RecordingExpander {
    async fn expand(
        &self,
        template: &Path,
        context: &ExpansionContext,
        output: &Path,
    ) -> Result<(), RenderError> {
        let value = serde_json::from_slice(&context.to_json()?)
            .map_err(|e| RenderError::Internal(e.to_string()))?;
        *self.seen.lock().unwrap() = Some(value);
        std::fs::copy(template, output).map_err(|e| RenderError::workspace("copy", e))?;
        Ok(())
    }
}

struct StubConverter;

#[async_trait]
impl DocumentConverter for StubConverter {
    async fn convert(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, RenderError> {
        let pdf = expected_pdf_path(input, out_dir);
        std::fs::write(&pdf, b"%PDF-1.4\n%%EOF").map_err(|e| RenderError::workspace("pdf", e))?;
        Ok(pdf)
    }

    async fn probe(&self) -> bool {
        true
    }
}

/// Leaves a partial artifact behind, then reports a timeout.
struct HangingConverter;

#[async_trait]
impl DocumentConverter for HangingConverter {
    async fn convert(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, RenderError> {
        let partial = expected_pdf_path(input, out_dir).with_extension("pdf.partial");
        std::fs::write(&partial, b"%PDF").map_err(|e| RenderError::workspace("pdf", e))?;
        Err(RenderError::ConversionTimeout { secs: 1 })
    }

    async fn probe(&self) -> bool {
        false
    }
}

struct StubRasterizer {
    pages: usize,
    seen_settings: Mutex<Option<(u32, u8)>>,
}

impl StubRasterizer {
    fn new(pages: usize) -> Self {
        Self {
            pages,
            seen_settings: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Rasterizer for StubRasterizer {
    async fn rasterize(&self, pdf: &Path, dpi: u32, quality: u8) -> Result<Vec<PageImage>, RenderError> {
        assert!(pdf.is_file(), "rasterizer must receive the converted PDF");
        *self.seen_settings.lock().unwrap() = Some((dpi, quality));
        Ok((1..=self.pages)
            .map(|n| PageImage {
                page_num: n,
                file_name: PageImage::file_name_for(n),
                jpeg: vec![0xFF, 0xD8, 0xFF, n as u8, 0xFF, 0xD9],
                width: 827,
                height: 1169,
            })
            .collect())
    }
}

#[derive(Default)]
struct EventLog(Mutex<Vec<String>>);

impl RenderProgressCallback for EventLog {
    fn on_render_start(&self, template: &str) {
        self.0.lock().unwrap().push(format!("start {template}"));
    }

    fn on_stage(&self, _template: &str, stage: Stage) {
        self.0.lock().unwrap().push(stage.to_string());
    }

    fn on_page_rendered(&self, page_num: usize, total_pages: usize, _bytes: usize) {
        self.0
            .lock()
            .unwrap()
            .push(format!("page {page_num}/{total_pages}"));
    }

    fn on_render_complete(&self, _template: &str, page_count: usize) {
        self.0.lock().unwrap().push(format!("complete {page_count}"));
    }

    fn on_render_failed(&self, _template: &str, stage: Stage, _error: &str) {
        self.0.lock().unwrap().push(format!("failed at {stage}"));
    }
}

// ── Fixtures ─────────────────────────────────────────────────────────────────

struct Fixture {
    _root: tempfile::TempDir,
    templates: PathBuf,
    products: PathBuf,
    workspaces: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let templates = root.path().join("templates");
        let products = root.path().join("products");
        let workspaces = root.path().join("work");
        for dir in [&templates, &products, &workspaces] {
            std::fs::create_dir_all(dir).unwrap();
        }
        Self {
            _root: root,
            templates,
            products,
            workspaces,
        }
    }

    fn add_template(&self, name: &str, file: &str) -> PathBuf {
        let dir = self.templates.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(file);
        std::fs::write(&path, minimal_docx()).unwrap();
        path
    }

    fn add_product(&self, id: &str) {
        let dir = self.products.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("cover.jpg"), [0xFF, 0xD8, 0xFF, 0xD9]).unwrap();
    }

    fn config(&self, events: Option<Arc<EventLog>>) -> RenderConfig {
        let mut builder = RenderConfig::builder()
            .templates_root(&self.templates)
            .products_root(&self.products)
            .workspace_root(&self.workspaces)
            .dpi(150)
            .jpeg_quality(90);
        if let Some(events) = events {
            builder = builder.progress_callback(events);
        }
        builder.build().unwrap()
    }

    fn workspace_is_empty(&self) -> bool {
        std::fs::read_dir(&self.workspaces).unwrap().next().is_none()
    }
}

fn minimal_docx() -> Vec<u8> {
    let doc = concat!(
        r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>"#,
        r#"<w:p><w:r><w:t>{{ data.cust</w:t></w:r><w:r><w:t>omer }}</w:t></w:r></w:p>"#,
        r#"</w:body></w:document>"#,
    );
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file("word/document.xml", SimpleFileOptions::default())
        .unwrap();
    zip.write_all(doc.as_bytes()).unwrap();
    zip.finish().unwrap().into_inner()
}

fn renderer(
    fixture: &Fixture,
    events: Option<Arc<EventLog>>,
    converter: Arc<dyn DocumentConverter>,
    rasterizer: Arc<StubRasterizer>,
) -> (Renderer, Arc<RecordingExpander>) {
    let expander = Arc::new(RecordingExpander::default());
    let renderer = Renderer::new(Arc::new(fixture.config(events)), expander.clone())
        .with_converter(converter)
        .with_rasterizer(rasterizer);
    (renderer, expander)
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn zip_mode_packages_every_page_and_cleans_up() {
    let fx = Fixture::new();
    fx.add_template("wolftax", "wolftax.docx");
    let raster = Arc::new(StubRasterizer::new(3));
    let (renderer, _) = renderer(&fx, None, Arc::new(StubConverter), raster.clone());

    let out = renderer.render(&RenderRequest::new("wolftax")).await.unwrap();
    assert_eq!(out.content_type, "application/zip");
    assert_eq!(out.file_name, "offer_wolftax.zip");
    assert_eq!(out.page_count, 3);
    assert_eq!(out.stats.repair_strategy.as_deref(), Some("structural"));
    assert_eq!(*raster.seen_settings.lock().unwrap(), Some((150, 90)));

    let mut archive = ZipArchive::new(Cursor::new(out.body)).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert_eq!(names, ["page_001.jpg", "page_002.jpg", "page_003.jpg"]);
    let mut second = Vec::new();
    archive
        .by_name("page_002.jpg")
        .unwrap()
        .read_to_end(&mut second)
        .unwrap();
    assert_eq!(second, [0xFF, 0xD8, 0xFF, 2, 0xFF, 0xD9]);

    assert!(fx.workspace_is_empty());
}

#[tokio::test]
async fn first_page_inline_returns_a_single_jpeg() {
    let fx = Fixture::new();
    fx.add_template("wolftax", "wolftax.docx");
    let (renderer, _) = renderer(
        &fx,
        None,
        Arc::new(StubConverter),
        Arc::new(StubRasterizer::new(4)),
    );

    let mut request = RenderRequest::new("wolftax");
    request.return_mode = ReturnMode::FirstPageInline;
    let out = renderer.render(&request).await.unwrap();
    assert_eq!(out.content_type, "image/jpeg");
    assert_eq!(out.body, [0xFF, 0xD8, 0xFF, 1, 0xFF, 0xD9]);
    assert_eq!(out.page_count, 4);
}

#[tokio::test]
async fn expander_receives_placeholders_and_products() {
    let fx = Fixture::new();
    fx.add_template("wolftax", "wolftax.docx");
    fx.add_product("p-17");
    let (renderer, expander) = renderer(
        &fx,
        None,
        Arc::new(StubConverter),
        Arc::new(StubRasterizer::new(1)),
    );

    let request: RenderRequest = serde_json::from_value(json!({
        "template": "wolftax",
        "placeholders": { "customer": "Jan Kowalski", "total": 1200 },
        "products": [{ "product_id": "p-17", "slot": "hero" }]
    }))
    .unwrap();
    renderer.render(&request).await.unwrap();

    let seen = expander.seen.lock().unwrap().clone().unwrap();
    assert_eq!(seen["data"]["customer"], "Jan Kowalski");
    assert_eq!(seen["data"]["total"], 1200);
    assert_eq!(seen["products"][0]["product_id"], "p-17");
    assert_eq!(seen["products"][0]["slot"], "hero");
    let image = seen["products"][0]["image_abs"].as_str().unwrap();
    assert!(Path::new(image).is_absolute());
    assert!(image.ends_with("cover.jpg"));
}

#[tokio::test]
async fn progress_events_arrive_in_stage_order() {
    let fx = Fixture::new();
    fx.add_template("wolftax", "wolftax.docx");
    let events = Arc::new(EventLog::default());
    let (renderer, _) = renderer(
        &fx,
        Some(events.clone()),
        Arc::new(StubConverter),
        Arc::new(StubRasterizer::new(2)),
    );

    renderer.render(&RenderRequest::new("wolftax")).await.unwrap();
    let log = events.0.lock().unwrap().clone();
    assert_eq!(
        log,
        [
            "start wolftax",
            "template resolved",
            "repaired",
            "expanded",
            "pdf ready",
            "page 1/2",
            "page 2/2",
            "images ready",
            "packaged",
            "complete 2",
        ]
    );
}

// ── Failures ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_template_is_not_found_and_leaves_no_workspace() {
    let fx = Fixture::new();
    let events = Arc::new(EventLog::default());
    let (renderer, _) = renderer(
        &fx,
        Some(events.clone()),
        Arc::new(StubConverter),
        Arc::new(StubRasterizer::new(1)),
    );

    let err = renderer
        .render(&RenderRequest::new("does-not-exist"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RenderError::NotFound {
            what: Missing::TemplateFolder,
            ..
        }
    ));
    assert!(fx.workspace_is_empty());
    assert_eq!(
        events.0.lock().unwrap().last().map(String::as_str),
        Some("failed at template resolved")
    );
}

#[tokio::test]
async fn traversal_in_template_name_is_rejected() {
    let fx = Fixture::new();
    let (renderer, _) = renderer(
        &fx,
        None,
        Arc::new(StubConverter),
        Arc::new(StubRasterizer::new(1)),
    );
    for name in ["../etc", "a/b", ""] {
        let err = renderer.render(&RenderRequest::new(name)).await.unwrap_err();
        assert!(
            matches!(err, RenderError::InvalidRequest(_)),
            "{name:?} should be rejected, got {err}"
        );
    }
}

#[tokio::test]
async fn missing_product_folder_is_not_found() {
    let fx = Fixture::new();
    fx.add_template("wolftax", "wolftax.docx");
    let (renderer, _) = renderer(
        &fx,
        None,
        Arc::new(StubConverter),
        Arc::new(StubRasterizer::new(1)),
    );

    let mut request = RenderRequest::new("wolftax");
    request.products.push(ProductItem::new("ghost"));
    let err = renderer.render(&request).await.unwrap_err();
    assert!(matches!(
        err,
        RenderError::NotFound {
            what: Missing::ProductFolder,
            ..
        }
    ));
    assert!(fx.workspace_is_empty());
}

#[tokio::test]
async fn conversion_timeout_leaves_no_artifacts() {
    let fx = Fixture::new();
    fx.add_template("wolftax", "wolftax.docx");
    let events = Arc::new(EventLog::default());
    let (renderer, _) = renderer(
        &fx,
        Some(events.clone()),
        Arc::new(HangingConverter),
        Arc::new(StubRasterizer::new(1)),
    );

    let err = renderer
        .render(&RenderRequest::new("wolftax"))
        .await
        .unwrap_err();
    assert!(matches!(err, RenderError::ConversionTimeout { secs: 1 }));
    assert_eq!(err.stage(), Stage::PdfReady);
    assert!(fx.workspace_is_empty());
    assert_eq!(
        events.0.lock().unwrap().last().map(String::as_str),
        Some("failed at pdf ready")
    );
}

#[cfg(unix)]
#[tokio::test]
async fn hung_converter_process_is_killed_at_the_timeout() {
    use offer_render::SofficeConverter;
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, Instant};

    let fx = Fixture::new();
    fx.add_template("wolftax", "wolftax.docx");
    let script = fx.workspaces.parent().unwrap().join("hang.sh");
    std::fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let converter = SofficeConverter::new(script.to_string_lossy()).timeout(Duration::from_secs(1));
    let (renderer, _) = renderer(
        &fx,
        None,
        Arc::new(converter),
        Arc::new(StubRasterizer::new(1)),
    );

    let started = Instant::now();
    let err = renderer
        .render(&RenderRequest::new("wolftax"))
        .await
        .unwrap_err();
    assert!(matches!(err, RenderError::ConversionTimeout { secs: 1 }));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(fx.workspace_is_empty());
}

// ── Context helpers ──────────────────────────────────────────────────────────

#[test]
fn inline_image_defaults_its_width() {
    let fx = Fixture::new();
    fx.add_product("p-1");
    let mut request = RenderRequest::new("wolftax");
    request.products.push(ProductItem::new("p-1"));
    let ctx = ExpansionContext::build(&request, &fx.products).unwrap();

    let image = fx.products.join("p-1/cover.jpg");
    assert_eq!(
        ctx.inline_image(Some(&image), None),
        InlineImage::Image {
            path: image.clone(),
            width_mm: 120
        }
    );
    assert_eq!(ctx.inline_image(None, Some(80)), InlineImage::Empty);
}

#[test]
fn health_works_from_a_plain_thread() {
    let fx = Fixture::new();
    let (renderer, _) = renderer(
        &fx,
        None,
        Arc::new(HangingConverter),
        Arc::new(StubRasterizer::new(1)),
    );
    let report = tokio_test::block_on(renderer.health());
    assert!(!report.converter_available);
    assert_eq!(report.dpi, 150);
    assert_eq!(report.jpeg_quality, 90);
}
