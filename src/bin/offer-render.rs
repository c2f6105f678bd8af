//! CLI binary for offer-render.
//!
//! A thin shim over the library crate: `repair` and `repair-all` drive the
//! archive rewriter, `render` runs the full pipeline locally, `health`
//! prints the converter probe.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use offer_render::repair::{
    analyze_archive, find_documents, fixed_output_path, repair_archive, ArchiveAnalysis,
    ArchiveReport, MemberOutcome,
};
use offer_render::{
    CommandExpander, ProgressCallback, RenderConfig, RenderProgressCallback, RenderRequest,
    Renderer, ReturnMode, Stage,
};
use serde_json::Value;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal spinner that shows the current stage and logs each page image.
struct CliProgressCallback {
    bar: ProgressBar,
    pages: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Rendering");
        bar.set_message("starting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            pages: AtomicUsize::new(0),
        })
    }
}

impl RenderProgressCallback for CliProgressCallback {
    fn on_render_start(&self, template: &str) {
        self.bar.set_prefix(format!("Rendering {template}"));
    }

    fn on_stage(&self, _template: &str, stage: Stage) {
        self.bar.set_message(stage.to_string());
    }

    fn on_page_rendered(&self, page_num: usize, total_pages: usize, bytes: usize) {
        self.pages.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}",
            green("✓"),
            page_num,
            total_pages,
            dim(&format!("{:>7} bytes", bytes)),
        ));
    }

    fn on_render_complete(&self, _template: &str, page_count: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} pages rendered",
            green("✔"),
            bold(&page_count.to_string())
        );
    }

    fn on_render_failed(&self, template: &str, stage: Stage, error: &str) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} '{}' failed after {} ({} pages done): {}",
            red("✘"),
            template,
            stage,
            self.pages.load(Ordering::SeqCst),
            red(error)
        );
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Show which placeholders Word has split, without changing anything
  offer-render repair --analyze templates/wolftax/wolftax.docx

  # Repair one template (writes wolftax_fixed.docx next to it)
  offer-render repair templates/wolftax/wolftax.docx

  # Repair every template under a directory
  offer-render repair-all templates/

  # Render a template with a request file and extra placeholders
  offer-render render --template wolftax --request req.json \
      --set customer_name="Jan Kowalski" -o offer.zip

  # First page only, as a JPEG
  offer-render render --template wolftax --mode first-page-inline -o cover.jpg

  # Check that LibreOffice is reachable
  offer-render health

ENVIRONMENT VARIABLES:
  TEMPLATES_ROOT        Directory with one folder per template (default: templates)
  PRODUCTS_ROOT         Directory with one folder per product (default: products)
  OFFER_WORKSPACE_ROOT  Where per-request workspaces are created
  DPI                   Rasterisation density, 72-600 (default: 100)
  JPEG_QUALITY          JPEG quality, 1-100 (default: 85)
  CONVERSION_TIMEOUT    LibreOffice timeout in seconds (default: 60)
  CONVERTER_PROGRAM     LibreOffice executable (default: libreoffice)
  TEMPLATE_EXPANDER     Template engine executable used by `render`
  PDFIUM_LIB_PATH       Path to libpdfium (default: system library search)
  RUST_LOG              Log filter, overrides --verbose / --quiet
"#;

/// Repair split template tags in DOCX offers and render them to JPEG pages.
#[derive(Parser, Debug)]
#[command(
    name = "offer-render",
    version,
    about = "Repair split template tags in DOCX offers and render them to JPEG pages",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "OFFER_RENDER_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "OFFER_RENDER_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Repair one DOCX template, or analyze it with --analyze.
    Repair {
        /// The .docx file to process.
        input: PathBuf,

        /// Print the tag scan only; write nothing.
        #[arg(long)]
        analyze: bool,

        /// Output path. Default: <stem>_fixed.docx next to the input.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Repair every template document found under a directory.
    RepairAll {
        /// Directory searched recursively for .docx files.
        dir: PathBuf,
    },

    /// Render a template through the full pipeline.
    Render(RenderArgs),

    /// Probe the converter and print the effective configuration as JSON.
    Health(ConfigArgs),
}

#[derive(Args, Debug)]
struct RenderArgs {
    /// Template folder name under the templates root.
    #[arg(short, long)]
    template: String,

    /// JSON file with a render request (placeholders, products, return_mode).
    #[arg(long)]
    request: Option<PathBuf>,

    /// Extra placeholder as key=value. The value is parsed as JSON when it
    /// can be, otherwise taken as a string. Repeatable.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// Output file. Default: the name chosen by the pipeline, in the
    /// current directory.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Result shape. Overrides the request file.
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Template engine executable. Called as
    /// `<expander> [args] <template.docx> <context.json> <output.docx>`.
    #[arg(long, env = "TEMPLATE_EXPANDER", default_value = "docx-expand")]
    expander: String,

    /// Argument passed to the expander before the paths. Repeatable.
    #[arg(long = "expander-arg", value_name = "ARG", allow_hyphen_values = true)]
    expander_args: Vec<String>,

    /// Expander timeout in seconds.
    #[arg(long, env = "EXPANDER_TIMEOUT", default_value_t = 60)]
    expander_timeout: u64,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Directory with one folder per template.
    #[arg(long, env = "TEMPLATES_ROOT", default_value = "templates")]
    templates_root: PathBuf,

    /// Directory with one folder per product.
    #[arg(long, env = "PRODUCTS_ROOT", default_value = "products")]
    products_root: PathBuf,

    /// Where per-request workspaces are created.
    #[arg(long, env = "OFFER_WORKSPACE_ROOT")]
    workspace_root: Option<PathBuf>,

    /// Rasterisation DPI (72–600).
    #[arg(long, env = "DPI", default_value_t = 100,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// JPEG quality (1–100).
    #[arg(long, env = "JPEG_QUALITY", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// LibreOffice timeout in seconds.
    #[arg(long, env = "CONVERSION_TIMEOUT", default_value_t = 60)]
    conversion_timeout: u64,

    /// LibreOffice executable.
    #[arg(long, env = "CONVERTER_PROGRAM", default_value = "libreoffice")]
    converter: String,

    /// Path to libpdfium.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Zip,
    FirstPageInline,
}

impl From<ModeArg> for ReturnMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Zip => ReturnMode::Zip,
            ModeArg::FirstPageInline => ReturnMode::FirstPageInline,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The render spinner gives the feedback that matters, so library INFO
    // logs are only shown for the other commands.
    let spinner = matches!(cli.command, Command::Render(_)) && !cli.quiet;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || spinner {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Repair {
            input,
            analyze,
            output,
            json,
        } => run_repair(&input, analyze, output, json, cli.quiet),
        Command::RepairAll { dir } => run_repair_all(&dir, cli.quiet),
        Command::Render(args) => run_render(args, cli.quiet).await,
        Command::Health(args) => run_health(&args).await,
    }
}

// ── repair ───────────────────────────────────────────────────────────────────

fn run_repair(input: &Path, analyze: bool, output: Option<PathBuf>, json: bool, quiet: bool) -> Result<()> {
    if !input.is_file() {
        bail!("File not found: {}", input.display());
    }
    let is_docx = input
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("docx"));
    if !is_docx {
        bail!("Not a .docx file: {}", input.display());
    }

    if analyze {
        let analysis = analyze_archive(input)
            .with_context(|| format!("Failed to analyze {}", input.display()))?;
        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&analysis).context("Failed to serialize analysis")?
            );
        } else {
            print_analysis(input, &analysis);
        }
        return Ok(());
    }

    let output = output.unwrap_or_else(|| fixed_output_path(input));
    let report = repair_archive(input, &output)
        .with_context(|| format!("Failed to repair {}", input.display()))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        );
    } else if !quiet {
        print_report(&report);
        eprintln!("{}  →  {}", green("✔"), bold(&output.display().to_string()));
    }
    Ok(())
}

fn run_repair_all(dir: &Path, quiet: bool) -> Result<()> {
    if !dir.is_dir() {
        bail!("Directory not found: {}", dir.display());
    }
    let documents =
        find_documents(dir).with_context(|| format!("Failed to search {}", dir.display()))?;
    if documents.is_empty() {
        if !quiet {
            eprintln!("{} no .docx templates under {}", yellow("⚠"), dir.display());
        }
        return Ok(());
    }

    let mut failed = 0usize;
    for doc in &documents {
        let output = fixed_output_path(doc);
        match repair_archive(doc, &output) {
            Ok(report) => {
                if !quiet {
                    let repaired = report.repaired().count();
                    eprintln!(
                        "  {} {}  {}",
                        green("✓"),
                        doc.display(),
                        dim(&format!("{repaired} members repaired")),
                    );
                }
            }
            Err(e) => {
                failed += 1;
                eprintln!("  {} {}  {}", red("✗"), doc.display(), red(&e.to_string()));
            }
        }
    }

    let ok = documents.len() - failed;
    if failed > 0 {
        bail!("{failed} of {} templates could not be repaired", documents.len());
    }
    if !quiet {
        eprintln!("{} {} templates repaired", green("✔"), bold(&ok.to_string()));
    }
    Ok(())
}

fn print_analysis(input: &Path, analysis: &ArchiveAnalysis) {
    println!("File:          {}", input.display());
    for member in &analysis.members {
        let report = &member.report;
        let [open_s, close_s, open_b, close_b] = report.delimiter_counts;
        println!();
        println!("{}", bold(&member.name));
        println!("  Simple tags:   {}", report.simple.len());
        println!("  Block tags:    {}", report.block.len());
        println!("  Contaminated:  {}", report.contaminated_count());
        println!("  Delimiters:    {{{{ {open_s}  }}}} {close_s}  {{% {open_b}  %}} {close_b}");
        if !report.is_balanced() {
            println!("  {}", yellow("⚠ opening and closing delimiters do not balance"));
        }
        for span in report.spans().filter(|s| s.contaminated) {
            println!("    {} {}", red("✗"), span.cleaned);
        }
    }
}

fn print_report(report: &ArchiveReport) {
    for member in &report.members {
        match &member.outcome {
            MemberOutcome::Repaired {
                strategy,
                changes,
            } => eprintln!(
                "  {} {}  {}",
                green("✓"),
                member.name,
                dim(&format!("{strategy}, {changes} changes"))
            ),
            MemberOutcome::Skipped { reason } => {
                eprintln!("  {} {}  {}", yellow("⚠"), member.name, reason)
            }
            MemberOutcome::Untouched => {}
        }
    }
}

// ── render ───────────────────────────────────────────────────────────────────

async fn run_render(args: RenderArgs, quiet: bool) -> Result<()> {
    let mut request = match &args.request {
        Some(path) => {
            let raw = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read request from {}", path.display()))?;
            serde_json::from_slice::<RenderRequest>(&raw)
                .with_context(|| format!("Invalid request JSON in {}", path.display()))?
        }
        None => RenderRequest::new(args.template.clone()),
    };
    request.template = args.template.clone();
    for pair in &args.set {
        let (key, value) = parse_assignment(pair)?;
        request.placeholders.insert(key, value);
    }
    if let Some(mode) = args.mode {
        request.return_mode = mode.into();
    }

    let progress: Option<ProgressCallback> = if quiet {
        None
    } else {
        Some(CliProgressCallback::new() as Arc<dyn RenderProgressCallback>)
    };
    let config = build_config(&args.config, progress)?;

    let expander = CommandExpander::new(args.expander.clone())
        .args(args.expander_args.clone())
        .timeout(Duration::from_secs(args.expander_timeout));
    let renderer = Renderer::new(Arc::new(config), Arc::new(expander));

    let output = match &args.output {
        Some(path) => renderer
            .render_to_file(&request, path)
            .await
            .context("Render failed")?,
        None => {
            let output = renderer.render(&request).await.context("Render failed")?;
            tokio::fs::write(&output.file_name, &output.body)
                .await
                .with_context(|| format!("Failed to write {}", output.file_name))?;
            output
        }
    };

    if !quiet {
        let path = args
            .output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| output.file_name.clone());
        let s = &output.stats;
        eprintln!(
            "{}  {} pages  {}ms  →  {}",
            green("✔"),
            output.page_count,
            s.total_ms,
            bold(&path),
        );
        eprintln!(
            "   {}",
            dim(&format!(
                "repair {}ms ({})  expand {}ms  pdf {}ms  raster {}ms",
                s.repair_ms,
                s.repair_strategy.as_deref().unwrap_or("unchanged"),
                s.expand_ms,
                s.convert_ms,
                s.rasterize_ms,
            ))
        );
    }
    Ok(())
}

/// Parse `key=value`; the value is JSON when it parses, else a string.
fn parse_assignment(pair: &str) -> Result<(String, Value)> {
    let Some((key, raw)) = pair.split_once('=') else {
        bail!("Expected KEY=VALUE, got '{pair}'");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Empty key in '{pair}'");
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

// ── health ───────────────────────────────────────────────────────────────────

async fn run_health(args: &ConfigArgs) -> Result<()> {
    let config = build_config(args, None)?;
    let expander = CommandExpander::new("true");
    let report = Renderer::new(Arc::new(config), Arc::new(expander))
        .health()
        .await;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize health report")?
    );
    Ok(())
}

/// Map CLI args to `RenderConfig`.
fn build_config(args: &ConfigArgs, progress: Option<ProgressCallback>) -> Result<RenderConfig> {
    let mut builder = RenderConfig::builder()
        .templates_root(&args.templates_root)
        .products_root(&args.products_root)
        .dpi(args.dpi)
        .jpeg_quality(args.jpeg_quality)
        .conversion_timeout_secs(args.conversion_timeout)
        .converter_program(args.converter.clone());

    if let Some(ref root) = args.workspace_root {
        builder = builder.workspace_root(root);
    }
    if let Some(ref lib) = args.pdfium_lib {
        builder = builder.pdfium_library(lib);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
