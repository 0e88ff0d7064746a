//! CLI binary for pdf-flatten.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `FlattenConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf_flatten::{
    flatten, flatten_file, page_count, EngineKind, FlattenConfig, FlattenProgressCallback,
    ImageType, ProgressCallback,
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

/// Active bar; `{msg}` shows the page most recently started.
const BAR_TEMPLATE: &str = "{spinner:.cyan} {prefix:.bold}  \
     [{bar:42.green/238}] {pos:>3}/{len} pages  \
     ⏱ {elapsed_precise}  {msg}";

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar plus one log line per page. Pages
/// finish out of order, so lines are printed in completion order.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Spinner until `on_flatten_start` tells us the page count.
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0);

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Counting pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Rasterizing");
    }

    fn elapsed_secs(&self, page: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap()
            .remove(&page)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0) as f64
            / 1000.0
    }
}

impl FlattenProgressCallback for CliProgressCallback {
    fn on_flatten_start(&self, total_pages: usize) {
        self.activate_bar(total_pages);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Rasterizing {total_pages} pages…"))
        ));
    }

    fn on_page_start(&self, page: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap()
            .insert(page, Instant::now());
        self.bar.set_message(format!("page {page}"));
    }

    fn on_page_complete(&self, page: usize, total: usize, size_bytes: u64) {
        let secs = self.elapsed_secs(page);
        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {:<10}  {}",
            green("✓"),
            page,
            total,
            dim(&format!("{:>6} KiB", size_bytes / 1024)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page: usize, total: usize, error: &str) {
        let secs = self.elapsed_secs(page);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg = match error.char_indices().nth(79) {
            Some((cut, _)) => format!("{}\u{2026}", &error[..cut]),
            None => error.to_string(),
        };

        self.bar.println(format!(
            "  {} Page {:>3}/{:<3}  {}  {}",
            red("✗"),
            page,
            total,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_flatten_complete(&self, total_pages: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} pages rasterized",
            green("✔"),
            bold(&total_pages.to_string())
        );
    }
}

impl CliProgressCallback {
    /// Clear the bar after a failed run; `on_flatten_complete` never fires then.
    fn abandon(&self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
        let failed = self.errors.load(Ordering::SeqCst);
        if failed > 0 {
            eprintln!("{} {} page(s) failed", red("✘"), failed);
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Flatten with the defaults (ImageMagick, PNG, 200 dpi)
  pdfflatten form.pdf -o form-flat.pdf

  # Smaller output: JPEG pages at 150 dpi
  pdfflatten --type jpg --density 150 scan.pdf -o scan-flat.pdf

  # Only page 3
  pdfflatten --page 3 report.pdf -o page3.pdf

  # In-process rendering with PDFium
  pdfflatten --engine pdfium --pdfium-lib /opt/pdfium/lib form.pdf -o flat.pdf

  # Keep the result inside the work directory and print its path
  pdfflatten --keep --workdir /var/tmp/flatten form.pdf

  # Page count only
  pdfflatten --page-count form.pdf

ENGINES:
  magick   ImageMagick 7 `magick` (default). Needs Ghostscript for PDF input.
  im6      ImageMagick 6 `identify` + `convert`. Needs Ghostscript for PDF input.
  gm       GraphicsMagick `gm convert`. Needs Ghostscript for PDF input.
  pdfium   In-process PDFium. Needs libpdfium (system path or --pdfium-lib).

ENVIRONMENT VARIABLES:
  Every flag can be set as PDFFLATTEN_<FLAG>, e.g. PDFFLATTEN_DENSITY=300.
  RUST_LOG overrides the log filter derived from -v / -q.
"#;

/// Flatten PDFs by rasterizing every page.
#[derive(Parser, Debug)]
#[command(
    name = "pdfflatten",
    version,
    about = "Flatten PDF files by rasterizing every page",
    long_about = "Rasterize every page of a PDF and rebuild the document with one full-page \
image per page. Form fields, annotations, layers and text selection are removed; the visual \
appearance is kept.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input PDF file.
    input: PathBuf,

    /// Write the flattened PDF to this file.
    #[arg(short, long, env = "PDFFLATTEN_OUTPUT", required_unless_present_any = ["keep", "page_count"])]
    output: Option<PathBuf>,

    /// Page image format.
    #[arg(long = "type", env = "PDFFLATTEN_TYPE", value_enum, default_value = "png")]
    image_type: TypeArg,

    /// Rendering DPI.
    #[arg(long, env = "PDFFLATTEN_DENSITY", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(1..))]
    density: u32,

    /// Flatten only this 1-based page.
    #[arg(long, env = "PDFFLATTEN_PAGE")]
    page: Option<usize>,

    /// Rasterization engine.
    #[arg(long, env = "PDFFLATTEN_ENGINE", value_enum, default_value = "magick")]
    engine: EngineArg,

    /// Directory containing libpdfium (implies --engine pdfium).
    #[arg(long, env = "PDFFLATTEN_PDFIUM_LIB")]
    pdfium_lib: Option<PathBuf>,

    /// Base directory for per-run work directories (default: system temp dir).
    #[arg(long, env = "PDFFLATTEN_WORKDIR")]
    workdir: Option<PathBuf>,

    /// Keep the result inside the work directory and print its path.
    #[arg(long, env = "PDFFLATTEN_KEEP", conflicts_with = "output")]
    keep: bool,

    /// Give up rasterizing after this many seconds.
    #[arg(long, env = "PDFFLATTEN_TIMEOUT",
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Print the page count and exit.
    #[arg(long)]
    page_count: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFFLATTEN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDFFLATTEN_QUIET")]
    quiet: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDFFLATTEN_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum TypeArg {
    Png,
    #[value(alias = "jpeg")]
    Jpg,
}

impl From<TypeArg> for ImageType {
    fn from(v: TypeArg) -> Self {
        match v {
            TypeArg::Png => ImageType::Png,
            TypeArg::Jpg => ImageType::Jpg,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum EngineArg {
    Magick,
    Im6,
    Gm,
    Pdfium,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; -v always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.page_count;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    // ── Page-count mode ──────────────────────────────────────────────────
    if cli.page_count {
        let config = build_config(&cli, None)?;
        let document = tokio::fs::read(&cli.input)
            .await
            .with_context(|| format!("Failed to read {}", cli.input.display()))?;
        let pages = page_count(&document, &config)
            .await
            .context("Failed to count pages")?;
        println!("{pages}");
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let cli_cb = show_progress.then(CliProgressCallback::new_dynamic);
    let progress_cb: Option<ProgressCallback> = cli_cb
        .clone()
        .map(|cb| cb as Arc<dyn FlattenProgressCallback>);
    let config = build_config(&cli, progress_cb)?;

    // ── Run flatten ──────────────────────────────────────────────────────
    let started = Instant::now();
    let result = run(&cli, &config).await;
    if let (Err(_), Some(cb)) = (&result, &cli_cb) {
        cb.abandon();
    }
    let (target, size) = result?;

    if !cli.quiet {
        eprintln!(
            "{}  {} bytes  {}ms  →  {}",
            green("✔"),
            size,
            started.elapsed().as_millis(),
            bold(&target.display().to_string()),
        );
    }
    if cli.keep {
        // The path is the product in --keep mode, so it goes to stdout.
        println!("{}", target.display());
    }

    Ok(())
}

/// Flatten to `-o`, or into the kept work directory with `--keep`.
/// Returns the written path and its size.
async fn run(cli: &Cli, config: &FlattenConfig) -> Result<(PathBuf, u64)> {
    if cli.keep {
        let document = tokio::fs::read(&cli.input)
            .await
            .with_context(|| format!("Failed to read {}", cli.input.display()))?;
        let artifact = flatten(&document, config)
            .await
            .context("Flatten failed")?;
        let path = artifact
            .as_path()
            .map(PathBuf::from)
            .context("Flatten did not persist its output")?;
        let size = tokio::fs::metadata(&path)
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len();
        return Ok((path, size));
    }

    let output = cli
        .output
        .clone()
        .context("--output is required unless --keep or --page-count is given")?;
    let size = flatten_file(&cli.input, &output, config)
        .await
        .context("Flatten failed")?;
    Ok((output, size))
}

/// Map CLI args to `FlattenConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<FlattenConfig> {
    let engine = match (cli.engine, &cli.pdfium_lib) {
        (_, Some(dir)) => EngineKind::Pdfium {
            library_path: Some(dir.clone()),
        },
        (EngineArg::Pdfium, None) => EngineKind::Pdfium { library_path: None },
        (EngineArg::Im6, None) => EngineKind::ImageMagick6,
        (EngineArg::Gm, None) => EngineKind::GraphicsMagick,
        (EngineArg::Magick, None) => EngineKind::ImageMagick,
    };

    let mut builder = FlattenConfig::builder()
        .image_type(cli.image_type.into())
        .density(cli.density)
        .engine(engine)
        .persist_to_disk(cli.keep);

    if let Some(page) = cli.page {
        builder = builder.target_page(page);
    }
    if let Some(ref dir) = cli.workdir {
        builder = builder.base_directory(dir);
    }
    if let Some(secs) = cli.timeout {
        builder = builder.timeout_secs(secs);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
