//! CLI binary for edgequake-invoice.
//!
//! A thin shim over the library: flags map to `ExtractionConfig`, reports
//! are written with `extract_to_files`. Exit code 2 means the input was
//! unusable, 1 means anything else went wrong.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_invoice::{
    extract_to_files, inspect, Backend, ExtractionConfig, ExtractionProgressCallback,
    InvoiceOcrError, PageRange, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Progress bar plus one log line per page.
struct CliProgressCallback {
    bar: ProgressBar,
    page_started: Mutex<Option<Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Rendering pages…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            page_started: Mutex::new(None),
            errors: AtomicUsize::new(0),
        })
    }

    fn page_elapsed(&self) -> String {
        let secs = self
            .page_started
            .lock()
            .ok()
            .and_then(|mut t| t.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        dim(&format!("{secs:.1}s"))
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_pages: usize) {
        self.bar.set_length(total_pages as u64);
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} pages  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }

    fn on_page_start(&self, page_num: usize, _position: usize, _total: usize) {
        if let Ok(mut t) = self.page_started.lock() {
            *t = Some(Instant::now());
        }
        self.bar.set_message(format!("page {page_num}"));
    }

    fn on_page_complete(
        &self,
        page_num: usize,
        position: usize,
        total: usize,
        invoice_number: Option<&str>,
    ) {
        self.bar.println(format!(
            "  {} Page {:>3} ({}/{})  {:<20}  {}",
            green("✓"),
            page_num,
            position,
            total,
            invoice_number.unwrap_or("(no invoice number)"),
            self.page_elapsed(),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, page_num: usize, position: usize, total: usize, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['…']).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>3} ({}/{})  {}  {}",
            red("✗"),
            page_num,
            position,
            total,
            red(&msg),
            self.page_elapsed(),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_pages: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!("{} {} pages extracted", green("✔"), bold(&success_count.to_string()));
        } else {
            eprintln!(
                "{} {}/{} pages extracted  ({} failed)",
                red("⚠"),
                bold(&success_count.to_string()),
                total_pages,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Whole document → invoices.csv + invoices.json next to it
  invoice-ocr invoices.pdf

  # Pages 3 to 7 only, explicit outputs
  invoice-ocr --pages 3-7 --csv out/march.csv --json out/march.json invoices.pdf

  # Direct Gemini REST backend
  GEMINI_API_KEY=... invoice-ocr --backend gemini-rest invoices.pdf

  # Page count and metadata (no API key needed)
  invoice-ocr --inspect-only invoices.pdf

EXIT CODES:
  0  success
  1  provider, rendering or output failure
  2  unusable input (missing file, not a PDF, bad page range) or no
     page produced an invoice number

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  GEMINI_API_KEY          Google Gemini API key (also used by --backend gemini-rest)
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium
"#;

/// Extract tax-invoice fields from PDF pages using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "invoice-ocr",
    version,
    about = "Extract tax-invoice fields from PDF pages into CSV and JSON using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// CSV report path. Default: <input stem>.csv
    #[arg(long, env = "INVOICE_OCR_CSV")]
    csv: Option<PathBuf>,

    /// JSON report path. Default: <input stem>.json
    #[arg(long, env = "INVOICE_OCR_JSON")]
    json: Option<PathBuf>,

    /// Page range, 1-indexed and inclusive: 5 or 3-7. Default: all pages.
    #[arg(long, env = "INVOICE_OCR_PAGES")]
    pages: Option<String>,

    /// Extraction backend.
    #[arg(long, env = "INVOICE_OCR_BACKEND", value_enum, default_value = "llm")]
    backend: BackendArg,

    /// LLM model ID (e.g. gpt-4.1-mini, gemini-2.0-flash).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider for the llm backend: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// API key for the gemini-rest backend.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    /// Rendering DPI (72–600).
    #[arg(long, env = "INVOICE_OCR_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Pause after every page in milliseconds.
    #[arg(long, env = "INVOICE_OCR_PAGE_DELAY_MS", default_value_t = 3000)]
    page_delay_ms: u64,

    /// Per-page model call timeout in seconds.
    #[arg(long, env = "INVOICE_OCR_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "INVOICE_OCR_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Max model output tokens per page.
    #[arg(long, env = "INVOICE_OCR_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// Model temperature (0.0–2.0).
    #[arg(long, env = "INVOICE_OCR_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "INVOICE_OCR_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Text file replacing the built-in extraction instruction.
    #[arg(long, env = "INVOICE_OCR_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Print page count and metadata only, no extraction.
    #[arg(long)]
    inspect_only: bool,

    /// Disable progress bar.
    #[arg(long, env = "INVOICE_OCR_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "INVOICE_OCR_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "INVOICE_OCR_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Llm,
    GeminiRest,
}

impl From<BackendArg> for Backend {
    fn from(v: BackendArg) -> Self {
        match v {
            BackendArg::Llm => Backend::Llm,
            BackendArg::GeminiRest => Backend::GeminiRest,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let show_progress = !cli.quiet && !cli.no_progress && !cli.inspect_only;
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

    match run(&cli, show_progress).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", red("error:"), e);
            exit_code_for(&e)
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<InvoiceOcrError>() {
        Some(e) if e.is_client_error() => ExitCode::from(2),
        _ => ExitCode::from(1),
    }
}

async fn run(cli: &Cli, show_progress: bool) -> Result<()> {
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(cli, progress).await?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let info = inspect(&cli.input, &config).await.context("Failed to inspect PDF")?;
        println!("File:         {}", cli.input);
        if let Some(ref t) = info.title {
            println!("Title:        {t}");
        }
        if let Some(ref a) = info.author {
            println!("Author:       {a}");
        }
        println!("Pages:        {}", info.page_count);
        println!("PDF Version:  {}", info.pdf_version);
        if let Some(ref p) = info.producer {
            println!("Producer:     {p}");
        }
        return Ok(());
    }

    // ── Extraction ───────────────────────────────────────────────────────
    let csv_path = cli.csv.clone().unwrap_or_else(|| default_output(&cli.input, "csv"));
    let json_path = cli.json.clone().unwrap_or_else(|| default_output(&cli.input, "json"));

    let output = extract_to_files(&cli.input, &csv_path, &json_path, &config)
        .await
        .context("Extraction failed")?;

    if !cli.quiet {
        let stats = &output.stats;
        eprintln!(
            "{}  {}/{} pages  {} invoices  {}ms",
            if stats.failed_pages == 0 { green("✔") } else { red("⚠") },
            stats.succeeded_pages,
            stats.requested_pages,
            output.table().len(),
            stats.total_duration_ms,
        );
        eprintln!("   CSV  → {}", bold(&csv_path.display().to_string()));
        eprintln!("   JSON → {}", bold(&json_path.display().to_string()));
    }
    Ok(())
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .dpi(cli.dpi)
        .backend(cli.backend.into())
        .page_delay_ms(cli.page_delay_ms)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature);

    if let Some(ref s) = cli.pages {
        builder = builder.pages(parse_pages(s)?);
    }
    if let Some(ref m) = cli.model {
        builder = builder.model(m.clone());
    }
    if let Some(ref p) = cli.provider {
        builder = builder.provider_name(p.clone());
    }
    if let Some(ref k) = cli.gemini_api_key {
        builder = builder.gemini_api_key(k.clone());
    }
    if let Some(ref p) = cli.password {
        builder = builder.password(p.clone());
    }
    if let Some(ref path) = cli.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {path:?}"))?;
        builder = builder.prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    Ok(builder.build()?)
}

/// Parse `--pages`: `5` or `3-7`.
fn parse_pages(s: &str) -> Result<PageRange, InvoiceOcrError> {
    let number = |p: &str| {
        p.trim()
            .parse::<usize>()
            .map_err(|_| InvoiceOcrError::InvalidConfig(format!("Invalid page number '{}'", p.trim())))
    };
    let (start, end) = match s.trim().split_once('-') {
        Some((a, b)) => (number(a)?, number(b)?),
        None => {
            let p = number(s)?;
            (p, p)
        }
    };
    Ok(PageRange::new(start, end))
}

/// `<dir>/<stem>.<ext>` for local inputs, `./<last URL segment>.<ext>` for URLs.
fn default_output(input: &str, ext: &str) -> PathBuf {
    let name = input.rsplit('/').find(|s| !s.is_empty()).unwrap_or("invoices");
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("invoices");
    let dir = if input.starts_with("http://") || input.starts_with("https://") {
        Path::new(".")
    } else {
        Path::new(input).parent().unwrap_or(Path::new("."))
    };
    dir.join(format!("{stem}.{ext}"))
}
