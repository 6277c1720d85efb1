//! CLI binary for marker-gateway.
//!
//! A thin shim over the library crate: flags map to `ServiceConfig`, option
//! files and `--set` pairs build the raw option bag the normaliser reads.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use marker_gateway::{
    normalize_with_warnings, BatchOptions, BatchProgressCallback, DocumentInput, MarkerService,
    ProgressCallback, ServiceConfig, StatusKind,
};
use serde_json::{Map, Value};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar for the batch, one log line per finished document.
struct CliProgressCallback {
    bar: ProgressBar,
    started: Mutex<Option<Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: Mutex::new(None),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self) -> f64 {
        self.started
            .lock()
            .ok()
            .and_then(|s| *s)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {total} documents…"))
        ));
    }

    fn on_document_start(&self, _index: usize, _total: usize, name: &str) {
        if let Ok(mut started) = self.started.lock() {
            *started = Some(Instant::now());
        }
        self.bar.set_message(name.to_string());
    }

    fn on_document_complete(&self, index: usize, total: usize, name: &str, text_len: usize) {
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}  {}",
            green("✓"),
            index,
            total,
            name,
            dim(&format!("{text_len:>7} bytes")),
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, index: usize, total: usize, name: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let first_line = error.lines().next().unwrap_or_default();
        let msg: String = if first_line.chars().count() > 80 {
            first_line.chars().take(79).chain(['…']).collect()
        } else {
            first_line.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}  {}",
            red("✗"),
            index,
            total,
            name,
            red(&msg),
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, success_count: usize) {
        let failed = self.errors.load(Ordering::SeqCst);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} documents converted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} documents converted  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Check that the engine is installed
  marker-gateway status

  # One document to stdout
  marker-gateway convert paper.pdf

  # HTML output with forced OCR, written to a file
  marker-gateway convert scan.pdf --set output_format=html --set force_ocr=true -o scan.html

  # Options from a JSON file (same keys the web UI and agent tools send)
  marker-gateway convert paper.pdf --options marker.json

  # Batch into a zip, including debug dumps
  marker-gateway batch *.pdf --out-dir ./out --include-debug

  # Agent-style JSON report
  marker-gateway batch a.pdf b.pdf --json

LLM ENHANCEMENT:
  --set use_llm=true --set llm_provider=gemini --set google_api_key=...
  Providers: gemini, openai, anthropic, azure, ollama (default), custom.
  A provider without its API key silently falls back to no LLM.

ENVIRONMENT VARIABLES:
  MARKER_GATEWAY_ENGINE          Engine executable (default: marker_single)
  MARKER_GATEWAY_ENGINE_TIMEOUT  Seconds before an engine run is killed (default: 600)
  MARKER_GATEWAY_WORK_ROOT       Parent of per-document working directories
  RUST_LOG                       Overrides the log filter
"#;

/// Convert PDFs with the marker engine and package the results.
#[derive(Parser, Debug)]
#[command(
    name = "marker-gateway",
    version,
    about = "Convert PDFs with the marker engine and package the results",
    long_about = "Run the marker PDF converter in an isolated process per document, \
normalise its options, and package batches into a zip with a combined Markdown overview.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Engine executable (name on PATH or absolute path).
    #[arg(long, global = true, env = "MARKER_GATEWAY_ENGINE", default_value = "marker_single")]
    engine: String,

    /// Seconds one engine run may take before it is killed.
    #[arg(long, global = true, env = "MARKER_GATEWAY_ENGINE_TIMEOUT", default_value_t = 600)]
    engine_timeout: u64,

    /// Parent directory for per-document working directories.
    #[arg(long, global = true, env = "MARKER_GATEWAY_WORK_ROOT")]
    work_root: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "MARKER_GATEWAY_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "MARKER_GATEWAY_QUIET")]
    quiet: bool,

    /// Disable the progress bar.
    #[arg(long, global = true, env = "MARKER_GATEWAY_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert one PDF and print (or write) its text.
    Convert {
        /// PDF file to convert.
        input: PathBuf,

        /// Write the converted text to this file instead of stdout.
        #[arg(short, long, env = "MARKER_GATEWAY_OUTPUT")]
        output: Option<PathBuf>,

        #[command(flatten)]
        options: OptionArgs,
    },

    /// Convert several PDFs into one zip archive plus combined Markdown.
    Batch {
        /// PDF files to convert, in order.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Directory for the archive. Default: the system temp dir.
        #[arg(long, env = "MARKER_GATEWAY_OUT_DIR")]
        out_dir: Option<PathBuf>,

        /// Include engine debug dumps in the archive.
        #[arg(long)]
        include_debug: bool,

        /// Leave extracted images out of the archive.
        #[arg(long)]
        no_images: bool,

        /// Print the JSON batch report instead of building an archive.
        #[arg(long)]
        json: bool,

        /// Keep per-document working directories after archiving.
        #[arg(long)]
        keep_workdirs: bool,

        #[command(flatten)]
        options: OptionArgs,
    },

    /// Report whether the engine is available.
    Status {
        /// Print the status record as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug, Clone)]
struct OptionArgs {
    /// JSON file with engine options (a flat object).
    #[arg(long = "options", env = "MARKER_GATEWAY_OPTIONS")]
    options_file: Option<PathBuf>,

    /// Set one engine option; the value is parsed as JSON, else kept as text.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let json_output = matches!(
        cli.command,
        Command::Batch { json: true, .. } | Command::Status { json: true }
    );
    let show_progress = !cli.quiet && !cli.no_progress && !json_output;
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

    let mut builder = ServiceConfig::builder()
        .engine_program(cli.engine.clone())
        .engine_timeout_secs(cli.engine_timeout);
    if let Some(ref root) = cli.work_root {
        builder = builder.work_root(root);
    }
    if let Command::Batch {
        out_dir: Some(ref dir),
        ..
    } = cli.command
    {
        builder = builder.archive_dir(dir);
    }
    let config = builder.build().context("Invalid configuration")?;
    let service = MarkerService::new(config);

    match cli.command {
        Command::Status { json } => print_status(&service, json),
        Command::Convert {
            ref input,
            ref output,
            ref options,
        } => {
            let raw = build_options(options).await?;
            report_warnings(&raw, cli.quiet)?;
            run_convert(&service, input, output.as_deref(), &raw, show_progress, cli.quiet).await
        }
        Command::Batch {
            ref inputs,
            include_debug,
            no_images,
            json,
            keep_workdirs,
            ref options,
            ..
        } => {
            let raw = build_options(options).await?;
            report_warnings(&raw, cli.quiet)?;
            let docs: Vec<DocumentInput> =
                inputs.iter().cloned().map(DocumentInput::Path).collect();
            if json {
                let report = service
                    .convert_batch_report(docs, &raw)
                    .await
                    .context("Batch conversion failed")?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("Failed to serialise report")?
                );
                return Ok(());
            }

            let mut batch = BatchOptions::from_options(&raw);
            batch.include_debug |= include_debug;
            batch.include_images &= !no_images;
            if show_progress {
                let cb: ProgressCallback = CliProgressCallback::new();
                batch = batch.with_progress(cb);
            }

            let outcome = service
                .convert_batch(docs, &raw, &batch)
                .await
                .context("Batch conversion failed")?;
            if !keep_workdirs {
                outcome.cleanup();
            }

            write_stdout(&outcome.archive.combined_text)?;
            if !cli.quiet {
                let s = outcome.archive.summary;
                eprintln!(
                    "{}  {}/{} documents  →  {}",
                    if s.failed == 0 { green("✔") } else { cyan("⚠") },
                    s.successful,
                    s.total,
                    bold(&outcome.archive.archive_path.display().to_string()),
                );
            }
            Ok(())
        }
    }
}

fn print_status(service: &MarkerService, json: bool) -> Result<()> {
    let status = service.status();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("Failed to serialise status")?
        );
    } else {
        let mark = match status.status {
            StatusKind::Ready => green("✔"),
            StatusKind::Failed => red("✘"),
        };
        println!("{mark} {}  {}", bold(&status.status.to_string()), status.message);
    }
    if status.status == StatusKind::Failed {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_convert(
    service: &MarkerService,
    input: &Path,
    output: Option<&Path>,
    raw: &Value,
    show_progress: bool,
    quiet: bool,
) -> Result<()> {
    let spinner = show_progress.then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  ⏱ {elapsed}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Converting");
        bar.set_message(input.display().to_string());
        bar.enable_steady_tick(Duration::from_millis(80));
        bar
    });

    let start = Instant::now();
    let result = service.convert_text(input, raw).await;
    if let Some(ref bar) = spinner {
        bar.finish_and_clear();
    }
    let extracted = result.with_context(|| format!("Conversion of {} failed", input.display()))?;

    match output {
        Some(path) => {
            tokio::fs::write(path, extracted.text.as_bytes())
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            if !quiet {
                eprintln!(
                    "{}  {} bytes of {}  {}ms  →  {}",
                    green("✔"),
                    extracted.text.len(),
                    extracted.format,
                    start.elapsed().as_millis(),
                    bold(&path.display().to_string()),
                );
            }
        }
        None => write_stdout(&extracted.text)?,
    }
    Ok(())
}

fn write_stdout(text: &str) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(text.as_bytes())
        .context("Failed to write to stdout")?;
    if !text.ends_with('\n') {
        handle.write_all(b"\n").ok();
    }
    Ok(())
}

/// Build the raw option bag: the `--options` file first, `--set` on top.
async fn build_options(args: &OptionArgs) -> Result<Value> {
    let mut map = match args.options_file {
        Some(ref path) => {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read options from {}", path.display()))?;
            match serde_json::from_str::<Value>(&text)
                .with_context(|| format!("Invalid JSON in {}", path.display()))?
            {
                Value::Object(map) => map,
                other => bail!(
                    "Options file {} must contain a JSON object, got {}",
                    path.display(),
                    other
                ),
            }
        }
        None => Map::new(),
    };
    for pair in &args.set {
        let (key, value) = parse_set(pair)?;
        map.insert(key, value);
    }
    Ok(Value::Object(map))
}

/// Parse `KEY=VALUE`; VALUE is JSON when it parses, otherwise a string.
fn parse_set(pair: &str) -> Result<(String, Value)> {
    let Some((key, value)) = pair.split_once('=') else {
        bail!("Expected KEY=VALUE, got '{pair}'");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("Empty option name in '{pair}'");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Print ignored options and LLM fallbacks before converting.
fn report_warnings(raw: &Value, quiet: bool) -> Result<()> {
    let (_, warnings) = normalize_with_warnings(raw).context("Invalid options")?;
    if quiet {
        return Ok(());
    }
    for w in warnings {
        eprintln!("{} {}", cyan("⚠"), dim(&w.to_string()));
    }
    Ok(())
}
