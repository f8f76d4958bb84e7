//! CLI binary for logistics-agent.
//!
//! A thin shim over the library crate: loads the YAML config, applies flag
//! overrides, builds one `Pipeline` and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use logistics_agent::{AgentConfig, AgentConfigBuilder, Pipeline, PipelineObserver, ProcessedDocument, Stage};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── Batch progress observer using indicatif ──────────────────────────────────

/// Renders one bar over the batch and one log line per finished document.
struct CliBatchObserver {
    bar: ProgressBar,
    start_times: Mutex<HashMap<PathBuf, Instant>>,
}

impl CliBatchObserver {
    fn new(total: usize) -> Arc<Self> {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Processing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed(&self, path: &Path) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(path))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn name(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }
}

impl PipelineObserver for CliBatchObserver {
    fn on_document_start(&self, path: &Path) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(path.to_path_buf(), Instant::now());
        }
        self.bar.set_message(Self::name(path));
    }

    fn on_stage(&self, path: &Path, stage: Stage) {
        self.bar
            .set_message(format!("{}  {}", Self::name(path), dim(&stage.to_string())));
    }

    fn on_document_complete(&self, path: &Path, _elapsed_secs: f64) {
        let secs = self.elapsed(path);
        self.bar.println(format!(
            "  {} {:<40}  {}",
            green("✓"),
            Self::name(path),
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, path: &Path, error: &str) {
        let secs = self.elapsed(path);
        let first_line = error.lines().next().unwrap_or(error);
        let msg: String = if first_line.chars().count() > 80 {
            format!("{}\u{2026}", first_line.chars().take(79).collect::<String>())
        } else {
            first_line.to_string()
        };
        self.bar.println(format!(
            "  {} {:<40}  {}  {}",
            red("✗"),
            Self::name(path),
            red(&msg),
            dim(&format!("{secs:.1}s"))
        ));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # One document, result printed as a summary and saved as JSON
  logistics-agent process --file scans/albaran_001.jpg --output out/albaran_001.json

  # Every PNG in a directory
  logistics-agent batch --input-dir scans --output-dir out --pattern "*.png"

  # Effective configuration after config.yaml and defaults
  logistics-agent config --show

CONFIGURATION:
  --config FILE, else $CONFIG_FILE, else ./config.yaml, else built-in defaults.

ENVIRONMENT VARIABLES:
  CONFIG_FILE   Path to the YAML configuration
  OLLAMA_HOST   Ollama endpoint (defaults to llm.base_url)
  RUST_LOG      Overrides the log filter, e.g. logistics_agent=debug
"#;

/// Classify logistics documents and extract validated fields.
#[derive(Parser, Debug)]
#[command(
    name = "logistics-agent",
    version,
    about = "Classify scanned logistics documents and extract validated fields with OCR and an LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a single document.
    Process(ProcessArgs),
    /// Process every matching document in a directory.
    Batch(BatchArgs),
    /// Configuration utilities.
    Config(ConfigArgs),
    /// Print version information.
    Version,
}

#[derive(Args, Debug)]
struct ProcessArgs {
    /// Document to process (image or PDF).
    #[arg(short, long)]
    file: PathBuf,

    /// Write the result JSON here.
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    common: CommonArgs,

    /// Suppress everything except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// Directory containing the documents.
    #[arg(short, long)]
    input_dir: PathBuf,

    /// Directory for the `<name>.json` results.
    #[arg(short, long)]
    output_dir: PathBuf,

    /// Glob pattern relative to the input directory.
    #[arg(short, long, default_value = "*.*")]
    pattern: String,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// YAML configuration file.
    #[arg(short, long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Enable DEBUG-level logs.
    #[arg(short, long)]
    verbose: bool,

    /// LLM provider (overrides llm.provider).
    #[arg(long)]
    provider: Option<String>,

    /// LLM model (overrides llm.model).
    #[arg(long)]
    model: Option<String>,

    /// Primary OCR engine: paddle, tesseract or vision.
    #[arg(long)]
    ocr_engine: Option<String>,

    /// Extraction attempts including the first.
    #[arg(long)]
    attempts: Option<u32>,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// Print the effective configuration as JSON.
    #[arg(long)]
    show: bool,

    /// YAML configuration file.
    #[arg(short, long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{} {e:#}", red("Error:"));
        std::process::exit(1);
    }
}

/// Configuration, logging and the process environment are settled while
/// the program is still single-threaded; only then does the runtime start.
fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Process(args) => {
            let config = prepare_process(&args)?;
            runtime()?.block_on(process(args, config))
        }
        Command::Batch(args) => {
            let config = prepare_batch(&args)?;
            runtime()?.block_on(batch(args, config))
        }
        Command::Config(args) => show_config(args),
        Command::Version => {
            println!("logistics-agent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

// ── Setup ────────────────────────────────────────────────────────────────────

/// Load the config file and apply flag overrides.
fn build_config(common: &CommonArgs) -> Result<AgentConfig> {
    let loaded = AgentConfig::load(common.config.as_deref()).context("Failed to load configuration")?;
    let previous_primary = loaded.ocr.primary_engine.clone();
    let previous_fallback = loaded.ocr.fallback_engine.clone();
    let mut builder = AgentConfigBuilder::from_config(loaded);
    if let Some(p) = &common.provider {
        builder = builder.provider(p.as_str());
    }
    if let Some(m) = &common.model {
        builder = builder.model(m.as_str());
    }
    if let Some(engine) = &common.ocr_engine {
        builder = builder.primary_engine(engine.as_str());
        // Choosing the configured fallback as primary swaps the two.
        if previous_fallback.as_deref() == Some(engine.as_str()) {
            builder = builder.fallback_engine(Some(previous_primary.as_str()));
        }
    }
    if let Some(n) = common.attempts {
        builder = builder.extraction_attempts(n);
    }
    builder.build().context("Invalid configuration")
}

/// `errors_only` limits the terminal to errors; the optional log file
/// still receives the configured level when `file_enabled`.
fn init_logging(
    config: &AgentConfig,
    verbose: bool,
    errors_only: bool,
    file_enabled: bool,
) -> Result<()> {
    let level = if verbose {
        "debug"
    } else {
        config.general.log_level.as_str()
    };
    let stderr_level = if errors_only { "error" } else { level };
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(stderr_level));

    let file_layer = match (&config.general.log_file, file_enabled) {
        (Some(path), true) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(EnvFilter::new(level)),
            )
        }
        _ => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_filter(stderr_filter))
        .with(file_layer)
        .init();
    Ok(())
}

/// `OLLAMA_HOST` value to export, if any: `llm.base_url` for the Ollama
/// provider unless the environment already names a host.
fn ollama_host(config: &AgentConfig, current: Option<&std::ffi::OsStr>) -> Option<String> {
    (config.llm.provider == "ollama" && current.is_none()).then(|| config.llm.base_url.clone())
}

/// Must run before any other thread exists.
fn apply_provider_env(config: &AgentConfig) {
    if let Some(host) = ollama_host(config, std::env::var_os("OLLAMA_HOST").as_deref()) {
        std::env::set_var("OLLAMA_HOST", host);
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")
}

// ── Commands ─────────────────────────────────────────────────────────────────

fn prepare_process(args: &ProcessArgs) -> Result<AgentConfig> {
    if !args.file.is_file() {
        anyhow::bail!("File not found: {}", args.file.display());
    }
    let config = build_config(&args.common)?;
    init_logging(&config, args.common.verbose, args.quiet, !args.quiet)?;
    apply_provider_env(&config);
    Ok(config)
}

async fn process(args: ProcessArgs, config: AgentConfig) -> Result<()> {
    let pipeline = Pipeline::new(config).context("Failed to initialise the pipeline")?;
    let doc = pipeline
        .process_document(&args.file, args.output.as_deref())
        .await
        .with_context(|| format!("Processing failed for {}", args.file.display()))?;

    if !args.quiet {
        print_summary(&doc, args.output.as_deref());
    }
    Ok(())
}

fn prepare_batch(args: &BatchArgs) -> Result<AgentConfig> {
    if !args.input_dir.is_dir() {
        anyhow::bail!("Input directory not found: {}", args.input_dir.display());
    }
    let config = build_config(&args.common)?;
    // The progress bar replaces INFO logs unless --verbose.
    init_logging(&config, args.common.verbose, !args.common.verbose, true)?;
    apply_provider_env(&config);
    Ok(config)
}

async fn batch(args: BatchArgs, config: AgentConfig) -> Result<()> {
    let files = find_documents(&args.input_dir, &args.pattern)?;
    if files.is_empty() {
        eprintln!(
            "{} no files in {} match '{}'",
            yellow("Warning:"),
            args.input_dir.display(),
            args.pattern
        );
        return Ok(());
    }

    eprintln!(
        "{} {}",
        cyan("◆"),
        bold(&format!("Processing {} document(s)…", files.len()))
    );
    let observer = CliBatchObserver::new(files.len());
    let pipeline = Pipeline::new(config)
        .context("Failed to initialise the pipeline")?
        .with_observer(observer.clone());

    let start = Instant::now();
    let results = pipeline.process_batch(&files, Some(&args.output_dir)).await;
    observer.bar.finish_and_clear();

    let failed = files.len() - results.len();
    eprintln!(
        "{} {}/{} documents processed in {:.1}s  →  {}",
        if failed == 0 { green("✔") } else { yellow("⚠") },
        bold(&results.len().to_string()),
        files.len(),
        start.elapsed().as_secs_f64(),
        bold(&args.output_dir.display().to_string())
    );
    if failed > 0 {
        eprintln!("   {} failed", red(&failed.to_string()));
    }
    Ok(())
}

fn show_config(args: ConfigArgs) -> Result<()> {
    let config = AgentConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if args.show {
        println!(
            "{}",
            serde_json::to_string_pretty(&config).context("Failed to serialise configuration")?
        );
    } else {
        eprintln!("Use --show to print the effective configuration.");
    }
    Ok(())
}

/// Files in `dir` matching `pattern`, sorted.
fn find_documents(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let full = dir.join(pattern);
    let full = full.to_string_lossy();
    let mut files: Vec<PathBuf> = glob::glob(&full)
        .with_context(|| format!("Invalid pattern '{pattern}'"))?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    Ok(files)
}

fn print_summary(doc: &ProcessedDocument, output: Option<&Path>) {
    let row = |label: &str, value: String| println!("  {:<24} {}", dim(label), value);

    println!();
    println!("{}", bold("Processing result"));
    row("Document type", bold(doc.document_type.as_str()));
    row(
        "Classification conf.",
        format!("{:.2}", doc.classification_confidence),
    );
    row("OCR engine", doc.ocr_engine_used.clone());
    row("OCR avg. confidence", format!("{:.2}", doc.ocr_average_confidence));
    row("Text blocks", doc.total_text_blocks.to_string());
    row(
        "Validation",
        match doc.validation_status.as_str() {
            "valid" => green("valid"),
            other => yellow(other),
        },
    );
    row("Time", format!("{:.2}s", doc.processing_time_seconds));
    if let Some(out) = output {
        row("Saved to", out.display().to_string());
    }
    for w in &doc.validation_warnings {
        println!("  {} {}", yellow("⚠"), w);
    }
}
