//! CLI binary for draw2struct.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `AnalysisConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use draw2struct::{
    analyze, analyze_batch, load_document, write_batch_json, AnalysisConfig,
    AnalysisProgressCallback, AnalysisProfile, AnalysisRequest, BatchResult, BatchState,
    BatchStats, DocumentOutcome, ExtractionItem, ExtractionSchema, ProgressCallback, RecordTable,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: renders a live progress bar and per-document
/// log lines. Works correctly when documents complete out-of-order
/// (concurrent batch mode).
struct CliProgressCallback {
    bar: ProgressBar,
    /// Per-document wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_batch_start

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading documents…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    /// Switch to the full progress-bar style once we know the total.
    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
        self.bar.reset_eta();
    }
}

impl AnalysisProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_documents: usize) {
        self.activate_bar(total_documents);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Analyzing {total_documents} documents…"))
        ));
    }

    fn on_document_start(&self, file_name: &str, index: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap()
            .insert(index, Instant::now());
        self.bar.set_message(file_name.to_string());
    }

    fn on_document_complete(&self, file_name: &str, index: usize, _total: usize, field_count: usize) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&index)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        self.bar.println(format!(
            "  {} {:<30}  {:<10}  {}",
            green("✓"),
            file_name,
            dim(&format!("{field_count} fields")),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_document_error(&self, file_name: &str, index: usize, _total: usize, error: &str) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&index)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        // Truncate very long error messages to keep output tidy.
        let msg: String = if error.chars().count() > 80 {
            let truncated: String = error.chars().take(79).collect();
            format!("{truncated}\u{2026}")
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:<30}  {}  {}",
            red("✗"),
            file_name,
            red(&msg),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_documents: usize, success_count: usize) {
        let failed = total_documents.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} documents extracted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} documents extracted  ({} failed)",
                if failed == total_documents {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_documents,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract the default field set from one drawing (JSON to stdout)
  draw2struct drawing.pdf

  # Custom fields with location hints
  draw2struct --item "Part Number:title block" --item "Wire Gauge:wiring table" drawing.pdf

  # Batch over a directory's drawings, results to a file
  draw2struct drawings/*.pdf -o results.json

  # Request per-field evidence and render tables
  draw2struct --evidence --table drawing.tif

  # Context improves extraction on ambiguous drawings
  draw2struct --customer "Automotive OEM" --component "Door harness" drawing.pdf

  # Load a schema from a JSON file
  draw2struct --items-file schema.json drawings/*.pdf

DEFAULT FIELD SET (when no --item/--items-file is given):
  Part Number, Revision, Material, Connector Type,
  Wire Gauge, Pin Assignment, Manufacturer

SCHEMA FILE FORMAT (--items-file):
  {"items": [{"name": "Part Number", "location_hint": "title block"},
             {"name": "Material"}]}

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY    Gemini API key (or GOOGLE_API_KEY)
  D2S_MODEL         Override model ID (default: gemini-2.5-pro)
  D2S_API_BASE      Override the REST endpoint base

SETUP:
  1. Set API key:   export GEMINI_API_KEY=...
  2. Extract:       draw2struct drawing.pdf -o result.json
"#;

/// Extract structured fields from technical drawings using multimodal LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "draw2struct",
    version,
    about = "Extract structured fields from technical drawings using multimodal LLMs",
    long_about = "Extract user-defined structured fields (part numbers, materials, dimensions, …) \
from technical drawings (PDF, PNG, JPEG, TIFF) by sending each document with a generated \
instruction prompt to a hosted multimodal model and defensively parsing the reply.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// One or more drawing files (PDF, PNG, JPEG, TIFF). Two or more run as a batch.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Field to extract, as "Name" or "Name:location hint". Repeatable.
    #[arg(short, long = "item", value_name = "NAME[:HINT]")]
    items: Vec<String>,

    /// JSON file with the extraction schema (see --help for the format).
    #[arg(long, conflicts_with = "items")]
    items_file: Option<PathBuf>,

    /// Customer overview context, e.g. "Automotive OEM".
    #[arg(long, default_value = "")]
    customer: String,

    /// Component context, e.g. "Wire harness for door".
    #[arg(long, default_value = "")]
    component: String,

    /// Also request per-field evidence (where each value was found).
    #[arg(long)]
    evidence: bool,

    /// Model ID.
    #[arg(long, env = "D2S_MODEL", default_value = "gemini-2.5-pro")]
    model: String,

    /// REST endpoint base URL.
    #[arg(long, env = "D2S_API_BASE")]
    api_base: Option<String>,

    /// Write results as JSON to this file instead of stdout.
    #[arg(short, long, env = "D2S_OUTPUT")]
    output: Option<PathBuf>,

    /// Render results as ASCII tables (values, and evidence when requested).
    #[arg(long)]
    table: bool,

    /// Number of concurrent model calls in batch mode.
    #[arg(short, long, env = "D2S_CONCURRENCY", default_value_t = 5)]
    concurrency: usize,

    /// Retries per document on transient model failure.
    #[arg(long, env = "D2S_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-call timeout in seconds.
    #[arg(long, env = "D2S_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Model temperature (0.0–2.0).
    #[arg(long, env = "D2S_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Max model output tokens per document.
    #[arg(long, env = "D2S_MAX_OUTPUT_TOKENS", default_value_t = 4096)]
    max_output_tokens: usize,

    /// Disable progress bar.
    #[arg(long, env = "D2S_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "D2S_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "D2S_QUIET")]
    quiet: bool,
}

/// The field set the original in-house tool prefilled for harness drawings.
const DEFAULT_ITEMS: [&str; 7] = [
    "Part Number",
    "Revision",
    "Material",
    "Connector Type",
    "Wire Gauge",
    "Pin Assignment",
    "Manufacturer",
];

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress;
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

    // ── Build schema and profile ─────────────────────────────────────────
    let schema = build_schema(&cli).await?;
    let profile = AnalysisProfile {
        schema: schema.clone(),
        customer_context: cli.customer.clone(),
        component_context: cli.component.clone(),
        want_evidence: cli.evidence,
    };

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress && cli.inputs.len() > 1 {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn AnalysisProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Load documents ───────────────────────────────────────────────────
    let documents = cli
        .inputs
        .iter()
        .map(|p| load_document(p).with_context(|| format!("Failed to load {}", p.display())))
        .collect::<Result<Vec<_>>>()?;

    // ── Run ──────────────────────────────────────────────────────────────
    let result = if documents.len() == 1 {
        run_single(documents.into_iter().next().expect("one document"), profile, &config, &cli)
            .await?
    } else {
        analyze_batch(documents, &profile, &config)
            .await
            .context("Batch analysis failed")?
    };

    // ── Emit ─────────────────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        write_batch_json(&result, output_path)
            .await
            .context("Failed to write output file")?;
        if !cli.quiet {
            eprintln!(
                "{}  {}/{} documents  {}ms  →  {}",
                if result.stats.failed == 0 {
                    green("✔")
                } else {
                    cyan("⚠")
                },
                result.stats.extracted,
                result.stats.total_documents,
                result.stats.total_duration_ms,
                bold(&output_path.display().to_string()),
            );
        }
    } else if cli.table {
        print_table(&result.to_table(&schema));
        if let Some(evidence) = result.evidence_table(&schema) {
            println!("\n{}", bold("Evidence:"));
            print_table(&evidence);
        }
    } else {
        let json = serde_json::to_string_pretty(&result).context("Failed to serialise result")?;
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(json.as_bytes())
            .context("Failed to write to stdout")?;
        handle.write_all(b"\n").ok();
    }

    if !cli.quiet && !show_progress {
        eprintln!(
            "Extracted {}/{} documents in {}ms",
            result.stats.extracted, result.stats.total_documents, result.stats.total_duration_ms
        );
        if result.stats.failed > 0 {
            eprintln!("  {} documents failed", result.stats.failed);
        }
    }

    if result.stats.extracted == 0 && result.stats.total_documents > 0 {
        anyhow::bail!("every document failed — see the error rows above");
    }

    Ok(())
}

/// Run single-document mode with a spinner, returning a one-row batch
/// result so the output paths are uniform with batch mode.
async fn run_single(
    document: draw2struct::DocumentInput,
    profile: AnalysisProfile,
    config: &AnalysisConfig,
    cli: &Cli,
) -> Result<BatchResult> {
    let file_name = document.file_name.clone();

    // The remote call reports no real progress; tick a spinner on a fixed
    // cadence so the terminal stays visibly alive.
    let spinner = if !cli.quiet && !cli.no_progress {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix("Extracting");
        bar.set_message(file_name.clone());
        bar.enable_steady_tick(Duration::from_millis(80));
        Some(bar)
    } else {
        None
    };

    let started = Instant::now();
    let outcome = match analyze(AnalysisRequest::new(document, profile), config).await {
        Ok(record) => DocumentOutcome::Extracted(record),
        Err(draw2struct::ExtractError::Document(error)) => {
            DocumentOutcome::Failed(draw2struct::FailureRecord { file_name, error })
        }
        Err(fatal) => return Err(fatal).context("Analysis failed"),
    };

    if let Some(bar) = spinner {
        bar.finish_and_clear();
        match &outcome {
            DocumentOutcome::Extracted(r) => eprintln!(
                "{} {}  {}",
                green("✔"),
                bold(&r.file_name),
                dim(&format!("{} fields", r.fields.len()))
            ),
            DocumentOutcome::Failed(f) => {
                eprintln!("{} {}  {}", red("✘"), bold(&f.file_name), red(&f.message()))
            }
        }
    }

    let failed = outcome.is_failure() as usize;
    Ok(BatchResult {
        state: BatchState::Completed,
        stats: BatchStats {
            total_documents: 1,
            extracted: 1 - failed,
            failed,
            skipped: 0,
            total_duration_ms: started.elapsed().as_millis() as u64,
        },
        outcomes: vec![outcome],
    })
}

/// Build the extraction schema from `--item` flags, `--items-file`, or the
/// default field set.
async fn build_schema(cli: &Cli) -> Result<ExtractionSchema> {
    if let Some(ref path) = cli.items_file {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read schema from {}", path.display()))?;
        let schema: ExtractionSchema =
            serde_json::from_str(&text).context("Schema file is not valid JSON")?;
        anyhow::ensure!(!schema.is_empty(), "Schema file contains no active items");
        return Ok(schema);
    }

    if cli.items.is_empty() {
        return Ok(ExtractionSchema::from_names(DEFAULT_ITEMS));
    }

    let items = cli
        .items
        .iter()
        .map(|spec| match spec.split_once(':') {
            Some((name, hint)) => ExtractionItem::new(name.trim(), hint.trim()),
            None => ExtractionItem::named(spec.trim()),
        })
        .collect();
    let schema = ExtractionSchema::new(items);
    anyhow::ensure!(!schema.is_empty(), "No active extraction items given");
    Ok(schema)
}

/// Map CLI args to `AnalysisConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<AnalysisConfig> {
    let mut builder = AnalysisConfig::builder()
        .model(cli.model.clone())
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .api_timeout_secs(cli.api_timeout)
        .temperature(cli.temperature)
        .max_output_tokens(cli.max_output_tokens);

    if let Some(ref base) = cli.api_base {
        builder = builder.api_base(base.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Render a [`RecordTable`] with padded ASCII columns.
fn print_table(table: &RecordTable) {
    let widths: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, col)| {
            table
                .rows
                .iter()
                .map(|r| r.get(i).map(|c| c.chars().count()).unwrap_or(0))
                .chain(std::iter::once(col.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let render_row = |cells: &[String]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{cell:<w$}"))
            .collect();
        format!("| {} |", padded.join(" | "))
    };

    println!("{}", render_row(&table.columns));
    let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    println!("|-{}-|", sep.join("-|-"));
    for row in &table.rows {
        println!("{}", render_row(row));
    }
}
