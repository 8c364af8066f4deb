//! CLI entry point for the preprocessing pipeline runner.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use polars::io::csv::read::CsvReadOptions;
use polars::prelude::*;
use snom_preprocess::{
    PipelineRunner, Preprocessor, RunInput, RunStage, RunnerConfig, StepDefinition, Table,
};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Run a preprocessing pipeline over a tabular dataset",
    long_about = "Builds each configured step, applies the steps in order and writes the \
                  transformed table.\n\n\
                  EXAMPLES:\n  \
                  # Shift every attribute by 10\n  \
                  snom-preprocess -i spectra.csv -s steps.json -o shifted.csv\n\n  \
                  # Build steps against a reference and save the pipeline\n  \
                  snom-preprocess -i spectra.csv -s steps.json --reference ref.csv \
                  --emit-pipeline pipeline.json"
)]
struct Args {
    /// Path to the CSV file to process
    #[arg(short, long)]
    input: PathBuf,

    /// JSON file holding an array of step definitions
    #[arg(short, long)]
    steps: PathBuf,

    /// CSV file handed to each step as its reference table
    #[arg(long)]
    reference: Option<PathBuf>,

    /// Build every step against the untouched reference
    ///
    /// By default, every step but the last is also applied to the reference.
    #[arg(long)]
    no_process_reference: bool,

    /// Numeric column to treat as the class variable
    #[arg(short, long)]
    class: Option<String>,

    /// Path of the transformed CSV
    #[arg(short, long, default_value = "preprocessed.csv")]
    output: PathBuf,

    /// Write the built pipeline's step definitions as JSON to this path
    #[arg(long)]
    emit_pipeline: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show errors and final result)
    #[arg(short, long)]
    quiet: bool,
}

/// Initialize the tracing subscriber for logging.
///
/// `RUST_LOG`, when set, takes precedence over `level`.
fn init_logging(level: &str, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level, args.quiet);

    if !args.input.exists() {
        return Err(anyhow!("Input file not found: {}", args.input.display()));
    }

    let steps = load_steps(&args.steps)?;
    info!("Loaded {} step definitions", steps.len());

    let data = load_table(&args.input, args.class.as_deref())?;
    info!(
        "Dataset loaded: {} rows, {} attributes",
        data.height(),
        data.domain().attributes().len()
    );

    let mut input = RunInput::new(data, steps).process_reference(!args.no_process_reference);
    if let Some(path) = &args.reference {
        input = input.with_reference(load_table(path, args.class.as_deref())?);
    }

    // a one-shot run has no burst of edits to wait out
    let config = RunnerConfig::builder().debounce_polls(0).build()?;
    let runner = PipelineRunner::builder()
        .config(config)
        .on_progress(|update| {
            if update.stage == RunStage::Preprocessing {
                debug!("[{:>3.0}%] {}", update.percent, update.message);
            }
        })
        .build()?;

    let output = runner.run(input)?;

    let mut df = output
        .data
        .map(|table| table.data().clone())
        .ok_or_else(|| anyhow!("Run produced no data"))?;
    write_csv(&mut df, &args.output)?;

    if let Some(path) = &args.emit_pipeline {
        let definitions = output
            .pipeline
            .as_ref()
            .map(|pipeline| pipeline.definitions())
            .unwrap_or_default();
        std::fs::write(path, serde_json::to_string_pretty(&definitions)?)
            .with_context(|| format!("Failed to write pipeline to {}", path.display()))?;
        info!("Pipeline saved: {}", path.display());
    }

    println!(
        "Preprocessed {} rows with {} steps -> {}",
        df.height(),
        output.pipeline.as_ref().map_or(0, |pipeline| pipeline.len()),
        args.output.display()
    );
    Ok(())
}

fn load_steps(path: &Path) -> Result<Vec<StepDefinition>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read steps from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid step definitions in {}", path.display()))
}

fn load_table(path: &Path, class_var: Option<&str>) -> Result<Table> {
    info!("Loading dataset from: {}", path.display());
    let df = CsvReadOptions::default()
        .with_infer_schema_length(Some(100))
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(Table::from_frame(df, class_var)?)
}

fn write_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    let mut file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b',')
        .finish(df)?;
    info!("Dataset saved: {}", path.display());
    Ok(())
}
