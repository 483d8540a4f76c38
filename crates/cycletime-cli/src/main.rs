mod display;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use cycletime_core::config::load_config;
use cycletime_core::render::render_markdown;
use cycletime_core::{correlate, AnalysisConfig, CorrelationResult, RunAnalysis, RunLayout, Source};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "cycletime",
    version,
    about = "cycletime: CI pipeline cycle-time analyzer",
    long_about = "Correlate orchestration logs, test timelines, application logs and metrics from one \
    pipeline run into a ranked list of cycle-time findings.\n\nSet RUST_LOG=debug to trace analyzer decisions."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a run directory and produce the full report
    Analyze {
        /// Run directory containing logs/, metrics/ and the test reports
        run_dir: PathBuf,

        /// Output format (markdown, json, text)
        #[arg(short, long, default_value = "markdown")]
        format: String,

        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Analysis config file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Report date, YYYY-MM-DD (defaults to today, UTC)
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Print only the ranked findings for a run directory
    Findings {
        /// Run directory containing logs/, metrics/ and the test reports
        run_dir: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Analysis config file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            run_dir,
            format,
            output,
            config,
            date,
        } => cmd_analyze(&run_dir, &format, output.as_deref(), config.as_deref(), date),
        Commands::Findings {
            run_dir,
            format,
            config,
        } => cmd_findings(&run_dir, &format, config.as_deref()),
    }
}

/// Logs go to stderr so stdout stays clean for the report.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn resolve_config(path: Option<&Path>) -> Result<AnalysisConfig> {
    match path {
        Some(path) => load_config(path),
        None => Ok(AnalysisConfig::default()),
    }
}

fn check_run_dir(run_dir: &Path) -> Result<()> {
    if !run_dir.is_dir() {
        anyhow::bail!(
            "Run directory '{}' does not exist. \
            Point cycletime at a directory containing logs/, metrics/ and the test reports.",
            run_dir.display()
        );
    }
    Ok(())
}

/// Analyze every source on the blocking pool, then correlate.
fn run_pipeline(run_dir: &Path, config: &AnalysisConfig) -> Result<(RunAnalysis, CorrelationResult)> {
    check_run_dir(run_dir)?;
    let layout = RunLayout::new(run_dir);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start analysis runtime")?;
    let run = rt.block_on(analyze_concurrently(&layout, config))?;

    let correlation = correlate(&run, &config.thresholds);
    info!(findings = correlation.findings.len(), "correlation finished");
    Ok((run, correlation))
}

async fn analyze_concurrently(layout: &RunLayout, config: &AnalysisConfig) -> Result<RunAnalysis> {
    let handles: Vec<_> = Source::ALL
        .into_iter()
        .map(|source| {
            let (layout, config) = (layout.clone(), config.clone());
            let handle = tokio::task::spawn_blocking(move || source.analyze(&layout, &config));
            (source, handle)
        })
        .collect();

    let mut run = RunAnalysis::default();
    for (source, handle) in handles {
        let output = handle
            .await
            .context("Analyzer task failed")?
            .with_context(|| format!("Failed to analyze {}", source.label()))?;
        run.absorb(output);
    }
    Ok(run)
}

#[derive(Serialize)]
struct JsonReport<'a> {
    analysis: &'a RunAnalysis,
    correlation: &'a CorrelationResult,
}

fn cmd_analyze(
    run_dir: &Path,
    format: &str,
    output: Option<&Path>,
    config_path: Option<&Path>,
    date: Option<NaiveDate>,
) -> Result<()> {
    let config = resolve_config(config_path)?;
    let (run, correlation) = run_pipeline(run_dir, &config)?;

    let rendered = match format {
        "markdown" | "md" => {
            let date = date.unwrap_or_else(|| chrono::Utc::now().date_naive());
            render_markdown(&run, &correlation, &config.thresholds, date)
        }
        "json" => {
            let doc = JsonReport {
                analysis: &run,
                correlation: &correlation,
            };
            let mut out = serde_json::to_string_pretty(&doc)?;
            out.push('\n');
            out
        }
        "text" => {
            if output.is_some() {
                anyhow::bail!("Text output is terminal-only; use --format markdown or json with --output.");
            }
            display::print_run_summary(&run, &correlation);
            return Ok(());
        }
        other => anyhow::bail!("Unknown format '{}'. Expected markdown, json or text.", other),
    };

    match output {
        Some(path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            println!("Report written to {}", path.display());
        }
        None => print!("{}", rendered),
    }

    Ok(())
}

fn cmd_findings(run_dir: &Path, format: &str, config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let (_, correlation) = run_pipeline(run_dir, &config)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&correlation.findings)?),
        "text" => display::print_findings(&correlation),
        other => anyhow::bail!("Unknown format '{}'. Expected text or json.", other),
    }

    Ok(())
}
