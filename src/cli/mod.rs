//! Command-line interface for splat volume analysis.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use serde::Serialize;

use crate::core::writers::write_rows_csv;
use crate::pipeline::{
    AnalysisError, Analyzer, Endpoint, ExportFormat, GrowthRequest, ScanRequest,
};
use crate::report::{BatchRow, ErrorResponse};
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "splat-volume")]
#[command(about = "Volume and growth analysis of Gaussian splat scans", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory scan identifiers are resolved against (overrides config)
    #[arg(long, global = true)]
    scan_dir: Option<PathBuf>,

    /// Print machine-readable JSON instead of a summary
    #[arg(long, global = true)]
    json: bool,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate the volume of one scan
    Analyze {
        /// Scan identifier inside the scan directory
        file: String,
        /// Opacity threshold in [0, 1]
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Skip statistical outlier removal
        #[arg(long)]
        no_outliers: bool,
    },

    /// Compare a baseline scan with a follow-up scan
    Growth {
        /// Baseline scan identifier
        file1: String,
        /// Follow-up scan identifier
        file2: String,
        /// Opacity threshold in [0, 1]
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Skip statistical outlier removal
        #[arg(long)]
        no_outliers: bool,
    },

    /// Estimate many scans in parallel
    Batch {
        /// Scan identifiers
        #[arg(required = true)]
        files: Vec<String>,
        /// Opacity threshold in [0, 1]
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Write one CSV row per scan to this file
        #[arg(long)]
        csv: Option<PathBuf>,
    },

    /// Write the filtered splats of a scan to a PLY or .splat file
    Export {
        /// Scan identifier
        file: String,
        /// Output path
        output: PathBuf,
        /// Output layout
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Ply)]
        format: OutputFormat,
        /// Opacity threshold in [0, 1]
        #[arg(short, long)]
        threshold: Option<f32>,
        /// Skip statistical outlier removal
        #[arg(long)]
        no_outliers: bool,
    },

    /// List stored scans, newest first
    List,

    /// Answer a JSON request read from stdin or a file
    Request {
        /// Request shape
        #[arg(value_enum)]
        endpoint: RequestEndpoint,
        /// Read the request from this file instead of stdin
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum RequestEndpoint {
    Scan,
    Growth,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Ply,
    Splat,
}

impl From<OutputFormat> for ExportFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Ply => ExportFormat::Ply,
            OutputFormat::Splat => ExportFormat::Splat,
        }
    }
}

impl From<RequestEndpoint> for Endpoint {
    fn from(endpoint: RequestEndpoint) -> Self {
        match endpoint {
            RequestEndpoint::Scan => Endpoint::Scan,
            RequestEndpoint::Growth => Endpoint::Growth,
        }
    }
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.chars().count() > 39 {
            format!("{}...", value.chars().take(36).collect::<String>())
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to encode JSON output")?;
    println!("{}", text);
    Ok(())
}

/// Report an analysis failure and exit with its kind's code.
fn fail(err: &AnalysisError, json: bool) -> ! {
    error!("{}", err);
    if json {
        if let Err(e) = print_json(&ErrorResponse::from(err)) {
            error!("{:#}", e);
        }
    }
    std::process::exit(err.kind().exit_code());
}

/// Spinner shown only for human-readable output.
fn maybe_spinner(json: bool, message: &str) -> Option<ProgressBar> {
    if json {
        None
    } else {
        Some(create_spinner(message))
    }
}

fn finish(spinner: Option<ProgressBar>) {
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let mut config = match &cli.config {
        Some(path) => match PipelineConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => fail(
                &AnalysisError::InvalidRequest(format!(
                    "failed to load config from {}: {}",
                    path.display(),
                    e
                )),
                cli.json,
            ),
        },
        None => PipelineConfig::default(),
    };

    if let Some(dir) = &cli.scan_dir {
        config.storage.scan_dir = dir.clone();
    }

    let json = cli.json;
    let outcome = match cli.command {
        Commands::Analyze { file, threshold, no_outliers } => {
            cmd_analyze(config_without_outliers(config, no_outliers), file, threshold, json)
        }
        Commands::Growth { file1, file2, threshold, no_outliers } => cmd_growth(
            config_without_outliers(config, no_outliers),
            file1,
            file2,
            threshold,
            json,
        ),
        Commands::Batch { files, threshold, csv } => {
            cmd_batch(config, &files, threshold, csv.as_deref(), json)
        }
        Commands::Export { file, output, format, threshold, no_outliers } => cmd_export(
            config_without_outliers(config, no_outliers),
            &file,
            &output,
            format.into(),
            threshold,
            json,
        ),
        Commands::List => cmd_list(config, json),
        Commands::Request { endpoint, input } => cmd_request(config, endpoint, input.as_deref()),
    };

    if let Err(e) = outcome {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn config_without_outliers(mut config: PipelineConfig, no_outliers: bool) -> PipelineConfig {
    if no_outliers {
        config.outliers.enabled = false;
    }
    config
}

fn cmd_analyze(config: PipelineConfig, file: String, threshold: Option<f32>, json: bool) -> Result<()> {
    let start = Instant::now();
    let analyzer = Analyzer::new(config);
    let request = ScanRequest { file, threshold };

    let spinner = maybe_spinner(json, "Estimating scan volume...");
    let result = analyzer.analyze_scan(&request);
    finish(spinner);

    let response = result.unwrap_or_else(|e| fail(&e, json));

    if json {
        return print_json(&response);
    }

    let effective = threshold.unwrap_or(analyzer.config().filter.opacity_threshold);
    print_summary(
        "Volume Analysis Complete",
        &[
            ("Scan", response.file.clone()),
            ("Opacity threshold", effective.to_string()),
            ("Points kept", response.point_count.to_string()),
            ("Hull volume", format!("{:.6}", response.volume_hull_units)),
            ("Bounding box volume", format!("{:.6}", response.volume_bbox_units)),
            ("Outlier removal", analyzer.config().outliers.enabled.to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_growth(
    config: PipelineConfig,
    file1: String,
    file2: String,
    threshold: Option<f32>,
    json: bool,
) -> Result<()> {
    let start = Instant::now();
    let analyzer = Analyzer::new(config);
    let request = GrowthRequest {
        file1,
        file2,
        threshold,
    };

    let spinner = maybe_spinner(json, "Estimating both scans...");
    let result = analyzer.analyze_growth(&request);
    finish(spinner);

    let response = result.unwrap_or_else(|e| fail(&e, json));

    if json {
        return print_json(&response);
    }

    let effective = threshold.unwrap_or(analyzer.config().filter.growth_threshold);
    print_summary(
        "Growth Analysis Complete",
        &[
            ("Baseline", response.file1.clone()),
            ("Follow-up", response.file2.clone()),
            ("Opacity threshold", effective.to_string()),
            ("Baseline volume", format!("{:.6}", response.volume1)),
            ("Follow-up volume", format!("{:.6}", response.volume2)),
            ("Growth", format!("{:+.2}%", response.growth_percentage)),
            ("Baseline bbox", format!("{:.6}", response.bbox_volume1)),
            ("Follow-up bbox", format!("{:.6}", response.bbox_volume2)),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_batch(
    config: PipelineConfig,
    files: &[String],
    threshold: Option<f32>,
    csv: Option<&Path>,
    json: bool,
) -> Result<()> {
    let start = Instant::now();
    let decimals = config.report.decimals;
    let analyzer = Analyzer::new(config);

    let spinner = maybe_spinner(json, &format!("Estimating {} scans...", files.len()));
    let results = analyzer.analyze_batch(files, threshold);
    finish(spinner);

    let results = results.unwrap_or_else(|e| fail(&e, json));
    let rows: Vec<BatchRow> = results
        .iter()
        .map(|(file, result)| BatchRow::from_result(file, result, decimals))
        .collect();

    if let Some(path) = csv {
        write_rows_csv(path, &rows)
            .with_context(|| format!("failed to write batch report {}", path.display()))?;
        info!("Wrote batch report to {}", path.display());
    }

    let failed: Vec<&AnalysisError> = results.iter().filter_map(|(_, r)| r.as_ref().err()).collect();
    for err in &failed {
        warn!("{}", err);
    }

    if json {
        print_json(&rows)?;
    } else {
        let mut items: Vec<(&str, String)> = rows
            .iter()
            .map(|row| {
                let value = match (row.volume_hull_units, row.point_count, row.error) {
                    (Some(hull), Some(count), _) => format!("{:.4} ({} pts)", hull, count),
                    (_, _, Some(kind)) => format!("error: {}", kind.as_str()),
                    _ => "-".to_string(),
                };
                (row.file.as_str(), value)
            })
            .collect();
        items.push(("Failed", failed.len().to_string()));
        items.push(("Duration", format!("{:.2?}", start.elapsed())));
        print_summary("Batch Analysis Complete", &items);
    }

    if let Some(first) = failed.first() {
        std::process::exit(first.kind().exit_code());
    }
    Ok(())
}

fn cmd_export(
    config: PipelineConfig,
    file: &str,
    output: &Path,
    format: ExportFormat,
    threshold: Option<f32>,
    json: bool,
) -> Result<()> {
    let start = Instant::now();
    let analyzer = Analyzer::new(config);

    let spinner = maybe_spinner(json, "Filtering and exporting splats...");
    let result = analyzer.export_filtered(file, threshold, output, format);
    finish(spinner);

    let written = result.unwrap_or_else(|e| fail(&e, json));

    if json {
        return print_json(&serde_json::json!({
            "file": file,
            "output": output.display().to_string(),
            "point_count": written,
        }));
    }

    print_summary(
        "Export Complete",
        &[
            ("Scan", file.to_string()),
            ("Output file", output.display().to_string()),
            ("Points written", written.to_string()),
            ("Duration", format!("{:.2?}", start.elapsed())),
        ],
    );
    Ok(())
}

fn cmd_list(config: PipelineConfig, json: bool) -> Result<()> {
    let analyzer = Analyzer::new(config);
    let entries = analyzer
        .store()
        .list()
        .map_err(AnalysisError::from)
        .unwrap_or_else(|e| fail(&e, json));

    if json {
        return print_json(&entries);
    }

    let mut items: Vec<(&str, String)> = entries
        .iter()
        .map(|entry| (entry.name.as_str(), format!("{} bytes", entry.size)))
        .collect();
    items.push(("Total", entries.len().to_string()));
    print_summary(
        &format!("Scans in {}", analyzer.store().root().display()),
        &items,
    );
    Ok(())
}

fn read_request_body(input: Option<&Path>) -> Result<String> {
    match input {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read request from {}", path.display())),
        None => {
            let mut body = String::new();
            std::io::stdin()
                .read_to_string(&mut body)
                .context("failed to read request from stdin")?;
            Ok(body)
        }
    }
}

fn cmd_request(config: PipelineConfig, endpoint: RequestEndpoint, input: Option<&Path>) -> Result<()> {
    let body = read_request_body(input)?;
    let analyzer = Analyzer::new(config);

    match analyzer.handle_json(endpoint.into(), &body) {
        Ok(value) => print_json(&value),
        Err(e) => fail(&e, true),
    }
}
