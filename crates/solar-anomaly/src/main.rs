//! CLI entry point for the solar anomaly pipeline.

use anyhow::{Context, Result};
use clap::Parser;
use dotenv::dotenv;
use solar_anomaly::config::PipelineConfigBuilder;
use solar_anomaly::{DeviceOutcome, Pipeline, PipelineConfig, RunReport};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Per-device outlier labeling for solar plant sensor data",
    long_about = "Reads one CSV per sensor device, labels anomalous rows with a seeded \
                  isolation forest fitted on that device alone, and writes one labeled CSV \
                  per device.\n\n\
                  EXAMPLES:\n  \
                  # Run every configured device with defaults\n  \
                  solar-anomaly\n\n  \
                  # Custom directories and a subset of devices\n  \
                  solar-anomaly --input-dir data --output-dir out --device A1_df --device B4_df\n\n  \
                  # Show what would run\n  \
                  solar-anomaly --dry-run"
)]
struct Args {
    /// JSON configuration file; defaults are used for anything it omits
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding one source CSV per device
    #[arg(short, long)]
    input_dir: Option<PathBuf>,

    /// Directory receiving the labeled CSVs
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Random seed for the isolation forest
    #[arg(long)]
    seed: Option<u64>,

    /// Expected fraction of outlier rows per device, in (0.0, 0.5]
    #[arg(long)]
    contamination: Option<f64>,

    /// Number of trees in the isolation forest
    #[arg(long)]
    n_estimators: Option<usize>,

    /// Restrict the run to this device (repeatable)
    #[arg(short, long = "device", value_name = "ID")]
    devices: Vec<String>,

    /// Print the resolved devices and paths without processing anything
    #[arg(long)]
    dry_run: bool,

    /// Output the run report as JSON to stdout instead of a summary
    ///
    /// Disables all logs so stdout only holds the report.
    #[arg(long)]
    json: bool,

    /// Write run_report.json to the output directory
    #[arg(short = 'r', long)]
    emit_report: bool,

    /// Whole-run retries after a failed attempt
    #[arg(long)]
    retries: Option<u32>,

    /// Seconds to wait between attempts
    #[arg(long)]
    retry_delay_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Suppress progress output (only show warnings and the final result)
    #[arg(short, long)]
    quiet: bool,
}

/// Initialize the tracing subscriber for logging.
///
/// When `json_output` is true, logging is disabled so stdout only carries
/// the JSON report.
fn init_logging(level: &str, quiet: bool, json_output: bool) {
    if json_output {
        return;
    }

    use tracing_subscriber::EnvFilter;

    let effective_level = if quiet { "warn" } else { level };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(effective_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Resolve the configuration from the optional file plus CLI overrides.
fn resolve_config(args: &Args) -> Result<PipelineConfig> {
    let base = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let mut builder = PipelineConfigBuilder::from_config(base.clone());
    if let Some(dir) = &args.input_dir {
        builder = builder.input_dir(dir);
    }
    if let Some(dir) = &args.output_dir {
        builder = builder.output_dir(dir);
    }
    if let Some(seed) = args.seed {
        builder = builder.random_seed(seed);
    }
    if let Some(contamination) = args.contamination {
        builder = builder.contamination(contamination);
    }
    if let Some(n) = args.n_estimators {
        builder = builder.n_estimators(n);
    }
    if !args.devices.is_empty() {
        builder = builder.only_devices(args.devices.iter().cloned());
    }
    if args.retries.is_some() || args.retry_delay_secs.is_some() {
        builder = builder.retry(
            args.retries.unwrap_or(base.retry.retries),
            args.retry_delay_secs.unwrap_or(base.retry.retry_delay_secs),
        );
    }

    Ok(builder.build()?)
}

/// One complete attempt: run every device and write the report if asked.
fn run_once(args: &Args, config: &PipelineConfig) -> Result<RunReport> {
    let pipeline = Pipeline::builder().config(config.clone()).build()?;
    let report = pipeline.run();

    if args.emit_report {
        let path = report
            .write_to_dir(&config.output_dir)
            .context("Failed to write run report")?;
        debug!("Run report written to {}", path.display());
    }

    Ok(report)
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.quiet, args.json);

    dotenv().ok();

    let config = resolve_config(&args)?;

    if args.dry_run {
        print_dry_run(&config);
        return Ok(());
    }

    let policy = config.retry.clone();
    let mut attempt = 0u32;
    let report = loop {
        match run_once(&args, &config) {
            Ok(report) => break report,
            Err(e) if attempt < policy.retries => {
                attempt += 1;
                warn!(
                    "Run failed: {:#}. Retrying in {}s (attempt {} of {})",
                    e,
                    policy.retry_delay_secs,
                    attempt + 1,
                    policy.retries + 1
                );
                thread::sleep(Duration::from_secs(policy.retry_delay_secs));
            }
            Err(e) => {
                error!("Run failed: {:#}", e);
                return Err(e);
            }
        }
    };

    if args.json {
        println!("{}", report.to_json()?);
    } else {
        print_summary(&report);
    }

    info!("Done");
    Ok(())
}

/// Print the devices that would be processed and where their data lives.
///
/// Uses `println!` on purpose: this output is the point of `--dry-run` and
/// must show regardless of log level.
fn print_dry_run(config: &PipelineConfig) {
    println!("\n{}", "=".repeat(80));
    println!("DRY RUN - {} devices", config.device_count());
    println!("{}\n", "=".repeat(80));

    println!("DETECTOR");
    println!("{}", "-".repeat(40));
    println!("  Contamination: {}", config.detector.contamination);
    println!("  Trees: {}", config.detector.n_estimators);
    println!("  Max samples: {}", config.detector.max_samples);
    println!("  Seed: {}", config.detector.random_seed);
    println!("  Features: {}", config.feature_columns.join(", "));
    println!();

    println!("DEVICES");
    println!("{}", "-".repeat(40));
    for (group, device_id) in config.devices() {
        let source = config.source_path(device_id);
        let marker = if source.is_file() { " " } else { "!" };
        println!(
            " {} [{}] {} : {} -> {}",
            marker,
            group,
            device_id,
            source.display(),
            config.output_path(device_id).display()
        );
    }
    println!("\n  ! = source file not found");
}

fn print_summary(report: &RunReport) {
    println!("\n{}", "=".repeat(80));
    println!("RUN SUMMARY");
    println!("{}", "=".repeat(80));
    println!("  Generated: {}", report.generated_at);
    println!("  Duration: {}ms", report.duration_ms);
    println!(
        "  Devices written: {} of {}",
        report.fully_processed(),
        report.devices_configured
    );
    println!("  Anomalous rows: {}", report.total_anomalies());

    for stage in [&report.loading, &report.detection, &report.persistence] {
        println!(
            "  {:<22} {} ok, {} failed",
            stage.stage.display_name(),
            stage.succeeded,
            stage.failed
        );
    }

    let failures = report.failures();
    if !failures.is_empty() {
        println!("\nSKIPPED DEVICES");
        println!("{}", "-".repeat(40));
        for outcome in failures {
            if let DeviceOutcome::Failed {
                device_id,
                error_code,
                reason,
                ..
            } = outcome
            {
                println!("  {} [{}] {}", device_id, error_code, reason);
            }
        }
    }
    println!();
}
