//! Command implementations for the trip pivot CLI
//!
//! Sets up logging, layers configuration, runs the pipeline, then prints the
//! summary and writes the report.

use crate::cli::args::{Args, Commands, ProcessArgs};
use crate::cli::report::write_report;
use crate::config::PipelineConfig;
use crate::constants::DEFAULT_REPORT_NAME;
use crate::processor::{Pipeline, RunSummary};

use anyhow::{Context, Result};
use colored::*;
use indicatif::HumanDuration;
use std::time::Duration;
use tracing::{debug, info};

/// Dispatch the parsed command
pub async fn run(args: Args) -> Result<RunSummary> {
    match args.command {
        Some(Commands::Process(process_args)) => run_process(process_args).await,
        None => anyhow::bail!("no command given; try `trip-pivot process --help`"),
    }
}

/// Run the process command end to end
pub async fn run_process(args: ProcessArgs) -> Result<RunSummary> {
    setup_logging(&args);
    debug!("Command line arguments: {:?}", args);

    args.validate()?;
    let config = load_configuration(&args)?;
    debug!("Loaded configuration: {:?}", config);

    if args.show_progress() {
        println!("{}", "Starting trip pivot".bright_green().bold());
        println!("  {} {}", "Input:".bright_cyan(), config.input);
        println!(
            "  {} {}",
            "Output:".bright_cyan(),
            config.output_dir.display()
        );
    }

    let report_path = args
        .report
        .clone()
        .unwrap_or_else(|| config.output_dir.join(DEFAULT_REPORT_NAME));

    let pipeline = Pipeline::new(config).with_progress(args.show_progress());
    let summary = pipeline.run().await?;

    if args.show_progress() {
        print_summary(&summary);
    }
    write_report(&summary, &report_path)
        .with_context(|| format!("Failed to write report to {}", report_path.display()))?;
    info!("Report written to {}", report_path.display());

    Ok(summary.into_result()?)
}

/// Set up structured logging based on CLI arguments
fn setup_logging(args: &ProcessArgs) {
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = args.get_log_level();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("trip_pivot={}", log_level)));

    // try_init: a second subscriber (e.g. in tests) is not an error
    if args.quiet {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init();
    } else {
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_level(true)
                    .with_timer(fmt::time::uptime())
                    .with_writer(std::io::stderr),
            )
            .try_init();
    }

    debug!("Logging initialized at level: {}", log_level);
}

/// Load configuration using layered approach (file -> env -> args)
fn load_configuration(args: &ProcessArgs) -> Result<PipelineConfig> {
    match &args.config_file {
        Some(path) => info!("Using config file: {}", path.display()),
        None => info!("No config file given, using defaults and environment variables"),
    }

    let mut config = PipelineConfig::load_layered(args.config_file.as_deref())
        .context("Failed to load configuration")?;
    args.apply_to(&mut config)?;
    config.validate()?;
    Ok(config)
}

fn print_summary(summary: &RunSummary) {
    let m = &summary.metrics;
    println!("\n{}", "Processing Summary".bright_green().bold());
    println!(
        "  {} {}",
        "Time elapsed:".bright_cyan(),
        HumanDuration(Duration::from_secs_f64(m.elapsed_seconds))
            .to_string()
            .bright_white()
    );
    println!(
        "  {} {} of {}",
        "Files processed:".bright_cyan(),
        m.files_succeeded.to_string().bright_white(),
        m.files_total
    );
    if m.files_failed > 0 {
        println!(
            "  {} {}",
            "Files failed:".bright_red(),
            m.files_failed.to_string().bright_red().bold()
        );
        for failure in &m.failures {
            println!("    {}", failure.to_string().red());
        }
    }
    println!(
        "  {} {}",
        "Input rows:".bright_cyan(),
        m.input_row_count.to_string().bright_white()
    );
    println!(
        "  {} {} rows, {} trips",
        "Wide table:".bright_cyan(),
        m.output_row_count.to_string().bright_white().bold(),
        m.output_trip_count.to_string().bright_white().bold()
    );
    println!(
        "  {} {} (schema {}, parse {}, low count {}, i/o {})",
        "Discarded:".bright_cyan(),
        m.discarded_row_count.to_string().bright_white(),
        m.discards.schema,
        m.discards.parse_failure,
        m.discards.low_count,
        m.discards.io
    );
    if m.period_mismatch_rows > 0 {
        println!(
            "  {} {}",
            "Period mismatches:".bright_yellow(),
            m.period_mismatch_rows
        );
    }
    println!(
        "  {} {} rows, peak memory {:.1} MB",
        "Batch size:".bright_cyan(),
        m.batch_size,
        m.peak_memory_mb()
    );
    if let Some(path) = &summary.final_table {
        println!("  {} {}", "Output:".bright_cyan(), path.display());
    }
    if let Some(uri) = &summary.uploaded_to {
        println!("  {} {}", "Uploaded:".bright_cyan(), uri);
    }
    if let Some(error) = &summary.upload_error {
        println!("  {} {}", "Upload failed:".bright_red(), error);
    }
    if !m.is_conserved() {
        println!(
            "  {}",
            "Row conservation check failed".bright_red().bold()
        );
    }
    println!();
}
