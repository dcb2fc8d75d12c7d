use clap::Parser;
use trip_pivot::cli::{args::Args, commands};
use std::process;

fn main() {
    let args = Args::parse();

    // No subcommand: show help and exit
    if args.command.is_none() {
        show_help_and_commands();
        process::exit(0);
    }

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to create async runtime: {}", e);
        process::exit(1);
    });

    let result = runtime.block_on(async {
        tokio::select! {
            result = commands::run(args) => result.map(|_| ()),
            signal = tokio::signal::ctrl_c() => {
                eprintln!("\nReceived CTRL+C, shutting down...");
                let reason = match signal {
                    Ok(()) => "Processing interrupted by user".to_string(),
                    Err(e) => format!("signal handler failed: {}", e),
                };
                Err(trip_pivot::PivotError::Interrupted { reason }.into())
            }
        }
    });

    // Dropping the runtime waits for blocking workers; don't wait on Ctrl-C
    runtime.shutdown_background();

    if let Err(error) = result {
        eprintln!("Error: {:#}", error);
        process::exit(1);
    }
}

/// Show help information and available commands when no subcommand is provided
fn show_help_and_commands() {
    println!("Trip Pivot - hourly pickup counts from trip-record Parquet files");
    println!("================================================================");
    println!();
    println!("USAGE:");
    println!("    trip-pivot <COMMAND> [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    process     Aggregate trip files into the wide table");
    println!("    help        Show this help message or help for specific commands");
    println!();
    println!("EXAMPLES:");
    println!("    # Aggregate a local directory with 4 workers:");
    println!("    trip-pivot process --input-dir data/ --output-dir out/ --workers 4");
    println!();
    println!("    # Read from S3, write a LaTeX report:");
    println!("    trip-pivot process --input-dir s3://bucket/trips --output-dir out/ \\");
    println!("                       --report out/report.tex");
    println!();
    println!("For detailed help, use:");
    println!("    trip-pivot process --help");
}
