mod panel;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use panelkit_core::IntervalCalculator;
use serde::Serialize;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Dashboard panel data loader.
#[derive(Parser)]
#[command(name = "panelkit", version, about = "Dashboard panel data loader")]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the sampling interval for a time range and viewport width
    Interval {
        /// Width of the time range in milliseconds
        #[arg(long)]
        range_ms: i64,
        /// Pixel width of the rendering surface
        #[arg(long)]
        width: i64,
        /// Organization scrape interval in seconds (default: 15)
        #[arg(long)]
        scrape_interval: Option<u64>,
    },

    /// Print the executable form of every sub-query without running it
    Substitute {
        /// Path to the panel config TOML file
        #[arg(long)]
        config: PathBuf,
    },

    /// Load the panel's data and print the published state
    Fetch {
        /// Path to the panel config TOML file
        #[arg(long)]
        config: PathBuf,
        /// Echo the executable requests instead of calling the service
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Interval {
            range_ms,
            width,
            scrape_interval,
        } => {
            cmd_interval(range_ms, width, scrape_interval, cli.output);
        }
        Commands::Substitute { config } => {
            panel::cmd_substitute(&config, cli.output, cli.quiet);
        }
        Commands::Fetch { config, dry_run } => {
            panel::cmd_fetch(&config, dry_run, cli.output, cli.quiet);
        }
    }
}

/// Log to stderr so stdout stays machine-readable. `RUST_LOG` overrides
/// the default `warn` level.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::WARN.into())
        .from_env_lossy();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Serialize)]
struct IntervalReport {
    interval: String,
    interval_ms: u64,
    rate_interval: String,
}

fn cmd_interval(range_ms: i64, width: i64, scrape_interval: Option<u64>, output: OutputFormat) {
    let result = IntervalCalculator::new(scrape_interval).compute(range_ms, width);
    let report = IntervalReport {
        interval: result.interval.to_string(),
        interval_ms: result.interval_millis,
        rate_interval: result.rate_interval(),
    };

    match output {
        OutputFormat::Text => {
            println!("interval:      {}", report.interval);
            println!("interval_ms:   {}", report.interval_ms);
            println!("rate_interval: {}", report.rate_interval);
        }
        OutputFormat::Json => print_json(&report),
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) {
    let pretty = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"serialization error: {}\"}}", e));
    println!("{}", pretty);
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}

/// Report `msg` and exit with status 1.
pub(crate) fn fail(msg: &str, output: OutputFormat, quiet: bool) -> ! {
    report_error(msg, output, quiet);
    process::exit(1);
}
