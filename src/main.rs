//! dropmaker CLI - batch image transcoder
//!
//! Converts every file in a directory to JPEG or PNG, optionally resizing
//! and watermarking it, with a fixed number of files in flight.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use serde::Serialize;
use tracing::{info, warn};

use dropmaker::logging;
use dropmaker::parallel::{FailureRecord, Tee};
use dropmaker::{
    BarReporter, BatchSummary, CancelToken, CollectingFailureSink, Config, Driver, DriverConfig,
    DropmakerError, LogFailureSink, OutputFormat, Overrides, ResizeSpec, Result,
    TransformPipeline, TranscodeTask,
};

/// Exit status when files failed and `--strict` was given
const EXIT_FILES_FAILED: i32 = 2;

/// dropmaker - batch image transcoder
#[derive(Parser)]
#[command(
    name = "dropmaker",
    version,
    about = "Batch convert, resize and watermark a directory of images",
    long_about = "dropmaker converts every file in the input directory to JPEG (or PNG), \
                  flattening transparency onto a background colour, optionally resizing and \
                  watermarking each image. Files are processed in parallel with a fixed upper \
                  bound; a file that cannot be converted is reported and skipped."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Input directory
    #[arg(short, long, value_name = "DIR")]
    input: Option<PathBuf>,

    /// Output directory (created if missing)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Watermark image, scaled to the largest centred square of each output
    #[arg(short, long, value_name = "FILE")]
    watermark: Option<PathBuf>,

    /// Resize: N%, WxH, N, or MODE:WxH with MODE one of
    /// contain, contain_down, crop, stretch, cover, min
    #[arg(short, long, value_name = "SPEC", allow_hyphen_values = true)]
    resize: Option<String>,

    /// Output quality (0-100) [default: 80]
    #[arg(short, long, value_name = "QUALITY", allow_hyphen_values = true)]
    quality: Option<i64>,

    /// Number of images processed at once [default: 2]
    #[arg(short, long, value_name = "COUNT", allow_hyphen_values = true)]
    threads: Option<i64>,

    /// Output format [default: jpeg]
    #[arg(short, long, value_enum, value_name = "FORMAT")]
    format: Option<CliOutputFormat>,

    /// Configuration file (.toml or .yaml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Show what would be processed without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Exit with status 2 when any file failed
    #[arg(long)]
    strict: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short = 'Q', long, conflicts_with = "verbose")]
    quiet: bool,
}

/// Available subcommands
#[derive(Subcommand)]
enum Commands {
    /// Generate example configuration file
    ExampleConfig {
        /// Output file path; the extension selects TOML or YAML
        #[arg(short, long, default_value = "dropmaker.toml")]
        output: PathBuf,
    },
}

/// CLI-compatible output format enum
#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliOutputFormat {
    Jpeg,
    Png,
}

impl From<CliOutputFormat> for OutputFormat {
    fn from(format: CliOutputFormat) -> Self {
        match format {
            CliOutputFormat::Jpeg => OutputFormat::Jpeg,
            CliOutputFormat::Png => OutputFormat::Png,
        }
    }
}

impl Cli {
    /// Command-line values that replace configuration file values
    fn overrides(&self) -> Result<Overrides> {
        let threads = self
            .threads
            .map(|threads| {
                usize::try_from(threads).map_err(|_| {
                    DropmakerError::invalid_configuration(format!(
                        "Thread count must be greater than 0, got {}",
                        threads
                    ))
                })
            })
            .transpose()?;

        let quality = self
            .quality
            .map(|quality| {
                u8::try_from(quality)
                    .ok()
                    .filter(|quality| *quality <= 100)
                    .ok_or_else(|| {
                        DropmakerError::invalid_configuration(format!(
                            "Quality must be between 0 and 100, got {}",
                            quality
                        ))
                    })
            })
            .transpose()?;

        let resize = self.resize.as_deref().map(ResizeSpec::parse).transpose()?;

        Ok(Overrides {
            threads,
            quality,
            format: self.format.map(Into::into),
            resize,
            watermark: self.watermark.clone(),
        })
    }
}

/// Summary plus per-file failures, as printed with `--json`
#[derive(Serialize)]
struct JsonSummary<'a> {
    #[serde(flatten)]
    summary: &'a BatchSummary,
    failures: Vec<FailureRecord>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {}", style("Error").red().bold(), e.user_message());
            1
        }
    };

    process::exit(code);
}

/// Run the CLI and return the exit status. Logging is flushed on return.
async fn run(cli: Cli) -> Result<i32> {
    if let Some(Commands::ExampleConfig { output }) = &cli.command {
        generate_example_config(output)?;
        return Ok(0);
    }

    let (input_dir, output_dir) = match (&cli.input, &cli.output) {
        (Some(input), Some(output)) => (input.clone(), output.clone()),
        _ => {
            return Err(DropmakerError::invalid_configuration(
                "Input (-i) and output (-o) directories are required, run with --help for usage",
            ))
        }
    };

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.apply_overrides(cli.overrides()?);
    config.validate()?;

    let _guard = dropmaker::init_with_config(
        &config,
        logging::console_level(cli.verbose, cli.quiet),
    )?;
    if let Some(path) = &cli.config {
        info!("Loaded configuration from: {:?}", path);
    }

    let pipeline = Arc::new(TransformPipeline::from_config(&config.processing)?);
    let driver = Driver::new(DriverConfig {
        input_dir,
        output_dir,
        pipeline,
        capacity: config.processing.threads,
        dry_run: cli.dry_run,
    });

    let tasks = driver.plan()?;
    if cli.dry_run {
        print_plan(&tasks, cli.json)?;
        return Ok(0);
    }

    let bar = Arc::new(if cli.json || cli.quiet {
        BarReporter::hidden(tasks.len() as u64)
    } else {
        BarReporter::new(tasks.len() as u64)
    });
    let collected = Arc::new(CollectingFailureSink::new());
    let failures = Arc::new(Tee::new(LogFailureSink, Arc::clone(&collected)));

    let cancel = CancelToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, finishing images already in progress");
                cancel.cancel();
            }
        })
    };

    let reporter = Arc::clone(&bar);
    let summary = tokio::task::spawn_blocking(move || driver.run(tasks, reporter, failures, cancel))
        .await
        .map_err(|e| DropmakerError::illegal_state(format!("Batch worker stopped: {}", e)))??;
    ctrl_c.abort();

    if summary.report.is_complete() {
        bar.finish();
    } else {
        bar.abandon();
    }

    let failures = collected.records();
    if cli.json {
        let json = JsonSummary {
            summary: &summary,
            failures,
        };
        let text = serde_json::to_string_pretty(&json)
            .map_err(|e| DropmakerError::Serde(format!("JSON serialization failed: {}", e)))?;
        println!("{}", text);
    } else if !cli.quiet {
        print_summary(&summary, &failures);
    }

    if cli.strict && summary.failed() > 0 {
        Ok(EXIT_FILES_FAILED)
    } else {
        Ok(0)
    }
}

/// Generate example configuration file
fn generate_example_config(output_path: &Path) -> Result<()> {
    let config = Config::default();
    config.to_file(output_path)?;

    println!(
        "{}: Generated example configuration: {}",
        style("Success").green().bold(),
        output_path.display()
    );

    Ok(())
}

/// List what a dry run would do
fn print_plan(tasks: &[TranscodeTask], json_output: bool) -> Result<()> {
    if json_output {
        let text = serde_json::to_string_pretty(tasks)
            .map_err(|e| DropmakerError::Serde(format!("JSON serialization failed: {}", e)))?;
        println!("{}", text);
        return Ok(());
    }

    println!("{} files would be processed:", style(tasks.len()).bold());
    for task in tasks {
        println!("  {} -> {}", task.source.display(), task.destination.display());
    }
    Ok(())
}

/// Print processing summary
fn print_summary(summary: &BatchSummary, failures: &[FailureRecord]) {
    let report = &summary.report;

    println!();
    println!("{}", style("Processing Summary:").bold());
    println!("  {}: {}", style("Processed").green(), summary.succeeded());
    if report.failed > 0 {
        println!("  {}: {}", style("Failed").red(), report.failed);
        for failure in failures {
            if failure.recoverable {
                println!("    {} {}", style("-").red(), failure.message);
            } else {
                println!(
                    "    {} {}: {} {}",
                    style("-").red(),
                    failure.identity,
                    failure.message,
                    style("(internal error)").dim()
                );
            }
        }
    }
    if report.abandoned > 0 {
        println!("  {}: {}", style("Not started").yellow(), report.abandoned);
    }
    println!("  {}: {:.2}s", style("Duration").blue(), report.elapsed.as_secs_f64());

    if summary.succeeded() > 0 {
        println!(
            "  {}: {:.2}MB",
            style("Written").cyan(),
            summary.bytes_written as f64 / 1024.0 / 1024.0
        );
        println!(
            "  {}: {:.1} files/sec (up to {} at once)",
            style("Speed").cyan(),
            report.jobs_per_second(),
            report.peak_in_flight
        );
    }
}
