//! dropmaker - batch image transcoder
//!
//! Every file in an input directory is decoded, flattened onto a background
//! colour, optionally resized and watermarked, and written to an output
//! directory as JPEG or PNG. Files are processed independently on a
//! [`BoundedExecutor`] that never runs more than a configured number of them
//! at once; a file that fails is logged and counted without stopping the rest.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dropmaker::{
//!     CancelToken, CollectingFailureSink, CountingReporter, Driver, DriverConfig,
//!     OutputFormat, TransformPipeline,
//! };
//!
//! let driver = Driver::new(DriverConfig {
//!     input_dir: "photos".into(),
//!     output_dir: "drop".into(),
//!     pipeline: Arc::new(TransformPipeline::new(OutputFormat::Jpeg, 80)),
//!     capacity: 4,
//!     dry_run: false,
//! });
//!
//! let tasks = driver.plan()?;
//! let summary = driver.run(
//!     tasks,
//!     Arc::new(CountingReporter::new()),
//!     Arc::new(CollectingFailureSink::new()),
//!     CancelToken::new(),
//! )?;
//! println!("{} written, {} failed", summary.succeeded(), summary.failed());
//! # Ok::<(), dropmaker::DropmakerError>(())
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod driver;
pub mod error;
pub mod logging;
pub mod parallel;
pub mod processing;

// Re-export commonly used types
pub use config::{Config, FitMode, OutputFormat, Overrides, ResizeSpec};
pub use driver::{BatchSummary, Driver, DriverConfig, TranscodeTask};
pub use error::{DropmakerError, Result};
pub use logging::LoggingGuard;
pub use parallel::{
    BarReporter, BoundedExecutor, CancelToken, CollectingFailureSink, CountingReporter,
    FailureSink, Job, JobPayload, LogFailureSink, ProgressReporter, RunReport,
};
pub use processing::TransformPipeline;

use tracing::{info, warn};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install logging for `config` and report the environment.
///
/// The returned guard must be held until the program exits.
pub fn init_with_config(config: &Config, console_level: &str) -> Result<LoggingGuard> {
    let guard = logging::init(&config.logging, console_level)?;
    info!("dropmaker v{} initialized", VERSION);

    check_thread_count(config.processing.threads);

    Ok(guard)
}

fn check_thread_count(threads: usize) {
    let cpus = num_cpus::get();
    info!("Detected {} CPU cores, running up to {} jobs at once", cpus, threads);

    if threads > cpus * 4 {
        warn!(
            "{} threads is far more than the {} available cores; images are decoded in memory, \
             so a high count mostly costs RAM",
            threads, cpus
        );
    }
}
