//! Batch driver: turns an input directory into executor jobs
//!
//! [`Driver::plan`] lists the files to transcode and gives each a unique
//! destination; [`Driver::run`] submits one job per planned task to a
//! [`BoundedExecutor`] and waits for the batch.

use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{DropmakerError, IoContext, Result};
use crate::parallel::{
    BoundedExecutor, CancelToken, FailureSink, Job, JobPayload, ProgressReporter, RunReport,
};
use crate::processing::TransformPipeline;

/// Everything the driver needs for one batch
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub pipeline: Arc<TransformPipeline>,
    /// Maximum number of files transcoded at once
    pub capacity: usize,
    /// Plan only, write nothing
    pub dry_run: bool,
}

/// One source file and the file it is transcoded into
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscodeTask {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl JobPayload for TranscodeTask {
    fn identity(&self) -> String {
        self.source.display().to_string()
    }

    fn label(&self) -> String {
        self.source.label()
    }
}

/// Result of a batch, as printed by the CLI
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub dry_run: bool,
    pub planned: usize,
    pub bytes_written: u64,
    #[serde(flatten)]
    pub report: RunReport,
}

impl BatchSummary {
    pub fn succeeded(&self) -> usize {
        self.report.succeeded()
    }

    pub fn failed(&self) -> usize {
        self.report.failed
    }
}

/// Plans and runs a transcode batch
#[derive(Debug)]
pub struct Driver {
    config: DriverConfig,
}

impl Driver {
    pub fn new(config: DriverConfig) -> Self {
        Self { config }
    }

    /// List the input files and assign every one a unique destination
    pub fn plan(&self) -> Result<Vec<TranscodeTask>> {
        let input_dir = &self.config.input_dir;
        if !input_dir.is_dir() {
            return Err(DropmakerError::invalid_configuration(format!(
                "Input directory {:?} does not exist or is not a directory",
                input_dir
            )));
        }

        let sources = discover_files(input_dir)?;
        let extension = self.config.pipeline.format().extension();
        let reserved = if same_directory(input_dir, &self.config.output_dir) {
            sources.iter().filter_map(|path| path.file_name()).map(OsString::from).collect()
        } else {
            HashSet::new()
        };

        let tasks = assign_outputs(&sources, &self.config.output_dir, extension, reserved);
        info!("Planned {} files from {:?}", tasks.len(), input_dir);
        Ok(tasks)
    }

    /// Transcode every task, at most `capacity` at a time.
    ///
    /// Per-file failures go to `failures` and are counted in the summary;
    /// only setup problems (bad capacity, unwritable output directory) are
    /// returned as errors.
    pub fn run(
        &self,
        tasks: Vec<TranscodeTask>,
        reporter: Arc<dyn ProgressReporter>,
        failures: Arc<dyn FailureSink>,
        cancel: CancelToken,
    ) -> Result<BatchSummary> {
        let mut summary = BatchSummary {
            input_dir: self.config.input_dir.clone(),
            output_dir: self.config.output_dir.clone(),
            dry_run: self.config.dry_run,
            planned: tasks.len(),
            bytes_written: 0,
            report: RunReport {
                capacity: self.config.capacity,
                ..RunReport::default()
            },
        };

        if self.config.dry_run {
            info!("Dry run, {} files would be transcoded", tasks.len());
            return Ok(summary);
        }

        std::fs::create_dir_all(&self.config.output_dir).writing(&self.config.output_dir)?;

        let executor = BoundedExecutor::new(self.config.capacity)?
            .with_reporter(reporter)
            .with_failure_sink(failures)
            .with_cancellation(cancel);

        let bytes_written = Arc::new(AtomicU64::new(0));
        for task in tasks {
            let pipeline = Arc::clone(&self.config.pipeline);
            let bytes = Arc::clone(&bytes_written);
            executor.submit(Job::new(task, move |task: &TranscodeTask| {
                let result = pipeline.transcode_file(&task.source, &task.destination)?;
                bytes.fetch_add(result.bytes_written, Ordering::Relaxed);
                Ok(())
            }))?;
        }

        summary.report = executor.run_all()?;
        summary.bytes_written = bytes_written.load(Ordering::Relaxed);

        if summary.report.failed > 0 {
            warn!(
                "{} of {} files failed",
                summary.report.failed, summary.report.submitted
            );
        }

        Ok(summary)
    }
}

/// Regular files directly inside `dir`, sorted by name.
///
/// Symlinks are followed; a link whose target cannot be read is skipped
/// with a warning.
pub fn discover_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) if e.depth() > 0 => {
                warn!("Skipping {:?}: {}", e.path().unwrap_or(dir), e);
                continue;
            }
            Err(e) => {
                return Err(match e.into_io_error() {
                    Some(io) => DropmakerError::Io(io),
                    None => DropmakerError::invalid_configuration(format!(
                        "Could not list input directory {:?}",
                        dir
                    )),
                })
            }
        };

        if entry.file_type().is_file() {
            files.push(entry.into_path());
        } else {
            debug!("Skipping non-file entry {:?}", entry.path());
        }
    }

    Ok(files)
}

/// Give each source `<stem>.<extension>` in `output_dir`, appending `-1`,
/// `-2`, ... to the stem when that name is already taken or `reserved`.
///
/// A source may keep its own name, so transcoding in place is allowed.
pub fn assign_outputs(
    sources: &[PathBuf],
    output_dir: &Path,
    extension: &str,
    reserved: HashSet<OsString>,
) -> Vec<TranscodeTask> {
    let mut claimed: HashSet<OsString> = HashSet::with_capacity(sources.len());

    sources
        .iter()
        .map(|source| {
            let stem = source
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image".to_string());
            let own_name = source.file_name();

            let mut attempt = 0usize;
            let name = loop {
                let candidate = if attempt == 0 {
                    OsString::from(format!("{}.{}", stem, extension))
                } else {
                    OsString::from(format!("{}-{}.{}", stem, attempt, extension))
                };

                let taken = claimed.contains(&candidate)
                    || (reserved.contains(&candidate) && own_name != Some(candidate.as_os_str()));
                if !taken {
                    break candidate;
                }
                attempt += 1;
            };

            if attempt > 0 {
                debug!("Output for {:?} renamed to {:?} to avoid a collision", source, name);
            }

            claimed.insert(name.clone());
            TranscodeTask {
                source: source.clone(),
                destination: output_dir.join(name),
            }
        })
        .collect()
}

fn same_directory(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
