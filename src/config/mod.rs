//! Configuration management for dropmaker
//!
//! A [`Config`] is built once at startup (defaults, then an optional TOML or
//! YAML file, then command-line overrides) and passed down explicitly.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DropmakerError, Result};
use crate::processing::FilterType;

pub mod resize;
pub use resize::{FitMode, ResizeSpec};

/// Default number of concurrent jobs
pub const DEFAULT_THREADS: usize = 2;

/// Default output quality
pub const DEFAULT_QUALITY: u8 = 80;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transform and execution settings
    pub processing: ProcessingConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Transform and execution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Number of images processed concurrently
    pub threads: usize,

    /// Output quality (0-100, JPEG only)
    pub quality: u8,

    /// Output encoding
    pub format: OutputFormat,

    /// Colour transparent areas and padding are filled with
    pub background: [u8; 3],

    /// Resampling filter used for resizing
    pub filter: FilterType,

    /// Optional resize, see [`ResizeSpec`] for the grammar
    pub resize: Option<ResizeSpec>,

    /// Optional watermark image composited onto every output
    pub watermark: Option<PathBuf>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            quality: DEFAULT_QUALITY,
            format: OutputFormat::Jpeg,
            background: [255, 255, 255],
            filter: FilterType::default(),
            resize: None,
            watermark: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level for the log file (trace, debug, info, warn, error)
    pub level: String,

    /// Directory the daily log files are written to
    pub directory: PathBuf,

    /// Log file name prefix (None = no log file)
    pub file: Option<String>,

    /// Enable JSON logging in the log file
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
            directory: PathBuf::from("."),
            file: Some("dropmaker.log".to_string()),
            json_format: false,
        }
    }
}

/// Supported output formats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Jpeg,
    Png,
}

impl OutputFormat {
    /// Get file extension for this format
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }
}

/// Values given on the command line, each replacing the file value when set
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub threads: Option<usize>,
    pub quality: Option<u8>,
    pub format: Option<OutputFormat>,
    pub resize: Option<ResizeSpec>,
    pub watermark: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            DropmakerError::invalid_configuration(format!(
                "Failed to read config file {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;

        let extension = path
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        match extension.to_lowercase().as_str() {
            "toml" => toml::from_str(&content).map_err(Into::into),
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(Into::into),
            _ => Err(DropmakerError::invalid_configuration(
                "Unsupported config file format. Use .toml or .yaml",
            )),
        }
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let extension = path
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        let content = match extension.to_lowercase().as_str() {
            "toml" => toml::to_string_pretty(self)
                .map_err(|e| DropmakerError::Serde(format!("TOML serialization failed: {}", e)))?,
            "yaml" | "yml" => serde_yaml::to_string(self)?,
            _ => {
                return Err(DropmakerError::invalid_configuration(
                    "Unsupported config file format. Use .toml or .yaml",
                ))
            }
        };

        std::fs::write(&path, content).map_err(|e| {
            DropmakerError::invalid_configuration(format!(
                "Failed to write config file {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;

        Ok(())
    }

    /// Layer command-line values over the loaded configuration
    pub fn apply_overrides(&mut self, overrides: Overrides) {
        let processing = &mut self.processing;
        if let Some(threads) = overrides.threads {
            processing.threads = threads;
        }
        if let Some(quality) = overrides.quality {
            processing.quality = quality;
        }
        if let Some(format) = overrides.format {
            processing.format = format;
        }
        if overrides.resize.is_some() {
            processing.resize = overrides.resize;
        }
        if overrides.watermark.is_some() {
            processing.watermark = overrides.watermark;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.processing.threads == 0 {
            return Err(DropmakerError::invalid_configuration(
                "Thread count must be greater than 0",
            ));
        }

        if self.processing.quality > 100 {
            return Err(DropmakerError::invalid_configuration(format!(
                "Quality must be between 0 and 100, got {}",
                self.processing.quality
            )));
        }

        if let Some(watermark) = &self.processing.watermark {
            if !watermark.is_file() {
                return Err(DropmakerError::invalid_configuration(format!(
                    "Watermark {:?} does not exist",
                    watermark
                )));
            }
        }

        if self.logging.level.trim().is_empty() {
            return Err(DropmakerError::invalid_configuration("Log level must not be empty"));
        }

        Ok(())
    }
}
