//! Resize argument grammar
//!
//! ```text
//! 70%            scale both sides to 70 percent
//! crop:400x300   mode:WIDTHxHEIGHT
//! cover:512      mode:SIDE (square target)
//! 640x480        exact size, aspect ratio ignored
//! 256            exact square
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{DropmakerError, Result};

/// How an image is fitted into a target box
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMode {
    /// Pad to the box; only shrinks images larger than the box
    Contain,
    /// Scale to fit inside the box, then pad to its exact size
    ContainDown,
    /// Scale to cover the box, then crop the centre
    Crop,
    /// Scale to the box exactly, ignoring aspect ratio
    Stretch,
    /// Scale to fit inside the box, no padding
    Cover,
    /// Shrink until the shorter side reaches the box; never enlarges
    Min,
}

impl FitMode {
    /// Canonical name used in the grammar
    pub fn name(self) -> &'static str {
        match self {
            Self::Contain => "contain",
            Self::ContainDown => "contain_down",
            Self::Crop => "crop",
            Self::Stretch => "stretch",
            Self::Cover => "cover",
            Self::Min => "min",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "contain" | "cnt" => Some(Self::Contain),
            "contain_down" | "cntd" => Some(Self::ContainDown),
            "crop" => Some(Self::Crop),
            "stretch" | "sch" => Some(Self::Stretch),
            "cover" | "cvr" => Some(Self::Cover),
            "min" => Some(Self::Min),
            _ => None,
        }
    }
}

/// Parsed `--resize` argument
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResizeSpec {
    /// Scale by a percentage of the original size
    Percent(f32),
    /// Resize to exact dimensions
    Exact { width: u32, height: u32 },
    /// Fit into a box using a [`FitMode`]
    Fit { mode: FitMode, width: u32, height: u32 },
}

impl ResizeSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(DropmakerError::invalid_resize(spec, "empty value"));
        }

        if let Some(percent) = spec.strip_suffix('%') {
            let percent = parse_float(spec, percent)?;
            if percent <= 0.0 {
                return Err(DropmakerError::invalid_resize(spec, "percentage must be positive"));
            }
            return Ok(Self::Percent(percent));
        }

        if spec.contains(':') {
            let parts: Vec<&str> = spec.split(':').collect();
            if parts.len() != 2 {
                return Err(DropmakerError::invalid_resize(
                    spec,
                    "expected exactly one ':' between mode and size",
                ));
            }

            let mode = FitMode::from_name(parts[0]).ok_or_else(|| {
                DropmakerError::invalid_resize(
                    spec,
                    format!("{} is not a supported resizing mode", parts[0]),
                )
            })?;

            let (width, height) = if parts[1].contains('x') {
                let (w, h) = split_pair(spec, parts[1])?;
                (round_dimension(spec, parse_float(spec, w)?)?, round_dimension(spec, parse_float(spec, h)?)?)
            } else {
                let side = round_dimension(spec, parse_float(spec, parts[1])?)?;
                (side, side)
            };

            return Ok(Self::Fit { mode, width, height });
        }

        let (width, height) = if spec.contains('x') {
            let (w, h) = split_pair(spec, spec)?;
            (parse_dimension(spec, w)?, parse_dimension(spec, h)?)
        } else {
            let side = parse_dimension(spec, spec)?;
            (side, side)
        };

        Ok(Self::Exact { width, height })
    }
}

impl FromStr for ResizeSpec {
    type Err = DropmakerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResizeSpec {
    type Error = DropmakerError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ResizeSpec> for String {
    fn from(spec: ResizeSpec) -> Self {
        spec.to_string()
    }
}

impl fmt::Display for ResizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Percent(percent) => write!(f, "{}%", percent),
            Self::Exact { width, height } => write!(f, "{}x{}", width, height),
            Self::Fit { mode, width, height } => {
                write!(f, "{}:{}x{}", mode.name(), width, height)
            }
        }
    }
}

fn split_pair<'a>(spec: &str, value: &'a str) -> Result<(&'a str, &'a str)> {
    let mut parts = value.split('x');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(w), Some(h), None) => Ok((w, h)),
        _ => Err(DropmakerError::invalid_resize(
            spec,
            "size must be WIDTHxHEIGHT",
        )),
    }
}

fn parse_float(spec: &str, value: &str) -> Result<f32> {
    match value.trim().parse::<f32>() {
        Ok(number) if number.is_finite() => Ok(number),
        _ => Err(DropmakerError::invalid_resize(
            spec,
            format!("'{}' is not a number", value),
        )),
    }
}

fn parse_dimension(spec: &str, value: &str) -> Result<u32> {
    let dimension = value.trim().parse::<u32>().map_err(|_| {
        DropmakerError::invalid_resize(spec, format!("'{}' is not a whole number", value))
    })?;
    if dimension == 0 {
        return Err(DropmakerError::invalid_resize(spec, "dimensions must be greater than 0"));
    }
    Ok(dimension)
}

fn round_dimension(spec: &str, value: f32) -> Result<u32> {
    let rounded = value.round();
    if rounded < 1.0 || rounded > u32::MAX as f32 {
        return Err(DropmakerError::invalid_resize(spec, "dimensions must be greater than 0"));
    }
    Ok(rounded as u32)
}
