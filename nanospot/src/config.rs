//! Tunable settings for a detection run.

use crate::core_modules::overlay::{EdgeMode, OverlayStyle};
use crate::core_modules::proximity::DEFAULT_TRACK_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Configuration for the measurement pipeline, allowing for tunable behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MeasurementConfig {
    /// Matching radius, in pixels, for frame-to-frame spot tracking.
    pub track_threshold: f64,
    /// How region boundaries are drawn on overlays.
    pub edge_mode: EdgeMode,
    /// Integer magnification of the label font.
    pub label_font_scale: u32,
    /// Analysis-image pixels strictly above this value count as foreground.
    pub foreground_cutoff: u8,
    /// Worker count for the parallel pipeline; `None` means one per CPU.
    pub workers: Option<usize>,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            track_threshold: DEFAULT_TRACK_THRESHOLD,
            edge_mode: EdgeMode::Boundary,
            label_font_scale: 1,
            foreground_cutoff: 0,
            workers: None,
        }
    }
}

impl MeasurementConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn overlay_style(&self) -> OverlayStyle {
        OverlayStyle {
            edge_mode: self.edge_mode,
            font_scale: self.label_font_scale.max(1),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(num_cpus::get).max(1)
    }
}
