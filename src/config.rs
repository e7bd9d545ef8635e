//! Configuration management for straighten

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::transform::SolverTolerances;
use crate::warp::{OutputSize, Sampling, WarpOptions};
use crate::worker::InFlightPolicy;

/// Warp rendering configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WarpConfig {
    pub sampling: Sampling,
    /// RGBA fill for output pixels that map outside the source image
    pub background: [u8; 4],
    pub output_size: OutputSize,
    /// Sort the four points clockwise from the top-left before solving
    pub reorder_points: bool,
}

impl Default for WarpConfig {
    fn default() -> Self {
        Self {
            sampling: Sampling::Bilinear,
            background: [0, 0, 0, 0],
            output_size: OutputSize::Source,
            reorder_points: true,
        }
    }
}

impl WarpConfig {
    pub fn options(&self) -> WarpOptions {
        WarpOptions {
            sampling: self.sampling,
            background: self.background,
        }
    }
}

/// Background warp worker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// What to do when a warp is requested while another is running
    pub in_flight: InFlightPolicy,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub warp: WarpConfig,

    #[serde(default)]
    pub solver: SolverTolerances,

    #[serde(default)]
    pub worker: WorkerConfig,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory {:?}", parent))?;
            }
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }
}
