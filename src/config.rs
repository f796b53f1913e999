use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::errors::{UeirError, UeirResult};
use crate::solver::Normalization;
use crate::ueir::{Metric, Objective};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SolverConfig {
    /// Upper bound on generated candidates per solve.
    pub max_candidates: usize,
    pub parallel_evaluation: bool,
    pub normalization: Normalization,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_candidates: 32,
            parallel_evaluation: true,
            normalization: Normalization::MinMax,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PostOptimizerConfig {
    pub enable_fusion: bool,
    pub enable_precision: bool,
}

impl Default for PostOptimizerConfig {
    fn default() -> Self {
        Self {
            enable_fusion: true,
            enable_precision: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    #[default]
    Memory,
    File { path: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UeirConfig {
    pub solver: SolverConfig,
    pub post_optimizer: PostOptimizerConfig,
    pub store: StoreConfig,
    /// Bound when a request names no optimization objectives.
    pub default_objectives: Vec<Objective>,
}

impl Default for UeirConfig {
    fn default() -> Self {
        Self {
            solver: SolverConfig::default(),
            post_optimizer: PostOptimizerConfig::default(),
            store: StoreConfig::default(),
            default_objectives: vec![
                Objective::minimize(Metric::Energy),
                Objective::minimize(Metric::Cost),
                Objective::maximize(Metric::Performance),
                Objective::maximize(Metric::Safety),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Format {
    Json,
    Yaml,
}

fn format_of(path: &Path) -> Format {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => Format::Yaml,
        _ => Format::Json,
    }
}

/// Loads and saves `UeirConfig` as JSON or YAML depending on the file
/// extension.
pub struct ConfigManager {
    path: PathBuf,
}

impl ConfigManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the config, writing the defaults first if the file is absent.
    pub async fn load(&self) -> UeirResult<UeirConfig> {
        if !self.path.exists() {
            let default = UeirConfig::default();
            self.save(&default).await?;
            info!("Wrote default config to {}", self.path.display());
            return Ok(default);
        }
        let content = fs::read_to_string(&self.path)
            .await
            .map_err(|e| UeirError::Config(format!("{}: {}", self.path.display(), e)))?;
        let config = match format_of(&self.path) {
            Format::Json => serde_json::from_str(&content).map_err(|e| UeirError::Config(e.to_string()))?,
            Format::Yaml => serde_yaml::from_str(&content).map_err(|e| UeirError::Config(e.to_string()))?,
        };
        Ok(config)
    }

    pub async fn save(&self, config: &UeirConfig) -> UeirResult<()> {
        let content = match format_of(&self.path) {
            Format::Json => serde_json::to_string_pretty(config).map_err(|e| UeirError::Config(e.to_string()))?,
            Format::Yaml => serde_yaml::to_string(config).map_err(|e| UeirError::Config(e.to_string()))?,
        };
        fs::write(&self.path, content)
            .await
            .map_err(|e| UeirError::Config(format!("{}: {}", self.path.display(), e)))?;
        Ok(())
    }
}
