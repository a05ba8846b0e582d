//! Engine Configuration
//!
//! Settings shared by the orchestrator and the CLI. Values come from the
//! process environment, optionally seeded from a `.env` file:
//!
//! | Variable                          | Default                   |
//! |-----------------------------------|---------------------------|
//! | `SELLERFLOW_CONSENSUS_THRESHOLD`  | `0.7`                     |
//! | `SELLERFLOW_CHECKPOINT_DIR`       | `.sellerflow/checkpoints` |
//! | `SELLERFLOW_TEMPLATES`            | built-in templates only   |

use std::env;
use std::path::PathBuf;

use log::{debug, warn};

use crate::coordination::consensus::DEFAULT_CONSENSUS_THRESHOLD;
use crate::storage::file::DEFAULT_CHECKPOINT_DIR;

pub const ENV_CONSENSUS_THRESHOLD: &str = "SELLERFLOW_CONSENSUS_THRESHOLD";
pub const ENV_CHECKPOINT_DIR: &str = "SELLERFLOW_CHECKPOINT_DIR";
pub const ENV_TEMPLATES: &str = "SELLERFLOW_TEMPLATES";

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Winning share required for consensus, in `[0, 1]`
    pub consensus_threshold: f64,

    /// Directory of the file checkpoint store
    pub checkpoint_dir: PathBuf,

    /// Extra template file loaded on top of the built-in templates
    pub templates_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            consensus_threshold: DEFAULT_CONSENSUS_THRESHOLD,
            checkpoint_dir: PathBuf::from(DEFAULT_CHECKPOINT_DIR),
            templates_path: None,
        }
    }
}

impl EngineConfig {
    /// Reads the configuration from the environment, loading `.env` first
    /// if one exists.
    pub fn from_env() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("Loaded environment from {}", path.display());
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup. Invalid
    /// values are reported and replaced by their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_CONSENSUS_THRESHOLD) {
            match raw.trim().parse::<f64>() {
                Ok(value) if (0.0..=1.0).contains(&value) => config.consensus_threshold = value,
                _ => warn!(
                    "Ignoring {}={:?}: expected a number between 0 and 1",
                    ENV_CONSENSUS_THRESHOLD, raw
                ),
            }
        }

        if let Some(dir) = lookup(ENV_CHECKPOINT_DIR).filter(|d| !d.trim().is_empty()) {
            config.checkpoint_dir = PathBuf::from(dir);
        }

        if let Some(path) = lookup(ENV_TEMPLATES).filter(|p| !p.trim().is_empty()) {
            config.templates_path = Some(PathBuf::from(path));
        }

        config
    }

    pub fn with_consensus_threshold(mut self, threshold: f64) -> Self {
        self.consensus_threshold = threshold;
        self
    }

    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    pub fn with_templates_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.templates_path = Some(path.into());
        self
    }
}
