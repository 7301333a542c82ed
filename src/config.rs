//! Configuration: walkthrough catalog loading, evaluation settings and
//! backend command templates.
//!
//! The walkthrough catalog is static YAML. Loading applies the single default
//! the evaluator is allowed to fill in (a trial's minimum accuracy) and
//! nothing else.

use crate::metrics::StatConfig;
use crate::runner::{ResourceTier, RunnerConfig};
use crate::walkthrough::DomainWalkthrough;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid glob pattern: {0}")]
    InvalidGlob(String),

    #[error("Invalid setting {field}: {reason}")]
    InvalidSetting { field: String, reason: String },
}

/// Evaluation settings, usually read from `eval.yaml`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvalSettings {
    /// Resource tier the model runs at
    #[serde(default)]
    pub tier: ResourceTier,
    /// Bootstrap resamples for CI
    #[serde(default = "default_bootstrap_n")]
    pub bootstrap_n: usize,
    /// Confidence level
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Random seed for the bootstrap
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Significance threshold for the Welch test
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Per-inference timeout for command backends
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_bootstrap_n() -> usize {
    2_000
}
const fn default_confidence() -> f64 {
    0.95
}
const fn default_seed() -> u64 {
    42
}
const fn default_alpha() -> f64 {
    0.05
}
const fn default_timeout_secs() -> u64 {
    300
}

impl Default for EvalSettings {
    fn default() -> Self {
        Self {
            tier: ResourceTier::default(),
            bootstrap_n: default_bootstrap_n(),
            confidence: default_confidence(),
            seed: default_seed(),
            alpha: default_alpha(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EvalSettings {
    /// Load settings from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse settings from a YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed or a value is out of range.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let settings: Self = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidSetting` naming the first bad field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| {
            Err(ConfigError::InvalidSetting {
                field: field.to_string(),
                reason: reason.to_string(),
            })
        };
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return invalid("confidence", "must be in (0, 1)");
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return invalid("alpha", "must be in (0, 1)");
        }
        if self.timeout_secs == 0 {
            return invalid("timeout_secs", "must be positive");
        }
        Ok(())
    }

    /// Statistical part of the settings
    #[must_use]
    pub const fn stat_config(&self) -> StatConfig {
        StatConfig {
            bootstrap_n: self.bootstrap_n,
            confidence: self.confidence,
            alpha: self.alpha,
            seed: self.seed,
        }
    }

    /// Runner configuration with default generation profiles
    #[must_use]
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            tier: self.tier,
            stats: self.stat_config(),
            ..RunnerConfig::default()
        }
    }
}

/// Command template for a local inference CLI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendConfig {
    /// Name of the backend
    pub name: String,
    /// CLI command to invoke
    pub command: String,
    /// Arguments template with `{prompt}`, `{max_tokens}` and `{temperature}`
    pub args_template: String,
}

impl BackendConfig {
    /// Ollama with a pulled model
    #[must_use]
    pub fn ollama(model: &str) -> Self {
        Self {
            name: format!("ollama:{model}"),
            command: "ollama".to_string(),
            args_template: format!("run {model} \"{{prompt}}\""),
        }
    }

    /// llama.cpp CLI with a local GGUF file
    #[must_use]
    pub fn llama_cpp(model_path: &str) -> Self {
        Self {
            name: "llama-cli".to_string(),
            command: "llama-cli".to_string(),
            args_template: format!(
                "-m \"{model_path}\" -n {{max_tokens}} --temp {{temperature}} --no-display-prompt -p \"{{prompt}}\""
            ),
        }
    }
}

/// Parse one walkthrough from YAML and apply defaults
///
/// # Errors
///
/// Returns an error if the YAML cannot be parsed.
pub fn walkthrough_from_yaml(yaml: &str) -> Result<DomainWalkthrough, ConfigError> {
    let mut walkthrough: DomainWalkthrough = serde_yaml::from_str(yaml)?;
    walkthrough.apply_defaults();
    Ok(walkthrough)
}

/// Load one walkthrough file and apply defaults
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_walkthrough<P: AsRef<Path>>(path: P) -> Result<DomainWalkthrough, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    walkthrough_from_yaml(&content)
}

/// Loads walkthrough catalogs from files or glob patterns
#[derive(Debug)]
pub struct WalkthroughLoader {
    walkthroughs: Vec<DomainWalkthrough>,
}

impl WalkthroughLoader {
    /// Create a new empty loader
    #[must_use]
    pub const fn new() -> Self {
        Self {
            walkthroughs: Vec::new(),
        }
    }

    /// Load walkthroughs from a glob pattern (e.g., "walkthroughs/*.yaml"),
    /// ordered by domain
    ///
    /// # Errors
    ///
    /// Returns an error if the glob pattern is invalid or a file cannot be loaded.
    pub fn load_glob(pattern: &str) -> Result<Self, ConfigError> {
        let mut loader = Self::new();

        let paths = glob::glob(pattern).map_err(|e| ConfigError::InvalidGlob(e.to_string()))?;

        for entry in paths {
            let path = entry
                .map_err(|e| ConfigError::IoError(std::io::Error::other(format!("Glob error: {e}"))))?;

            tracing::debug!(path = %path.display(), "Loading walkthrough");
            loader.walkthroughs.push(load_walkthrough(&path)?);
        }

        loader.walkthroughs.sort_by_key(|w| w.domain);
        Ok(loader)
    }

    /// Load a single walkthrough from a file path
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded.
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Ok(Self {
            walkthroughs: vec![load_walkthrough(path)?],
        })
    }

    /// Get all loaded walkthroughs
    #[must_use]
    pub fn walkthroughs(&self) -> &[DomainWalkthrough] {
        &self.walkthroughs
    }

    /// Get the number of loaded walkthroughs
    #[must_use]
    pub const fn len(&self) -> usize {
        self.walkthroughs.len()
    }

    /// Check if no walkthroughs are loaded
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.walkthroughs.is_empty()
    }

    /// Iterate over loaded walkthroughs
    pub fn iter(&self) -> impl Iterator<Item = &DomainWalkthrough> {
        self.walkthroughs.iter()
    }
}

impl Default for WalkthroughLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl IntoIterator for WalkthroughLoader {
    type Item = DomainWalkthrough;
    type IntoIter = std::vec::IntoIter<DomainWalkthrough>;

    fn into_iter(self) -> Self::IntoIter {
        self.walkthroughs.into_iter()
    }
}
