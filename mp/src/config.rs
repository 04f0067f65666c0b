//! Meal planner configuration types and loading

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::domain::OutputFormat;
use crate::quantity::Portion;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Portion table and scaling
    pub quantities: QuantitiesConfig,

    /// Capability timeouts, retries and fan-out limits
    pub pipeline: PipelineConfig,

    /// Delivery backends
    pub delivery: DeliveryConfig,

    /// Where sessions and event logs are written
    pub storage: StorageConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidates() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    ///
    /// Errors are swallowed; the full load reports them once logging is up.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let paths: Vec<PathBuf> = match config_path {
            Some(path) => vec![path.clone()],
            None => Self::candidates(),
        };
        paths
            .into_iter()
            .filter(|p| p.exists())
            .find_map(|p| fs::read_to_string(p).ok())
            .and_then(|content| serde_yaml::from_str::<Self>(&content).ok())
            .and_then(|config| config.log_level)
    }

    /// Project-local `.mealplan.yml`, then `<config_dir>/mealplan/mealplan.yml`
    fn candidates() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".mealplan.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("mealplan").join("mealplan.yml"));
        }
        paths
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Portion table configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantitiesConfig {
    /// Servings a base recipe is written for unless the recipe says otherwise
    #[serde(rename = "reference-servings")]
    pub reference_servings: u32,

    /// Child portion as a fraction of the adult portion
    #[serde(rename = "child-ratio")]
    pub child_ratio: f64,

    /// Portion used for unknown dish categories
    #[serde(rename = "fallback-category")]
    pub fallback_category: Portion,

    /// Category overrides and additions
    pub categories: HashMap<String, Portion>,
}

impl Default for QuantitiesConfig {
    fn default() -> Self {
        Self {
            reference_servings: 4,
            child_ratio: 0.6,
            fallback_category: Portion::new(1.0),
            categories: HashMap::new(),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Timeout for one capability call in milliseconds
    #[serde(rename = "capability-timeout-ms")]
    pub capability_timeout_ms: u64,

    /// Maximum retries for retryable capability errors
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// First retry delay; doubles on each retry
    #[serde(rename = "initial-backoff-ms")]
    pub initial_backoff_ms: u64,

    /// Maximum dish resolutions in flight per run
    #[serde(rename = "max-concurrent-resolutions")]
    pub max_concurrent_resolutions: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capability_timeout_ms: 60_000,
            max_retries: 2,
            initial_backoff_ms: 1000,
            max_concurrent_resolutions: 8,
        }
    }
}

/// Delivery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Output format -> webhook URL for HTTP-bridged formats
    pub webhooks: BTreeMap<OutputFormat, String>,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            webhooks: BTreeMap::new(),
            timeout_ms: 30_000,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for session JSON snapshots
    #[serde(rename = "sessions-dir")]
    pub sessions_dir: PathBuf,

    /// Directory for per-session JSONL event logs
    #[serde(rename = "events-dir")]
    pub events_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // XDG data directory (~/.local/share/mealplan on Linux)
        let base = dirs::data_local_dir()
            .map(|d| d.join("mealplan"))
            .unwrap_or_else(|| PathBuf::from(".mealplan"));

        Self {
            sessions_dir: base.join("sessions"),
            events_dir: base.join("events"),
        }
    }
}
