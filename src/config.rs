//! Configuration management for the complaint classification service

use crate::auth::HashedCredential;
use crate::models::identifier::{ModelIdentifier, Stage, VersionSelector};
use anyhow::{anyhow, bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default configuration file, overridable with `COMPLAINTS_CONFIG`
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub security: SecurityConfig,
    pub model: ModelConfig,
    pub data: DataConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject serving the predict endpoint
    #[serde(default = "default_predict_subject")]
    pub predict_subject: String,
    /// Subjects serving the model management endpoint
    #[serde(default = "default_manage_subjects")]
    pub manage_subjects: Vec<String>,
}

fn default_predict_subject() -> String {
    "complaints.predict".to_string()
}

fn default_manage_subjects() -> Vec<String> {
    vec![
        "complaints.model.manage".to_string(),
        "complaints.model_update".to_string(),
    ]
}

/// API credential configuration
///
/// Either the SHA-256 digest or the plaintext key (hashed at startup) must be set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub api_key_hash: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl SecurityConfig {
    /// Resolve the stored credential digest
    pub fn credential(&self) -> Result<HashedCredential> {
        if let Some(hash) = self.api_key_hash.as_deref().filter(|h| !h.is_empty()) {
            return HashedCredential::from_hex(hash).context("Invalid security.api_key_hash");
        }
        match self.api_key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => Ok(HashedCredential::from_secret(key)),
            None => bail!("Either security.api_key_hash or security.api_key must be configured"),
        }
    }
}

/// Model registry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Registry scheme used in model URIs
    #[serde(default = "default_registry")]
    pub registry: String,
    /// Directory holding `<model-name>/<version>/` artifacts
    pub registry_dir: PathBuf,
    /// Registered model name
    pub model_name: String,
    /// Stage served at startup and on "reload latest"
    #[serde(default = "default_stage")]
    pub stage: String,
    /// Intra-op threads for ONNX artifacts
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
}

fn default_registry() -> String {
    "models".to_string()
}

fn default_stage() -> String {
    "production".to_string()
}

fn default_onnx_threads() -> usize {
    1
}

impl ModelConfig {
    /// Parsed serving stage
    pub fn serving_stage(&self) -> Result<Stage> {
        self.stage
            .parse()
            .map_err(|e: String| anyhow!("Invalid model.stage: {}", e))
    }

    /// Identifier of the model served at startup
    pub fn startup_identifier(&self) -> Result<ModelIdentifier> {
        Ok(ModelIdentifier::new(
            &self.registry,
            &self.model_name,
            VersionSelector::Stage(self.serving_stage()?),
        ))
    }
}

/// Data paths
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// Reference (training) corpus with `narrative` and `product` columns
    pub reference_path: PathBuf,
    /// Durable prediction log
    pub log_path: PathBuf,
}

/// Statistical test for numerical features
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriftMethodKind {
    /// Population Stability Index over equal-width bins
    #[default]
    Psi,
    /// Two-sample Kolmogorov-Smirnov statistic
    Ks,
}

/// Which records form the current window of a drift run
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WindowSource {
    /// Read back the tail of the durable log after the flush
    #[default]
    Log,
    /// Use the batch that was just flushed
    Batch,
}

/// Drift monitoring configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Buffered records that trigger a flush
    pub buffer_size: usize,
    /// Vocabulary bound of the feature vectorizer
    pub max_features: usize,
    pub method: DriftMethodKind,
    /// Histogram bins for PSI
    pub psi_bins: usize,
    /// Per-feature drift threshold for numerical features
    pub drift_threshold: f64,
    /// PSI threshold for the predicted category distribution
    pub categorical_threshold: f64,
    /// Share of drifted features that flags dataset drift
    pub drift_share: f64,
    pub window: WindowSource,
    /// Maximum log rows read back for the current window
    pub window_rows: usize,
    /// Root directory of published drift reports
    pub report_dir: PathBuf,
    /// Delay before the single retry of a failed log write
    pub flush_retry_delay_ms: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            buffer_size: 3,
            max_features: 100,
            method: DriftMethodKind::Psi,
            psi_bins: 10,
            drift_threshold: 0.2,
            categorical_threshold: 0.2,
            drift_share: 0.5,
            window: WindowSource::Log,
            window_rows: 500,
            report_dir: PathBuf::from("reports/data_drift_reports"),
            flush_retry_delay_ms: 200,
        }
    }
}

/// Request handling configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum concurrently handled requests
    pub workers: usize,
    /// Interval of the periodic metrics summary
    pub metrics_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            metrics_interval_secs: 60,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default file plus `COMPLAINTS__*` environment overrides
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("COMPLAINTS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("COMPLAINTS")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.monitoring.buffer_size == 0 {
            bail!("monitoring.buffer_size must be at least 1");
        }
        if self.monitoring.psi_bins == 0 {
            bail!("monitoring.psi_bins must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.monitoring.drift_share) {
            bail!("monitoring.drift_share must be within [0, 1]");
        }
        if self.pipeline.workers == 0 {
            bail!("pipeline.workers must be at least 1");
        }
        self.model.serving_stage()?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                predict_subject: default_predict_subject(),
                manage_subjects: default_manage_subjects(),
            },
            security: SecurityConfig::default(),
            model: ModelConfig {
                registry: default_registry(),
                registry_dir: PathBuf::from("registry"),
                model_name: "CustomerComplaintsModel".to_string(),
                stage: default_stage(),
                onnx_threads: default_onnx_threads(),
            },
            data: DataConfig {
                reference_path: PathBuf::from("data/complaints_processed.csv"),
                log_path: PathBuf::from("data/prediction_log.csv"),
            },
            monitoring: MonitoringConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
