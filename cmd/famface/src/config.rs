//! Configuration management for the famface CLI.
//!
//! Configuration is stored in ~/.famface/config.yaml. Every field has a
//! default, so a missing or partial file is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use famface_catalog::DEFAULT_SUGGESTIONS;
use famface_cluster::{Method, Metric, StabilizeConfig};
use famface_pipeline::PipelineConfig;

/// Default base configuration directory name.
pub const DEFAULT_BASE_DIR: &str = ".famface";
/// Default configuration filename.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// CLI configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where committed catalog generations live.
    pub data_dir: PathBuf,

    /// Directory scanned for photos.
    pub photos_dir: PathBuf,

    pub clustering: ClusteringConfig,

    pub stabilize: StabilizeConfig,

    /// Default number of name suggestions.
    pub suggest_limit: usize,

    /// How long a mutation waits for a running commit before giving up.
    pub commit_wait_ms: u64,

    /// Committed generations kept on disk.
    pub keep_generations: usize,

    pub oracle: OracleConfig,

    /// Path to the config file (not serialized).
    #[serde(skip)]
    config_path: PathBuf,
}

/// Clustering settings in flat form.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub method: MethodName,
    /// DBSCAN neighbor radius.
    pub eps: f32,
    pub min_samples: usize,
    /// HDBSCAN only.
    pub min_cluster_size: usize,
    pub metric: Metric,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodName {
    #[default]
    Dbscan,
    Hdbscan,
}

/// External face detector and embedder.
///
/// `command` is invoked as `<command...> detect <photo>` and
/// `<command...> embed <photo> <top> <right> <bottom> <left>`; see
/// [`crate::oracle`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            method: MethodName::Dbscan,
            eps: 0.5,
            min_samples: 2,
            min_cluster_size: 2,
            metric: Metric::Euclidean,
        }
    }
}

impl ClusteringConfig {
    pub fn to_cluster_config(&self) -> famface_cluster::Config {
        let method = match self.method {
            MethodName::Dbscan => Method::Dbscan {
                eps: self.eps,
                min_samples: self.min_samples,
            },
            MethodName::Hdbscan => Method::Hdbscan {
                min_cluster_size: self.min_cluster_size,
                min_samples: self.min_samples,
                allow_single_cluster: false,
            },
        };
        famface_cluster::Config {
            method,
            metric: self.metric,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let base = Config::default_config_dir().unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_DIR));
        Self {
            data_dir: base.join("data"),
            photos_dir: base.join("photos"),
            clustering: ClusteringConfig::default(),
            stabilize: StabilizeConfig::default(),
            suggest_limit: DEFAULT_SUGGESTIONS,
            commit_wait_ms: 5000,
            keep_generations: 2,
            oracle: OracleConfig::default(),
            config_path: PathBuf::new(),
        }
    }
}

impl Config {
    /// Gets the default config directory.
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DEFAULT_BASE_DIR))
    }

    /// Gets the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        Self::default_config_dir().map(|dir| dir.join(DEFAULT_CONFIG_FILE))
    }

    /// Returns the config file path.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    pub fn commit_wait(&self) -> Duration {
        Duration::from_millis(self.commit_wait_ms)
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            clustering: self.clustering.to_cluster_config(),
            stabilize: self.stabilize,
        }
    }
}

/// Loads configuration, writing a default file if none exists yet.
pub fn load_config(custom_path: Option<&Path>) -> anyhow::Result<Config> {
    let config_path = match custom_path {
        Some(p) => p.to_path_buf(),
        None => Config::default_config_path()
            .ok_or_else(|| anyhow::anyhow!("cannot determine config path"))?,
    };

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut cfg = if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        if content.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(&content)?
        }
    } else {
        let cfg = Config::default();
        std::fs::write(&config_path, serde_yaml::to_string(&cfg)?)?;
        cfg
    };

    cfg.config_path = config_path;
    Ok(cfg)
}
