//! Configuration for the Waypoint binary
//!
//! Defaults, then an optional YAML file named by `WAYPOINT_CONFIG`, then
//! `WAYPOINT_*` environment variables.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use waypoint_core::domain::repository::memory::MemoryFlowHistoryRepository;
use waypoint_core::FlowHistoryRepository;
use waypoint_monitoring::MonitoringConfig;
use waypoint_state_file::FileFlowHistoryRepository;

/// Where flow histories are kept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    /// Process memory; lost on exit
    Memory,
    /// One directory per instance under `dir`
    File {
        /// Store root
        #[serde(default = "default_store_dir")]
        dir: PathBuf,
    },
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory
    }
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("./waypoint-data")
}

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Logging settings
    #[serde(default)]
    pub monitoring: MonitoringConfig,

    /// History store settings
    #[serde(default)]
    pub store: StoreConfig,
}

impl AppConfig {
    /// Load configuration from an optional file and the environment
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match env::var("WAYPOINT_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env(env::vars());
        Ok(config)
    }

    /// Parse a YAML configuration file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Parse YAML configuration
    pub fn from_yaml_str(raw: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Override settings from `WAYPOINT_*` variables
    pub fn apply_env<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut store_kind = None;
        let mut store_dir = None;

        for (key, value) in vars {
            match key.as_str() {
                "WAYPOINT_SERVICE_NAME" => self.monitoring.service_name = value,
                "WAYPOINT_LOG_FILTER" => self.monitoring.log_filter = value,
                "WAYPOINT_JSON_LOGS" => match value.to_lowercase().as_str() {
                    "true" | "1" => self.monitoring.json_logs = true,
                    "false" | "0" => self.monitoring.json_logs = false,
                    _ => warn!("Invalid WAYPOINT_JSON_LOGS value: {}", value),
                },
                "WAYPOINT_STORE" => store_kind = Some(value),
                "WAYPOINT_STORE_DIR" => store_dir = Some(PathBuf::from(value)),
                _ => {}
            }
        }

        match store_kind.as_deref() {
            Some("memory") => self.store = StoreConfig::Memory,
            Some("file") => {
                let dir = match &self.store {
                    StoreConfig::File { dir } => dir.clone(),
                    StoreConfig::Memory => default_store_dir(),
                };
                self.store = StoreConfig::File { dir };
            }
            Some(other) => warn!("Invalid WAYPOINT_STORE value: {}", other),
            None => {}
        }

        if let Some(new_dir) = store_dir {
            match &mut self.store {
                StoreConfig::File { dir } => *dir = new_dir,
                StoreConfig::Memory => {
                    warn!("WAYPOINT_STORE_DIR ignored: store kind is memory")
                }
            }
        }
    }

    /// Build the configured history store
    pub async fn build_repository(&self) -> anyhow::Result<Arc<dyn FlowHistoryRepository>> {
        match &self.store {
            StoreConfig::Memory => Ok(Arc::new(MemoryFlowHistoryRepository::new())),
            StoreConfig::File { dir } => {
                let repo = FileFlowHistoryRepository::open(dir)
                    .await
                    .with_context(|| format!("Failed to open store at {}", dir.display()))?;
                Ok(Arc::new(repo))
            }
        }
    }
}
