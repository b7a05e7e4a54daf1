//! Configuration for the guardian agent.

use crate::tamper::RecoveryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration for the agent.
///
/// Loaded from `config.json` in the platform config directory; every field
/// has a sensible default so a missing file still yields a working agent
/// (minus the backend URL, which `start` requires).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the monitoring backend.
    pub backend_url: String,

    /// Bearer token for backend requests.
    pub api_token: Option<String>,

    /// Path for the local database and stats files.
    pub data_path: PathBuf,

    /// Collector and sync intervals.
    pub intervals: IntervalConfig,

    /// Per-request timeout for backend calls (seconds).
    pub request_timeout_secs: u64,

    /// Initial retry delay after a failed upload cycle (seconds).
    pub backoff_base_secs: u64,

    /// Maximum retry delay (seconds).
    pub backoff_cap_secs: u64,

    /// Maximum gap between usage samples still counted as continuous use
    /// (seconds).
    pub usage_gap_threshold_secs: u64,

    /// Allow apps when policy evaluation itself fails.
    pub fail_open: bool,

    /// How heightened monitoring returns to normal.
    pub recovery: RecoveryPolicy,

    /// Hide the launcher icon on startup.
    pub stealth: bool,

    /// Extra content-risk terms beyond the built-in lists.
    pub extra_risk_terms: Vec<String>,
}

/// Collection and sync periods, all in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    pub calls_secs: u64,
    pub location_secs: u64,
    pub apps_secs: u64,
    pub contacts_secs: u64,
    pub social_flush_secs: u64,
    pub sync_secs: u64,
    pub pull_secs: u64,
    pub heartbeat_secs: u64,
    pub policy_tick_secs: u64,
    pub tamper_normal_secs: u64,
    pub tamper_heightened_secs: u64,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            calls_secs: 120,
            location_secs: 300,
            apps_secs: 1800,
            contacts_secs: 3600,
            social_flush_secs: 60,
            sync_secs: 60,
            pull_secs: 120,
            heartbeat_secs: 300,
            policy_tick_secs: 2,
            tamper_normal_secs: 30,
            tamper_heightened_secs: 10,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("guardian-agent");

        Self {
            backend_url: String::new(),
            api_token: None,
            data_path: data_dir,
            intervals: IntervalConfig::default(),
            request_timeout_secs: 20,
            backoff_base_secs: 60,
            backoff_cap_secs: 900,
            usage_gap_threshold_secs: 10,
            fail_open: true,
            recovery: RecoveryPolicy::Never,
            stealth: false,
            extra_risk_terms: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: AgentConfig = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("guardian-agent")
            .join("config.json")
    }

    /// Path to the local database.
    pub fn database_path(&self) -> PathBuf {
        self.data_path.join("agent.db")
    }

    /// Path to the persisted session stats.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// A `start` run needs a backend to talk to.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend_url.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "backend_url is not set; run `guardian-agent config --backend-url <URL>`"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
