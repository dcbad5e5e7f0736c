// Configuration schema and types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from loading or validating configuration
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// File given but unreadable
    #[error("io error: {0}")]
    Io(String),
    /// TOML syntax or shape error
    #[error("parse error: {0}")]
    Parse(String),
    /// Values fail the semantic checks
    #[error("validation error: {0}")]
    Validation(String),
    /// Environment override could not be interpreted
    #[error("invalid override {key}={value}")]
    InvalidOverride { key: String, value: String },
}

/// Top-level controller configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    #[serde(default)]
    pub client_connection: ClientConnection,
    #[serde(default)]
    pub wait_for_pods_ready: WaitForPodsReady,
    #[serde(default)]
    pub manage_jobs_without_queue_name: bool,
    #[serde(default)]
    pub integrations: Integrations,
    #[serde(default)]
    pub internal_cert_management: InternalCertManagement,
    #[serde(default)]
    pub scheduler: SchedulerTuning,
}

/// Rate of traffic toward the object store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConnection {
    #[serde(default = "default_qps")]
    pub qps: f32,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_qps() -> f32 {
    20.0
}

fn default_burst() -> u32 {
    30
}

impl Default for ClientConnection {
    fn default() -> Self {
        Self {
            qps: default_qps(),
            burst: default_burst(),
        }
    }
}

/// Gate successor admissions on prior admissions reaching PodsReady
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitForPodsReady {
    #[serde(default)]
    pub enable: bool,
    /// Admitted workloads not ready within this horizon are evicted
    #[serde(default = "default_pods_ready_timeout")]
    pub timeout_secs: u64,
}

fn default_pods_ready_timeout() -> u64 {
    300
}

impl Default for WaitForPodsReady {
    fn default() -> Self {
        Self {
            enable: false,
            timeout_secs: default_pods_ready_timeout(),
        }
    }
}

/// Enabled job-framework adapters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integrations {
    #[serde(default = "default_frameworks")]
    pub frameworks: Vec<String>,
}

fn default_frameworks() -> Vec<String> {
    vec!["batch/job".to_string()]
}

impl Default for Integrations {
    fn default() -> Self {
        Self {
            frameworks: default_frameworks(),
        }
    }
}

/// Whether the controller manages its own serving certificates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalCertManagement {
    #[serde(default = "default_true")]
    pub enable: bool,
}

fn default_true() -> bool {
    true
}

impl Default for InternalCertManagement {
    fn default() -> Self {
        Self {
            enable: default_true(),
        }
    }
}

/// Scheduler cycle cadence and assume horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerTuning {
    /// Minimum gap between cycles
    #[serde(default = "default_cycle_backoff_ms")]
    pub cycle_backoff_ms: u64,
    /// Maximum idle gap before a cycle runs anyway
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    /// Cycles an assumed admission survives without being observed
    #[serde(default = "default_assume_ttl_cycles")]
    pub assume_ttl_cycles: u32,
}

fn default_cycle_backoff_ms() -> u64 {
    100
}

fn default_idle_interval_ms() -> u64 {
    5_000
}

fn default_assume_ttl_cycles() -> u32 {
    5
}

impl Default for SchedulerTuning {
    fn default() -> Self {
        Self {
            cycle_backoff_ms: default_cycle_backoff_ms(),
            idle_interval_ms: default_idle_interval_ms(),
            assume_ttl_cycles: default_assume_ttl_cycles(),
        }
    }
}

/// Semantic checks applied after loading
pub fn validate_config(config: &ControllerConfig) -> Result<(), ConfigError> {
    if config.client_connection.qps <= 0.0 {
        return Err(ConfigError::Validation(
            "client_connection.qps must be positive".to_string(),
        ));
    }
    if config.client_connection.burst == 0 {
        return Err(ConfigError::Validation(
            "client_connection.burst must be positive".to_string(),
        ));
    }
    if config.scheduler.assume_ttl_cycles == 0 {
        return Err(ConfigError::Validation(
            "scheduler.assume_ttl_cycles must be at least 1".to_string(),
        ));
    }
    if config.scheduler.idle_interval_ms < config.scheduler.cycle_backoff_ms {
        return Err(ConfigError::Validation(
            "scheduler.idle_interval_ms must not be below cycle_backoff_ms".to_string(),
        ));
    }
    if config.integrations.frameworks.is_empty() {
        return Err(ConfigError::Validation(
            "integrations.frameworks must name at least one adapter".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ControllerConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.client_connection.qps, 20.0);
        assert_eq!(config.scheduler.assume_ttl_cycles, 5);
        assert_eq!(config.integrations.frameworks, vec!["batch/job"]);
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let mut config = ControllerConfig::default();
        config.scheduler.assume_ttl_cycles = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_idle_below_backoff_rejected() {
        let mut config = ControllerConfig::default();
        config.scheduler.idle_interval_ms = 10;
        config.scheduler.cycle_backoff_ms = 100;
        assert!(validate_config(&config).is_err());
    }
}
