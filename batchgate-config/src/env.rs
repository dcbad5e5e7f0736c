// Environment variable overrides

use crate::schema::{ConfigError, ControllerConfig};

/// Apply `BATCHGATE_*` environment overrides to a loaded configuration
///
/// Recognized variables:
/// - `BATCHGATE_QPS`, `BATCHGATE_BURST`
/// - `BATCHGATE_WAIT_FOR_PODS_READY` (bool), `BATCHGATE_PODS_READY_TIMEOUT_SECS`
/// - `BATCHGATE_MANAGE_JOBS_WITHOUT_QUEUE_NAME` (bool)
/// - `BATCHGATE_FRAMEWORKS` (comma-separated)
/// - `BATCHGATE_CYCLE_BACKOFF_MS`, `BATCHGATE_IDLE_INTERVAL_MS`,
///   `BATCHGATE_ASSUME_TTL_CYCLES`
pub fn apply_env_overrides(config: &mut ControllerConfig) -> Result<(), ConfigError> {
    if let Ok(v) = std::env::var("BATCHGATE_QPS") {
        config.client_connection.qps = parse(&v, "BATCHGATE_QPS")?;
    }
    if let Ok(v) = std::env::var("BATCHGATE_BURST") {
        config.client_connection.burst = parse(&v, "BATCHGATE_BURST")?;
    }
    if let Ok(v) = std::env::var("BATCHGATE_WAIT_FOR_PODS_READY") {
        config.wait_for_pods_ready.enable = parse_bool(&v, "BATCHGATE_WAIT_FOR_PODS_READY")?;
    }
    if let Ok(v) = std::env::var("BATCHGATE_PODS_READY_TIMEOUT_SECS") {
        config.wait_for_pods_ready.timeout_secs =
            parse(&v, "BATCHGATE_PODS_READY_TIMEOUT_SECS")?;
    }
    if let Ok(v) = std::env::var("BATCHGATE_MANAGE_JOBS_WITHOUT_QUEUE_NAME") {
        config.manage_jobs_without_queue_name =
            parse_bool(&v, "BATCHGATE_MANAGE_JOBS_WITHOUT_QUEUE_NAME")?;
    }
    if let Ok(v) = std::env::var("BATCHGATE_FRAMEWORKS") {
        config.integrations.frameworks = v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(v) = std::env::var("BATCHGATE_CYCLE_BACKOFF_MS") {
        config.scheduler.cycle_backoff_ms = parse(&v, "BATCHGATE_CYCLE_BACKOFF_MS")?;
    }
    if let Ok(v) = std::env::var("BATCHGATE_IDLE_INTERVAL_MS") {
        config.scheduler.idle_interval_ms = parse(&v, "BATCHGATE_IDLE_INTERVAL_MS")?;
    }
    if let Ok(v) = std::env::var("BATCHGATE_ASSUME_TTL_CYCLES") {
        config.scheduler.assume_ttl_cycles = parse(&v, "BATCHGATE_ASSUME_TTL_CYCLES")?;
    }
    Ok(())
}

fn parse<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidOverride {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_forms() {
        assert!(parse_bool("TRUE", "K").unwrap());
        assert!(parse_bool("on", "K").unwrap());
        assert!(!parse_bool("0", "K").unwrap());
        assert!(parse_bool("maybe", "K").is_err());
    }

    #[test]
    fn test_frameworks_override_splits_commas() {
        // Env mutation is process-global; keep it scoped to one test.
        std::env::set_var("BATCHGATE_FRAMEWORKS", "batch/job, mpi/job");
        let mut config = ControllerConfig::default();
        apply_env_overrides(&mut config).unwrap();
        std::env::remove_var("BATCHGATE_FRAMEWORKS");
        assert_eq!(config.integrations.frameworks, vec!["batch/job", "mpi/job"]);
    }
}
