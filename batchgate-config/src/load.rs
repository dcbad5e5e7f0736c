// Configuration loading

use crate::env::apply_env_overrides;
use crate::schema::{validate_config, ConfigError, ControllerConfig};
use std::path::Path;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_VAR: &str = "BATCHGATE_CONFIG";

/// Load configuration from file and environment variables
///
/// Loading hierarchy: env > file > defaults. The file path comes from
/// `BATCHGATE_CONFIG`; when unset or missing, defaults apply.
pub fn load_config() -> Result<ControllerConfig, ConfigError> {
    let mut config = match std::env::var(CONFIG_PATH_VAR) {
        Ok(path) if Path::new(&path).exists() => load_from_file(Path::new(&path))?,
        _ => ControllerConfig::default(),
    };

    apply_env_overrides(&mut config)?;
    validate_config(&config)?;

    Ok(config)
}

/// Load configuration from a TOML file
pub fn load_from_file(path: &Path) -> Result<ControllerConfig, ConfigError> {
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
}
