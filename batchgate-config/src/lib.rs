//! Controller configuration
//!
//! TOML-based configuration with environment variable overrides.
//! Loading hierarchy: env > file > defaults.

pub mod env;
pub mod load;
pub mod schema;

pub use env::apply_env_overrides;
pub use load::{load_config, load_from_file};
pub use schema::{
    ClientConnection, ConfigError, ControllerConfig, Integrations, InternalCertManagement,
    SchedulerTuning, WaitForPodsReady,
};
