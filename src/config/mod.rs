//! Governor configuration: JSON file plus environment overrides.
//!
//! ```rust,no_run
//! use tollgate::config::GovernorConfig;
//!
//! # fn example() -> Result<(), tollgate::config::ConfigError> {
//! let config = GovernorConfig::load("tollgate.json")?.with_env();
//! # Ok(())
//! # }
//! ```

mod env;
mod settings;

pub use env::{
    ENV_BASE_URL, ENV_IDLE_TIMEOUT_SECS, ENV_MAX_COMPLETION_TOKENS, ENV_MODEL, EnvOverrides,
};
pub use settings::{DEFAULT_API_KEY_ENV, DEFAULT_MODEL, GovernorConfig, default_store_path};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
