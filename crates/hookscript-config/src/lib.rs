//! Hookscript Configuration System
//!
//! Provides configuration management for the hookscript native bridge:
//! - Bridge configuration (hookscript.toml)
//! - User configuration (~/.hookscript/config.toml)
//! - Configuration precedence and merging
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. User config (~/.hookscript/config.toml)
//! 2. Project config (./hookscript.toml, searched upwards)
//! 3. Environment variables (HOOKSCRIPT_*)
//! 4. Explicit options passed by the embedder
//!
//! # Example
//!
//! ```no_run
//! use hookscript_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("scheduling: {}", config.scheduling());
//! ```

pub mod bridge;
pub mod loader;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

pub use bridge::{BridgeConfig, ExceptorConfig, FfiConfig, LoggingConfig, SchedulerConfig};
pub use loader::{Config, ConfigLoader};
