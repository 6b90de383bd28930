//! Bridge Configuration (hookscript.toml)
//!
//! The same schema is used for the per-user file and the project file.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Smallest stack the fault guard accepts for running guarded native calls.
pub const MIN_EXCEPTOR_STACK_SIZE: usize = 64 * 1024;

/// Bridge configuration from hookscript.toml or ~/.hookscript/config.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Default behavior of native function objects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffi: Option<FfiConfig>,

    /// Scheduler thread pool settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerConfig>,

    /// Native fault guard settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exceptor: Option<ExceptorConfig>,

    /// Diagnostic event logging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Default call options for native functions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct FfiConfig {
    /// "cooperative" or "exclusive"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<String>,

    /// "steal" or "propagate"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exceptions: Option<String>,

    /// "default" or "all"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traps: Option<String>,

    /// Calling convention name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abi: Option<String>,
}

/// Scheduler settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Number of loop worker threads (default: 2)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_threads: Option<usize>,

    /// Name given to loop threads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_name: Option<String>,
}

/// Fault guard settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ExceptorConfig {
    /// Size in bytes of the stack guarded calls run on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_size: Option<usize>,
}

/// Event log settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Record bridge events in memory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<bool>,
}

impl BridgeConfig {
    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(ffi) = &self.ffi {
            if let Some(scheduling) = &ffi.scheduling {
                validate_choice("ffi.scheduling", scheduling, &["cooperative", "exclusive"])?;
            }
            if let Some(exceptions) = &ffi.exceptions {
                validate_choice("ffi.exceptions", exceptions, &["steal", "propagate"])?;
            }
            if let Some(traps) = &ffi.traps {
                validate_choice("ffi.traps", traps, &["default", "all"])?;
            }
            if let Some(abi) = &ffi.abi {
                if abi.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "ffi.abi".to_string(),
                        reason: "must not be empty".to_string(),
                    });
                }
            }
        }

        if let Some(scheduler) = &self.scheduler {
            if scheduler.worker_threads == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "scheduler.worker_threads".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }

        if let Some(exceptor) = &self.exceptor {
            if let Some(size) = exceptor.stack_size {
                if size < MIN_EXCEPTOR_STACK_SIZE {
                    return Err(ConfigError::InvalidValue {
                        field: "exceptor.stack_size".to_string(),
                        reason: format!(
                            "must be at least {} bytes, got {}",
                            MIN_EXCEPTOR_STACK_SIZE, size
                        ),
                    });
                }
            }
        }

        Ok(())
    }

    /// Get the user config file path (~/.hookscript/config.toml)
    pub fn user_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".hookscript").join("config.toml"))
    }

    /// Merge another config into this one.
    /// Set fields in `other` take precedence.
    pub fn merge(&mut self, other: &BridgeConfig) {
        if let Some(theirs) = &other.ffi {
            let ours = self.ffi.get_or_insert_with(Default::default);
            merge_field(&mut ours.scheduling, &theirs.scheduling);
            merge_field(&mut ours.exceptions, &theirs.exceptions);
            merge_field(&mut ours.traps, &theirs.traps);
            merge_field(&mut ours.abi, &theirs.abi);
        }
        if let Some(theirs) = &other.scheduler {
            let ours = self.scheduler.get_or_insert_with(Default::default);
            merge_field(&mut ours.worker_threads, &theirs.worker_threads);
            merge_field(&mut ours.thread_name, &theirs.thread_name);
        }
        if let Some(theirs) = &other.exceptor {
            let ours = self.exceptor.get_or_insert_with(Default::default);
            merge_field(&mut ours.stack_size, &theirs.stack_size);
        }
        if let Some(theirs) = &other.logging {
            let ours = self.logging.get_or_insert_with(Default::default);
            merge_field(&mut ours.events, &theirs.events);
        }
    }

    pub fn ffi_mut(&mut self) -> &mut FfiConfig {
        self.ffi.get_or_insert_with(Default::default)
    }

    pub fn scheduler_mut(&mut self) -> &mut SchedulerConfig {
        self.scheduler.get_or_insert_with(Default::default)
    }

    pub fn logging_mut(&mut self) -> &mut LoggingConfig {
        self.logging.get_or_insert_with(Default::default)
    }
}

fn merge_field<T: Clone>(ours: &mut Option<T>, theirs: &Option<T>) {
    if theirs.is_some() {
        ours.clone_from(theirs);
    }
}

/// Validate an enumerated string value
pub(crate) fn validate_choice(field: &str, value: &str, allowed: &[&str]) -> ConfigResult<()> {
    if !allowed.contains(&value) {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("must be one of {}, got '{}'", allowed.join(", "), value),
        });
    }
    Ok(())
}
