//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::bridge::BridgeConfig;
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Project configuration file name
pub const PROJECT_CONFIG_FILE: &str = "hookscript.toml";

pub const DEFAULT_WORKER_THREADS: usize = 2;
pub const DEFAULT_THREAD_NAME: &str = "hookscript-loop";
pub const DEFAULT_EXCEPTOR_STACK_SIZE: usize = 1024 * 1024;

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. User config (~/.hookscript/config.toml) - lowest priority
/// 2. Project config (./hookscript.toml) - overrides user
/// 3. Environment variables (HOOKSCRIPT_*) - overrides project
pub struct ConfigLoader {
    /// Cached user config path
    user_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Effective bridge configuration after merging
    pub bridge: BridgeConfig,

    /// Directory where hookscript.toml was found
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            user_config_path: None,
        }
    }

    /// Use an explicit user config path instead of ~/.hookscript/config.toml
    pub fn with_user_config(path: impl Into<PathBuf>) -> Self {
        Self {
            user_config_path: Some(path.into()),
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find hookscript.toml, layers it over the
    /// user config, then applies environment overrides.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = find_project_config(start_dir)?;

        let mut bridge = self.load_user_config()?;
        bridge.merge(&project_config);
        apply_env_overrides(&mut bridge)?;
        bridge.validate()?;

        Ok(Config {
            bridge,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = BridgeConfig::load_from_file(config_path)?;

        let mut bridge = self.load_user_config()?;
        bridge.merge(&project_config);
        apply_env_overrides(&mut bridge)?;
        bridge.validate()?;

        Ok(Config {
            bridge,
            project_root: config_path.parent().map(|p| p.to_path_buf()),
        })
    }

    /// Load the user configuration; a missing file yields the defaults
    fn load_user_config(&mut self) -> ConfigResult<BridgeConfig> {
        let path = match &self.user_config_path {
            Some(path) => path.clone(),
            None => match BridgeConfig::user_config_path() {
                Ok(path) => {
                    self.user_config_path = Some(path.clone());
                    path
                }
                Err(ConfigError::HomeNotFound) => return Ok(BridgeConfig::default()),
                Err(e) => return Err(e),
            },
        };

        if !path.exists() {
            return Ok(BridgeConfig::default());
        }

        BridgeConfig::load_from_file(&path)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Find project configuration by walking up the directory tree
fn find_project_config(start_dir: &Path) -> ConfigResult<(Option<PathBuf>, BridgeConfig)> {
    let mut current = start_dir.to_path_buf();

    loop {
        let config_path = current.join(PROJECT_CONFIG_FILE);

        if config_path.exists() {
            let config = BridgeConfig::load_from_file(&config_path)?;
            return Ok((Some(current), config));
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return Ok((None, BridgeConfig::default())),
        }
    }
}

/// Apply environment variable overrides
///
/// Recognized: HOOKSCRIPT_SCHEDULING, HOOKSCRIPT_EXCEPTIONS, HOOKSCRIPT_TRAPS,
/// HOOKSCRIPT_WORKER_THREADS, HOOKSCRIPT_LOG_EVENTS
fn apply_env_overrides(config: &mut BridgeConfig) -> ConfigResult<()> {
    if let Ok(scheduling) = env::var("HOOKSCRIPT_SCHEDULING") {
        config.ffi_mut().scheduling = Some(scheduling);
    }

    if let Ok(exceptions) = env::var("HOOKSCRIPT_EXCEPTIONS") {
        config.ffi_mut().exceptions = Some(exceptions);
    }

    if let Ok(traps) = env::var("HOOKSCRIPT_TRAPS") {
        config.ffi_mut().traps = Some(traps);
    }

    if let Ok(threads) = env::var("HOOKSCRIPT_WORKER_THREADS") {
        let count = threads
            .trim()
            .parse::<usize>()
            .map_err(|_| ConfigError::InvalidValue {
                field: "HOOKSCRIPT_WORKER_THREADS".to_string(),
                reason: format!("expected a positive integer, got '{}'", threads),
            })?;
        config.scheduler_mut().worker_threads = Some(count);
    }

    if let Ok(events) = env::var("HOOKSCRIPT_LOG_EVENTS") {
        let enabled = matches!(events.to_lowercase().as_str(), "true" | "1" | "yes");
        config.logging_mut().events = Some(enabled);
    }

    Ok(())
}

impl Config {
    /// Effective scheduling behavior (default: cooperative)
    pub fn scheduling(&self) -> &str {
        self.ffi_field(|f| f.scheduling.as_deref())
            .unwrap_or("cooperative")
    }

    /// Effective exceptions behavior (default: steal)
    pub fn exceptions(&self) -> &str {
        self.ffi_field(|f| f.exceptions.as_deref())
            .unwrap_or("steal")
    }

    /// Effective code traps behavior (default: default)
    pub fn traps(&self) -> &str {
        self.ffi_field(|f| f.traps.as_deref()).unwrap_or("default")
    }

    /// Calling convention override, if any
    pub fn abi(&self) -> Option<&str> {
        self.ffi_field(|f| f.abi.as_deref())
    }

    pub fn worker_threads(&self) -> usize {
        self.bridge
            .scheduler
            .as_ref()
            .and_then(|s| s.worker_threads)
            .unwrap_or(DEFAULT_WORKER_THREADS)
    }

    pub fn thread_name(&self) -> &str {
        self.bridge
            .scheduler
            .as_ref()
            .and_then(|s| s.thread_name.as_deref())
            .unwrap_or(DEFAULT_THREAD_NAME)
    }

    pub fn exceptor_stack_size(&self) -> usize {
        self.bridge
            .exceptor
            .as_ref()
            .and_then(|e| e.stack_size)
            .unwrap_or(DEFAULT_EXCEPTOR_STACK_SIZE)
    }

    pub fn log_events(&self) -> bool {
        self.bridge
            .logging
            .as_ref()
            .and_then(|l| l.events)
            .unwrap_or(false)
    }

    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    fn ffi_field<'a>(
        &'a self,
        get: impl FnOnce(&'a crate::bridge::FfiConfig) -> Option<&'a str>,
    ) -> Option<&'a str> {
        self.bridge.ffi.as_ref().and_then(get)
    }
}
