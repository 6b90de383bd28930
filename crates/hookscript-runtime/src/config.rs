//! Engine instance options
//!
//! Built-in defaults, or derived from a loaded `hookscript-config` [`Config`].

use crate::ffi::caller::{CallOptions, CodeTraps, ExceptionBehavior, Scheduling};
use crate::ffi::types::resolve_abi;
use crate::value::ScriptError;
use hookscript_config::loader::{DEFAULT_EXCEPTOR_STACK_SIZE, DEFAULT_THREAD_NAME, DEFAULT_WORKER_THREADS};
use hookscript_config::Config;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreOptions {
    /// Options for native functions constructed without any
    pub call_defaults: CallOptions,
    pub worker_threads: usize,
    pub thread_name: String,
    /// Size of each guarded stack used for exception-stealing calls
    pub exceptor_stack_size: usize,
    /// Keep bridge events in memory instead of discarding them
    pub log_events: bool,
}

impl Default for CoreOptions {
    fn default() -> Self {
        CoreOptions {
            call_defaults: CallOptions::default(),
            worker_threads: DEFAULT_WORKER_THREADS,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            exceptor_stack_size: DEFAULT_EXCEPTOR_STACK_SIZE,
            log_events: false,
        }
    }
}

impl CoreOptions {
    pub fn from_config(config: &Config) -> Result<Self, ScriptError> {
        let abi = config.abi().map(str::to_string);
        // Reject an unknown ABI now rather than at the first native function.
        resolve_abi(abi.as_deref())?;

        Ok(CoreOptions {
            call_defaults: CallOptions {
                abi,
                scheduling: Scheduling::parse(config.scheduling())?,
                exceptions: ExceptionBehavior::parse(config.exceptions())?,
                traps: CodeTraps::parse(config.traps())?,
            },
            worker_threads: config.worker_threads(),
            thread_name: config.thread_name().to_string(),
            exceptor_stack_size: config.exceptor_stack_size(),
            log_events: config.log_events(),
        })
    }
}
