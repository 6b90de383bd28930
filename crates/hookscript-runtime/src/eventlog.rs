//! Bridge event logging
//!
//! Structured, in-memory record of what the bridge did on behalf of a script:
//! descriptors compiled, trampolines allocated, faults stolen, timers and weak
//! references coming and going, teardown progress.

use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Bridge event types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BridgeEvent {
    /// A call descriptor was compiled
    DescriptorBuilt {
        arguments: usize,
        variadic: bool,
    },
    /// A transient descriptor was compiled for an oversized variadic call
    DescriptorExtended { declared: usize, supplied: usize },
    /// A native callback trampoline was allocated
    CallbackCreated { address: usize },
    /// A native callback trampoline was released
    CallbackDestroyed { address: usize },
    /// A hardware fault inside a native call was converted to a script error
    NativeExceptionStolen { target: usize, description: String },
    /// An uncaught script error reached the unhandled-exception sink
    UnhandledException { message: String, delivered: bool },
    /// A timer or idle callback was registered
    TimerScheduled { id: u32, delay_ms: u64, repeat: bool },
    /// A timer or idle callback was cancelled by id
    TimerCancelled { id: u32 },
    /// A weak reference was bound to a heap value
    WeakRefBound { id: u32 },
    /// A weak reference callback fired
    WeakRefCleared { id: u32 },
    /// A weak reference was removed without firing
    WeakRefUnbound { id: u32 },
    /// Teardown was requested
    FlushRequested { pins: usize },
    /// Teardown finished
    FlushCompleted,
    /// The host delivered a message to the script
    MessagePosted { length: usize, delivered: bool },
    /// The script emitted a message to the host
    MessageSent { length: usize, has_data: bool },
}

impl fmt::Display for BridgeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeEvent::DescriptorBuilt {
                arguments,
                variadic,
            } => {
                let kind = if *variadic { "variadic" } else { "fixed" };
                write!(f, "Compiled {} call interface with {} arguments", kind, arguments)
            }
            BridgeEvent::DescriptorExtended { declared, supplied } => write!(
                f,
                "Extended variadic call interface from {} to {} arguments",
                declared, supplied
            ),
            BridgeEvent::CallbackCreated { address } => {
                write!(f, "Allocated native callback at {:#x}", address)
            }
            BridgeEvent::CallbackDestroyed { address } => {
                write!(f, "Released native callback at {:#x}", address)
            }
            BridgeEvent::NativeExceptionStolen {
                target,
                description,
            } => write!(
                f,
                "Native exception in call to {:#x}: {}",
                target, description
            ),
            BridgeEvent::UnhandledException { message, delivered } => {
                let status = if *delivered { "delivered" } else { "dropped" };
                write!(f, "Unhandled exception ({}): {}", status, message)
            }
            BridgeEvent::TimerScheduled {
                id,
                delay_ms,
                repeat,
            } => {
                let kind = if *repeat { "interval" } else { "timeout" };
                write!(f, "Scheduled {} #{} after {}ms", kind, id, delay_ms)
            }
            BridgeEvent::TimerCancelled { id } => write!(f, "Cancelled timer #{}", id),
            BridgeEvent::WeakRefBound { id } => write!(f, "Bound weak reference #{}", id),
            BridgeEvent::WeakRefCleared { id } => write!(f, "Cleared weak reference #{}", id),
            BridgeEvent::WeakRefUnbound { id } => write!(f, "Unbound weak reference #{}", id),
            BridgeEvent::FlushRequested { pins } => {
                write!(f, "Flush requested with {} pins outstanding", pins)
            }
            BridgeEvent::FlushCompleted => write!(f, "Flush completed"),
            BridgeEvent::MessagePosted { length, delivered } => {
                let status = if *delivered { "delivered" } else { "dropped" };
                write!(f, "Incoming message of {} bytes {}", length, status)
            }
            BridgeEvent::MessageSent { length, has_data } => {
                if *has_data {
                    write!(f, "Sent message of {} bytes with data", length)
                } else {
                    write!(f, "Sent message of {} bytes", length)
                }
            }
        }
    }
}

/// Event log entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventEntry {
    /// Unix timestamp in milliseconds
    pub timestamp: u64,
    pub event: BridgeEvent,
}

impl EventEntry {
    /// Create a new entry stamped with the current time
    pub fn new(event: BridgeEvent) -> Self {
        Self {
            timestamp: current_timestamp_ms(),
            event,
        }
    }

    /// Format as log line
    pub fn to_log_line(&self) -> String {
        format!("[{}] {}", format_timestamp(self.timestamp), self.event)
    }

    /// Format as a single JSON object
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.to_log_line())
    }
}

fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn format_timestamp(timestamp_ms: u64) -> String {
    format!("{}+{:03}ms", timestamp_ms / 1000, timestamp_ms % 1000)
}

/// Logger trait for pluggable event sinks
pub trait EventLogger: Send + Sync {
    /// Record an event
    fn log(&self, event: BridgeEvent);

    /// All recorded entries
    fn entries(&self) -> Vec<EventEntry>;

    /// Drop all recorded entries
    fn clear(&self);
}

/// In-memory event logger
#[derive(Debug, Clone, Default)]
pub struct MemoryEventLogger {
    entries: Arc<Mutex<Vec<EventEntry>>>,
}

impl MemoryEventLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries whose event matches the predicate
    pub fn matching(&self, predicate: impl Fn(&BridgeEvent) -> bool) -> Vec<EventEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| predicate(&entry.event))
            .cloned()
            .collect()
    }
}

impl EventLogger for MemoryEventLogger {
    fn log(&self, event: BridgeEvent) {
        self.entries.lock().push(EventEntry::new(event));
    }

    fn entries(&self) -> Vec<EventEntry> {
        self.entries.lock().clone()
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Logger that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventLogger;

impl EventLogger for NullEventLogger {
    fn log(&self, _event: BridgeEvent) {}

    fn entries(&self) -> Vec<EventEntry> {
        Vec::new()
    }

    fn clear(&self) {}
}
