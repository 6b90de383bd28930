//! Hookscript Runtime - native bridge for an embedded scripting engine
//!
//! This library connects script code to native code:
//! - Type descriptors, call interfaces and value marshaling (`ffi`)
//! - Outbound native function objects and inbound callback trampolines
//! - Engine scopes, cooperative scheduling and teardown (`script`)
//! - Timers, weak references, message sinks and wait-for-event
//! - Native fault capture for exception-stealing calls (`exceptor`)

/// Hookscript runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod bindings;
pub mod config;
pub mod engine;
pub mod eventlog;
pub mod exceptor;
pub mod ffi;
pub mod host;
pub mod scheduler;
pub mod script;
pub mod value;

// Re-export commonly used types
pub use bindings::{call_binding, is_binding};
pub use config::CoreOptions;
pub use engine::{JobQueueRuntime, ScriptRuntime, ThreadState};
pub use eventlog::{BridgeEvent, EventEntry, EventLogger, MemoryEventLogger, NullEventLogger};
pub use exceptor::{platform_exceptor, ExceptionKind, Exceptor, MemoryOperation, NativeException, UnguardedExceptor};
pub use ffi::{
    CallDescriptor, CallOptions, CodeTraps, ExceptionBehavior, Int64, NativeCallback, NativeFunction, NativePointer,
    ReturnShape, Scheduling, UInt64,
};
pub use host::{CodeTracer, Interceptor, InvocationState, MessageEmitter, NullCodeTracer, NullInterceptor};
pub use scheduler::ScriptScheduler;
pub use script::{Core, CoreBuilder, FlushNotify, Scope, SuspendedScope};
pub use value::{ByteBuffer, Function, ObjectRef, ScriptError, Value, ValueArray};
