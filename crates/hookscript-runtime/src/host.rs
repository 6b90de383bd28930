//! Host collaborators consumed by the bridge
//!
//! The interception and code-tracing subsystems live outside this crate. The
//! bridge only needs the narrow contracts below; the `Null*` types are the
//! defaults when a host provides neither.

use crate::ffi::pointer::NativePointer;
use crate::value::Value;
use std::any::Any;
use std::sync::Arc;

/// Opaque interception state captured before an exception-stealing call
pub struct InvocationState(pub Box<dyn Any + Send>);

/// Interception subsystem
pub trait Interceptor: Send + Sync {
    /// Open a bracket that coalesces instrumentation changes
    fn begin_transaction(&self);

    /// Close the innermost bracket, committing pending changes
    fn end_transaction(&self);

    fn save_state(&self) -> InvocationState;

    fn restore_state(&self, state: InvocationState);

    fn ignore_current_thread(&self);

    fn unignore_current_thread(&self);

    /// The invocation context of the hook the current thread is inside, if any
    fn obtain_invocation_context(&self) -> Option<Value>;

    fn release_invocation_context(&self, context: Value);
}

/// Code-tracing subsystem
pub trait CodeTracer: Send + Sync {
    /// Start following the current thread into `target`
    fn activate(&self, target: NativePointer);

    fn deactivate(&self);

    /// Run work deferred until no scope is held
    fn process_pending(&self);
}

/// Interceptor that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullInterceptor;

impl Interceptor for NullInterceptor {
    fn begin_transaction(&self) {}

    fn end_transaction(&self) {}

    fn save_state(&self) -> InvocationState {
        InvocationState(Box::new(()))
    }

    fn restore_state(&self, _state: InvocationState) {}

    fn ignore_current_thread(&self) {}

    fn unignore_current_thread(&self) {}

    fn obtain_invocation_context(&self) -> Option<Value> {
        None
    }

    fn release_invocation_context(&self, _context: Value) {}
}

/// Tracer that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCodeTracer;

impl CodeTracer for NullCodeTracer {
    fn activate(&self, _target: NativePointer) {}

    fn deactivate(&self) {}

    fn process_pending(&self) {}
}

/// Outbound script-to-host channel: a UTF-8 message and optional bytes
pub type MessageEmitter = Arc<dyn Fn(&str, Option<&[u8]>) + Send + Sync>;
