//! Shared fixtures for bridge integration tests
//!
//! Recording collaborators, native functions to call, and instance builders.

#![allow(dead_code)]

use hookscript_runtime::{
    CodeTracer, Core, CoreOptions, Interceptor, InvocationState, MemoryEventLogger, NativePointer, Value,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Interceptor that records every call it receives
#[derive(Default)]
pub struct RecordingInterceptor {
    pub calls: Mutex<Vec<&'static str>>,
    pub context: Mutex<Option<Value>>,
}

impl RecordingInterceptor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|c| **c == name).count()
    }

    /// Make `obtain_invocation_context` hand out `context`
    pub fn set_context(&self, context: Value) {
        *self.context.lock() = Some(context);
    }

    fn record(&self, name: &'static str) {
        self.calls.lock().push(name);
    }
}

impl Interceptor for RecordingInterceptor {
    fn begin_transaction(&self) {
        self.record("begin_transaction");
    }

    fn end_transaction(&self) {
        self.record("end_transaction");
    }

    fn save_state(&self) -> InvocationState {
        self.record("save_state");
        InvocationState(Box::new(()))
    }

    fn restore_state(&self, _state: InvocationState) {
        self.record("restore_state");
    }

    fn ignore_current_thread(&self) {
        self.record("ignore_current_thread");
    }

    fn unignore_current_thread(&self) {
        self.record("unignore_current_thread");
    }

    fn obtain_invocation_context(&self) -> Option<Value> {
        self.record("obtain_invocation_context");
        self.context.lock().clone()
    }

    fn release_invocation_context(&self, _context: Value) {
        self.record("release_invocation_context");
    }
}

/// Tracer that records activations
#[derive(Default)]
pub struct RecordingTracer {
    pub events: Mutex<Vec<String>>,
}

impl RecordingTracer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl CodeTracer for RecordingTracer {
    fn activate(&self, target: NativePointer) {
        self.events.lock().push(format!("activate {}", target));
    }

    fn deactivate(&self) {
        self.events.lock().push("deactivate".to_string());
    }

    fn process_pending(&self) {}
}

/// Instance with recording collaborators and an in-memory event log
pub struct Harness {
    pub core: Arc<Core>,
    pub interceptor: Arc<RecordingInterceptor>,
    pub tracer: Arc<RecordingTracer>,
    pub logger: Arc<MemoryEventLogger>,
}

pub fn harness() -> Harness {
    harness_with(CoreOptions::default())
}

pub fn harness_with(options: CoreOptions) -> Harness {
    let interceptor = RecordingInterceptor::new();
    let tracer = RecordingTracer::new();
    let logger = Arc::new(MemoryEventLogger::new());
    let core = Core::builder(options)
        .interceptor(interceptor.clone())
        .tracer(tracer.clone())
        .logger(logger.clone())
        .build()
        .expect("scheduler should start");
    Harness {
        core,
        interceptor,
        tracer,
        logger,
    }
}

pub fn names(list: &[&str]) -> Vec<Value> {
    list.iter().map(|n| Value::string(n)).collect()
}

pub fn address_of(f: usize) -> NativePointer {
    NativePointer::new(f)
}

// ===== Native functions under test =====

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pair {
    pub tag: u8,
    pub value: f64,
}

pub extern "C" fn add_i32(a: i32, b: i32) -> i32 {
    a.wrapping_add(b)
}

pub extern "C" fn add_u64(a: u64, b: u64) -> u64 {
    a.wrapping_add(b)
}

pub extern "C" fn scale_double(v: f64, factor: f32) -> f64 {
    v * f64::from(factor)
}

pub extern "C" fn pair_sum(pair: Pair) -> f64 {
    f64::from(pair.tag) + pair.value
}

pub extern "C" fn make_pair(tag: u8, value: f64) -> Pair {
    Pair { tag, value }
}

pub extern "C" fn identity_ptr(p: *mut u8) -> *mut u8 {
    p
}

pub extern "C" fn read_byte(p: *const u8) -> u8 {
    // SAFETY: callers pass a readable address or deliberately fault.
    unsafe { p.read_volatile() }
}

pub extern "C" fn apply_callback(cb: extern "C" fn(i32) -> i32, v: i32) -> i32 {
    cb(v)
}
