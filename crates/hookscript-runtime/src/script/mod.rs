//! Engine instance: the single owner of shared bridge state
//!
//! A [`Core`] holds the reentrant engine lock, the pin count, the current
//! scope's queues and the tables (timers, weak references, sinks, module
//! data) that script-visible services mutate. Every entry into the engine
//! goes through a [`Scope`]; nothing else touches the lock.

mod events;
mod scope;
mod sinks;
mod timers;
mod weak_ref;

pub use events::FlushNotify;
pub use scope::{Scope, SuspendedScope};

use crate::config::CoreOptions;
use crate::engine::{JobQueueRuntime, ScriptRuntime};
use crate::eventlog::{BridgeEvent, EventLogger, MemoryEventLogger, NullEventLogger};
use crate::exceptor::{platform_exceptor, Exceptor};
use crate::ffi::caller::CallOptions;
use crate::host::{CodeTracer, Interceptor, MessageEmitter, NullCodeTracer, NullInterceptor};
use crate::scheduler::ScriptScheduler;
use crate::value::Function;
use events::EventState;
use parking_lot::lock_api::RawReentrantMutex;
use parking_lot::{Condvar, Mutex, RawMutex, RawThreadId};
use scope::ScopeState;
use std::any::Any;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use timers::TimerSource;
use weak_ref::WeakRefEntry;

/// Shared value stored in the module data table
pub type ModuleData = Arc<dyn Any + Send + Sync>;

/// One script engine instance
pub struct Core {
    self_ref: Weak<Core>,

    lock: RawReentrantMutex<RawMutex, RawThreadId>,
    state: Mutex<ScopeState>,
    usage_count: AtomicUsize,

    events: Mutex<EventState>,
    event_cond: Condvar,

    scheduled: Mutex<HashMap<u32, Arc<TimerSource>>>,
    next_timer_id: AtomicU32,
    weak_refs: Mutex<HashMap<u32, WeakRefEntry>>,
    next_weak_ref_id: AtomicU32,
    exception_sink: Mutex<Option<Function>>,
    message_sink: Mutex<Option<Function>>,
    module_data: Mutex<HashMap<String, ModuleData>>,

    runtime: Arc<dyn ScriptRuntime>,
    interceptor: Arc<dyn Interceptor>,
    tracer: Arc<dyn CodeTracer>,
    exceptor: Arc<dyn Exceptor>,
    scheduler: ScriptScheduler,
    emitter: Option<MessageEmitter>,
    logger: Arc<dyn EventLogger>,
    call_defaults: CallOptions,
}

/// Builder for [`Core`]
pub struct CoreBuilder {
    options: CoreOptions,
    runtime: Option<Arc<dyn ScriptRuntime>>,
    interceptor: Option<Arc<dyn Interceptor>>,
    tracer: Option<Arc<dyn CodeTracer>>,
    exceptor: Option<Arc<dyn Exceptor>>,
    emitter: Option<MessageEmitter>,
    logger: Option<Arc<dyn EventLogger>>,
}

impl CoreBuilder {
    pub fn new(options: CoreOptions) -> Self {
        CoreBuilder {
            options,
            runtime: None,
            interceptor: None,
            tracer: None,
            exceptor: None,
            emitter: None,
            logger: None,
        }
    }

    pub fn runtime(mut self, runtime: Arc<dyn ScriptRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn tracer(mut self, tracer: Arc<dyn CodeTracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn exceptor(mut self, exceptor: Arc<dyn Exceptor>) -> Self {
        self.exceptor = Some(exceptor);
        self
    }

    pub fn emitter(mut self, emitter: MessageEmitter) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn EventLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Start the scheduler and assemble the instance
    pub fn build(self) -> io::Result<Arc<Core>> {
        let options = self.options;
        let scheduler = ScriptScheduler::new(options.worker_threads, &options.thread_name)?;
        let logger = self.logger.unwrap_or_else(|| {
            if options.log_events {
                Arc::new(MemoryEventLogger::new())
            } else {
                Arc::new(NullEventLogger)
            }
        });

        Ok(Arc::new_cyclic(|self_ref| Core {
            self_ref: self_ref.clone(),
            lock: RawReentrantMutex::INIT,
            state: Mutex::new(ScopeState::default()),
            usage_count: AtomicUsize::new(0),
            events: Mutex::new(EventState::new()),
            event_cond: Condvar::new(),
            scheduled: Mutex::new(HashMap::new()),
            next_timer_id: AtomicU32::new(1),
            weak_refs: Mutex::new(HashMap::new()),
            next_weak_ref_id: AtomicU32::new(1),
            exception_sink: Mutex::new(None),
            message_sink: Mutex::new(None),
            module_data: Mutex::new(HashMap::new()),
            runtime: self
                .runtime
                .unwrap_or_else(|| Arc::new(JobQueueRuntime::new())),
            interceptor: self.interceptor.unwrap_or_else(|| Arc::new(NullInterceptor)),
            tracer: self.tracer.unwrap_or_else(|| Arc::new(NullCodeTracer)),
            exceptor: self
                .exceptor
                .unwrap_or_else(|| platform_exceptor(options.exceptor_stack_size)),
            scheduler,
            emitter: self.emitter,
            logger,
            call_defaults: options.call_defaults,
        }))
    }
}

impl Core {
    pub fn builder(options: CoreOptions) -> CoreBuilder {
        CoreBuilder::new(options)
    }

    /// Instance with default options and collaborators
    pub fn new() -> io::Result<Arc<Core>> {
        CoreBuilder::new(CoreOptions::default()).build()
    }

    /// Enter the engine from the current thread
    pub fn enter(&self) -> Scope<'_> {
        Scope::enter(self)
    }

    pub fn downgrade(&self) -> Weak<Core> {
        self.self_ref.clone()
    }

    /// Hold a reference that defers teardown
    pub fn pin(&self) {
        self.usage_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Release a pin; an unbalanced unpin leaves the count at zero
    pub fn unpin(&self) {
        let _ = self
            .usage_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| count.checked_sub(1));
    }

    /// Outstanding pins, including one per live scope
    pub fn usage_count(&self) -> usize {
        self.usage_count.load(Ordering::SeqCst)
    }

    /// Current scope nesting depth as seen by the lock holder
    pub fn depth(&self) -> usize {
        self.state.lock().depth
    }

    pub fn store_module_data(&self, key: impl Into<String>, value: ModuleData) {
        self.module_data.lock().insert(key.into(), value);
    }

    pub fn load_module_data<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.module_data.lock().get(key).cloned()?;
        value.downcast::<T>().ok()
    }

    /// Run `job` on the scheduler's blocking pool
    pub fn push_job<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.scheduler.push_job(job);
    }

    /// Emit a message to the host
    ///
    /// Pending interception changes are committed first so the host never
    /// observes a message before the instrumentation it announces.
    pub fn send(&self, message: &str, data: Option<&[u8]>) {
        self.interceptor.end_transaction();
        self.interceptor.begin_transaction();

        if let Some(emitter) = &self.emitter {
            emitter(message, data);
        }
        self.logger.log(BridgeEvent::MessageSent {
            length: message.len(),
            has_data: data.is_some(),
        });
    }

    pub fn runtime(&self) -> &Arc<dyn ScriptRuntime> {
        &self.runtime
    }

    pub fn interceptor(&self) -> &Arc<dyn Interceptor> {
        &self.interceptor
    }

    pub fn tracer(&self) -> &Arc<dyn CodeTracer> {
        &self.tracer
    }

    pub fn exceptor(&self) -> &Arc<dyn Exceptor> {
        &self.exceptor
    }

    pub fn scheduler(&self) -> &ScriptScheduler {
        &self.scheduler
    }

    pub fn logger(&self) -> &Arc<dyn EventLogger> {
        &self.logger
    }

    /// Call options used when a native function is built without any
    pub fn call_defaults(&self) -> &CallOptions {
        &self.call_defaults
    }
}
