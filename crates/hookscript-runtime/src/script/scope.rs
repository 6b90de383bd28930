//! Engine scopes
//!
//! Holding a [`Scope`] means holding the engine lock on this thread. Scopes
//! nest; only the outermost one enters the script runtime and owns the tick
//! and source queues, and leaving any scope drains pending work first.

use super::events::FlushNotify;
use super::timers::TimerSource;
use super::Core;
use crate::engine::ThreadState;
use crate::value::{Function, ScriptError, Value};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

/// Work queued by the outermost scope, drained before it is released
#[derive(Default)]
pub(crate) struct ScopeQueues {
    ticks: Mutex<VecDeque<Function>>,
    sources: Mutex<VecDeque<Arc<TimerSource>>>,
}

impl ScopeQueues {
    pub(crate) fn push_tick(&self, func: Function) {
        self.ticks.lock().push_back(func);
    }

    pub(crate) fn push_source(&self, source: Arc<TimerSource>) {
        self.sources.lock().push_back(source);
    }

    fn pop_tick(&self) -> Option<Function> {
        self.ticks.lock().pop_front()
    }

    fn pop_source(&self) -> Option<Arc<TimerSource>> {
        self.sources.lock().pop_front()
    }
}

#[derive(Default)]
pub(crate) struct ScopeState {
    pub(crate) depth: usize,
    pub(crate) current: Option<Arc<ScopeQueues>>,
    pub(crate) flush_notify: Option<FlushNotify>,
}

/// Exclusive access to the engine from the current thread
pub struct Scope<'a> {
    core: &'a Core,
    queues: Arc<ScopeQueues>,
    _not_send: PhantomData<*const ()>,
}

impl<'a> Scope<'a> {
    pub(crate) fn enter(core: &'a Core) -> Self {
        core.lock.lock();
        core.interceptor.begin_transaction();
        core.pin();

        let queues = Arc::new(ScopeQueues::default());
        let outermost = {
            let mut state = core.state.lock();
            state.depth += 1;
            if state.depth == 1 {
                state.current = Some(queues.clone());
                true
            } else {
                false
            }
        };
        if outermost {
            core.runtime.enter();
        }

        Scope {
            core,
            queues,
            _not_send: PhantomData,
        }
    }

    pub fn core(&self) -> &'a Core {
        self.core
    }

    /// Call a script function, reporting a thrown error to the unhandled sink
    pub fn call(&self, func: &Function, this: &Value, args: &[Value]) -> Result<Value, ScriptError> {
        func.call(this, args).map_err(|error| {
            self.core.report_unhandled(&error);
            error
        })
    }

    /// Queue `func` to run before the outermost scope is released
    pub fn next_tick(&self, func: Function) {
        self.current_queues().push_tick(func);
    }

    pub(crate) fn current_queues(&self) -> Arc<ScopeQueues> {
        self.core
            .state
            .lock()
            .current
            .clone()
            .unwrap_or_else(|| self.queues.clone())
    }

    /// Drain engine jobs, tick callbacks and unattached sources
    ///
    /// Loops until a full pass finds nothing to do, so work queued by the
    /// drained callbacks runs here too. Returns whether anything ran.
    pub fn perform_pending_io(&self) -> bool {
        self.drain(&self.queues)
    }

    /// Drain the outermost scope's queues from any nesting level
    pub(crate) fn perform_current_pending_io(&self) -> bool {
        let queues = self.current_queues();
        self.drain(&queues)
    }

    fn drain(&self, queues: &ScopeQueues) -> bool {
        let core = self.core;
        let mut performed_any = false;

        loop {
            let mut performed = false;

            while let Some(result) = core.runtime.execute_pending_job() {
                if let Err(error) = result {
                    core.report_unhandled(&error);
                }
            }

            loop {
                let tick = queues.pop_tick();
                let Some(tick) = tick else { break };
                let _ = self.call(&tick, &Value::Undefined, &[]);
                performed = true;
            }

            loop {
                let source = queues.pop_source();
                let Some(source) = source else { break };
                source.attach(core);
                performed = true;
            }

            if !performed {
                break;
            }
            performed_any = true;
        }

        performed_any
    }

    /// Release the engine lock for a blocking stretch
    ///
    /// Every nesting level is unlocked so other threads can enter; the
    /// returned guard restores them, and the runtime's thread state, when it
    /// is resumed or dropped. The guard borrows the scope, so the scope
    /// cannot be left while it is suspended:
    ///
    /// ```compile_fail
    /// let core = hookscript_runtime::Core::new().unwrap();
    /// let scope = core.enter();
    /// let suspended = scope.suspend();
    /// drop(scope);
    /// suspended.resume();
    /// ```
    #[must_use = "the engine stays unlocked until the guard is resumed or dropped"]
    pub fn suspend(&self) -> SuspendedScope<'_> {
        let core = self.core;
        core.interceptor.end_transaction();
        let thread_state = core.runtime.suspend();

        let (current, depth) = {
            let mut state = core.state.lock();
            (state.current.take(), std::mem::take(&mut state.depth))
        };
        for _ in 0..depth {
            // SAFETY: this thread entered `depth` times and still holds them.
            unsafe { core.lock.unlock() };
        }

        SuspendedScope {
            core,
            saved: Some(SavedScope {
                thread_state,
                current,
                depth,
            }),
        }
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        let core = self.core;

        // Leaving an outer scope while an inner one is suspended would
        // unlock a lock this thread no longer holds.
        assert!(
            core.state.lock().depth > 0,
            "scope left while the engine is suspended on this thread"
        );

        self.perform_pending_io();

        let outermost = core.state.lock().depth == 1;
        if outermost {
            core.runtime.leave();
        }

        let notify = {
            let mut state = core.state.lock();
            if outermost {
                state.current = None;
            }
            state.depth -= 1;
            core.unpin();
            if state.flush_notify.is_some() && core.usage_count() == 0 {
                state.flush_notify.take()
            } else {
                None
            }
        };

        core.interceptor.end_transaction();
        // SAFETY: paired with the lock taken in `enter`.
        unsafe { core.lock.unlock() };

        if let Some(notify) = notify {
            core.scheduler.spawn(async move { notify() });
        }

        core.tracer.process_pending();
    }
}

struct SavedScope {
    thread_state: ThreadState,
    current: Option<Arc<ScopeQueues>>,
    depth: usize,
}

/// A scope whose lock is temporarily released
pub struct SuspendedScope<'a> {
    core: &'a Core,
    saved: Option<SavedScope>,
}

impl SuspendedScope<'_> {
    /// Re-acquire the engine and restore the suspended state
    pub fn resume(mut self) {
        self.restore();
    }

    fn restore(&mut self) {
        let Some(saved) = self.saved.take() else { return };
        let core = self.core;

        for _ in 0..saved.depth {
            core.lock.lock();
        }
        {
            let mut state = core.state.lock();
            state.current = saved.current;
            state.depth = saved.depth;
        }
        core.runtime.resume(saved.thread_state);
        core.interceptor.begin_transaction();
    }
}

impl Drop for SuspendedScope<'_> {
    fn drop(&mut self) {
        self.restore();
    }
}
