//! Timer and idle sources
//!
//! A scheduled callback lives in the instance's table from creation until it
//! fires for the last time or is cleared. Its source is attached to the
//! scheduler when the creating scope drains; a zero delay yields before each
//! run instead of sleeping. Every path that destroys a source pins the
//! instance first and the source's release unpins it exactly once, so
//! teardown waits for in-flight timers.

use super::scope::Scope;
use super::Core;
use crate::eventlog::BridgeEvent;
use crate::value::{Function, Value};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;

enum TaskSlot {
    Pending,
    Running(AbortHandle),
    Released,
}

pub(crate) struct TimerSource {
    id: u32,
    delay: Duration,
    repeat: bool,
    func: Function,
    args: Vec<Value>,
    core: Weak<Core>,
    destroyed: AtomicBool,
    released: AtomicBool,
    task: Mutex<TaskSlot>,
}

struct ReleaseOnDrop(Arc<TimerSource>);

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        self.0.release();
    }
}

impl TimerSource {
    fn new(id: u32, delay_ms: u64, repeat: bool, func: Function, args: Vec<Value>, core: Weak<Core>) -> Self {
        TimerSource {
            id,
            delay: Duration::from_millis(delay_ms),
            repeat,
            func,
            args,
            core,
            destroyed: AtomicBool::new(false),
            released: AtomicBool::new(false),
            task: Mutex::new(TaskSlot::Pending),
        }
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Start running on the scheduler; a source destroyed before it was
    /// attached is released instead
    pub(crate) fn attach(self: Arc<Self>, core: &Core) {
        let mut task = self.task.lock();
        if !matches!(*task, TaskSlot::Pending) {
            return;
        }

        if self.is_destroyed() {
            *task = TaskSlot::Released;
            drop(task);
            self.release();
            return;
        }

        let release = ReleaseOnDrop(self.clone());
        let handle = core.scheduler.spawn(self.clone().run(release));
        *task = TaskSlot::Running(handle.abort_handle());
    }

    pub(crate) fn destroy(&self) {
        let task = self.task.lock();
        self.destroyed.store(true, Ordering::SeqCst);
        if let TaskSlot::Running(handle) = &*task {
            handle.abort();
        }
    }

    /// The guard is held by the future itself, so an abort before the first
    /// poll still releases.
    async fn run(self: Arc<Self>, _release: ReleaseOnDrop) {
        loop {
            if self.delay.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::time::sleep(self.delay).await;
            }

            let source = self.clone();
            let again = tokio::task::spawn_blocking(move || source.dispatch())
                .await
                .unwrap_or(false);
            if !again {
                break;
            }
        }
    }

    /// One firing; returns whether the source stays scheduled
    fn dispatch(&self) -> bool {
        if self.is_destroyed() {
            return false;
        }
        let Some(core) = self.core.upgrade() else {
            return false;
        };

        let scope = core.enter();
        let _ = scope.call(&self.func, &Value::Undefined, &self.args);
        if !self.repeat && core.take_scheduled(self.id).is_some() {
            core.pin();
        }
        drop(scope);

        self.repeat && !self.is_destroyed()
    }

    fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(core) = self.core.upgrade() {
            let _scope = core.enter();
            core.unpin();
        }
    }
}

impl Core {
    /// Run `func` once after `delay_ms`; returns the timer id
    pub fn set_timeout(&self, scope: &Scope<'_>, func: Function, delay_ms: u64, args: Vec<Value>) -> u32 {
        self.schedule(scope, func, delay_ms, false, args)
    }

    /// Run `func` every `delay_ms` until cleared; returns the timer id
    pub fn set_interval(&self, scope: &Scope<'_>, func: Function, delay_ms: u64, args: Vec<Value>) -> u32 {
        self.schedule(scope, func, delay_ms, true, args)
    }

    fn schedule(&self, scope: &Scope<'_>, func: Function, delay_ms: u64, repeat: bool, args: Vec<Value>) -> u32 {
        let id = self.next_timer_id.fetch_add(1, Ordering::SeqCst);
        let source = Arc::new(TimerSource::new(id, delay_ms, repeat, func, args, self.downgrade()));

        self.scheduled.lock().insert(id, source.clone());
        scope.current_queues().push_source(source);

        self.logger.log(BridgeEvent::TimerScheduled { id, delay_ms, repeat });
        id
    }

    /// Cancel a timer by id; false when `id` is not a number or not scheduled
    pub fn clear_timer(&self, id: &Value) -> bool {
        let Value::Number(raw) = id else {
            return false;
        };
        if *raw < 0.0 || raw.fract() != 0.0 || *raw > f64::from(u32::MAX) {
            return false;
        }

        let id = *raw as u32;
        let Some(source) = self.take_scheduled(id) else {
            return false;
        };
        self.pin();
        source.destroy();

        self.logger.log(BridgeEvent::TimerCancelled { id });
        true
    }

    /// Number of timers still scheduled
    pub fn scheduled_count(&self) -> usize {
        self.scheduled.lock().len()
    }

    pub(crate) fn take_scheduled(&self, id: u32) -> Option<Arc<TimerSource>> {
        self.scheduled.lock().remove(&id)
    }
}
