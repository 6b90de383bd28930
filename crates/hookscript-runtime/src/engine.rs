//! Script engine runtime contract
//!
//! The evaluator itself is external. The bridge drives it through
//! [`ScriptRuntime`]: entered and left around the outermost scope, suspended
//! around cooperative native calls, and drained of pending jobs before a
//! scope is released.

use crate::value::ScriptError;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::thread::{self, ThreadId};

/// Opaque engine thread state captured by `suspend`
pub struct ThreadState(pub Box<dyn Any + Send>);

/// A queued engine job (promise reaction or similar)
pub type Job = Box<dyn FnOnce() -> Result<(), ScriptError> + Send>;

pub trait ScriptRuntime: Send + Sync {
    /// Mark the runtime entered by the current thread
    fn enter(&self);

    fn leave(&self);

    fn suspend(&self) -> ThreadState;

    fn resume(&self, state: ThreadState);

    /// Run one pending job; `None` once the queue is empty
    fn execute_pending_job(&self) -> Option<Result<(), ScriptError>>;
}

#[derive(Debug, Default)]
struct RuntimeState {
    owner: Option<ThreadId>,
    entries: usize,
    suspensions: usize,
}

/// FIFO job-queue runtime for hosts without an engine of their own
#[derive(Default)]
pub struct JobQueueRuntime {
    jobs: Mutex<VecDeque<Job>>,
    state: Mutex<RuntimeState>,
}

impl JobQueueRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue_job<F>(&self, job: F)
    where
        F: FnOnce() -> Result<(), ScriptError> + Send + 'static,
    {
        self.jobs.lock().push_back(Box::new(job));
    }

    pub fn pending_jobs(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Thread currently inside the runtime
    pub fn owner(&self) -> Option<ThreadId> {
        self.state.lock().owner
    }

    /// Number of outermost entries so far
    pub fn entries(&self) -> usize {
        self.state.lock().entries
    }

    /// Number of suspensions so far
    pub fn suspensions(&self) -> usize {
        self.state.lock().suspensions
    }
}

impl ScriptRuntime for JobQueueRuntime {
    fn enter(&self) {
        let mut state = self.state.lock();
        state.owner = Some(thread::current().id());
        state.entries += 1;
    }

    fn leave(&self) {
        self.state.lock().owner = None;
    }

    fn suspend(&self) -> ThreadState {
        let mut state = self.state.lock();
        state.suspensions += 1;
        ThreadState(Box::new(state.owner.take()))
    }

    fn resume(&self, saved: ThreadState) {
        let owner = saved
            .0
            .downcast::<Option<ThreadId>>()
            .map(|owner| *owner)
            .unwrap_or_else(|_| Some(thread::current().id()));
        self.state.lock().owner = owner;
    }

    fn execute_pending_job(&self) -> Option<Result<(), ScriptError>> {
        let job = self.jobs.lock().pop_front()?;
        Some(job())
    }
}
