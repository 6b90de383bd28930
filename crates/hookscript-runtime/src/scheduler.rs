//! Script scheduling loop
//!
//! Each engine instance owns a tokio multi-thread runtime. Timer sources and
//! flush notifications run on it; background jobs go to its blocking pool.

use std::cell::Cell;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

static NEXT_SCHEDULER_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// Id of the scheduler whose runtime spawned the current thread, 0 if none
    static LOOP_OWNER: Cell<usize> = const { Cell::new(0) };
}

pub struct ScriptScheduler {
    id: usize,
    handle: Handle,
    runtime: Option<Runtime>,
}

impl ScriptScheduler {
    pub fn new(worker_threads: usize, thread_name: &str) -> io::Result<Self> {
        let id = NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed);
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name(thread_name)
            .enable_time()
            .on_thread_start(move || LOOP_OWNER.with(|owner| owner.set(id)))
            .build()?;
        Ok(ScriptScheduler {
            id,
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Run a future on the loop
    pub fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future)
    }

    /// Run a closure on the blocking thread pool
    pub fn push_job<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.spawn_blocking(job);
    }

    /// Whether the calling thread belongs to this scheduler's runtime
    pub fn is_loop_thread(&self) -> bool {
        LOOP_OWNER.with(|owner| owner.get() == self.id)
    }
}

impl Drop for ScriptScheduler {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
