//! # Cooperative Task Queues
//!
//! Serial, non-blocking work queues used to sequence decode continuations.
//!
//! ## Overview
//!
//! The orchestrator never loops across several "need more data" decode steps
//! on its own stack. Instead it re-posts a continuation to a [`TaskQueue`],
//! so each turn of the queue performs a bounded amount of work and other
//! scheduled work (the other stream, a seek, a reset) gets a chance to run.
//!
//! Two implementations are provided:
//!
//! - [`SerialTaskQueue`]: owns one named OS thread that drains tasks in FIFO
//!   order. This is the decode worker of a playback session.
//! - [`ManualTaskQueue`]: tasks are stored until the owner runs them. Useful
//!   for consumers that drive their own loop, and for deterministic tests.

use crate::error::{PipelineError, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, trace};

/// A unit of work posted to a task queue.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A serial cooperative scheduler.
///
/// Tasks dispatched to the same queue run one at a time, in dispatch order.
pub trait TaskQueue: Send + Sync {
    /// Post a task. Never runs the task on the caller's stack.
    fn dispatch(&self, task: Task) -> Result<()>;

    /// Returns `true` if no task is pending or running.
    fn is_empty(&self) -> bool;

    /// Discard every task that has not started yet.
    ///
    /// When called from outside the queue, also waits for the task that is
    /// currently running (if any) to return.
    fn flush(&self);
}

// ============================================================================
// SerialTaskQueue
// ============================================================================

struct QueueState {
    tasks: VecDeque<Task>,
    running: bool,
    accepting: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    work_available: Condvar,
    idle: Condvar,
}

/// Task queue backed by a dedicated worker thread.
pub struct SerialTaskQueue {
    name: String,
    shared: Arc<Shared>,
    worker_id: ThreadId,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SerialTaskQueue {
    /// Spawn the worker thread and return the queue.
    pub fn new(name: impl Into<String>) -> Result<Arc<Self>> {
        let name = name.into();
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                running: false,
                accepting: true,
            }),
            work_available: Condvar::new(),
            idle: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || Self::worker_loop(worker_name, worker_shared))
            .map_err(|e| PipelineError::Internal(format!("Failed to spawn {}: {}", name, e)))?;

        debug!(queue = %name, "Task queue started");

        Ok(Arc::new(Self {
            name,
            shared,
            worker_id: handle.thread().id(),
            worker: Mutex::new(Some(handle)),
        }))
    }

    /// Name of the worker thread.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` when called from this queue's worker thread.
    pub fn is_current_thread(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Number of tasks waiting to start.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }

    /// Block until every dispatched task has run.
    ///
    /// Returns immediately when called from the worker itself.
    pub fn await_idle(&self) {
        if self.is_current_thread() {
            return;
        }
        let mut state = self.shared.state.lock();
        while state.running || !state.tasks.is_empty() {
            self.shared.idle.wait(&mut state);
        }
    }

    /// Stop accepting work, let queued tasks drain and join the worker.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if !state.accepting {
                return;
            }
            state.accepting = false;
        }
        self.shared.work_available.notify_all();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if self.is_current_thread() {
                // Joining ourselves would deadlock; the loop exits on its own.
                return;
            }
            if handle.join().is_err() {
                error!(queue = %self.name, "Task queue worker panicked");
            }
        }
        debug!(queue = %self.name, "Task queue shut down");
    }

    fn worker_loop(name: String, shared: Arc<Shared>) {
        trace!(queue = %name, "Worker loop running");

        loop {
            let task = {
                let mut state = shared.state.lock();
                while state.tasks.is_empty() && state.accepting {
                    shared.work_available.wait(&mut state);
                }
                match state.tasks.pop_front() {
                    Some(task) => {
                        state.running = true;
                        task
                    }
                    None => break,
                }
            };

            if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
                error!(queue = %name, "Task panicked");
            }

            let mut state = shared.state.lock();
            state.running = false;
            shared.idle.notify_all();
        }

        let _state = shared.state.lock();
        shared.idle.notify_all();
        trace!(queue = %name, "Worker loop exiting");
    }
}

impl TaskQueue for SerialTaskQueue {
    fn dispatch(&self, task: Task) -> Result<()> {
        let mut state = self.shared.state.lock();
        if !state.accepting {
            return Err(PipelineError::ShuttingDown);
        }
        state.tasks.push_back(task);
        drop(state);
        self.shared.work_available.notify_one();
        Ok(())
    }

    fn is_empty(&self) -> bool {
        let state = self.shared.state.lock();
        state.tasks.is_empty() && !state.running
    }

    fn flush(&self) {
        let mut state = self.shared.state.lock();
        let dropped = std::mem::take(&mut state.tasks);
        if !dropped.is_empty() {
            debug!(queue = %self.name, count = dropped.len(), "Flushed pending tasks");
        }

        if !self.is_current_thread() {
            while state.running {
                self.shared.idle.wait(&mut state);
            }
        }
        self.shared.idle.notify_all();
        drop(state);
        drop(dropped);
    }
}

impl Drop for SerialTaskQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ============================================================================
// ManualTaskQueue
// ============================================================================

/// Task queue whose tasks only run when the owner asks for them.
#[derive(Default)]
pub struct ManualTaskQueue {
    tasks: Mutex<VecDeque<Task>>,
    dispatched: AtomicUsize,
}

impl ManualTaskQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run the oldest pending task. Returns `false` if there was none.
    pub fn run_next(&self) -> bool {
        let task = self.tasks.lock().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty, including tasks posted while
    /// running. Returns the number of tasks executed.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next() {
            ran += 1;
        }
        ran
    }

    /// Number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Total number of tasks ever dispatched to this queue.
    pub fn dispatched_count(&self) -> usize {
        self.dispatched.load(Ordering::Acquire)
    }
}

impl TaskQueue for ManualTaskQueue {
    fn dispatch(&self, task: Task) -> Result<()> {
        self.tasks.lock().push_back(task);
        self.dispatched.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    fn flush(&self) {
        let dropped = std::mem::take(&mut *self.tasks.lock());
        drop(dropped);
    }
}
