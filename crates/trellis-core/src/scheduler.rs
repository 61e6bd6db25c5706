//! Background delay scheduler.
//!
//! Delayed binding updates are queued here. A single background thread keeps
//! a min-heap of pending one-shot tasks and runs each one when its time comes.
//! Rescheduling a pending task pushes it back, which is how delayed bindings
//! debounce bursts of changes.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicBool, Ordering};
//! use std::time::Duration;
//! use trellis_core::scheduler::DelayScheduler;
//!
//! let scheduler = DelayScheduler::new();
//! let ran = Arc::new(AtomicBool::new(false));
//! let ran_clone = ran.clone();
//! scheduler.schedule_once(Duration::from_millis(1), move || {
//!     ran_clone.store(true, Ordering::SeqCst);
//! });
//! scheduler.shutdown();
//! assert!(ran.load(Ordering::SeqCst));
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, LazyLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

new_key_type! {
    /// A unique identifier for a delayed task.
    pub struct DelayTaskId;
}

type BoxedTask = Box<dyn FnOnce() + Send + 'static>;

struct DelayTask {
    next_run: Instant,
    task: BoxedTask,
}

/// An entry in the queue (min-heap by execution time).
#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    id: DelayTaskId,
    run_time: Instant,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.run_time == other.run_time
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap (BinaryHeap is max-heap by default).
        other.run_time.cmp(&self.run_time)
    }
}

/// The pending tasks, ordered by run time.
#[derive(Default)]
struct TaskQueue {
    tasks: SlotMap<DelayTaskId, DelayTask>,
    queue: BinaryHeap<QueueEntry>,
}

impl TaskQueue {
    fn schedule(&mut self, delay: Duration, task: BoxedTask) -> DelayTaskId {
        let next_run = Instant::now() + delay;
        let id = self.tasks.insert(DelayTask { next_run, task });
        self.queue.push(QueueEntry { id, run_time: next_run });
        id
    }

    fn reschedule(&mut self, id: DelayTaskId, delay: Duration) -> bool {
        let Some(task) = self.tasks.get_mut(id) else {
            return false;
        };
        task.next_run = Instant::now() + delay;
        // The old queue entry is skipped when popped.
        self.queue.push(QueueEntry {
            id,
            run_time: task.next_run,
        });
        true
    }

    fn time_until_next(&mut self) -> Option<Duration> {
        while let Some(entry) = self.queue.peek() {
            let live = self
                .tasks
                .get(entry.id)
                .is_some_and(|task| task.next_run == entry.run_time);
            if live {
                break;
            }
            self.queue.pop();
        }
        self.queue
            .peek()
            .map(|entry| entry.run_time.saturating_duration_since(Instant::now()))
    }

    /// Remove every task that is due.
    fn take_ready(&mut self, now: Instant) -> Vec<(DelayTaskId, BoxedTask)> {
        let mut ready = Vec::new();
        while let Some(entry) = self.queue.peek().copied() {
            if entry.run_time > now {
                break;
            }
            self.queue.pop();
            let current = self
                .tasks
                .get(entry.id)
                .is_some_and(|task| task.next_run == entry.run_time);
            if !current {
                continue;
            }
            if let Some(task) = self.tasks.remove(entry.id) {
                ready.push((entry.id, task.task));
            }
        }
        ready
    }

    fn drain(&mut self) -> Vec<BoxedTask> {
        self.queue.clear();
        let mut tasks: Vec<_> = self.tasks.drain().map(|(_, task)| task).collect();
        tasks.sort_by_key(|task| task.next_run);
        tasks.into_iter().map(|task| task.task).collect()
    }
}

enum Command {
    Wake,
    Shutdown,
}

/// Runs one-shot tasks after a delay on a background thread.
pub struct DelayScheduler {
    queue: Arc<Mutex<TaskQueue>>,
    sender: Sender<Command>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

static GLOBAL_SCHEDULER: LazyLock<DelayScheduler> = LazyLock::new(DelayScheduler::new);

impl Default for DelayScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayScheduler {
    /// Start a scheduler with its own thread.
    pub fn new() -> Self {
        let queue = Arc::new(Mutex::new(TaskQueue::default()));
        let (sender, receiver) = unbounded();
        let loop_queue = queue.clone();
        let thread = std::thread::Builder::new()
            .name("trellis-delay".to_string())
            .spawn(move || scheduler_loop(loop_queue, receiver));
        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::error!(target: "trellis_core::scheduler", error = %err, "failed to start delay thread");
                None
            }
        };
        Self {
            queue,
            sender,
            thread: Mutex::new(thread),
        }
    }

    /// The process-wide scheduler.
    pub fn global() -> &'static DelayScheduler {
        &GLOBAL_SCHEDULER
    }

    /// Run `task` once after `delay`.
    pub fn schedule_once<F>(&self, delay: Duration, task: F) -> DelayTaskId
    where
        F: FnOnce() + Send + 'static,
    {
        let id = self.queue.lock().schedule(delay, Box::new(task));
        tracing::trace!(target: "trellis_core::scheduler", ?id, ?delay, "task scheduled");
        self.wake();
        id
    }

    /// Cancel a pending task. Returns whether it was still pending.
    pub fn cancel(&self, id: DelayTaskId) -> bool {
        self.queue.lock().tasks.remove(id).is_some()
    }

    /// Push a pending task back to run `delay` from now.
    ///
    /// Returns `false` if the task already ran or was cancelled.
    pub fn reschedule(&self, id: DelayTaskId, delay: Duration) -> bool {
        let rescheduled = self.queue.lock().reschedule(id, delay);
        if rescheduled {
            self.wake();
        }
        rescheduled
    }

    /// Whether the task has neither run nor been cancelled.
    pub fn is_pending(&self, id: DelayTaskId) -> bool {
        self.queue.lock().tasks.contains_key(id)
    }

    /// Number of pending tasks.
    pub fn pending_count(&self) -> usize {
        self.queue.lock().tasks.len()
    }

    /// Stop the thread, running every pending task first.
    pub fn shutdown(&self) {
        let _ = self.sender.send(Command::Shutdown);
        let handle = self.thread.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!(target: "trellis_core::scheduler", "delay thread panicked");
            }
        }
    }

    fn wake(&self) {
        let _ = self.sender.send(Command::Wake);
    }
}

impl Drop for DelayScheduler {
    fn drop(&mut self) {
        // Don't block in drop - just request shutdown
        let _ = self.sender.send(Command::Shutdown);
    }
}

fn scheduler_loop(queue: Arc<Mutex<TaskQueue>>, receiver: Receiver<Command>) {
    const IDLE_WAIT: Duration = Duration::from_secs(60);

    loop {
        let ready = queue.lock().take_ready(Instant::now());
        for (id, task) in ready {
            tracing::trace!(target: "trellis_core::scheduler", ?id, "executing delayed task");
            task();
        }

        let wait = queue.lock().time_until_next().unwrap_or(IDLE_WAIT);
        match receiver.recv_timeout(wait) {
            Ok(Command::Wake) | Err(RecvTimeoutError::Timeout) => {}
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let remaining = queue.lock().drain();
    for task in remaining {
        task();
    }
}

static_assertions::assert_impl_all!(DelayScheduler: Send, Sync);
