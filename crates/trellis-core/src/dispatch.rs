//! UI-thread affinity and dispatch.
//!
//! The binding engine itself never hops threads: member getters and setters
//! run on whatever thread delivers the notification. Hosts that need UI
//! affinity install a [`Dispatcher`] and marshal work through
//! [`invoke_on_affinity_thread`] / [`invoke_on_affinity_thread_async`]. Queued
//! signal connections use the same dispatcher.
//!
//! # Usage
//!
//! ```
//! use trellis_core::dispatch::{self, ImmediateDispatcher};
//! use std::sync::Arc;
//!
//! dispatch::install_dispatcher(Arc::new(ImmediateDispatcher));
//! dispatch::invoke_on_affinity_thread(|| {
//!     // touch UI objects here
//! });
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::ThreadId;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};

/// Global storage for the main (UI) thread ID.
static MAIN_THREAD_ID: OnceLock<ThreadId> = OnceLock::new();

/// The installed dispatcher, if any.
static DISPATCHER: RwLock<Option<Arc<dyn Dispatcher>>> = RwLock::new(None);

/// A boxed unit of work posted to the affinity thread.
pub type DispatchTask = Box<dyn FnOnce() + Send + 'static>;

/// Host-provided access to the UI affinity thread.
pub trait Dispatcher: Send + Sync {
    /// Whether the calling thread is the affinity thread.
    fn is_on_affinity_thread(&self) -> bool;

    /// Queue a task for execution on the affinity thread.
    ///
    /// Returns `false` if the task could not be queued.
    fn post(&self, task: DispatchTask) -> bool;
}

/// A dispatcher that runs every task immediately on the calling thread.
///
/// This is the behavior when no host dispatcher is installed, and is what
/// tests and headless tools want.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateDispatcher;

impl Dispatcher for ImmediateDispatcher {
    fn is_on_affinity_thread(&self) -> bool {
        true
    }

    fn post(&self, task: DispatchTask) -> bool {
        task();
        true
    }
}

/// Install the process-wide dispatcher, replacing any previous one.
pub fn install_dispatcher(dispatcher: Arc<dyn Dispatcher>) {
    *DISPATCHER.write() = Some(dispatcher);
    tracing::debug!(target: "trellis_core::dispatch", "dispatcher installed");
}

/// Remove the installed dispatcher.
pub fn clear_dispatcher() {
    *DISPATCHER.write() = None;
}

/// The installed dispatcher, if any.
pub fn dispatcher() -> Option<Arc<dyn Dispatcher>> {
    DISPATCHER.read().clone()
}

/// Whether the calling thread is the affinity thread.
///
/// Falls back to [`is_main_thread`] when no dispatcher is installed.
pub fn is_on_affinity_thread() -> bool {
    match dispatcher() {
        Some(dispatcher) => dispatcher.is_on_affinity_thread(),
        None => is_main_thread(),
    }
}

/// Run `action` on the affinity thread and wait for it to finish.
///
/// Runs inline when already on the affinity thread, or when no dispatcher
/// is installed.
pub fn invoke_on_affinity_thread<F>(action: F)
where
    F: FnOnce() + Send + 'static,
{
    let Some(dispatcher) = dispatcher() else {
        action();
        return;
    };
    if dispatcher.is_on_affinity_thread() {
        action();
        return;
    }

    let (handle, waiter) = completion_pair();
    let posted = dispatcher.post(Box::new(move || {
        action();
        handle.signal_done();
    }));
    if posted {
        waiter.wait();
    } else {
        tracing::warn!(target: "trellis_core::dispatch", "dispatcher rejected a synchronous task");
    }
}

/// Queue `action` on the affinity thread without waiting.
///
/// The returned waiter completes once the action has run. When no dispatcher
/// is installed the action runs inline and the waiter is already complete.
pub fn invoke_on_affinity_thread_async<F>(action: F) -> CompletionWaiter
where
    F: FnOnce() + Send + 'static,
{
    let (handle, waiter) = completion_pair();
    match dispatcher() {
        Some(dispatcher) => {
            let posted = dispatcher.post(Box::new(move || {
                action();
                handle.signal_done();
            }));
            if !posted {
                tracing::warn!(target: "trellis_core::dispatch", "dispatcher rejected an asynchronous task");
            }
        }
        None => {
            action();
            handle.signal_done();
        }
    }
    waiter
}

/// Register the calling thread as the main (UI) thread.
///
/// # Panics
///
/// Panics if a different thread was already registered.
pub fn set_main_thread() {
    let current = std::thread::current().id();
    if MAIN_THREAD_ID.set(current).is_err() && MAIN_THREAD_ID.get() != Some(&current) {
        panic!(
            "set_main_thread() called from different thread than original. \
             The main thread ID can only be set once."
        );
    }
}

/// The registered main thread, if any.
#[inline]
pub fn main_thread_id() -> Option<ThreadId> {
    MAIN_THREAD_ID.get().copied()
}

/// Whether the calling thread is the main thread.
///
/// Returns `true` while no main thread has been registered.
#[inline]
pub fn is_main_thread() -> bool {
    match MAIN_THREAD_ID.get() {
        Some(&main_id) => std::thread::current().id() == main_id,
        None => true,
    }
}

/// Records the thread an object was created on.
#[derive(Debug, Clone, Copy)]
pub struct ThreadAffinity {
    thread_id: ThreadId,
}

impl Default for ThreadAffinity {
    fn default() -> Self {
        Self::current()
    }
}

impl ThreadAffinity {
    /// Affinity to the calling thread.
    #[inline]
    pub fn current() -> Self {
        Self {
            thread_id: std::thread::current().id(),
        }
    }

    /// Affinity to the main thread, or the calling thread if none is registered.
    pub fn main_thread() -> Self {
        Self {
            thread_id: main_thread_id().unwrap_or_else(|| std::thread::current().id()),
        }
    }

    /// The bound thread.
    #[inline]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Whether the calling thread matches.
    #[inline]
    pub fn is_same_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }
}

/// Signals completion of a dispatched task.
pub struct CompletionHandle {
    inner: Arc<CompletionState>,
}

impl CompletionHandle {
    /// Mark the task as complete, waking any waiter.
    pub fn signal_done(self) {
        let mut done = self.inner.done.lock();
        *done = true;
        self.inner.completed.store(true, Ordering::Release);
        self.inner.condvar.notify_all();
    }
}

/// Waits for a dispatched task to complete.
pub struct CompletionWaiter {
    inner: Arc<CompletionState>,
}

impl CompletionWaiter {
    /// Whether the task has already completed.
    pub fn is_complete(&self) -> bool {
        self.inner.completed.load(Ordering::Acquire)
    }

    /// Block until the task completes.
    ///
    /// Calling this on the affinity thread for a task queued to that same
    /// thread deadlocks.
    pub fn wait(self) {
        let mut done = self.inner.done.lock();
        while !*done {
            self.inner.condvar.wait(&mut done);
        }
    }

    /// Block until the task completes or the timeout elapses.
    ///
    /// Returns `true` if the task completed.
    pub fn wait_timeout(self, timeout: Duration) -> bool {
        let mut done = self.inner.done.lock();
        if *done {
            return true;
        }
        let result = self.inner.condvar.wait_for(&mut done, timeout);
        *done || !result.timed_out()
    }
}

struct CompletionState {
    done: Mutex<bool>,
    completed: AtomicBool,
    condvar: Condvar,
}

/// Create a settable completion signal.
pub fn completion_pair() -> (CompletionHandle, CompletionWaiter) {
    let state = Arc::new(CompletionState {
        done: Mutex::new(false),
        completed: AtomicBool::new(false),
        condvar: Condvar::new(),
    });

    (
        CompletionHandle {
            inner: state.clone(),
        },
        CompletionWaiter { inner: state },
    )
}
