//! Signal/slot notifications.
//!
//! Signals are the change-notification primitive that bindable objects expose.
//! A [`Signal<Args>`] holds any number of connected slots and invokes them when
//! emitted. Member descriptors observe signals through [`Signal::subscribe`],
//! which stores only a weak adapter so the subscriber is never kept alive by
//! the object it watches.
//!
//! # Connection Types
//!
//! - **Direct**: the emitting thread runs the slot
//! - **Queued**: the slot is posted to the installed [`Dispatcher`]
//! - **Auto** (default): Direct on the connecting thread, Queued elsewhere
//! - **BlockingQueued**: Queued, and the emitter waits for the slot
//!
//! Without an installed dispatcher, queued slots run immediately.
//!
//! Slots run after the connection lock is released, so a slot may connect to
//! or disconnect from the signal that is invoking it.
//!
//! # Example
//!
//! ```
//! use trellis_core::Signal;
//!
//! let selection_changed = Signal::<usize>::new();
//! let id = selection_changed.connect(|index| {
//!     println!("selected row {index}");
//! });
//! selection_changed.emit(3);
//! assert!(selection_changed.disconnect(id));
//! ```
//!
//! [`Dispatcher`]: crate::dispatch::Dispatcher

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::ThreadId;

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::dispatch::{self, CompletionWaiter, completion_pair};
use crate::value::Value;
use crate::weak_event::{SharedListener, Subscription, to_weak};

new_key_type! {
    /// Identifies one connection; pass it to [`Signal::disconnect`].
    pub struct ConnectionId;
}

/// Where and when a slot runs relative to the emitting thread.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionType {
    /// Run on the emitting thread, before `emit` returns.
    Direct,

    /// Post the slot invocation to the affinity thread's dispatcher.
    Queued,

    /// Direct if emitted on the thread that connected, Queued otherwise.
    #[default]
    Auto,

    /// Queued, with the emitter waiting until the slot has run.
    ///
    /// When the emitting thread is already the affinity thread the slot runs
    /// inline instead of deadlocking.
    BlockingQueued,
}

type SlotFn<Args> = Arc<dyn Fn(&Args) + Send + Sync>;

enum Slot<Args> {
    Callback(SlotFn<Args>),
    Listener {
        listener: SharedListener,
        message: fn(&Args) -> Value,
    },
}

impl<Args> Clone for Slot<Args> {
    fn clone(&self) -> Self {
        match self {
            Self::Callback(slot) => Self::Callback(slot.clone()),
            Self::Listener { listener, message } => Self::Listener {
                listener: listener.clone(),
                message: *message,
            },
        }
    }
}

/// One connected slot.
struct Connection<Args> {
    slot: Slot<Args>,
    connection_type: ConnectionType,
    /// The thread this connection was created on (for Auto).
    target_thread: ThreadId,
}

type Connections<Args> = Mutex<SlotMap<ConnectionId, Connection<Args>>>;

/// A notification with any number of connected slots.
///
/// Slots receive `&Args`; use `()` when there is nothing to pass and a tuple
/// for several values.
pub struct Signal<Args> {
    connections: Arc<Connections<Args>>,
    blocked: AtomicBool,
}

impl<Args: Clone + Send + 'static> Default for Signal<Args> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args: Clone + Send + 'static> Signal<Args> {
    /// An unconnected signal.
    pub fn new() -> Self {
        Self {
            connections: Arc::new(Mutex::new(SlotMap::with_key())),
            blocked: AtomicBool::new(false),
        }
    }

    /// Connect a slot (closure) to this signal with [`ConnectionType::Auto`].
    ///
    /// # Example
    ///
    /// ```
    /// use trellis_core::Signal;
    ///
    /// let name_changed = Signal::<String>::new();
    /// name_changed.connect(|name| assert_eq!(name, "Ada"));
    /// name_changed.emit("Ada".to_string());
    /// ```
    pub fn connect<F>(&self, slot: F) -> ConnectionId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.connect_with_type(slot, ConnectionType::Auto)
    }

    /// Connect a slot that runs according to `connection_type`.
    pub fn connect_with_type<F>(&self, slot: F, connection_type: ConnectionType) -> ConnectionId
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        self.insert(Slot::Callback(Arc::new(slot)), connection_type)
    }

    /// Connect a slot that is disconnected when the returned token is dropped.
    pub fn connect_scoped<F>(&self, slot: F) -> Subscription
    where
        F: Fn(&Args) + Send + Sync + 'static,
    {
        let id = self.connect(slot);
        self.subscription_for(id)
    }

    fn insert(&self, slot: Slot<Args>, connection_type: ConnectionType) -> ConnectionId {
        let connection = Connection {
            slot,
            connection_type,
            target_thread: std::thread::current().id(),
        };
        self.connections.lock().insert(connection)
    }

    fn subscription_for(&self, id: ConnectionId) -> Subscription {
        let connections: Weak<Connections<Args>> = Arc::downgrade(&self.connections);
        Subscription::new(move || {
            if let Some(connections) = connections.upgrade() {
                connections.lock().remove(id);
            }
        })
    }

    /// Remove one connection. Returns whether it was still connected.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        self.connections.lock().remove(id).is_some()
    }

    /// Remove every connection, including weak listeners.
    pub fn disconnect_all(&self) {
        self.connections.lock().clear();
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Suppress or resume emission.
    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::SeqCst);
    }

    /// Whether emission is suppressed.
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Deliver `args` to every connection.
    ///
    /// Listener connections made through [`subscribe`](Self::subscribe) are
    /// always invoked directly and are removed once their listener is gone.
    #[tracing::instrument(skip_all, target = "trellis_core::signal", level = "trace")]
    pub fn emit(&self, args: Args) {
        if self.is_blocked() {
            tracing::trace!(target: "trellis_core::signal", "signal blocked, skipping emit");
            return;
        }

        let current_thread = std::thread::current().id();
        let snapshot: Vec<(ConnectionId, Slot<Args>, ConnectionType, ThreadId)> = self
            .connections
            .lock()
            .iter()
            .map(|(id, conn)| (id, conn.slot.clone(), conn.connection_type, conn.target_thread))
            .collect();
        tracing::trace!(target: "trellis_core::signal", connection_count = snapshot.len(), "emitting signal");

        let mut blocking_waiters = Vec::new();
        let mut dead = Vec::new();

        for (id, slot, connection_type, target_thread) in snapshot {
            let callback = match slot {
                Slot::Listener { listener, message } => {
                    if !listener.try_handle(&Value::Null, &message(&args)) {
                        dead.push(id);
                    }
                    continue;
                }
                Slot::Callback(callback) => callback,
            };

            match connection_type {
                ConnectionType::Direct => callback(&args),
                ConnectionType::Auto => {
                    if target_thread == current_thread {
                        callback(&args);
                    } else {
                        queue_invocation(callback, args.clone());
                    }
                }
                ConnectionType::Queued => queue_invocation(callback, args.clone()),
                ConnectionType::BlockingQueued => {
                    if let Some(waiter) = queue_invocation_blocking(callback, args.clone()) {
                        blocking_waiters.push(waiter);
                    }
                }
            }
        }

        if !dead.is_empty() {
            let mut connections = self.connections.lock();
            for id in dead {
                connections.remove(id);
            }
        }

        for waiter in blocking_waiters {
            waiter.wait();
        }
    }

    /// Post every slot through the dispatcher, regardless of connection type.
    ///
    /// Returns how many slots were posted; a blocked signal posts none.
    pub fn emit_queued(&self, args: Args) -> usize {
        if self.is_blocked() {
            return 0;
        }

        let callbacks: Vec<SlotFn<Args>> = self
            .connections
            .lock()
            .values()
            .filter_map(|conn| match &conn.slot {
                Slot::Callback(callback) => Some(callback.clone()),
                Slot::Listener { .. } => None,
            })
            .collect();
        let count = callbacks.len();
        for callback in callbacks {
            queue_invocation(callback, args.clone());
        }
        count
    }
}

impl<Args: Clone + Any + Send + Sync + 'static> Signal<Args> {
    /// Subscribe a weak listener to this signal.
    ///
    /// The listener receives a null sender and the emitted arguments wrapped in
    /// a [`Value`]. Only a weak adapter is stored: the caller keeps the
    /// listener alive. Dropping the returned token disconnects it.
    pub fn subscribe(&self, listener: &SharedListener) -> Subscription {
        let id = self.insert(
            Slot::Listener {
                listener: to_weak(listener),
                message: message_of::<Args>,
            },
            ConnectionType::Direct,
        );
        tracing::trace!(target: "trellis_core::signal", ?id, "listener subscribed");
        self.subscription_for(id)
    }
}

fn message_of<Args: Clone + Any + Send + Sync>(args: &Args) -> Value {
    Value::new(args.clone())
}

/// Post an invocation to the dispatcher, or run it inline without one.
fn queue_invocation<Args: Send + 'static>(slot: SlotFn<Args>, args: Args) {
    match dispatch::dispatcher() {
        Some(dispatcher) => {
            let posted = dispatcher.post(Box::new(move || slot(&args)));
            if !posted {
                tracing::warn!(target: "trellis_core::signal", "dispatcher rejected a queued slot");
            }
        }
        None => {
            tracing::trace!(
                target: "trellis_core::signal",
                "no dispatcher installed for queued signal, executing immediately"
            );
            slot(&args);
        }
    }
}

fn queue_invocation_blocking<Args: Send + 'static>(
    slot: SlotFn<Args>,
    args: Args,
) -> Option<CompletionWaiter> {
    let dispatcher = match dispatch::dispatcher() {
        Some(dispatcher) if !dispatcher.is_on_affinity_thread() => dispatcher,
        _ => {
            slot(&args);
            return None;
        }
    };

    let (handle, waiter) = completion_pair();
    let posted = dispatcher.post(Box::new(move || {
        slot(&args);
        handle.signal_done();
    }));
    if posted {
        Some(waiter)
    } else {
        tracing::warn!(target: "trellis_core::signal", "dispatcher rejected a blocking queued slot");
        None
    }
}

static_assertions::assert_impl_all!(Signal<()>: Send, Sync);
static_assertions::assert_impl_all!(Signal<String>: Send, Sync);
