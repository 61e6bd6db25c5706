//! Weak event plumbing.
//!
//! Sources keep their listeners through [`WeakEventListener`] adapters, so a
//! subscription never extends the lifetime of whoever is listening. Once the
//! listener is gone the adapter turns into a permanent no-op.
//!
//! # Key Types
//!
//! - [`EventListener`] - Receives `(sender, message)` notifications
//! - [`WeakEventListener`] - Non-owning adapter produced by [`to_weak`]
//! - [`Subscription`] - RAII token; dropping it unsubscribes
//! - [`EventListenerList`] - A list of weak listeners that prunes dead entries
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use trellis_core::weak_event::{EventListener, EventListenerList, FnListener};
//! use trellis_core::Value;
//!
//! let list = EventListenerList::new();
//! let listener: Arc<dyn EventListener> = Arc::new(FnListener::new(|_, _| {}));
//! let subscription = list.add(&listener);
//! list.raise(&Value::Null, &Value::Null);
//! subscription.dispose();
//! assert!(list.is_empty());
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::value::Value;

/// A receiver of `(sender, message)` notifications.
pub trait EventListener: Send + Sync {
    /// Whether this listener already holds its target weakly.
    fn is_weak(&self) -> bool {
        false
    }

    /// Deliver a notification.
    ///
    /// Returns `false` if the listener is dead and should be removed.
    fn try_handle(&self, sender: &Value, message: &Value) -> bool;

    /// Deliver a notification, ignoring liveness.
    fn handle(&self, sender: &Value, message: &Value) {
        let _ = self.try_handle(sender, message);
    }
}

/// Shared listener handle.
pub type SharedListener = Arc<dyn EventListener>;

/// A listener backed by a closure.
pub struct FnListener<F> {
    callback: F,
}

impl<F> FnListener<F>
where
    F: Fn(&Value, &Value) + Send + Sync + 'static,
{
    /// Wrap a closure.
    pub fn new(callback: F) -> Self {
        Self { callback }
    }

    /// Wrap a closure and return it as a shared listener.
    pub fn shared(callback: F) -> SharedListener {
        Arc::new(Self::new(callback))
    }
}

impl<F> EventListener for FnListener<F>
where
    F: Fn(&Value, &Value) + Send + Sync + 'static,
{
    fn try_handle(&self, sender: &Value, message: &Value) -> bool {
        (self.callback)(sender, message);
        true
    }
}

/// An adapter that holds its listener without keeping it alive.
pub struct WeakEventListener {
    target: Weak<dyn EventListener>,
    dead: AtomicBool,
}

impl WeakEventListener {
    /// Create an adapter for `listener`.
    pub fn new(listener: &SharedListener) -> Self {
        Self {
            target: Arc::downgrade(listener),
            dead: AtomicBool::new(false),
        }
    }

    /// The underlying listener, if it is still alive.
    pub fn listener(&self) -> Option<SharedListener> {
        if self.dead.load(Ordering::Acquire) {
            return None;
        }
        let listener = self.target.upgrade();
        if listener.is_none() {
            self.dead.store(true, Ordering::Release);
        }
        listener
    }

    /// Whether the underlying listener is still alive.
    pub fn is_alive(&self) -> bool {
        self.listener().is_some()
    }
}

impl EventListener for WeakEventListener {
    fn is_weak(&self) -> bool {
        true
    }

    fn try_handle(&self, sender: &Value, message: &Value) -> bool {
        match self.listener() {
            Some(listener) => listener.try_handle(sender, message),
            None => false,
        }
    }
}

impl fmt::Debug for WeakEventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakEventListener")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Normalize a listener into a weak one.
///
/// Listeners that already report [`EventListener::is_weak`] are returned
/// unchanged; anything else is wrapped in a [`WeakEventListener`]. The caller
/// must keep the original listener alive for as long as it wants to receive
/// notifications.
pub fn to_weak(listener: &SharedListener) -> SharedListener {
    if listener.is_weak() {
        return listener.clone();
    }
    Arc::new(WeakEventListener::new(listener))
}

new_key_type! {
    /// Identifies a listener inside an [`EventListenerList`].
    pub struct ListenerKey;
}

type Unsubscribe = Box<dyn FnOnce() + Send + 'static>;

/// A disposable subscription token.
///
/// Disposing (or dropping) the token runs its unsubscribe action exactly once.
pub struct Subscription {
    action: Mutex<Option<Unsubscribe>>,
}

impl Subscription {
    /// Create a token that runs `unsubscribe` on disposal.
    pub fn new<F>(unsubscribe: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            action: Mutex::new(Some(Box::new(unsubscribe))),
        }
    }

    /// A token with nothing to undo.
    pub fn empty() -> Self {
        Self {
            action: Mutex::new(None),
        }
    }

    /// Run the unsubscribe action if it has not run yet.
    pub fn dispose(&self) {
        let action = self.action.lock().take();
        if let Some(action) = action {
            action();
        }
    }

    /// Whether the token has been disposed (or was empty).
    pub fn is_disposed(&self) -> bool {
        self.action.lock().is_none()
    }

    /// Drop the token without unsubscribing.
    pub fn forget(self) {
        self.action.lock().take();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

struct ListenerEntry {
    listener: SharedListener,
    original: Weak<dyn EventListener>,
}

type ListenerSlots = Mutex<SlotMap<ListenerKey, ListenerEntry>>;

/// A list of weakly held listeners.
///
/// Listeners are stored through [`to_weak`]; dead entries are pruned while
/// raising.
pub struct EventListenerList {
    listeners: Arc<ListenerSlots>,
}

impl Default for EventListenerList {
    fn default() -> Self {
        Self::new()
    }
}

impl EventListenerList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(SlotMap::with_key())),
        }
    }

    /// Add a listener, returning the subscription that removes it.
    pub fn add(&self, listener: &SharedListener) -> Subscription {
        let entry = ListenerEntry {
            listener: to_weak(listener),
            original: Arc::downgrade(listener),
        };
        let key = self.listeners.lock().insert(entry);
        tracing::trace!(target: "trellis_core::weak_event", ?key, "listener added");
        let slots: Weak<ListenerSlots> = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(slots) = slots.upgrade() {
                slots.lock().remove(key);
            }
        })
    }

    /// Remove a listener by identity.
    ///
    /// Returns `false` if it was not in the list.
    pub fn remove(&self, listener: &SharedListener) -> bool {
        let mut slots = self.listeners.lock();
        let original = Arc::downgrade(listener);
        let key = slots.iter().find_map(|(key, entry)| {
            let same = Arc::ptr_eq(&entry.listener, listener)
                || Weak::ptr_eq(&entry.original, &original);
            same.then_some(key)
        });
        key.is_some_and(|key| slots.remove(key).is_some())
    }

    /// Notify every live listener, dropping the dead ones.
    pub fn raise(&self, sender: &Value, message: &Value) {
        let snapshot: Vec<(ListenerKey, SharedListener)> = self
            .listeners
            .lock()
            .iter()
            .map(|(key, entry)| (key, entry.listener.clone()))
            .collect();

        let mut dead = Vec::new();
        for (key, listener) in snapshot {
            if !listener.try_handle(sender, message) {
                dead.push(key);
            }
        }

        if !dead.is_empty() {
            let mut slots = self.listeners.lock();
            for key in &dead {
                slots.remove(*key);
            }
            tracing::trace!(target: "trellis_core::weak_event", pruned = dead.len(), "dead listeners pruned");
        }
    }

    /// Number of registered listeners, including ones not yet pruned.
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.listeners.lock().clear();
    }
}

impl fmt::Debug for EventListenerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListenerList")
            .field("len", &self.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(Subscription: Send, Sync);
static_assertions::assert_impl_all!(EventListenerList: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting_listener(counter: &Arc<AtomicUsize>) -> SharedListener {
        let counter = counter.clone();
        FnListener::shared(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_to_weak_keeps_weak_listeners() {
        let counter = Arc::new(AtomicUsize::new(0));
        let listener = counting_listener(&counter);
        let weak = to_weak(&listener);
        assert!(weak.is_weak());
        assert!(!listener.is_weak());

        let again = to_weak(&weak);
        assert!(Arc::ptr_eq(&weak, &again));
    }

    #[test]
    fn test_weak_listener_self_neutralizes() {
        let counter = Arc::new(AtomicUsize::new(0));
        let listener = counting_listener(&counter);
        let weak = to_weak(&listener);

        weak.handle(&Value::Null, &Value::Null);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        drop(listener);
        assert!(!weak.try_handle(&Value::Null, &Value::Null));
        weak.handle(&Value::Null, &Value::Null);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_disposes_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let subscription = Subscription::new(move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!subscription.is_disposed());
        subscription.dispose();
        subscription.dispose();
        assert!(subscription.is_disposed());
        drop(subscription);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(Subscription::empty().is_disposed());
    }

    #[test]
    fn test_list_raise_and_prune() {
        let list = EventListenerList::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let kept = counting_listener(&counter);
        let dropped = counting_listener(&counter);

        let _a = list.add(&kept);
        let _b = list.add(&dropped);
        list.raise(&Value::Null, &Value::Null);
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        drop(dropped);
        list.raise(&Value::Null, &Value::Null);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_list_remove_by_identity() {
        let list = EventListenerList::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let listener = counting_listener(&counter);
        let other = counting_listener(&counter);

        let subscription = list.add(&listener);
        assert!(!list.remove(&other));
        assert!(list.remove(&listener));
        assert!(list.is_empty());
        subscription.dispose();
    }
}
