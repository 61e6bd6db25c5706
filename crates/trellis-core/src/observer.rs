//! Path observation.
//!
//! A [`PathObserver`] walks a [`BindingPath`] from a root object, subscribing
//! to every segment it resolves. When the value of segment `i` changes, only
//! the nodes after `i` are torn down and resolved again; the stable prefix
//! keeps its subscriptions. Each triggering notification raises
//! [`PathObserver::value_changed`] once.
//!
//! Resolution stops at the first null or unset intermediate value. The
//! observer then reports `all_members_available == false` until a change on an
//! earlier segment produces an object again.
//!
//! # Threading
//!
//! Tracker mutation happens under a per-tracker re-entrant lock. A change that
//! arrives on the same thread while the tracker is already rebuilding is
//! recorded and processed right after the current rebuild. The lock is never
//! held while `value_changed` handlers run or while the last member is read or
//! written, so two observers updating each other from different threads
//! cannot wait on one another.

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::error::{BindingError, Result};
use crate::member::{BindingMember, MemberKind};
use crate::path::BindingPath;
use crate::provider::MemberProvider;
use crate::signal::Signal;
use crate::value::{Value, WeakObject};
use crate::weak_event::{EventListener, SharedListener, Subscription};

const TARGET: &str = "trellis_core::observer";

/// Lifecycle of a [`PathObserver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObserverState {
    /// No root, or the root has been released.
    Unbound,
    /// Walking segments.
    Resolving,
    /// Every segment resolved.
    Bound,
    /// An intermediate value is null or a member is missing.
    PartiallyBound,
    /// Terminal.
    Disposed,
}

/// How an observer holds on to its root.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObserverOptions {
    /// Keep only a weak handle to the root object.
    pub hold_source_weakly: bool,
}

impl Default for ObserverOptions {
    fn default() -> Self {
        Self {
            hold_source_weakly: true,
        }
    }
}

impl ObserverOptions {
    /// Options that keep the root alive.
    pub fn strong() -> Self {
        Self {
            hold_source_weakly: false,
        }
    }
}

/// Snapshot of the members an observer resolved.
#[derive(Clone, Debug)]
pub struct PathMembers {
    /// Whether every segment resolved to a member on a live object.
    pub all_members_available: bool,
    /// Resolved members in path order.
    pub members: Vec<Arc<BindingMember>>,
    /// The last member, or the unset member when the chain is broken.
    pub last_member: Arc<BindingMember>,
    /// The object that owns the last member.
    pub penultimate_value: Value,
    /// The root.
    pub source: Value,
}

/// Diagnostic view of one resolved segment.
#[derive(Clone, Debug)]
pub struct SegmentSnapshot {
    pub segment: String,
    pub kind: MemberKind,
    pub subscribed: bool,
    pub generation: u64,
}

enum RootSource {
    Strong(Value),
    Weak(WeakObject),
    Released,
}

impl RootSource {
    fn new(source: Value, hold_weakly: bool) -> Self {
        match &source {
            Value::Some(object) if hold_weakly => Self::Weak(Arc::downgrade(object)),
            _ => Self::Strong(source),
        }
    }

    fn value(&self) -> Option<Value> {
        match self {
            Self::Strong(value) => Some(value.clone()),
            Self::Weak(weak) => weak.upgrade().map(Value::Some),
            Self::Released => None,
        }
    }

    fn is_dead(&self) -> bool {
        matches!(self, Self::Weak(weak) if weak.strong_count() == 0)
    }
}

struct PathNode {
    member: Arc<BindingMember>,
    /// `None` for the first segment, whose owner is the root.
    owner: Option<Value>,
    _listener: SharedListener,
    subscription: Option<Subscription>,
    generation: u64,
}

struct TrackerState {
    status: ObserverState,
    root: RootSource,
    nodes: Vec<PathNode>,
    all_members_available: bool,
    rebuilding: bool,
    /// First segment index to re-resolve once the running rebuild finishes.
    pending: Option<usize>,
    last_error: Option<BindingError>,
    next_generation: u64,
}

impl TrackerState {
    fn release(&mut self) -> Vec<PathNode> {
        self.root = RootSource::Released;
        self.status = ObserverState::Unbound;
        self.all_members_available = false;
        self.pending = None;
        std::mem::take(&mut self.nodes)
    }

    fn owner_of(&self, index: usize) -> Option<Value> {
        match self.nodes.get(index)?.owner.clone() {
            Some(owner) => Some(owner),
            None => self.root.value(),
        }
    }
}

type StateGuard<'a> = ReentrantMutexGuard<'a, RefCell<TrackerState>>;

enum Seed {
    Done,
    Value(Value),
    Member(Arc<BindingMember>, Value),
}

struct ObserverInner {
    path: Arc<BindingPath>,
    provider: Arc<MemberProvider>,
    options: ObserverOptions,
    state: ReentrantMutex<RefCell<TrackerState>>,
    value_changed: Signal<()>,
    weak_self: Weak<ObserverInner>,
}

/// Forwards a segment change to its observer.
struct SegmentListener {
    observer: Weak<ObserverInner>,
    index: usize,
    generation: u64,
}

impl EventListener for SegmentListener {
    fn try_handle(&self, _sender: &Value, _message: &Value) -> bool {
        match self.observer.upgrade() {
            Some(observer) => {
                observer.on_segment_changed(self.index, self.generation);
                true
            }
            None => false,
        }
    }
}

impl ObserverInner {
    fn segment_args(&self, index: usize) -> Vec<Value> {
        self.path
            .segments()
            .get(index)
            .map(|segment| segment.args())
            .unwrap_or_default()
    }

    fn read_member(&self, member: &BindingMember, owner: &Value, index: usize) -> Value {
        match member.get_value(owner, &self.segment_args(index)) {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(
                    target: TARGET,
                    path = %self.path,
                    member = member.name(),
                    error = %err,
                    "failed to read path member"
                );
                Value::Unset
            }
        }
    }

    fn release_if_dead(&self, guard: &StateGuard<'_>) {
        let stale = {
            let mut state = guard.borrow_mut();
            if state.status == ObserverState::Disposed || !state.root.is_dead() {
                return;
            }
            state.release()
        };
        tracing::debug!(target: TARGET, path = %self.path, "observer source released");
        drop(stale);
    }

    fn on_segment_changed(&self, index: usize, generation: u64) {
        let guard = self.state.lock();
        let current = guard
            .borrow()
            .nodes
            .get(index)
            .is_some_and(|node| node.generation == generation);
        if !current {
            tracing::trace!(target: TARGET, index, generation, "ignoring stale segment notification");
            return;
        }
        tracing::trace!(target: TARGET, path = %self.path, index, "segment changed");
        self.notify(guard, index + 1);
    }

    /// Rebuild from `start`, release the lock, then raise `value_changed` if
    /// the rebuild ran here.
    fn notify(&self, guard: StateGuard<'_>, start: usize) {
        let ran = self.run(&guard, start);
        drop(guard);
        if ran {
            self.value_changed.emit(());
        }
    }

    /// Run a rebuild, or defer it when one is already running on this thread.
    ///
    /// Returns whether the rebuild ran and the observer is still live.
    fn run(&self, guard: &StateGuard<'_>, start: usize) -> bool {
        {
            let mut state = guard.borrow_mut();
            if state.status == ObserverState::Disposed {
                return false;
            }
            if state.rebuilding {
                state.pending = Some(state.pending.map_or(start, |pending| pending.min(start)));
                return false;
            }
            state.rebuilding = true;
        }

        let mut next = Some(start);
        while let Some(start) = next {
            if let Err(err) = self.rebuild(guard, start, false) {
                tracing::warn!(target: TARGET, path = %self.path, error = %err, "path rebuild failed");
            }
            next = guard.borrow_mut().pending.take();
        }

        let mut state = guard.borrow_mut();
        state.rebuilding = false;
        state.status != ObserverState::Disposed
    }

    /// Drop the nodes from `start` on and resolve them again.
    #[tracing::instrument(skip_all, target = "trellis_core::observer", level = "trace", fields(start = start))]
    fn rebuild(&self, guard: &StateGuard<'_>, start: usize, fatal: bool) -> Result<()> {
        let segment_count = self.path.len();
        let (stale, seed) = {
            let mut state = guard.borrow_mut();
            if state.status == ObserverState::Disposed || start > state.nodes.len() {
                return Ok(());
            }
            let Some(root) = state.root.value() else {
                let stale = state.release();
                drop(state);
                drop(stale);
                return Ok(());
            };

            let stale: Vec<PathNode> = state.nodes.drain(start..).collect();
            state.status = ObserverState::Resolving;
            let seed = if start >= segment_count {
                Seed::Done
            } else if start == 0 {
                Seed::Value(root)
            } else {
                let previous = &state.nodes[start - 1];
                let owner = previous.owner.clone().unwrap_or(root);
                Seed::Member(previous.member.clone(), owner)
            };
            (stale, seed)
        };
        if !stale.is_empty() {
            tracing::trace!(target: TARGET, released = stale.len(), "released stale segments");
        }
        drop(stale);

        let current = match seed {
            Seed::Done => {
                self.finish(guard, true);
                return Ok(());
            }
            Seed::Value(value) => value,
            Seed::Member(member, owner) => self.read_member(&member, &owner, start - 1),
        };
        self.resolve_suffix(guard, start, current, fatal)
    }

    fn resolve_suffix(
        &self,
        guard: &StateGuard<'_>,
        start: usize,
        mut current: Value,
        fatal: bool,
    ) -> Result<()> {
        let segments = self.path.segments();
        for (index, segment) in segments.iter().enumerate().skip(start) {
            let Some(type_id) = current.object_type_id() else {
                tracing::trace!(target: TARGET, index, "path stops at a null value");
                self.finish(guard, false);
                return Ok(());
            };

            let member = match self.provider.try_get_member(type_id, segment.member_name(), false) {
                Ok(member) => member,
                Err(err) if fatal => {
                    self.finish(guard, false);
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(
                        target: TARGET,
                        path = %self.path,
                        error = %err,
                        "member missing on a newly observed value"
                    );
                    guard.borrow_mut().last_error = Some(err);
                    self.finish(guard, false);
                    return Ok(());
                }
            };

            let generation = {
                let mut state = guard.borrow_mut();
                state.next_generation += 1;
                state.next_generation
            };
            let listener: SharedListener = Arc::new(SegmentListener {
                observer: self.weak_self.clone(),
                index,
                generation,
            });
            let subscription = member.try_observe(&current, &listener);
            let next = if index + 1 < segments.len() {
                self.read_member(&member, &current, index)
            } else {
                Value::Unset
            };

            let node = PathNode {
                member,
                owner: (index > 0).then(|| current.clone()),
                _listener: listener,
                subscription,
                generation,
            };
            {
                let mut state = guard.borrow_mut();
                if state.status == ObserverState::Disposed || state.nodes.len() != index {
                    drop(state);
                    drop(node);
                    return Ok(());
                }
                state.nodes.push(node);
            }
            tracing::trace!(target: TARGET, index, segment = %segment, "segment resolved");
            current = next;
        }

        self.finish(guard, true);
        Ok(())
    }

    fn finish(&self, guard: &StateGuard<'_>, complete: bool) {
        let mut state = guard.borrow_mut();
        if state.status == ObserverState::Disposed {
            return;
        }
        let available = complete && state.nodes.len() == self.path.len();
        if available {
            state.last_error = None;
        }
        state.all_members_available = available;
        state.status = if available {
            ObserverState::Bound
        } else {
            ObserverState::PartiallyBound
        };
    }
}

/// Live observation of a member path on a root object.
///
/// Cloning yields another handle to the same tracker.
#[derive(Clone)]
pub struct PathObserver {
    inner: Arc<ObserverInner>,
}

impl PathObserver {
    /// Resolve `path` against `source` and subscribe to every segment.
    ///
    /// Fails if a member along the initial chain does not exist.
    pub fn new(
        source: Value,
        path: Arc<BindingPath>,
        provider: Arc<MemberProvider>,
        options: ObserverOptions,
    ) -> Result<Self> {
        let inner = Arc::new_cyclic(|weak_self| ObserverInner {
            path,
            provider,
            options,
            state: ReentrantMutex::new(RefCell::new(TrackerState {
                status: ObserverState::Unbound,
                root: RootSource::new(source, options.hold_source_weakly),
                nodes: Vec::new(),
                all_members_available: false,
                rebuilding: false,
                pending: None,
                last_error: None,
                next_generation: 0,
            })),
            value_changed: Signal::new(),
            weak_self: weak_self.clone(),
        });

        {
            let guard = inner.state.lock();
            guard.borrow_mut().rebuilding = true;
            let mut result = inner.rebuild(&guard, 0, true);
            while result.is_ok() {
                let Some(start) = guard.borrow_mut().pending.take() else {
                    break;
                };
                result = inner.rebuild(&guard, start, true);
            }
            guard.borrow_mut().rebuilding = false;
            result?;
        }
        tracing::trace!(target: TARGET, path = %inner.path, "observer created");
        Ok(Self { inner })
    }

    /// Parse `path` and observe it.
    pub fn parse(source: Value, path: &str, provider: Arc<MemberProvider>, options: ObserverOptions) -> Result<Self> {
        Self::new(source, BindingPath::parse(path)?, provider, options)
    }

    /// The observed path.
    pub fn path(&self) -> &Arc<BindingPath> {
        &self.inner.path
    }

    /// The options the observer was created with.
    pub fn options(&self) -> ObserverOptions {
        self.inner.options
    }

    /// The current state.
    pub fn state(&self) -> ObserverState {
        let guard = self.inner.state.lock();
        self.inner.release_if_dead(&guard);
        let state = guard.borrow().status;
        state
    }

    /// The root, or [`Value::Null`] once it has been released.
    pub fn source(&self) -> Value {
        let guard = self.inner.state.lock();
        let source = guard.borrow().root.value().unwrap_or(Value::Null);
        source
    }

    /// Whether every segment currently resolves.
    pub fn all_members_available(&self) -> bool {
        let guard = self.inner.state.lock();
        self.inner.release_if_dead(&guard);
        let available = guard.borrow().all_members_available;
        available
    }

    /// The error recorded by the last runtime rebuild, if any.
    pub fn last_error(&self) -> Option<BindingError> {
        let guard = self.inner.state.lock();
        let error = guard.borrow().last_error.clone();
        error
    }

    /// Signal raised once per change that affects the observed value.
    pub fn value_changed(&self) -> &Signal<()> {
        &self.inner.value_changed
    }

    /// Snapshot of the resolved members.
    pub fn path_members(&self) -> PathMembers {
        let guard = self.inner.state.lock();
        self.inner.release_if_dead(&guard);
        let state = guard.borrow();
        let source = state.root.value();

        if self.inner.path.is_empty() {
            let available = source.is_some() && state.status != ObserverState::Disposed;
            let source = source.unwrap_or(Value::Null);
            return PathMembers {
                all_members_available: available,
                members: vec![BindingMember::empty()],
                last_member: BindingMember::empty(),
                penultimate_value: source.clone(),
                source,
            };
        }

        let members: Vec<_> = state.nodes.iter().map(|node| node.member.clone()).collect();
        let (last_member, penultimate_value) = match (state.all_members_available, members.last()) {
            (true, Some(last)) => (
                last.clone(),
                state.owner_of(members.len() - 1).unwrap_or(Value::Unset),
            ),
            _ => (BindingMember::unset(), Value::Unset),
        };
        PathMembers {
            all_members_available: state.all_members_available,
            members,
            last_member,
            penultimate_value,
            source: source.unwrap_or(Value::Null),
        }
    }

    /// Diagnostic view of every resolved segment.
    pub fn segments(&self) -> Vec<SegmentSnapshot> {
        let guard = self.inner.state.lock();
        let state = guard.borrow();
        state
            .nodes
            .iter()
            .zip(self.inner.path.segments())
            .map(|(node, segment)| SegmentSnapshot {
                segment: segment.to_string(),
                kind: node.member.kind(),
                subscribed: node.subscription.is_some(),
                generation: node.generation,
            })
            .collect()
    }

    /// Generation of the node at `index`; it changes whenever the node is rebuilt.
    pub fn subscription_generation(&self, index: usize) -> Option<u64> {
        let guard = self.inner.state.lock();
        let generation = guard.borrow().nodes.get(index).map(|node| node.generation);
        generation
    }

    /// The current value, or [`Value::Unset`] when none is available.
    pub fn value(&self) -> Value {
        match self.try_value() {
            Ok(value) => value,
            Err(err) if err.is_lifetime() => Value::Unset,
            Err(err) => {
                tracing::error!(target: TARGET, path = %self.inner.path, error = %err, "failed to read path value");
                Value::Unset
            }
        }
    }

    /// The current value, reporting getter failures and lifetime errors.
    pub fn try_value(&self) -> Result<Value> {
        let guard = self.inner.state.lock();
        self.inner.release_if_dead(&guard);
        let (member, owner, index) = {
            let state = guard.borrow();
            if state.status == ObserverState::Disposed {
                return Err(BindingError::Disposed);
            }
            let Some(root) = state.root.value() else {
                return Err(BindingError::SourceReleased);
            };
            if self.inner.path.is_empty() {
                return Ok(root);
            }
            if !state.all_members_available {
                return Ok(Value::Unset);
            }
            let index = state.nodes.len() - 1;
            let node = &state.nodes[index];
            (node.member.clone(), node.owner.clone().unwrap_or(root), index)
        };
        drop(guard);
        member.get_value(&owner, &self.inner.segment_args(index))
    }

    /// Write through the last member.
    ///
    /// Returns `Ok(false)` when the chain is broken or the path is empty.
    pub fn set_value(&self, value: Value) -> Result<bool> {
        let guard = self.inner.state.lock();
        self.inner.release_if_dead(&guard);
        let (member, owner, index) = {
            let state = guard.borrow();
            if state.status == ObserverState::Disposed {
                return Err(BindingError::Disposed);
            }
            let Some(root) = state.root.value() else {
                return Err(BindingError::SourceReleased);
            };
            if self.inner.path.is_empty() || !state.all_members_available {
                return Ok(false);
            }
            let index = state.nodes.len() - 1;
            let node = &state.nodes[index];
            (node.member.clone(), node.owner.clone().unwrap_or(root), index)
        };
        drop(guard);
        member.set_value(&owner, &self.inner.segment_args(index), value)?;
        Ok(true)
    }

    /// Re-walk the whole path and raise `value_changed`.
    pub fn update(&self) {
        let guard = self.inner.state.lock();
        self.inner.release_if_dead(&guard);
        self.inner.notify(guard, 0);
    }

    /// Replace the root and re-walk the whole path.
    pub fn set_source(&self, source: Value) {
        let guard = self.inner.state.lock();
        {
            let mut state = guard.borrow_mut();
            if state.status == ObserverState::Disposed {
                return;
            }
            state.root = RootSource::new(source, self.inner.options.hold_source_weakly);
            state.status = ObserverState::Unbound;
        }
        self.inner.notify(guard, 0);
    }

    /// Check that the path resolves.
    ///
    /// With `throw`, a member missing along the current chain is returned as
    /// an error; otherwise it yields `Ok(false)`.
    pub fn validate(&self, throw: bool) -> Result<bool> {
        let guard = self.inner.state.lock();
        self.inner.release_if_dead(&guard);
        let state = guard.borrow();
        let failure = match (&state.status, &state.last_error) {
            (ObserverState::Disposed, _) => Some(BindingError::Disposed),
            (_, Some(err)) => Some(err.clone()),
            _ if matches!(state.root, RootSource::Released) => Some(BindingError::SourceReleased),
            _ => None,
        };
        match failure {
            Some(err) if throw => Err(err),
            Some(_) => Ok(false),
            None => Ok(state.all_members_available),
        }
    }

    /// Whether the observer has been disposed.
    pub fn is_disposed(&self) -> bool {
        let guard = self.inner.state.lock();
        let disposed = guard.borrow().status == ObserverState::Disposed;
        disposed
    }

    /// Release every subscription and the root. Idempotent.
    pub fn dispose(&self) {
        let guard = self.inner.state.lock();
        let stale = {
            let mut state = guard.borrow_mut();
            if state.status == ObserverState::Disposed {
                return;
            }
            let stale = state.release();
            state.status = ObserverState::Disposed;
            stale
        };
        drop(stale);
        drop(guard);
        self.inner.value_changed.disconnect_all();
        tracing::trace!(target: TARGET, path = %self.inner.path, "observer disposed");
    }

    /// Whether two handles refer to the same tracker.
    pub fn ptr_eq(&self, other: &PathObserver) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for PathObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathObserver")
            .field("path", &self.inner.path.as_str())
            .field("state", &self.state())
            .finish()
    }
}

static_assertions::assert_impl_all!(PathObserver: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::Bindable;
    use crate::property::Property;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Node {
        child: Property<Value>,
        name: Property<String>,
    }

    impl Node {
        fn new(name: &str) -> Arc<Node> {
            Arc::new(Node {
                child: Property::new(Value::Null),
                name: Property::new(name.to_string()),
            })
        }

        fn with_child(name: &str, child: &Arc<Node>) -> Arc<Node> {
            let node = Node::new(name);
            node.set_child(Value::from_arc(child.clone()));
            node
        }

        fn set_child(&self, child: Value) {
            self.child.set_with(child, Value::same_as);
        }
    }

    impl Bindable for Node {
        fn binding_members() -> Vec<BindingMember> {
            vec![
                BindingMember::from_property("Child", |n: &Node| &n.child),
                BindingMember::from_property("Name", |n: &Node| &n.name),
            ]
        }
    }

    fn provider() -> Arc<MemberProvider> {
        let provider = MemberProvider::new();
        provider.register_type::<Node>();
        Arc::new(provider)
    }

    fn counter(observer: &PathObserver) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        observer.value_changed().connect(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn test_resolves_full_chain() {
        let b = Node::new("b");
        let a = Node::with_child("a", &b);
        let root = Node::with_child("root", &a);

        let observer = PathObserver::parse(
            Value::from_arc(root.clone()),
            "Child.Child.Name",
            provider(),
            ObserverOptions::default(),
        )
        .unwrap();

        assert_eq!(observer.state(), ObserverState::Bound);
        assert!(observer.all_members_available());
        assert_eq!(observer.value().get::<String>(), Some("b".to_string()));

        let members = observer.path_members();
        assert_eq!(members.members.len(), 3);
        assert_eq!(members.last_member.name(), "Name");
        assert_eq!(members.penultimate_value.downcast_ref::<Node>().map(|n| n.name.get()), Some("b".into()));
        assert!(observer.segments().iter().all(|s| s.subscribed));
    }

    #[test]
    fn test_suffix_only_invalidation() {
        let b = Node::new("b");
        let a = Node::with_child("a", &b);
        let root = Node::with_child("root", &a);
        let observer = PathObserver::parse(
            Value::from_arc(root.clone()),
            "Child.Child.Name",
            provider(),
            ObserverOptions::default(),
        )
        .unwrap();
        let changes = counter(&observer);

        let before: Vec<_> = (0..3).map(|i| observer.subscription_generation(i)).collect();

        let replacement = Node::new("b2");
        a.set_child(Value::from_arc(replacement.clone()));

        assert_eq!(observer.subscription_generation(0), before[0]);
        assert_eq!(observer.subscription_generation(1), before[1]);
        assert_ne!(observer.subscription_generation(2), before[2]);
        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert_eq!(observer.value().get::<String>(), Some("b2".to_string()));

        // The old node no longer reaches the observer.
        b.name.set("stale".to_string());
        assert_eq!(changes.load(Ordering::SeqCst), 1);

        replacement.name.set("renamed".to_string());
        assert_eq!(changes.load(Ordering::SeqCst), 2);
        assert_eq!(observer.subscription_generation(1), before[1]);
    }

    #[test]
    fn test_partial_binding_recovery() {
        let a = Node::new("a");
        let root = Node::with_child("root", &a);
        let observer = PathObserver::parse(
            Value::from_arc(root.clone()),
            "Child.Child.Name",
            provider(),
            ObserverOptions::default(),
        )
        .unwrap();
        let changes = counter(&observer);

        assert_eq!(observer.state(), ObserverState::PartiallyBound);
        assert!(!observer.all_members_available());
        assert!(observer.value().is_unset());
        assert!(!observer.set_value(Value::from("x")).unwrap());
        assert!(observer.path_members().penultimate_value.is_unset());
        assert!(observer.subscription_generation(2).is_none());

        let b = Node::new("b");
        a.set_child(Value::from_arc(b.clone()));
        assert!(observer.all_members_available());
        assert_eq!(observer.value().get::<String>(), Some("b".to_string()));
        assert_eq!(changes.load(Ordering::SeqCst), 1);

        b.name.set("c".to_string());
        assert_eq!(changes.load(Ordering::SeqCst), 2);
        assert_eq!(observer.value().get::<String>(), Some("c".to_string()));
    }

    #[test]
    fn test_missing_member_is_configuration_error() {
        let root = Node::new("root");
        let err = PathObserver::parse(
            Value::from_arc(root.clone()),
            "Missing",
            provider(),
            ObserverOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BindingError::MemberNotFound { .. }));
    }

    #[test]
    fn test_missing_member_at_runtime_is_partial() {
        let a = Node::new("a");
        let root = Node::with_child("root", &a);
        let observer = PathObserver::parse(
            Value::from_arc(root.clone()),
            "Child.Name",
            provider(),
            ObserverOptions::default(),
        )
        .unwrap();

        root.set_child(Value::new(42i32));
        assert_eq!(observer.state(), ObserverState::PartiallyBound);
        assert!(observer.last_error().is_some());
        assert!(!observer.validate(false).unwrap());
        assert!(observer.validate(true).is_err());

        root.set_child(Value::from_arc(a.clone()));
        assert_eq!(observer.state(), ObserverState::Bound);
        assert!(observer.validate(true).unwrap());
    }

    #[test]
    fn test_empty_path_observes_root() {
        let root = Node::new("root");
        let value = Value::from_arc(root.clone());
        let observer =
            PathObserver::parse(value.clone(), "", provider(), ObserverOptions::default()).unwrap();

        assert!(observer.value().same_as(&value));
        let members = observer.path_members();
        assert!(members.all_members_available);
        assert_eq!(members.last_member.kind(), MemberKind::Empty);
        assert!(members.penultimate_value.same_as(&value));
        assert!(!observer.set_value(Value::Null).unwrap());
    }

    #[test]
    fn test_weak_root_is_released() {
        let root = Node::new("root");
        let observer = PathObserver::parse(
            Value::from_arc(root.clone()),
            "Name",
            provider(),
            ObserverOptions::default(),
        )
        .unwrap();
        assert_eq!(observer.value().get::<String>(), Some("root".to_string()));

        drop(root);
        assert!(observer.value().is_unset());
        assert_eq!(observer.state(), ObserverState::Unbound);
        assert!(observer.source().is_null());
        assert!(matches!(observer.try_value(), Err(BindingError::SourceReleased)));

        let replacement = Node::new("again");
        observer.set_source(Value::from_arc(replacement.clone()));
        assert_eq!(observer.value().get::<String>(), Some("again".to_string()));
    }

    #[test]
    fn test_strong_root_is_kept() {
        let observer = PathObserver::parse(
            Value::from_arc(Node::new("kept")),
            "Name",
            provider(),
            ObserverOptions::strong(),
        )
        .unwrap();
        assert_eq!(observer.value().get::<String>(), Some("kept".to_string()));
    }

    #[test]
    fn test_set_value_writes_last_member() {
        let a = Node::new("a");
        let root = Node::with_child("root", &a);
        let observer = PathObserver::parse(
            Value::from_arc(root.clone()),
            "Child.Name",
            provider(),
            ObserverOptions::default(),
        )
        .unwrap();
        let changes = counter(&observer);

        assert!(observer.set_value(Value::from("written")).unwrap());
        assert_eq!(a.name.get(), "written");
        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert!(observer.set_value(Value::new(5i32)).is_err());
    }

    #[test]
    fn test_reentrant_change_is_processed_after_rebuild() {
        let a = Node::new("a");
        let root = Node::with_child("root", &a);
        let observer = PathObserver::parse(
            Value::from_arc(root.clone()),
            "Child.Name",
            provider(),
            ObserverOptions::default(),
        )
        .unwrap();

        let second = Node::new("second");
        let root_clone = root.clone();
        let second_value = Value::from_arc(second.clone());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let observer_clone = observer.clone();
        observer.value_changed().connect(move |_| {
            let value = observer_clone.value().get::<String>();
            seen_clone.lock().push(value.clone());
            if value.as_deref() == Some("first") {
                root_clone.set_child(second_value.clone());
            }
        });

        root.set_child(Value::from_arc(Node::new("first")));
        assert_eq!(observer.value().get::<String>(), Some("second".to_string()));
        assert_eq!(
            *seen.lock(),
            vec![Some("first".to_string()), Some("second".to_string())]
        );
    }

    #[test]
    fn test_dispose_stops_notifications() {
        let root = Node::new("root");
        let observer = PathObserver::parse(
            Value::from_arc(root.clone()),
            "Name",
            provider(),
            ObserverOptions::default(),
        )
        .unwrap();
        let changes = counter(&observer);

        observer.dispose();
        observer.dispose();
        root.name.set("changed".to_string());

        assert_eq!(changes.load(Ordering::SeqCst), 0);
        assert_eq!(observer.state(), ObserverState::Disposed);
        assert!(observer.value().is_unset());
        assert!(matches!(observer.set_value(Value::Null), Err(BindingError::Disposed)));
        assert_eq!(root.name.changed().connection_count(), 0);
    }
}
