//! The data binding.
//!
//! A [`DataBinding`] couples a target accessor with a source accessor and
//! moves values between them on demand: [`update_target`] copies the source
//! value into the target, [`update_source`] copies the other way. Which
//! changes trigger an update is decided by the attached behaviors (see
//! [`crate::behavior`]); the binding itself never subscribes to anything.
//!
//! Runtime errors raised while updating never escape the update methods.
//! They are wrapped with the binding description and action, logged, and
//! raised through [`DataBinding::binding_exception`]. Lifetime errors (a
//! disposed observer, a dropped source) are ignored.
//!
//! [`update_target`]: DataBinding::update_target
//! [`update_source`]: DataBinding::update_source

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::accessor::SharedAccessor;
use crate::behavior::{BehaviorCollection, BehaviorId, SharedBehavior};
use crate::dispatch;
use crate::error::{BindingError, Result};
use crate::scheduler::{DelayScheduler, DelayTaskId};
use crate::signal::Signal;
use crate::value::{FromValue, IntoValue, Value};

const TARGET: &str = "trellis_core::binding";

/// The direction of an update.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingAction {
    /// Target value written into the source.
    UpdateSource,
    /// Source value written into the target.
    UpdateTarget,
}

impl BindingAction {
    fn index(self) -> usize {
        match self {
            Self::UpdateSource => 0,
            Self::UpdateTarget => 1,
        }
    }
}

impl fmt::Display for BindingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UpdateSource => f.write_str("UpdateSource"),
            Self::UpdateTarget => f.write_str("UpdateTarget"),
        }
    }
}

/// Raised after a successful update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindingEvent {
    pub action: BindingAction,
}

/// Raised when an update or validation fails.
#[derive(Clone, Debug, PartialEq)]
pub struct BindingExceptionEvent {
    pub action: BindingAction,
    /// The failure wrapped with the binding description.
    pub error: BindingError,
    /// The failure as reported by the accessor.
    pub original: BindingError,
}

/// A typed key into a binding's context.
pub struct DataConstant<T> {
    id: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DataConstant<T> {
    /// A key named `id`. Keys with equal ids address the same entry.
    pub const fn new(id: &'static str) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// The key name.
    pub fn id(&self) -> &'static str {
        self.id
    }
}

impl<T> Clone for DataConstant<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for DataConstant<T> {}

impl<T> fmt::Debug for DataConstant<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DataConstant").field(&self.id).finish()
    }
}

/// Well-known context keys.
pub struct BindingConstants;

impl BindingConstants {
    /// The binding itself. Present in every context until cleared.
    pub const BINDING: DataConstant<DataBinding> = DataConstant::new("Binding");
}

/// Per-binding key/value store. The map is only allocated on first write.
struct ContextState {
    entries: Option<HashMap<&'static str, Value>>,
    has_self: bool,
}

impl ContextState {
    fn new() -> Self {
        Self {
            entries: None,
            has_self: true,
        }
    }

    fn is_self_key(&self, id: &str) -> bool {
        self.has_self && id == BindingConstants::BINDING.id
    }

    fn contains(&self, id: &str) -> bool {
        self.is_self_key(id) || self.entries.as_ref().is_some_and(|entries| entries.contains_key(id))
    }

    fn entries_mut(&mut self) -> &mut HashMap<&'static str, Value> {
        self.entries.get_or_insert_with(HashMap::new)
    }

    fn insert(&mut self, id: &'static str, value: Value) {
        if id == BindingConstants::BINDING.id {
            self.has_self = false;
        }
        self.entries_mut().insert(id, value);
    }

    fn remove(&mut self, id: &str) -> bool {
        let Some(entries) = self.entries.as_mut() else {
            return false;
        };
        if self.has_self && id == BindingConstants::BINDING.id {
            self.has_self = false;
            return true;
        }
        entries.remove(id).is_some()
    }

    fn len(&self) -> usize {
        usize::from(self.has_self) + self.entries.as_ref().map_or(0, HashMap::len)
    }

    /// No-op until the first write, so the binding itself stays listed.
    fn clear(&mut self) {
        let Some(entries) = self.entries.as_mut() else {
            return;
        };
        self.has_self = false;
        entries.clear();
    }

    fn keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::with_capacity(self.len());
        if self.has_self {
            keys.push(BindingConstants::BINDING.id);
        }
        if let Some(entries) = &self.entries {
            keys.extend(entries.keys().copied());
        }
        keys
    }
}

struct BindingState {
    disposed: bool,
    context: ContextState,
}

/// A pending delayed update.
struct DelaySlot {
    delay: Duration,
    pending: Option<DelayTaskId>,
}

struct BindingInner {
    target: SharedAccessor,
    source: SharedAccessor,
    description: String,
    behaviors: BehaviorCollection,
    state: Mutex<BindingState>,
    delays: Mutex<[Option<DelaySlot>; 2]>,
    log_errors: AtomicBool,
    binding_updated: Signal<BindingEvent>,
    binding_exception: Signal<BindingExceptionEvent>,
    disposed: Signal<()>,
}

/// A live connection between a target and a source.
///
/// Cloning yields another handle to the same binding.
#[derive(Clone)]
pub struct DataBinding {
    inner: Arc<BindingInner>,
}

/// A non-owning handle to a [`DataBinding`].
#[derive(Clone)]
pub struct WeakDataBinding {
    inner: Weak<BindingInner>,
}

impl WeakDataBinding {
    /// The binding, if it is still alive.
    pub fn upgrade(&self) -> Option<DataBinding> {
        self.inner.upgrade().map(|inner| DataBinding { inner })
    }
}

impl DataBinding {
    /// Bind `target` to `source`. No behaviors are attached.
    pub fn new(target: SharedAccessor, source: SharedAccessor) -> Self {
        let description = describe(&target, &source);
        tracing::debug!(target: TARGET, binding = %description, "binding created");
        Self {
            inner: Arc::new(BindingInner {
                target,
                source,
                description,
                behaviors: BehaviorCollection::new(),
                state: Mutex::new(BindingState {
                    disposed: false,
                    context: ContextState::new(),
                }),
                delays: Mutex::new([None, None]),
                log_errors: AtomicBool::new(true),
                binding_updated: Signal::new(),
                binding_exception: Signal::new(),
                disposed: Signal::new(),
            }),
        }
    }

    /// A weak handle.
    pub fn downgrade(&self) -> WeakDataBinding {
        WeakDataBinding {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether two handles refer to the same binding.
    pub fn ptr_eq(&self, other: &DataBinding) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// `"<target path> <- <source paths>"`.
    pub fn description(&self) -> &str {
        &self.inner.description
    }

    /// The target side.
    pub fn target_accessor(&self) -> &SharedAccessor {
        &self.inner.target
    }

    /// The source side.
    pub fn source_accessor(&self) -> &SharedAccessor {
        &self.inner.source
    }

    /// Whether update failures are logged at error level.
    pub fn set_log_errors(&self, enabled: bool) {
        self.inner.log_errors.store(enabled, Ordering::Relaxed);
    }

    /// Raised after each successful update.
    pub fn binding_updated(&self) -> &Signal<BindingEvent> {
        &self.inner.binding_updated
    }

    /// Raised for each runtime failure.
    pub fn binding_exception(&self) -> &Signal<BindingExceptionEvent> {
        &self.inner.binding_exception
    }

    /// Raised once, when the binding is disposed.
    pub fn disposed(&self) -> &Signal<()> {
        &self.inner.disposed
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }

    /// The attached behaviors.
    pub fn behaviors(&self) -> Behaviors<'_> {
        Behaviors { binding: self }
    }

    /// Copy the source value into the target.
    pub fn update_target(&self) {
        self.request(BindingAction::UpdateTarget);
    }

    /// Copy the target value into the source.
    pub fn update_source(&self) {
        self.request(BindingAction::UpdateSource);
    }

    fn request(&self, action: BindingAction) {
        if self.is_disposed() {
            return;
        }
        if self.schedule_delayed(action) {
            return;
        }
        self.perform(action);
    }

    fn perform(&self, action: BindingAction) {
        if self.is_disposed() {
            return;
        }
        let _span = tracing::trace_span!(target: TARGET, "update", %action, binding = %self.inner.description).entered();
        let result = match action {
            BindingAction::UpdateTarget => self.inner.target.set_value(&*self.inner.source),
            BindingAction::UpdateSource => self.inner.source.set_value(&*self.inner.target),
        };
        match result {
            Ok(true) => self.inner.binding_updated.emit(BindingEvent { action }),
            Ok(false) => {
                tracing::trace!(target: TARGET, %action, "nothing to transfer");
            }
            Err(err) if err.is_lifetime() => {
                tracing::trace!(target: TARGET, %action, error = %err, "update skipped");
            }
            Err(err) => self.raise_exception(action, err),
        }
    }

    /// Wrap, log and publish a runtime failure.
    pub(crate) fn raise_exception(&self, action: BindingAction, original: BindingError) {
        let error = BindingError::wrap(action, self.inner.description.clone(), original.clone());
        if self.inner.log_errors.load(Ordering::Relaxed) {
            tracing::error!(target: TARGET, %action, binding = %self.inner.description, error = %original, "binding update failed");
        }
        self.inner.binding_exception.emit(BindingExceptionEvent {
            action,
            error,
            original,
        });
    }

    /// Check both sides: the target path first, then every source path.
    ///
    /// Every source is checked even after one is found invalid. The first
    /// failure is raised through [`binding_exception`](Self::binding_exception),
    /// tagged [`UpdateTarget`](BindingAction::UpdateTarget) for the target side
    /// and [`UpdateSource`](BindingAction::UpdateSource) for the source side.
    pub fn validate(&self) -> bool {
        if self.is_disposed() {
            return false;
        }
        let mut first_error = None;
        let mut check = |accessor: &SharedAccessor, action: BindingAction| {
            let mut valid = true;
            for source in accessor.sources() {
                match source.validate(true) {
                    Ok(ok) => valid &= ok,
                    Err(err) if err.is_lifetime() => valid = false,
                    Err(err) => {
                        valid = false;
                        first_error.get_or_insert((action, err));
                    }
                }
            }
            valid
        };

        let valid = check(&self.inner.target, BindingAction::UpdateTarget)
            && check(&self.inner.source, BindingAction::UpdateSource);
        if let Some((action, err)) = first_error {
            self.raise_exception(action, err);
            return false;
        }
        valid
    }

    /// Tear the binding down. Idempotent.
    ///
    /// Detaches every behavior, disposes both accessors and raises
    /// [`disposed`](Self::disposed) once.
    pub fn dispose(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
        }

        self.inner.binding_updated.disconnect_all();
        self.inner.binding_exception.disconnect_all();
        self.inner.behaviors.clear(self);
        {
            let mut delays = self.inner.delays.lock();
            for slot in delays.iter_mut() {
                if let Some(id) = slot.take().and_then(|slot| slot.pending) {
                    DelayScheduler::global().cancel(id);
                }
            }
        }
        self.inner.target.dispose();
        self.inner.source.dispose();
        self.inner.state.lock().context.clear();

        tracing::debug!(target: TARGET, binding = %self.inner.description, "binding disposed");
        self.inner.disposed.emit(());
        self.inner.disposed.disconnect_all();
    }

    /// Configure or clear the delay for one direction.
    pub(crate) fn set_delay(&self, action: BindingAction, delay: Option<Duration>) {
        let mut delays = self.inner.delays.lock();
        let slot = &mut delays[action.index()];
        if let Some(id) = slot.take().and_then(|slot| slot.pending) {
            DelayScheduler::global().cancel(id);
        }
        *slot = delay.map(|delay| DelaySlot { delay, pending: None });
    }

    /// Queue a delayed update. Returns `false` when no delay is configured.
    fn schedule_delayed(&self, action: BindingAction) -> bool {
        let mut delays = self.inner.delays.lock();
        let Some(slot) = delays[action.index()].as_mut() else {
            return false;
        };
        let scheduler = DelayScheduler::global();
        if let Some(id) = slot.pending {
            if scheduler.reschedule(id, slot.delay) {
                return true;
            }
        }

        let weak = self.downgrade();
        let id = scheduler.schedule_once(slot.delay, move || {
            if let Some(binding) = weak.upgrade() {
                let _ = dispatch::invoke_on_affinity_thread_async(move || binding.perform(action));
            }
        });
        slot.pending = Some(id);
        true
    }

    pub(crate) fn on_behavior_added(&self, behavior: &SharedBehavior) {
        tracing::debug!(target: TARGET, binding = %self.inner.description, behavior = behavior.name(), "behavior attached");
    }

    pub(crate) fn on_behavior_removed(&self, behavior: &SharedBehavior) {
        tracing::debug!(target: TARGET, binding = %self.inner.description, behavior = behavior.name(), "behavior detached");
    }

    /// The binding's key/value context.
    pub fn context(&self) -> BindingContext<'_> {
        BindingContext { binding: self }
    }
}

fn describe(target: &SharedAccessor, source: &SharedAccessor) -> String {
    let paths = |accessor: &SharedAccessor| {
        accessor
            .sources()
            .iter()
            .map(|source| source.path().as_str().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!("{} <- {}", paths(target), paths(source))
}

impl fmt::Debug for DataBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBinding")
            .field("description", &self.inner.description)
            .field("disposed", &self.is_disposed())
            .field("behaviors", &self.inner.behaviors.len())
            .finish()
    }
}

impl IntoValue for DataBinding {
    fn into_value(self) -> Value {
        Value::new(self)
    }
}

impl FromValue for DataBinding {
    fn from_value(value: &Value) -> Option<Self> {
        value.get::<DataBinding>()
    }
}

/// View over a binding's behavior collection.
pub struct Behaviors<'a> {
    binding: &'a DataBinding,
}

impl Behaviors<'_> {
    /// Attach `behavior`.
    ///
    /// Fails when a behavior with the same id is present or the binding is
    /// disposed. `Ok(false)` when the behavior declined to attach.
    pub fn add(&self, behavior: SharedBehavior) -> Result<bool> {
        if self.binding.is_disposed() {
            return Err(BindingError::Disposed);
        }
        self.binding.inner.behaviors.add(self.binding, behavior)
    }

    /// Detach `behavior`. `false` if it was not attached.
    pub fn remove(&self, behavior: &SharedBehavior) -> bool {
        self.binding.inner.behaviors.remove(self.binding, behavior)
    }

    /// Detach every behavior.
    pub fn clear(&self) {
        self.binding.inner.behaviors.clear(self.binding);
    }

    /// Whether this exact behavior is attached.
    pub fn contains(&self, behavior: &SharedBehavior) -> bool {
        self.binding.inner.behaviors.contains(behavior)
    }

    /// The behavior with the given id.
    pub fn get(&self, id: BehaviorId) -> Option<SharedBehavior> {
        self.binding.inner.behaviors.get(id)
    }

    pub fn len(&self) -> usize {
        self.binding.inner.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocated slots.
    pub fn capacity(&self) -> usize {
        self.binding.inner.behaviors.capacity()
    }

    /// Snapshot in iteration order.
    pub fn to_vec(&self) -> Vec<SharedBehavior> {
        self.binding.inner.behaviors.to_vec()
    }
}

/// View over a binding's key/value context.
///
/// Every operation takes the binding's state lock.
pub struct BindingContext<'a> {
    binding: &'a DataBinding,
}

impl BindingContext<'_> {
    /// Number of entries, counting the binding itself.
    pub fn count(&self) -> usize {
        self.binding.inner.state.lock().context.len()
    }

    /// Add an entry. Fails if the key is present.
    pub fn add<T: IntoValue>(&self, key: DataConstant<T>, value: T) -> Result<()> {
        let mut state = self.binding.inner.state.lock();
        if state.context.contains(key.id) {
            return Err(BindingError::Unsupported(format!(
                "the context already contains the key '{}'",
                key.id
            )));
        }
        state.context.insert(key.id, value.into_value());
        Ok(())
    }

    /// Add or replace an entry.
    pub fn add_or_update<T: IntoValue>(&self, key: DataConstant<T>, value: T) {
        self.binding.inner.state.lock().context.insert(key.id, value.into_value());
    }

    /// Replace an entry with `update(current)`.
    pub fn update<T, F>(&self, key: DataConstant<T>, update: F)
    where
        T: IntoValue + FromValue,
        F: FnOnce(Option<T>) -> T,
    {
        let mut state = self.binding.inner.state.lock();
        let current = self.read(&state.context, key.id).and_then(|value| T::from_value(&value));
        let next = update(current);
        state.context.insert(key.id, next.into_value());
    }

    /// The entry under `key`.
    pub fn get_data<T: FromValue>(&self, key: DataConstant<T>) -> Option<T> {
        let state = self.binding.inner.state.lock();
        self.read(&state.context, key.id).and_then(|value| T::from_value(&value))
    }

    fn read(&self, context: &ContextState, id: &str) -> Option<Value> {
        if context.is_self_key(id) {
            return Some(self.binding.clone().into_value());
        }
        context.entries.as_ref().and_then(|entries| entries.get(id)).cloned()
    }

    pub fn contains<T>(&self, key: DataConstant<T>) -> bool {
        self.binding.inner.state.lock().context.contains(key.id)
    }

    /// Remove an entry. `false` when nothing was removed.
    pub fn remove<T>(&self, key: DataConstant<T>) -> bool {
        self.binding.inner.state.lock().context.remove(key.id)
    }

    /// Remove every entry, including the binding itself.
    ///
    /// Does nothing while the context has never been written to.
    pub fn clear(&self) {
        self.binding.inner.state.lock().context.clear();
    }

    pub fn keys(&self) -> Vec<&'static str> {
        self.binding.inner.state.lock().context.keys()
    }
}

static_assertions::assert_impl_all!(DataBinding: Send, Sync);
static_assertions::assert_impl_all!(WeakDataBinding: Send, Sync);
