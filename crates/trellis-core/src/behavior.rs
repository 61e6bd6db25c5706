//! Binding behaviors.
//!
//! A behavior is a policy object attached to one [`DataBinding`]: the update
//! mode, a delay, error aggregation. Every behavior carries a [`BehaviorId`];
//! a binding holds at most one behavior per id, so the five binding modes
//! share [`BehaviorId::BINDING_MODE`] and replace nothing silently.
//!
//! Adding a behavior calls [`BindingBehavior::attach`]. A behavior that
//! returns `false` declines the binding and is dropped without error.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::binding::{BindingAction, DataBinding};
use crate::error::{BindingError, Result};
use crate::observer::PathObserver;
use crate::signal::{ConnectionId, ConnectionType, Signal};

const TARGET: &str = "trellis_core::behavior";

/// Identity of a behavior kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BehaviorId(&'static str);

impl BehaviorId {
    /// Shared by every binding mode.
    pub const BINDING_MODE: BehaviorId = BehaviorId("BindingMode");
    /// Delay applied to source updates.
    pub const DELAY: BehaviorId = BehaviorId("Delay");
    /// Delay applied to target updates.
    pub const TARGET_DELAY: BehaviorId = BehaviorId("TargetDelay");
    /// Exception-to-error aggregation.
    pub const VALIDATES_ON_EXCEPTIONS: BehaviorId = BehaviorId("ValidatesOnExceptions");

    /// A custom id.
    pub const fn new(id: &'static str) -> Self {
        Self(id)
    }

    /// The id string.
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for BehaviorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A policy attached to a binding.
pub trait BindingBehavior: Send + Sync + 'static {
    /// The kind id; one behavior per id per binding.
    fn id(&self) -> BehaviorId;

    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Hook into `binding`. Returning `false` declines the binding.
    fn attach(&self, binding: &DataBinding) -> bool;

    /// Undo [`attach`](Self::attach).
    fn detach(&self, binding: &DataBinding);

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
}

/// Shared behavior handle.
pub type SharedBehavior = Arc<dyn BindingBehavior>;

fn same_behavior(a: &SharedBehavior, b: &SharedBehavior) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// The ordered behaviors of one binding.
#[derive(Default)]
pub(crate) struct BehaviorCollection {
    items: Mutex<Vec<SharedBehavior>>,
}

impl BehaviorCollection {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn duplicate_of(items: &[SharedBehavior], behavior: &SharedBehavior) -> Option<BindingError> {
        items
            .iter()
            .find(|item| item.id() == behavior.id())
            .map(|existing| BindingError::DuplicateBehavior {
                existing: existing.name().to_string(),
                new: behavior.name().to_string(),
            })
    }

    /// Attach and insert. `Ok(false)` when the behavior declined.
    pub(crate) fn add(&self, binding: &DataBinding, behavior: SharedBehavior) -> Result<bool> {
        if let Some(err) = Self::duplicate_of(&self.items.lock(), &behavior) {
            return Err(err);
        }
        if !behavior.attach(binding) {
            tracing::debug!(target: TARGET, behavior = behavior.name(), "behavior declined the binding");
            return Ok(false);
        }

        {
            let mut items = self.items.lock();
            if let Some(err) = Self::duplicate_of(&items, &behavior) {
                drop(items);
                behavior.detach(binding);
                return Err(err);
            }
            if items.len() == items.capacity() {
                let additional = items.capacity().max(2);
                items.reserve_exact(additional);
            }
            items.push(behavior.clone());
        }
        binding.on_behavior_added(&behavior);
        Ok(true)
    }

    /// Detach and remove. `false` when the behavior is not in the collection.
    pub(crate) fn remove(&self, binding: &DataBinding, behavior: &SharedBehavior) -> bool {
        let removed = {
            let mut items = self.items.lock();
            items
                .iter()
                .position(|item| same_behavior(item, behavior))
                .map(|index| items.remove(index))
        };
        match removed {
            Some(removed) => {
                removed.detach(binding);
                binding.on_behavior_removed(&removed);
                true
            }
            None => false,
        }
    }

    /// Remove every behavior, first one first.
    pub(crate) fn clear(&self, binding: &DataBinding) {
        loop {
            let first = {
                let mut items = self.items.lock();
                if items.is_empty() {
                    break;
                }
                items.remove(0)
            };
            first.detach(binding);
            binding.on_behavior_removed(&first);
        }
    }

    pub(crate) fn contains(&self, behavior: &SharedBehavior) -> bool {
        self.items.lock().iter().any(|item| same_behavior(item, behavior))
    }

    pub(crate) fn get(&self, id: BehaviorId) -> Option<SharedBehavior> {
        self.items.lock().iter().find(|item| item.id() == id).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.items.lock().capacity()
    }

    pub(crate) fn to_vec(&self) -> Vec<SharedBehavior> {
        self.items.lock().clone()
    }
}

/// Signal connections a behavior made, released on detach.
#[derive(Default)]
struct Hooks {
    observers: Mutex<Vec<(PathObserver, ConnectionId)>>,
    updated: Mutex<Vec<ConnectionId>>,
    exceptions: Mutex<Vec<ConnectionId>>,
}

impl Hooks {
    /// Run `action` on the binding whenever one of the observers changes.
    fn forward(&self, observers: impl IntoIterator<Item = PathObserver>, binding: &DataBinding, action: BindingAction) {
        let mut hooks = self.observers.lock();
        for observer in observers {
            let weak = binding.downgrade();
            let id = observer.value_changed().connect_with_type(
                move |_| {
                    if let Some(binding) = weak.upgrade() {
                        match action {
                            BindingAction::UpdateSource => binding.update_source(),
                            BindingAction::UpdateTarget => binding.update_target(),
                        }
                    }
                },
                ConnectionType::Direct,
            );
            hooks.push((observer, id));
        }
    }

    fn release(&self, binding: &DataBinding) {
        for (observer, id) in self.observers.lock().drain(..) {
            observer.value_changed().disconnect(id);
        }
        for id in self.updated.lock().drain(..) {
            binding.binding_updated().disconnect(id);
        }
        for id in self.exceptions.lock().drain(..) {
            binding.binding_exception().disconnect(id);
        }
    }
}

fn source_observers(binding: &DataBinding) -> Vec<PathObserver> {
    binding
        .source_accessor()
        .sources()
        .iter()
        .map(|source| source.observer().clone())
        .collect()
}

fn target_observers(binding: &DataBinding) -> Vec<PathObserver> {
    binding
        .target_accessor()
        .sources()
        .iter()
        .map(|source| source.observer().clone())
        .collect()
}

macro_rules! mode_behavior {
    ($(#[$meta:meta])* $name:ident, $label:literal, |$hooks:ident, $binding:ident| $attach:block) => {
        $(#[$meta])*
        #[derive(Default)]
        pub struct $name {
            hooks: Hooks,
        }

        impl $name {
            /// Create the mode.
            pub fn new() -> Self {
                Self::default()
            }

            /// Create the mode as a shared behavior.
            pub fn shared() -> SharedBehavior {
                Arc::new(Self::new())
            }
        }

        impl BindingBehavior for $name {
            fn id(&self) -> BehaviorId {
                BehaviorId::BINDING_MODE
            }

            fn name(&self) -> &str {
                $label
            }

            fn attach(&self, $binding: &DataBinding) -> bool {
                let $hooks = &self.hooks;
                $attach
                true
            }

            fn detach(&self, binding: &DataBinding) {
                self.hooks.release(binding);
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}

mode_behavior!(
    /// Source changes update the target and target changes update the source.
    TwoWayBindingMode,
    "TwoWay",
    |hooks, binding| {
        hooks.forward(source_observers(binding), binding, BindingAction::UpdateTarget);
        if binding.source_accessor().can_write() {
            hooks.forward(target_observers(binding), binding, BindingAction::UpdateSource);
        }
    }
);

mode_behavior!(
    /// Source changes update the target.
    OneWayBindingMode,
    "OneWay",
    |hooks, binding| {
        hooks.forward(source_observers(binding), binding, BindingAction::UpdateTarget);
    }
);

mode_behavior!(
    /// Target changes update the source.
    OneWayToSourceBindingMode,
    "OneWayToSource",
    |hooks, binding| {
        hooks.forward(target_observers(binding), binding, BindingAction::UpdateSource);
    }
);

mode_behavior!(
    /// Nothing is propagated automatically.
    NoneBindingMode,
    "None",
    |_hooks, _binding| {}
);

/// Updates the target once, as soon as the source has a value.
#[derive(Default)]
pub struct OneTimeBindingMode {
    dispose_after_update: bool,
    hooks: Arc<Hooks>,
    done: Arc<AtomicBool>,
}

impl OneTimeBindingMode {
    /// Create the mode. With `dispose_after_update` the binding disposes
    /// itself after the first successful target update.
    pub fn new(dispose_after_update: bool) -> Self {
        Self {
            dispose_after_update,
            ..Self::default()
        }
    }

    /// Create the mode as a shared behavior.
    pub fn shared(dispose_after_update: bool) -> SharedBehavior {
        Arc::new(Self::new(dispose_after_update))
    }
}

impl BindingBehavior for OneTimeBindingMode {
    fn id(&self) -> BehaviorId {
        BehaviorId::BINDING_MODE
    }

    fn name(&self) -> &str {
        "OneTime"
    }

    fn attach(&self, binding: &DataBinding) -> bool {
        self.hooks
            .forward(source_observers(binding), binding, BindingAction::UpdateTarget);

        let hooks = self.hooks.clone();
        let done = self.done.clone();
        let dispose_after_update = self.dispose_after_update;
        let weak = binding.downgrade();
        let id = binding.binding_updated().connect_with_type(
            move |event| {
                if event.action != BindingAction::UpdateTarget || done.swap(true, Ordering::SeqCst) {
                    return;
                }
                let Some(binding) = weak.upgrade() else {
                    return;
                };
                hooks.release(&binding);
                if dispose_after_update {
                    binding.dispose();
                }
            },
            ConnectionType::Direct,
        );
        self.hooks.updated.lock().push(id);
        true
    }

    fn detach(&self, binding: &DataBinding) {
        self.hooks.release(binding);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Delays source or target updates, restarting the delay on every change.
pub struct DelayBindingBehavior {
    delay: Duration,
    action: BindingAction,
}

impl DelayBindingBehavior {
    /// Delay source updates.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            action: BindingAction::UpdateSource,
        }
    }

    /// Delay target updates.
    pub fn target(delay: Duration) -> Self {
        Self {
            delay,
            action: BindingAction::UpdateTarget,
        }
    }

    /// The configured delay.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// The delayed direction.
    pub fn action(&self) -> BindingAction {
        self.action
    }
}

impl BindingBehavior for DelayBindingBehavior {
    fn id(&self) -> BehaviorId {
        match self.action {
            BindingAction::UpdateSource => BehaviorId::DELAY,
            BindingAction::UpdateTarget => BehaviorId::TARGET_DELAY,
        }
    }

    fn name(&self) -> &str {
        match self.action {
            BindingAction::UpdateSource => "Delay",
            BindingAction::UpdateTarget => "TargetDelay",
        }
    }

    fn attach(&self, binding: &DataBinding) -> bool {
        if self.delay.is_zero() {
            return false;
        }
        binding.set_delay(self.action, Some(self.delay));
        true
    }

    fn detach(&self, binding: &DataBinding) {
        binding.set_delay(self.action, None);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Collects the errors a binding raises until its next successful update.
#[derive(Default)]
pub struct ValidatesOnExceptionsBehavior {
    errors: Arc<Mutex<Vec<BindingError>>>,
    errors_changed: Arc<Signal<()>>,
    hooks: Hooks,
}

impl ValidatesOnExceptionsBehavior {
    /// Create the behavior.
    pub fn new() -> Self {
        Self::default()
    }

    /// The collected errors, innermost cause first.
    pub fn errors(&self) -> Vec<BindingError> {
        self.errors.lock().clone()
    }

    /// Whether any error is recorded.
    pub fn has_errors(&self) -> bool {
        !self.errors.lock().is_empty()
    }

    /// Raised when the error list changes.
    pub fn errors_changed(&self) -> &Signal<()> {
        &self.errors_changed
    }
}

impl BindingBehavior for ValidatesOnExceptionsBehavior {
    fn id(&self) -> BehaviorId {
        BehaviorId::VALIDATES_ON_EXCEPTIONS
    }

    fn name(&self) -> &str {
        "ValidatesOnExceptions"
    }

    fn attach(&self, binding: &DataBinding) -> bool {
        let errors = self.errors.clone();
        let changed = self.errors_changed.clone();
        let exception_id = binding.binding_exception().connect_with_type(
            move |event| {
                *errors.lock() = vec![event.original.clone()];
                changed.emit(());
            },
            ConnectionType::Direct,
        );

        let errors = self.errors.clone();
        let changed = self.errors_changed.clone();
        let updated_id = binding.binding_updated().connect_with_type(
            move |_| {
                let cleared = {
                    let mut errors = errors.lock();
                    let had_errors = !errors.is_empty();
                    errors.clear();
                    had_errors
                };
                if cleared {
                    changed.emit(());
                }
            },
            ConnectionType::Direct,
        );

        self.hooks.exceptions.lock().push(exception_id);
        self.hooks.updated.lock().push(updated_id);
        true
    }

    fn detach(&self, binding: &DataBinding) {
        self.hooks.release(binding);
        let had_errors = {
            let mut errors = self.errors.lock();
            let had_errors = !errors.is_empty();
            errors.clear();
            had_errors
        };
        if had_errors {
            self.errors_changed.emit(());
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
