//! Attached member storage.
//!
//! Attached members let code outside a type give it extra bindable state,
//! such as the `DataContext` every object can carry. Values are kept in a
//! process-wide table keyed by object identity and held only as long as the
//! owning object is alive.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;

use crate::error::{BindingError, Result};
use crate::member::{BindingMember, MemberKind};
use crate::value::{BindableValue, Value, ValueType, WeakObject};
use crate::weak_event::{EventListenerList, SharedListener, Subscription};

/// Name of the attached member every object carries.
pub const DATA_CONTEXT_MEMBER: &str = "DataContext";

/// Name of the attached parent member used by the default tree manager.
pub const PARENT_MEMBER: &str = "#Parent";

struct AttachedSlot {
    value: Value,
    listeners: Arc<EventListenerList>,
}

struct AttachedEntry {
    owner: WeakObject,
    slots: HashMap<String, AttachedSlot>,
}

/// Per-object storage for attached values.
///
/// Entries are keyed by the address of the owning object and checked against a
/// weak handle, so a recycled address never sees a dead object's values.
pub struct AttachedValues {
    entries: Mutex<HashMap<usize, AttachedEntry>>,
}

static ATTACHED_VALUES: LazyLock<AttachedValues> = LazyLock::new(AttachedValues::new);

/// The process-wide attached value table.
pub fn attached_values() -> &'static AttachedValues {
    &ATTACHED_VALUES
}

fn object_key(source: &Value) -> Result<(usize, WeakObject)> {
    let object = source.as_object().ok_or(BindingError::TypeMismatch {
        expected: "object",
        got: "null",
    })?;
    let key = Arc::as_ptr(object) as *const () as usize;
    Ok((key, Arc::downgrade(object)))
}

impl Default for AttachedValues {
    fn default() -> Self {
        Self::new()
    }
}

impl AttachedValues {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// The stored value, or `None` if it was never set.
    pub fn get(&self, source: &Value, name: &str) -> Option<Value> {
        let (key, owner) = object_key(source).ok()?;
        let entries = self.entries.lock();
        let entry = entries.get(&key)?;
        if !entry.owner.ptr_eq(&owner) {
            return None;
        }
        entry.slots.get(name).map(|slot| slot.value.clone())
    }

    /// Store a value, notifying listeners when `same` reports a change.
    ///
    /// Returns whether the value changed.
    pub fn set_with<F>(&self, source: &Value, name: &str, value: Value, same: F) -> Result<bool>
    where
        F: FnOnce(&Value, &Value) -> bool,
    {
        let (key, owner) = object_key(source)?;
        let listeners = {
            let mut entries = self.entries.lock();
            let entry = self.entry_for(&mut entries, key, owner);
            let slot = entry
                .slots
                .entry(name.to_string())
                .or_insert_with(|| AttachedSlot {
                    value: Value::Unset,
                    listeners: Arc::new(EventListenerList::new()),
                });
            if same(&slot.value, &value) {
                return Ok(false);
            }
            slot.value = value.clone();
            slot.listeners.clone()
        };
        tracing::trace!(target: "trellis_core::attached", member = name, "attached value changed");
        listeners.raise(source, &value);
        Ok(true)
    }

    /// Subscribe to changes of one attached value on one object.
    pub fn observe(&self, source: &Value, name: &str, listener: &SharedListener) -> Option<Subscription> {
        let (key, owner) = object_key(source).ok()?;
        let listeners = {
            let mut entries = self.entries.lock();
            let entry = self.entry_for(&mut entries, key, owner);
            entry
                .slots
                .entry(name.to_string())
                .or_insert_with(|| AttachedSlot {
                    value: Value::Unset,
                    listeners: Arc::new(EventListenerList::new()),
                })
                .listeners
                .clone()
        };
        Some(listeners.add(listener))
    }

    /// Number of live objects with attached values.
    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock();
        entries.retain(|_, entry| entry.owner.strong_count() > 0);
        entries.len()
    }

    /// Whether no object has attached values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry_for<'a>(
        &self,
        entries: &'a mut HashMap<usize, AttachedEntry>,
        key: usize,
        owner: WeakObject,
    ) -> &'a mut AttachedEntry {
        let stale = entries
            .get(&key)
            .is_some_and(|entry| !entry.owner.ptr_eq(&owner));
        if stale {
            entries.remove(&key);
        }
        if !entries.contains_key(&key) {
            entries.retain(|_, entry| entry.owner.strong_count() > 0);
        }
        entries.entry(key).or_insert_with(|| AttachedEntry {
            owner,
            slots: HashMap::new(),
        })
    }
}

/// An observable attached member backed by [`attached_values`].
///
/// Reading a value that was never set yields [`Value::Null`].
pub fn attached_auto_property<V: BindableValue>(name: &str) -> BindingMember {
    let get_name: Arc<str> = Arc::from(name);
    let set_name = get_name.clone();
    let observe_name = get_name.clone();

    BindingMember::new(name, MemberKind::Attached, ValueType::of::<V>())
        .with_getter(move |source, _| {
            object_key(source)?;
            Ok(attached_values()
                .get(source, &get_name)
                .filter(|value| !value.is_unset())
                .unwrap_or(Value::Null))
        })
        .with_raw_setter(move |source, _, value| {
            let typed = V::from_value(&value).ok_or(BindingError::TypeMismatch {
                expected: std::any::type_name::<V>(),
                got: "a value of another type",
            })?;
            attached_values().set_with(source, &set_name, value, |old, _| {
                V::from_value(old).is_some_and(|old| old.same_value(&typed))
            })?;
            Ok(())
        })
        .with_observer(move |source, listener| attached_values().observe(source, &observe_name, listener))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weak_event::FnListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct View;

    #[test]
    fn test_auto_property_defaults_to_null() {
        let member = attached_auto_property::<Value>("TestDefault");
        let view = Value::new(View);
        assert!(member.get_value(&view, &[]).unwrap().is_null());
        assert!(member.get_value(&Value::Null, &[]).is_err());
    }

    #[test]
    fn test_auto_property_set_and_notify() {
        let member = attached_auto_property::<i32>("TestNotify");
        let view = Value::new(View);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let listener = FnListener::shared(move |_, _| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });
        let _subscription = member.try_observe(&view, &listener).unwrap();

        member.set_value(&view, &[], Value::new(3i32)).unwrap();
        member.set_value(&view, &[], Value::new(3i32)).unwrap();
        member.set_value(&view, &[], Value::new(4i32)).unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(member.get_value(&view, &[]).unwrap().get::<i32>(), Some(4));
        assert!(member.set_value(&view, &[], Value::from("x")).is_err());
    }

    #[test]
    fn test_values_are_per_object() {
        let member = attached_auto_property::<i32>("TestPerObject");
        let a = Value::new(View);
        let b = Value::new(View);
        member.set_value(&a, &[], Value::new(1i32)).unwrap();
        assert!(member.get_value(&b, &[]).unwrap().is_null());
        assert_eq!(member.get_value(&a, &[]).unwrap().get::<i32>(), Some(1));
    }

    #[test]
    fn test_dead_owner_is_not_resurrected() {
        let table = AttachedValues::new();
        let view = Value::new(View);
        table
            .set_with(&view, "Name", Value::new(1i32), |a, b| a.same_as(b))
            .unwrap();
        assert_eq!(table.len(), 1);
        drop(view);
        assert_eq!(table.len(), 0);
        assert!(table.is_empty());
    }
}
