//! Observable property storage.
//!
//! [`Property<T>`] is the storage cell view-models use for bindable state. It
//! owns its value and a [`Signal`] that fires after every effective change, so
//! a member descriptor built with
//! [`BindingMember::from_property`](crate::member::BindingMember::from_property)
//! gets get, set and change notification from one field.
//!
//! # Example
//!
//! ```
//! use trellis_core::Property;
//!
//! let prop = Property::new(42);
//! assert_eq!(prop.get(), 42);
//!
//! // Setting same value returns false (no change)
//! assert!(!prop.set(42));
//!
//! // Setting different value returns true (changed)
//! assert!(prop.set(100));
//! assert_eq!(prop.get(), 100);
//! ```

use std::fmt;

use parking_lot::RwLock;

use crate::signal::Signal;

/// Observable storage for one value.
///
/// `set()` compares the new value with the current one and only stores and
/// notifies when they differ. The change signal is emitted after the write
/// lock is released, so slots may read the property.
pub struct Property<T> {
    value: RwLock<T>,
    changed: Signal<T>,
}

impl<T: Clone + Send + 'static> Property<T> {
    /// A property holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            value: RwLock::new(value),
            changed: Signal::new(),
        }
    }

    /// Get the current value.
    ///
    /// Clones; use [`with`](Self::with) to avoid the copy.
    pub fn get(&self) -> T {
        self.value.read().clone()
    }

    /// Borrow the value for the duration of `f`.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        f(&self.value.read())
    }

    /// Store `value` without notifying, even if it differs.
    pub fn set_silent(&self, value: T) {
        *self.value.write() = value;
    }

    /// Store the value unconditionally and notify.
    pub fn force_set(&self, value: T) {
        *self.value.write() = value.clone();
        self.changed.emit(value);
    }

    /// Set the value if `same` reports it differs from the current one.
    ///
    /// Returns `true` if the value changed.
    pub fn set_with<F>(&self, value: T, same: F) -> bool
    where
        F: FnOnce(&T, &T) -> bool,
    {
        {
            let mut current = self.value.write();
            if same(&current, &value) {
                return false;
            }
            *current = value.clone();
        }
        tracing::trace!(target: "trellis_core::property", "property changed");
        self.changed.emit(value);
        true
    }

    /// The signal emitted with the new value after each change.
    pub fn changed(&self) -> &Signal<T> {
        &self.changed
    }
}

impl<T: Clone + PartialEq + Send + 'static> Property<T> {
    /// Store `value` if it differs from the current one; `true` when it did.
    pub fn set(&self, value: T) -> bool {
        self.replace(value).is_some()
    }

    /// Like [`set`](Self::set), handing back the replaced value.
    pub fn replace(&self, value: T) -> Option<T> {
        let old = {
            let mut current = self.value.write();
            if *current == value {
                return None;
            }
            std::mem::replace(&mut *current, value.clone())
        };
        tracing::trace!(target: "trellis_core::property", "property changed");
        self.changed.emit(value);
        Some(old)
    }
}

impl<T: Clone + Send + 'static> Clone for Property<T> {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

impl<T: Clone + Default + Send + 'static> Default for Property<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + fmt::Debug + Send + 'static> fmt::Debug for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("value", &self.get())
            .finish()
    }
}

/// Read access to a [`Property`] without its setters.
pub struct ReadOnlyProperty<'a, T> {
    inner: &'a Property<T>,
}

impl<'a, T: Clone + Send + 'static> ReadOnlyProperty<'a, T> {
    /// Wrap `property`.
    pub fn new(property: &'a Property<T>) -> Self {
        Self { inner: property }
    }

    /// Get the current value.
    pub fn get(&self) -> T {
        self.inner.get()
    }

    /// Borrow the value for the duration of `f`.
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        self.inner.with(f)
    }

    /// The change signal of the underlying property.
    pub fn changed(&self) -> &Signal<T> {
        self.inner.changed()
    }
}

static_assertions::assert_impl_all!(Property<String>: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_set_reports_change() {
        let width = Property::new(320u32);
        assert!(!width.set(320));
        assert!(width.set(640));
        assert_eq!(width.get(), 640);
    }

    #[test]
    fn test_replace_hands_back_previous_path() {
        let path = Property::new("Child.Name".to_string());
        assert!(path.replace("Child.Name".to_string()).is_none());

        let previous = path.replace("Items[0]".to_string());
        assert_eq!(previous.as_deref(), Some("Child.Name"));
        assert_eq!(path.get(), "Items[0]");
    }

    #[test]
    fn test_with_borrows_without_clone() {
        let segments = Property::new(vec!["Child".to_string(), "Name".to_string()]);
        let joined = segments.with(|parts| parts.join("."));
        assert_eq!(joined, "Child.Name");
    }

    #[test]
    fn test_property_change_signal() {
        let prop = Arc::new(Property::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let prop_clone = prop.clone();
        prop.changed().connect(move |&value| {
            // The lock is released before emission.
            assert_eq!(prop_clone.get(), value);
            seen_clone.lock().push(value);
        });

        prop.set(1);
        prop.set(1);
        prop.set_silent(5);
        prop.force_set(5);

        assert_eq!(*seen.lock(), vec![1, 5]);
    }

    #[test]
    fn test_property_set_with_identity() {
        let first = Arc::new(5);
        let prop = Property::new(first.clone());
        assert!(!prop.set_with(first.clone(), |a, b| Arc::ptr_eq(a, b)));
        assert!(prop.set_with(Arc::new(5), |a, b| Arc::ptr_eq(a, b)));
    }

    #[test]
    fn test_read_only_property() {
        let prop = Property::new(42);
        let view = ReadOnlyProperty::new(&prop);
        assert_eq!(view.get(), 42);
        prop.set(7);
        assert_eq!(view.with(|v| *v), 7);
    }
}
