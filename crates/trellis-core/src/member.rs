//! Member descriptors.
//!
//! A [`BindingMember`] describes how to read, write and observe one named
//! member of one type. Descriptors are built once (usually by
//! `#[derive(Bindable)]`), registered with a
//! [`MemberProvider`](crate::provider::MemberProvider), and shared as
//! `Arc<BindingMember>` by every observer that walks through that member.
//!
//! Each operation is a type-erased closure over [`Value`]s. The typed
//! constructors ([`BindingMember::property`], [`BindingMember::from_property`],
//! [`BindingMember::indexer`], [`BindingMember::event`]) downcast the source
//! object once and report a [`BindingError::TypeMismatch`] when the source has
//! another type.
//!
//! # Example
//!
//! ```
//! use trellis_core::{BindingMember, Property, Value};
//!
//! struct Person {
//!     name: Property<String>,
//! }
//!
//! let member = BindingMember::from_property("Name", |p: &Person| &p.name);
//! let person = Value::new(Person { name: Property::new("Ada".to_string()) });
//!
//! member.set_value(&person, &[], Value::from("Grace")).unwrap();
//! assert_eq!(member.get_value(&person, &[]).unwrap().get::<String>(), Some("Grace".into()));
//! ```

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::error::{BindingError, Result};
use crate::path::INDEXER_MEMBER;
use crate::property::Property;
use crate::signal::Signal;
use crate::value::{BindableValue, FromValue, IntoValue, Value, ValueType};
use crate::weak_event::{SharedListener, Subscription};

/// What kind of member a descriptor represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// A named value member.
    Property,
    /// An indexer taking literal arguments.
    Indexer,
    /// An event (signal) member; observable but not readable.
    Event,
    /// A member registered from outside the type.
    Attached,
    /// The identity member of the empty path.
    Empty,
    /// Placeholder for a path that does not currently resolve.
    Unset,
}

/// Reads a member: `(source, args) -> value`.
pub type MemberGetter = Arc<dyn Fn(&Value, &[Value]) -> Result<Value> + Send + Sync>;

/// Writes a member: `(source, args, value)`.
pub type MemberSetter = Arc<dyn Fn(&Value, &[Value], Value) -> Result<()> + Send + Sync>;

/// Subscribes a listener to changes of a member on a source.
///
/// Returns `None` when the member never changes on that source.
pub type MemberObserver = Arc<dyn Fn(&Value, &SharedListener) -> Option<Subscription> + Send + Sync>;

/// A resolved, shareable description of one member of one type.
#[derive(Clone)]
pub struct BindingMember {
    name: Arc<str>,
    kind: MemberKind,
    value_type: ValueType,
    getter: Option<MemberGetter>,
    setter: Option<MemberSetter>,
    observer: Option<MemberObserver>,
}

static EMPTY_MEMBER: LazyLock<Arc<BindingMember>> = LazyLock::new(|| {
    Arc::new(
        BindingMember::new("", MemberKind::Empty, ValueType::of::<Value>())
            .with_getter(|source, _| Ok(source.clone())),
    )
});

static UNSET_MEMBER: LazyLock<Arc<BindingMember>> = LazyLock::new(|| {
    Arc::new(
        BindingMember::new("", MemberKind::Unset, ValueType::of::<Value>())
            .with_getter(|_, _| Ok(Value::Unset))
            .with_raw_setter(|_, _, _| Ok(())),
    )
});

impl BindingMember {
    /// Create a descriptor with no operations.
    pub fn new(name: impl Into<Arc<str>>, kind: MemberKind, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            kind,
            value_type,
            getter: None,
            setter: None,
            observer: None,
        }
    }

    /// The identity member used by the empty path.
    pub fn empty() -> Arc<BindingMember> {
        EMPTY_MEMBER.clone()
    }

    /// The member reported while a path does not resolve.
    pub fn unset() -> Arc<BindingMember> {
        UNSET_MEMBER.clone()
    }

    /// A read-only property backed by a typed getter.
    pub fn property<T, V, G>(name: &str, getter: G) -> Self
    where
        T: Any + Send + Sync,
        V: IntoValue + Any,
        G: Fn(&T) -> V + Send + Sync + 'static,
    {
        Self::new(name, MemberKind::Property, ValueType::of::<V>()).with_getter(move |source, _| {
            let target = downcast_source::<T>(source)?;
            Ok(getter(target).into_value())
        })
    }

    /// A read/write observable member backed by a [`Property`] field.
    pub fn from_property<T, V>(name: &str, property: fn(&T) -> &Property<V>) -> Self
    where
        T: Any + Send + Sync,
        V: BindableValue,
    {
        Self::new(name, MemberKind::Property, ValueType::of::<V>())
            .with_getter(move |source, _| {
                let target = downcast_source::<T>(source)?;
                Ok(property(target).get().into_value())
            })
            .with_raw_setter(move |source, _, value| {
                let target = downcast_source::<T>(source)?;
                let value = convert_value::<V>(&value)?;
                property(target).set_with(value, V::same_value);
                Ok(())
            })
            .with_observer(move |source, listener| {
                let target = source.downcast_ref::<T>()?;
                Some(property(target).changed().subscribe(listener))
            })
    }

    /// An indexer member (`[args]` segments).
    pub fn indexer<T, G>(getter: G) -> Self
    where
        T: Any + Send + Sync,
        G: Fn(&T, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self::new(INDEXER_MEMBER, MemberKind::Indexer, ValueType::of::<Value>()).with_getter(
            move |source, args| {
                let target = downcast_source::<T>(source)?;
                getter(target, args)
            },
        )
    }

    /// A read-only indexer over `Vec<V>`.
    pub fn vec_indexer<V>() -> Self
    where
        V: IntoValue + Clone + Any + Send + Sync,
    {
        Self::indexer::<Vec<V>, _>(|items, args| {
            let index = index_arg(args)?;
            items
                .get(index)
                .cloned()
                .map(IntoValue::into_value)
                .ok_or_else(|| {
                    BindingError::evaluation(
                        INDEXER_MEMBER,
                        format!("index {index} is out of range for length {}", items.len()),
                    )
                })
        })
    }

    /// A read-only indexer over `HashMap<String, V>`; missing keys read as unset.
    pub fn map_indexer<V>() -> Self
    where
        V: IntoValue + Clone + Any + Send + Sync,
    {
        Self::indexer::<HashMap<String, V>, _>(|map, args| {
            let key = key_arg(args)?;
            Ok(map.get(&key).cloned().map_or(Value::Unset, IntoValue::into_value))
        })
    }

    /// An event member backed by a [`Signal`] field.
    ///
    /// Events are observable but have no value.
    pub fn event<T, A>(name: &str, signal: fn(&T) -> &Signal<A>) -> Self
    where
        T: Any + Send + Sync,
        A: Clone + Any + Send + Sync,
    {
        Self::new(name, MemberKind::Event, ValueType::of::<A>()).with_notify(signal)
    }

    /// Replace the getter.
    pub fn with_getter<F>(mut self, getter: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.getter = Some(Arc::new(getter));
        self
    }

    /// Replace the setter with a type-erased one.
    pub fn with_raw_setter<F>(mut self, setter: F) -> Self
    where
        F: Fn(&Value, &[Value], Value) -> Result<()> + Send + Sync + 'static,
    {
        self.setter = Some(Arc::new(setter));
        self
    }

    /// Add a typed setter.
    pub fn with_setter<T, V, S>(self, setter: S) -> Self
    where
        T: Any + Send + Sync,
        V: FromValue + Any,
        S: Fn(&T, V) + Send + Sync + 'static,
    {
        self.with_raw_setter(move |source, _, value| {
            let target = downcast_source::<T>(source)?;
            setter(target, convert_value::<V>(&value)?);
            Ok(())
        })
    }

    /// Add a typed indexer setter.
    pub fn with_indexer_setter<T, S>(self, setter: S) -> Self
    where
        T: Any + Send + Sync,
        S: Fn(&T, &[Value], Value) -> Result<()> + Send + Sync + 'static,
    {
        self.with_raw_setter(move |source, args, value| {
            let target = downcast_source::<T>(source)?;
            setter(target, args, value)
        })
    }

    /// Replace the change observer.
    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: Fn(&Value, &SharedListener) -> Option<Subscription> + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Observe changes through a signal field of the source.
    pub fn with_notify<T, A>(self, signal: fn(&T) -> &Signal<A>) -> Self
    where
        T: Any + Send + Sync,
        A: Clone + Any + Send + Sync,
    {
        self.with_observer(move |source, listener| {
            let target = source.downcast_ref::<T>()?;
            Some(signal(target).subscribe(listener))
        })
    }

    /// Use the change observer of another member (typically an event).
    pub fn with_observer_of(mut self, other: &BindingMember) -> Self {
        self.observer = other.observer.clone();
        self
    }

    /// Drop the setter.
    pub fn read_only(mut self) -> Self {
        self.setter = None;
        self
    }

    /// Change the member kind.
    pub fn with_kind(mut self, kind: MemberKind) -> Self {
        self.kind = kind;
        self
    }

    /// The member name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The member kind.
    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    /// The declared value type.
    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    /// Whether the member has a getter.
    pub fn can_read(&self) -> bool {
        self.getter.is_some()
    }

    /// Whether the member has a setter.
    pub fn can_write(&self) -> bool {
        self.setter.is_some()
    }

    /// Whether the member can notify about changes.
    pub fn can_observe(&self) -> bool {
        self.observer.is_some()
    }

    /// Read the member from `source`.
    pub fn get_value(&self, source: &Value, args: &[Value]) -> Result<Value> {
        match &self.getter {
            Some(getter) => getter(source, args),
            None => Err(BindingError::Unsupported(format!(
                "the member '{}' cannot be read",
                self.name
            ))),
        }
    }

    /// Write the member on `source`.
    pub fn set_value(&self, source: &Value, args: &[Value], value: Value) -> Result<()> {
        match &self.setter {
            Some(setter) => setter(source, args, value),
            None => Err(BindingError::ReadOnlyMember {
                member: self.name.to_string(),
            }),
        }
    }

    /// Subscribe `listener` to changes of this member on `source`.
    pub fn try_observe(&self, source: &Value, listener: &SharedListener) -> Option<Subscription> {
        self.observer
            .as_ref()
            .and_then(|observer| observer(source, listener))
    }
}

impl fmt::Debug for BindingMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingMember")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("value_type", &self.value_type.short_name())
            .field("can_read", &self.can_read())
            .field("can_write", &self.can_write())
            .field("can_observe", &self.can_observe())
            .finish()
    }
}

/// A type whose members can be bound.
///
/// Implemented by `#[derive(Bindable)]`.
pub trait Bindable: Any + Send + Sync + Sized {
    /// Descriptors for every bindable member of the type.
    fn binding_members() -> Vec<BindingMember>;
}

/// Downcast a source value to the declaring type of a member.
pub fn downcast_source<T: Any>(source: &Value) -> Result<&T> {
    source
        .downcast_ref::<T>()
        .ok_or_else(|| BindingError::TypeMismatch {
            expected: type_name::<T>(),
            got: value_kind(source),
        })
}

fn convert_value<V: FromValue + Any>(value: &Value) -> Result<V> {
    V::from_value(value).ok_or_else(|| BindingError::TypeMismatch {
        expected: type_name::<V>(),
        got: value_kind(value),
    })
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Unset => "unset",
        Value::DoNothing => "do-nothing",
        Value::Null => "null",
        Value::Some(_) => "a value of another type",
    }
}

fn index_arg(args: &[Value]) -> Result<usize> {
    let first = args.first().ok_or_else(|| {
        BindingError::evaluation(INDEXER_MEMBER, "the indexer expects one argument")
    })?;
    first
        .get::<i64>()
        .and_then(|index| usize::try_from(index).ok())
        .ok_or(BindingError::TypeMismatch {
            expected: "usize",
            got: value_kind(first),
        })
}

fn key_arg(args: &[Value]) -> Result<String> {
    let first = args.first().ok_or_else(|| {
        BindingError::evaluation(INDEXER_MEMBER, "the indexer expects one argument")
    })?;
    first.get::<String>().ok_or(BindingError::TypeMismatch {
        expected: "String",
        got: value_kind(first),
    })
}

static_assertions::assert_impl_all!(BindingMember: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weak_event::FnListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Person {
        name: Property<String>,
        age: u32,
        renamed: Signal<String>,
    }

    fn person() -> Value {
        Value::new(Person {
            name: Property::new("Ada".to_string()),
            age: 36,
            renamed: Signal::new(),
        })
    }

    #[test]
    fn test_property_member_read_write_observe() {
        let member = BindingMember::from_property("Name", |p: &Person| &p.name);
        assert!(member.can_read() && member.can_write() && member.can_observe());
        assert_eq!(member.value_type().short_name(), "String");

        let source = person();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = hits.clone();
        let listener = FnListener::shared(move |_, _| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });
        let subscription = member.try_observe(&source, &listener).unwrap();

        member.set_value(&source, &[], Value::from("Grace")).unwrap();
        member.set_value(&source, &[], Value::from("Grace")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(
            member.get_value(&source, &[]).unwrap().get::<String>(),
            Some("Grace".to_string())
        );

        drop(subscription);
        member.set_value(&source, &[], Value::from("Linus")).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_read_only_member() {
        let member = BindingMember::property("Age", |p: &Person| p.age);
        assert!(!member.can_write());
        assert!(!member.can_observe());
        let source = person();
        assert_eq!(member.get_value(&source, &[]).unwrap().get::<u32>(), Some(36));
        assert!(matches!(
            member.set_value(&source, &[], Value::new(1u32)),
            Err(BindingError::ReadOnlyMember { .. })
        ));
    }

    #[test]
    fn test_type_mismatch() {
        let member = BindingMember::from_property("Name", |p: &Person| &p.name);
        let err = member.get_value(&Value::new(5i32), &[]).unwrap_err();
        assert!(matches!(err, BindingError::TypeMismatch { .. }));

        let err = member.set_value(&person(), &[], Value::new(5i32)).unwrap_err();
        assert!(matches!(err, BindingError::TypeMismatch { .. }));
    }

    #[test]
    fn test_event_member() {
        let member = BindingMember::event("Renamed", |p: &Person| &p.renamed);
        assert_eq!(member.kind(), MemberKind::Event);
        assert!(member.can_observe());
        assert!(!member.can_read());
        assert!(member.get_value(&person(), &[]).is_err());
    }

    #[test]
    fn test_vec_and_map_indexers() {
        let list = Value::new(vec!["a".to_string(), "b".to_string()]);
        let indexer = BindingMember::vec_indexer::<String>();
        assert_eq!(indexer.name(), INDEXER_MEMBER);
        assert_eq!(
            indexer.get_value(&list, &[Value::new(1i64)]).unwrap().get::<String>(),
            Some("b".to_string())
        );
        assert!(indexer.get_value(&list, &[Value::new(5i64)]).is_err());

        let mut map = HashMap::new();
        map.insert("k".to_string(), 3i32);
        let map = Value::new(map);
        let indexer = BindingMember::map_indexer::<i32>();
        assert_eq!(indexer.get_value(&map, &[Value::from("k")]).unwrap().get::<i32>(), Some(3));
        assert!(indexer.get_value(&map, &[Value::from("x")]).unwrap().is_unset());
    }

    #[test]
    fn test_empty_and_unset_members() {
        let source = person();
        let empty = BindingMember::empty();
        assert!(empty.get_value(&source, &[]).unwrap().same_as(&source));
        assert!(Arc::ptr_eq(&empty, &BindingMember::empty()));

        let unset = BindingMember::unset();
        assert!(unset.get_value(&source, &[]).unwrap().is_unset());
        assert!(unset.set_value(&source, &[], Value::Null).is_ok());
    }
}
