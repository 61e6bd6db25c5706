//! Dynamically typed values flowing through bindings.
//!
//! Binding paths walk arbitrary object graphs, so every value read from or
//! written to a member is carried as a [`Value`]. Objects are shared through
//! `Arc<dyn Any + Send + Sync>`; walking `A.B` keeps the identity of the `B`
//! object instead of cloning it.
//!
//! Two sentinels are distinct from a legitimate null:
//!
//! - [`Value::Unset`]: no value could be produced (the source is missing, or
//!   a getter failed).
//! - [`Value::DoNothing`]: a converter or behavior asks the binding to skip
//!   this update.
//!
//! Both leave the receiving side untouched.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, Weak};

/// A reference-counted, type-erased object.
pub type AnyObject = Arc<dyn Any + Send + Sync>;

/// A non-owning handle to an [`AnyObject`].
pub type WeakObject = Weak<dyn Any + Send + Sync>;

/// Runtime type information for a [`Value`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ValueType {
    /// The `TypeId` of the concrete type.
    pub id: TypeId,
    /// The type name, for diagnostics.
    pub name: &'static str,
}

impl ValueType {
    /// Type information for `T`.
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The type name without its module path.
    pub fn short_name(&self) -> &'static str {
        short_type_name(self.name)
    }
}

/// Strip the module path from a type name (`alloc::string::String` -> `String`).
pub(crate) fn short_type_name(name: &'static str) -> &'static str {
    if name.contains('<') {
        return name;
    }
    name.rsplit("::").next().unwrap_or(name)
}

/// A dynamically typed binding value.
#[derive(Clone, Default)]
pub enum Value {
    /// No value is available.
    #[default]
    Unset,
    /// Skip the pending update.
    DoNothing,
    /// A legitimate null value.
    Null,
    /// A live object.
    Some(AnyObject),
}

impl Value {
    /// Wrap a concrete value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::Some(Arc::new(value))
    }

    /// Wrap an existing shared object, preserving its identity.
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self::Some(value)
    }

    /// Wrap an already type-erased object.
    pub fn from_object(object: AnyObject) -> Self {
        Self::Some(object)
    }

    /// Whether this is the [`Value::Unset`] sentinel.
    #[inline]
    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    /// Whether this is the [`Value::DoNothing`] sentinel.
    #[inline]
    pub fn is_do_nothing(&self) -> bool {
        matches!(self, Self::DoNothing)
    }

    /// Whether this is either sentinel.
    #[inline]
    pub fn is_unset_or_do_nothing(&self) -> bool {
        matches!(self, Self::Unset | Self::DoNothing)
    }

    /// Whether this is a legitimate null.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this holds an object.
    #[inline]
    pub fn is_some(&self) -> bool {
        matches!(self, Self::Some(_))
    }

    /// The shared object, if any.
    pub fn as_object(&self) -> Option<&AnyObject> {
        match self {
            Self::Some(object) => Some(object),
            _ => None,
        }
    }

    /// Borrow the object as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_object().and_then(|object| (**object).downcast_ref::<T>())
    }

    /// Whether the object is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.downcast_ref::<T>().is_some()
    }

    /// Clone the object out as `T`.
    pub fn get<T: Any + Clone>(&self) -> Option<T> {
        self.downcast_ref::<T>().cloned()
    }

    /// Recover the shared `Arc<T>`, keeping identity.
    pub fn downcast_arc<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.as_object()
            .and_then(|object| Arc::downcast::<T>(object.clone()).ok())
    }

    /// The `TypeId` of the held object.
    pub fn object_type_id(&self) -> Option<TypeId> {
        self.as_object().map(|object| (**object).type_id())
    }

    /// Whether two values are the same object, or the same sentinel.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Unset, Self::Unset)
            | (Self::DoNothing, Self::DoNothing)
            | (Self::Null, Self::Null) => true,
            (Self::Some(a), Self::Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// A weak handle to the held object.
    pub fn downgrade(&self) -> Option<WeakObject> {
        self.as_object().map(Arc::downgrade)
    }

    /// Convert into a concrete type through [`FromValue`].
    pub fn to<T: FromValue>(&self) -> Option<T> {
        T::from_value(self)
    }

    /// Short description used in logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Unset => "(unset)".to_string(),
            Self::DoNothing => "(do nothing)".to_string(),
            Self::Null => "null".to_string(),
            Self::Some(_) => format_object(self),
        }
    }
}

fn format_object(value: &Value) -> String {
    macro_rules! try_format {
        ($($ty:ty),*) => {
            $(
                if let Some(v) = value.downcast_ref::<$ty>() {
                    return format!("{v:?}");
                }
            )*
        };
    }
    try_format!(bool, i32, i64, u32, u64, usize, f32, f64, String, &'static str, char);
    "(object)".to_string()
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("Unset"),
            Self::DoNothing => f.write_str("DoNothing"),
            Self::Null => f.write_str("Null"),
            Self::Some(_) => write!(f, "Some({})", self.describe()),
        }
    }
}

/// Resolve a weak object handle back into a value.
///
/// Returns [`Value::Unset`] when the object has been dropped.
pub fn upgrade_object(weak: &WeakObject) -> Value {
    weak.upgrade().map_or(Value::Unset, Value::Some)
}

/// Conversion into a [`Value`].
pub trait IntoValue {
    /// Perform the conversion.
    fn into_value(self) -> Value;
}

/// Conversion out of a [`Value`].
pub trait FromValue: Sized {
    /// Perform the conversion; `None` if the value has another type.
    fn from_value(value: &Value) -> Option<Self>;
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

/// A value type that can be stored in a bindable property.
///
/// `same_value` decides whether a write is a change. Plain data compares by
/// equality, shared objects by identity.
pub trait BindableValue: IntoValue + FromValue + Clone + Send + Sync + 'static {
    /// Whether `self` and `other` are the same value.
    fn same_value(&self, other: &Self) -> bool;
}

impl BindableValue for Value {
    fn same_value(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

/// Implement the value conversion traits for plain data types.
///
/// The types must be `Clone + PartialEq + Send + Sync + 'static`.
///
/// ```
/// #[derive(Clone, PartialEq)]
/// enum Mode { Light, Dark }
///
/// trellis_core::bindable_value!(Mode);
///
/// let value = trellis_core::Value::from(Mode::Dark);
/// assert!(value.is::<Mode>());
/// ```
#[macro_export]
macro_rules! bindable_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $crate::value::IntoValue for $ty {
                fn into_value(self) -> $crate::value::Value {
                    $crate::value::Value::new(self)
                }
            }

            impl $crate::value::FromValue for $ty {
                fn from_value(value: &$crate::value::Value) -> Option<Self> {
                    value.get::<$ty>()
                }
            }

            impl From<$ty> for $crate::value::Value {
                fn from(value: $ty) -> Self {
                    $crate::value::Value::new(value)
                }
            }

            impl $crate::value::BindableValue for $ty {
                fn same_value(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

bindable_value!(bool, char, i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, f32, f64, String);

impl IntoValue for &'static str {
    fn into_value(self) -> Value {
        Value::new(self.to_string())
    }
}

impl From<&'static str> for Value {
    fn from(value: &'static str) -> Self {
        Value::new(value.to_string())
    }
}

impl<T: Any + Send + Sync> IntoValue for Arc<T> {
    fn into_value(self) -> Value {
        Value::from_arc(self)
    }
}

impl<T: Any + Send + Sync> FromValue for Arc<T> {
    fn from_value(value: &Value) -> Option<Self> {
        value.downcast_arc::<T>()
    }
}

impl<T: Any + Send + Sync> BindableValue for Arc<T> {
    fn same_value(&self, other: &Self) -> bool {
        Arc::ptr_eq(self, other)
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(value) => value.into_value(),
            None => Value::Null,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: BindableValue> BindableValue for Option<T> {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same_value(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: Any + Clone + Send + Sync> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::new(self)
    }
}

impl<T: Any + Clone + Send + Sync> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Option<Self> {
        value.get::<Vec<T>>()
    }
}

impl<T: Any + Clone + PartialEq + Send + Sync> BindableValue for Vec<T> {
    fn same_value(&self, other: &Self) -> bool {
        self == other
    }
}

static_assertions::assert_impl_all!(Value: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    struct Node {
        name: String,
    }

    #[test]
    fn test_sentinels_are_distinct() {
        assert!(Value::Unset.is_unset());
        assert!(!Value::Null.is_unset());
        assert!(Value::DoNothing.is_unset_or_do_nothing());
        assert!(Value::Unset.is_unset_or_do_nothing());
        assert!(!Value::Null.is_unset_or_do_nothing());
        assert!(!Value::Unset.same_as(&Value::Null));
    }

    #[test]
    fn test_primitive_round_trip() {
        let value = 42i32.into_value();
        assert_eq!(value.get::<i32>(), Some(42));
        assert_eq!(value.to::<i32>(), Some(42));
        assert_eq!(value.get::<i64>(), None);
        assert_eq!(Value::from("hello").get::<String>(), Some("hello".to_string()));
    }

    #[test]
    fn test_arc_identity_is_preserved() {
        let node = Arc::new(Node {
            name: "root".to_string(),
        });
        let value = node.clone().into_value();
        let back = value.downcast_arc::<Node>().unwrap();
        assert!(Arc::ptr_eq(&node, &back));
        assert_eq!(back.name, "root");
        assert_eq!(value.object_type_id(), Some(TypeId::of::<Node>()));

        let other = node.clone().into_value();
        assert!(value.same_as(&other));
    }

    #[test]
    fn test_option_maps_to_null() {
        let none: Option<Arc<Node>> = None;
        assert!(none.into_value().is_null());
        assert_eq!(Option::<i32>::from_value(&Value::Null), Some(None));
        assert_eq!(Option::<i32>::from_value(&Value::new(5)), Some(Some(5)));
    }

    #[test]
    fn test_weak_upgrade() {
        let node = Arc::new(Node {
            name: "weak".to_string(),
        });
        let value = Value::from_arc(node);
        let weak = value.downgrade().unwrap();
        assert!(upgrade_object(&weak).is_some());
        drop(value);
        assert!(upgrade_object(&weak).is_unset());
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(ValueType::of::<String>().short_name(), "String");
        assert_eq!(ValueType::of::<i32>().short_name(), "i32");
    }

    #[test]
    fn test_same_value() {
        let a = Arc::new(Node {
            name: "a".to_string(),
        });
        let b = Arc::new(Node {
            name: "a".to_string(),
        });
        assert!(a.same_value(&a.clone()));
        assert!(!a.same_value(&b));
        assert!(Some(1).same_value(&Some(1)));
        assert!(!Some(1).same_value(&None));
        assert!("x".to_string().same_value(&"x".to_string()));
    }

    #[test]
    fn test_describe() {
        assert_eq!(Value::new(3i32).describe(), "3");
        assert_eq!(Value::Null.describe(), "null");
        assert_eq!(format!("{:?}", Value::Unset), "Unset");
    }
}
