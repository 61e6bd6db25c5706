//! Binding source and target accessors.
//!
//! An accessor sits between a [`DataBinding`](crate::binding::DataBinding)
//! and one or more [`PathObserver`]s. Reading applies the converter, the
//! fallback value and the target-null value; writing pulls the value from the
//! other side of the binding and applies the converter backwards.

use std::fmt;
use std::sync::Arc;

use crate::error::{BindingError, Result};
use crate::observer::{PathMembers, PathObserver};
use crate::path::BindingPath;
use crate::signal::Signal;
use crate::value::{Value, ValueType};

/// Converts values flowing through a binding.
pub trait ValueConverter: Send + Sync {
    /// Source to target.
    fn convert(&self, value: Value, target_type: Option<ValueType>, parameter: &Value) -> Result<Value>;

    /// Target to source.
    fn convert_back(&self, value: Value, target_type: Option<ValueType>, parameter: &Value) -> Result<Value> {
        let _ = (value, target_type, parameter);
        Err(BindingError::Unsupported(
            "the converter cannot convert back".to_string(),
        ))
    }
}

/// Shared converter handle.
pub type SharedConverter = Arc<dyn ValueConverter>;

type ConvertFn = Box<dyn Fn(Value, &Value) -> Result<Value> + Send + Sync>;

/// A converter built from closures.
pub struct FnConverter {
    convert: ConvertFn,
    convert_back: Option<ConvertFn>,
}

impl FnConverter {
    /// A one-way converter.
    pub fn new<F>(convert: F) -> Self
    where
        F: Fn(Value, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            convert: Box::new(convert),
            convert_back: None,
        }
    }

    /// Add the target-to-source direction.
    pub fn with_back<F>(mut self, convert_back: F) -> Self
    where
        F: Fn(Value, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        self.convert_back = Some(Box::new(convert_back));
        self
    }

    /// Wrap into a shared handle.
    pub fn shared(self) -> SharedConverter {
        Arc::new(self)
    }
}

impl ValueConverter for FnConverter {
    fn convert(&self, value: Value, _target_type: Option<ValueType>, parameter: &Value) -> Result<Value> {
        (self.convert)(value, parameter)
    }

    fn convert_back(&self, value: Value, _target_type: Option<ValueType>, parameter: &Value) -> Result<Value> {
        match &self.convert_back {
            Some(convert_back) => convert_back(value, parameter),
            None => Err(BindingError::Unsupported(
                "the converter cannot convert back".to_string(),
            )),
        }
    }
}

/// One observed path used as a binding source or target.
#[derive(Clone, Debug)]
pub struct BindingSource {
    observer: PathObserver,
}

impl BindingSource {
    /// Wrap an observer.
    pub fn new(observer: PathObserver) -> Self {
        Self { observer }
    }

    /// The underlying observer.
    pub fn observer(&self) -> &PathObserver {
        &self.observer
    }

    /// The observed path.
    pub fn path(&self) -> &Arc<BindingPath> {
        self.observer.path()
    }

    /// The root object.
    pub fn source(&self) -> Value {
        self.observer.source()
    }

    /// The current value, or [`Value::Unset`].
    pub fn value(&self) -> Value {
        self.observer.value()
    }

    /// Write through the last member of the path.
    pub fn set_value(&self, value: Value) -> Result<bool> {
        self.observer.set_value(value)
    }

    /// Snapshot of the resolved members.
    pub fn path_members(&self) -> PathMembers {
        self.observer.path_members()
    }

    /// Check that the path resolves.
    pub fn validate(&self, throw: bool) -> Result<bool> {
        self.observer.validate(throw)
    }

    /// Raised when the observed value changes.
    pub fn value_changed(&self) -> &Signal<()> {
        self.observer.value_changed()
    }

    /// Release the observer.
    pub fn dispose(&self) {
        self.observer.dispose();
    }
}

/// Reads and writes one side of a binding.
pub trait SourceAccessor: Send + Sync {
    /// Read the value, converted for a member of `target_type`.
    fn get_value(&self, target_type: Option<ValueType>) -> Result<Value>;

    /// Pull the value out of `from` and write it here.
    ///
    /// Returns `Ok(false)` without writing when there is nothing to write.
    fn set_value(&self, from: &dyn SourceAccessor) -> Result<bool>;

    /// The observed paths.
    fn sources(&self) -> &[BindingSource];

    /// Whether [`set_value`](Self::set_value) can ever succeed.
    fn can_write(&self) -> bool {
        true
    }

    /// Release every observer.
    fn dispose(&self) {
        for source in self.sources() {
            source.dispose();
        }
    }
}

/// Shared accessor handle.
pub type SharedAccessor = Arc<dyn SourceAccessor>;

/// Conversion settings shared by the accessor kinds.
#[derive(Clone, Default)]
struct Conversion {
    converter: Option<SharedConverter>,
    parameter: Value,
    fallback: Option<Value>,
    target_null_value: Option<Value>,
}

impl Conversion {
    fn apply(&self, value: Value, target_type: Option<ValueType>) -> Result<Value> {
        if value.is_unset() {
            return Ok(self.fallback.clone().unwrap_or(Value::Unset));
        }
        let value = match &self.converter {
            Some(converter) => converter.convert(value, target_type, &self.parameter)?,
            None => value,
        };
        if value.is_unset() {
            return Ok(self.fallback.clone().unwrap_or(Value::Unset));
        }
        if value.is_null() {
            if let Some(null_value) = &self.target_null_value {
                return Ok(null_value.clone());
            }
        }
        Ok(value)
    }
}

/// Accessor over one path.
pub struct SingleSourceAccessor {
    sources: [BindingSource; 1],
    conversion: Conversion,
}

impl SingleSourceAccessor {
    /// Access one observed path.
    pub fn new(source: BindingSource) -> Self {
        Self {
            sources: [source],
            conversion: Conversion::default(),
        }
    }

    /// Apply `converter` with `parameter` in both directions.
    pub fn with_converter(mut self, converter: SharedConverter, parameter: Value) -> Self {
        self.conversion.converter = Some(converter);
        self.conversion.parameter = parameter;
        self
    }

    /// Value to use when the path yields no value.
    pub fn with_fallback(mut self, fallback: Value) -> Self {
        self.conversion.fallback = Some(fallback);
        self
    }

    /// Value to use instead of null.
    pub fn with_target_null_value(mut self, value: Value) -> Self {
        self.conversion.target_null_value = Some(value);
        self
    }

    /// The observed path.
    pub fn source(&self) -> &BindingSource {
        &self.sources[0]
    }

    /// Declared type of the last member, when the path resolves.
    pub fn member_type(&self) -> Option<ValueType> {
        let members = self.source().path_members();
        members
            .all_members_available
            .then(|| members.last_member.value_type())
    }
}

impl SourceAccessor for SingleSourceAccessor {
    fn get_value(&self, target_type: Option<ValueType>) -> Result<Value> {
        let raw = self.source().observer().try_value()?;
        self.conversion.apply(raw, target_type)
    }

    fn set_value(&self, from: &dyn SourceAccessor) -> Result<bool> {
        let member_type = self.member_type();
        let value = from.get_value(member_type)?;
        if value.is_unset_or_do_nothing() {
            return Ok(false);
        }
        let value = match &self.conversion.converter {
            Some(converter) => converter.convert_back(value, member_type, &self.conversion.parameter)?,
            None => value,
        };
        if value.is_unset_or_do_nothing() {
            return Ok(false);
        }
        self.source().set_value(value)
    }

    fn sources(&self) -> &[BindingSource] {
        &self.sources
    }
}

impl fmt::Debug for SingleSourceAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleSourceAccessor")
            .field("path", &self.source().path().as_str())
            .field("has_converter", &self.conversion.converter.is_some())
            .finish()
    }
}

/// Combines the values of several paths.
pub type MultiFormatter = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// Read-only accessor over several paths.
pub struct MultiSourceAccessor {
    sources: Vec<BindingSource>,
    formatter: MultiFormatter,
    conversion: Conversion,
}

impl MultiSourceAccessor {
    /// Combine `sources` with `formatter`.
    pub fn new<F>(sources: Vec<BindingSource>, formatter: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            sources,
            formatter: Arc::new(formatter),
            conversion: Conversion::default(),
        }
    }

    /// Apply `converter` to the combined value.
    pub fn with_converter(mut self, converter: SharedConverter, parameter: Value) -> Self {
        self.conversion.converter = Some(converter);
        self.conversion.parameter = parameter;
        self
    }

    /// Value to use when any path yields no value.
    pub fn with_fallback(mut self, fallback: Value) -> Self {
        self.conversion.fallback = Some(fallback);
        self
    }

    /// Value to use instead of null.
    pub fn with_target_null_value(mut self, value: Value) -> Self {
        self.conversion.target_null_value = Some(value);
        self
    }
}

impl SourceAccessor for MultiSourceAccessor {
    fn get_value(&self, target_type: Option<ValueType>) -> Result<Value> {
        let values = self
            .sources
            .iter()
            .map(|source| source.observer().try_value())
            .collect::<Result<Vec<_>>>()?;
        if values.iter().any(Value::is_unset) {
            return self.conversion.apply(Value::Unset, target_type);
        }
        let combined = (self.formatter)(&values)?;
        self.conversion.apply(combined, target_type)
    }

    fn set_value(&self, _from: &dyn SourceAccessor) -> Result<bool> {
        Err(BindingError::Unsupported(
            "a multi-path source cannot be written".to_string(),
        ))
    }

    fn sources(&self) -> &[BindingSource] {
        &self.sources
    }

    fn can_write(&self) -> bool {
        false
    }
}

impl fmt::Debug for MultiSourceAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiSourceAccessor")
            .field("sources", &self.sources.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(SingleSourceAccessor: Send, Sync);
static_assertions::assert_impl_all!(MultiSourceAccessor: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::{Bindable, BindingMember};
    use crate::observer::ObserverOptions;
    use crate::property::Property;
    use crate::provider::MemberProvider;

    struct Model {
        count: Property<i32>,
        label: Property<Value>,
    }

    impl Bindable for Model {
        fn binding_members() -> Vec<BindingMember> {
            vec![
                BindingMember::from_property("Count", |m: &Model| &m.count),
                BindingMember::from_property("Label", |m: &Model| &m.label),
            ]
        }
    }

    fn model(count: i32) -> Arc<Model> {
        Arc::new(Model {
            count: Property::new(count),
            label: Property::new(Value::Null),
        })
    }

    fn source(model: &Arc<Model>, path: &str) -> BindingSource {
        let provider = MemberProvider::new();
        provider.register_type::<Model>();
        let observer = PathObserver::parse(
            Value::from_arc(model.clone()),
            path,
            Arc::new(provider),
            ObserverOptions::default(),
        )
        .unwrap();
        BindingSource::new(observer)
    }

    fn doubling() -> SharedConverter {
        FnConverter::new(|value, _| {
            value
                .get::<i32>()
                .map(|v| Value::new(v * 2))
                .ok_or_else(|| BindingError::Conversion("expected i32".into()))
        })
        .with_back(|value, _| {
            value
                .get::<i32>()
                .map(|v| Value::new(v / 2))
                .ok_or_else(|| BindingError::Conversion("expected i32".into()))
        })
        .shared()
    }

    #[test]
    fn test_converter_both_directions() {
        let vm = model(4);
        let view = model(0);
        let source = SingleSourceAccessor::new(source(&vm, "Count")).with_converter(doubling(), Value::Null);
        let target = SingleSourceAccessor::new(self::source(&view, "Count"));

        assert!(target.set_value(&source).unwrap());
        assert_eq!(view.count.get(), 8);

        view.count.set(20);
        assert!(source.set_value(&target).unwrap());
        assert_eq!(vm.count.get(), 10);
    }

    #[test]
    fn test_fallback_and_null_value() {
        let vm = model(0);
        let label = SingleSourceAccessor::new(source(&vm, "Label"))
            .with_target_null_value(Value::from("(none)"));
        assert_eq!(label.get_value(None).unwrap().get::<String>(), Some("(none)".to_string()));

        let failing = FnConverter::new(|_, _| Ok(Value::Unset)).shared();
        let count = SingleSourceAccessor::new(source(&vm, "Count"))
            .with_converter(failing, Value::Null)
            .with_fallback(Value::new(-1i32));
        assert_eq!(count.get_value(None).unwrap().get::<i32>(), Some(-1));
    }

    #[test]
    fn test_unset_value_does_not_touch_target() {
        let vm = model(0);
        let view = model(7);
        let skipping = FnConverter::new(|_, _| Ok(Value::DoNothing)).shared();
        let source = SingleSourceAccessor::new(source(&vm, "Count")).with_converter(skipping, Value::Null);
        let target = SingleSourceAccessor::new(self::source(&view, "Count"));

        assert!(!target.set_value(&source).unwrap());
        assert_eq!(view.count.get(), 7);
    }

    #[test]
    fn test_converter_error_propagates() {
        let vm = model(1);
        let view = model(0);
        let broken = FnConverter::new(|_, _| Err(BindingError::Conversion("boom".into()))).shared();
        let source = SingleSourceAccessor::new(source(&vm, "Count")).with_converter(broken, Value::Null);
        let target = SingleSourceAccessor::new(self::source(&view, "Count"));

        assert!(matches!(target.set_value(&source), Err(BindingError::Conversion(_))));
        assert_eq!(view.count.get(), 0);
    }

    #[test]
    fn test_multi_source_formats_values() {
        let a = model(2);
        let b = model(3);
        let multi = MultiSourceAccessor::new(vec![source(&a, "Count"), source(&b, "Count")], |values| {
            let sum: i32 = values.iter().filter_map(|v| v.get::<i32>()).sum();
            Ok(Value::new(sum))
        });

        assert_eq!(multi.get_value(None).unwrap().get::<i32>(), Some(5));
        assert!(!multi.can_write());
        assert_eq!(multi.sources().len(), 2);

        let view = model(0);
        let target = SingleSourceAccessor::new(source(&view, "Count"));
        assert!(multi.set_value(&target).is_err());

        multi.dispose();
        assert!(multi.sources().iter().all(|s| s.observer().is_disposed()));
    }
}
