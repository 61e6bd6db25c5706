//! Resource and source resolution.
//!
//! Before a binding can observe its source path it needs a root object. The
//! root comes from a [`SourceSyntax`]: the target's data context (the usual
//! case), the target itself, the root of its tree, a named resource, an
//! ancestor of a given type, a named element, or an explicit object.
//!
//! Named objects and converters are kept by a [`ResourceResolver`]. Tree
//! queries go through a [`TreeManager`]; the [`DefaultTreeManager`] walks the
//! `#Parent` attached member.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::accessor::SharedConverter;
use crate::attached::{DATA_CONTEXT_MEMBER, PARENT_MEMBER, attached_values};
use crate::error::{BindingError, Result};
use crate::path::{BindingPath, merge_path};
use crate::services::BindingServices;
use crate::value::{Value, ValueType};

const TARGET: &str = "trellis_core::resource";

/// Resource name of the binding target.
pub const SELF_RESOURCE: &str = "$self";
/// Resource name of the root of the target's tree.
pub const ROOT_RESOURCE: &str = "$root";
/// Resource name of the target's data context.
pub const CONTEXT_RESOURCE: &str = "$context";

/// Attached member holding an element's name for [`DefaultTreeManager`].
pub const ELEMENT_NAME_MEMBER: &str = "#Name";

/// Named objects and converters.
#[derive(Default)]
pub struct ResourceResolver {
    objects: RwLock<HashMap<String, Value>>,
    converters: RwLock<HashMap<String, SharedConverter>>,
}

impl ResourceResolver {
    /// Create an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `name` is one of the names resolved against the target.
    pub fn is_well_known(name: &str) -> bool {
        matches!(name, SELF_RESOURCE | ROOT_RESOURCE | CONTEXT_RESOURCE)
    }

    /// Register or replace a named object.
    pub fn add_object(&self, name: impl Into<String>, value: Value) {
        let name = name.into();
        tracing::debug!(target: TARGET, resource = %name, "object registered");
        self.objects.write().insert(name, value);
    }

    /// Remove a named object.
    pub fn remove_object(&self, name: &str) -> bool {
        self.objects.write().remove(name).is_some()
    }

    /// Look up a named object.
    ///
    /// With `throw`, a missing name is a [`BindingError::ResourceNotFound`];
    /// otherwise it is `Ok(None)`.
    pub fn resolve_object(&self, name: &str, throw: bool) -> Result<Option<Value>> {
        match self.objects.read().get(name) {
            Some(value) => Ok(Some(value.clone())),
            None if throw => Err(BindingError::ResourceNotFound { name: name.to_string() }),
            None => Ok(None),
        }
    }

    /// Register or replace a named converter.
    pub fn add_converter(&self, name: impl Into<String>, converter: SharedConverter) {
        let name = name.into();
        tracing::debug!(target: TARGET, converter = %name, "converter registered");
        self.converters.write().insert(name, converter);
    }

    /// Register a converter unless the name is taken.
    pub fn try_add_converter(&self, name: impl Into<String>, converter: SharedConverter) -> bool {
        let mut converters = self.converters.write();
        let name = name.into();
        if converters.contains_key(&name) {
            return false;
        }
        converters.insert(name, converter);
        true
    }

    /// Remove a named converter.
    pub fn remove_converter(&self, name: &str) -> bool {
        self.converters.write().remove(name).is_some()
    }

    /// Look up a named converter.
    pub fn resolve_converter(&self, name: &str, throw: bool) -> Result<Option<SharedConverter>> {
        match self.converters.read().get(name) {
            Some(converter) => Ok(Some(converter.clone())),
            None if throw => Err(BindingError::ConverterNotFound { name: name.to_string() }),
            None => Ok(None),
        }
    }
}

/// Queries over the tree the binding targets live in.
pub trait TreeManager: Send + Sync {
    /// The parent of `target`.
    fn find_parent(&self, target: &Value) -> Option<Value>;

    /// An element named `name` reachable from `target`.
    fn find_by_name(&self, target: &Value, name: &str) -> Option<Value>;

    /// The topmost ancestor of `target`, or `target` itself.
    fn root(&self, target: &Value) -> Value {
        let mut current = target.clone();
        while let Some(parent) = self.find_parent(&current) {
            current = parent;
        }
        current
    }

    /// The `level`-th ancestor (1-based) whose type is `ancestor`.
    fn find_relative(&self, target: &Value, ancestor: ValueType, level: usize) -> Option<Value> {
        let mut remaining = level.max(1);
        let mut current = self.find_parent(target);
        while let Some(value) = current {
            if value.object_type_id() == Some(ancestor.id) {
                remaining -= 1;
                if remaining == 0 {
                    return Some(value);
                }
            }
            current = self.find_parent(&value);
        }
        None
    }
}

/// Tree manager over the `#Parent` and `#Name` attached values.
///
/// Name lookups search `target` and its ancestors.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTreeManager;

impl TreeManager for DefaultTreeManager {
    fn find_parent(&self, target: &Value) -> Option<Value> {
        attached_values()
            .get(target, PARENT_MEMBER)
            .filter(Value::is_some)
    }

    fn find_by_name(&self, target: &Value, name: &str) -> Option<Value> {
        let mut current = Some(target.clone());
        while let Some(value) = current {
            let matches = attached_values()
                .get(&value, ELEMENT_NAME_MEMBER)
                .and_then(|value| value.get::<String>())
                .is_some_and(|element| element == name);
            if matches {
                return Some(value);
            }
            current = self.find_parent(&value);
        }
        None
    }
}

/// Set the `#Parent` attached value of `child`.
pub fn set_parent(child: &Value, parent: Value) -> Result<bool> {
    attached_values().set_with(child, PARENT_MEMBER, parent, Value::same_as)
}

/// Set the `#Name` attached value of `element`.
pub fn set_element_name(element: &Value, name: &str) -> Result<bool> {
    attached_values().set_with(element, ELEMENT_NAME_MEMBER, Value::from(name.to_string()), Value::same_as)
}

/// Set the data context of `target`.
pub fn set_data_context(target: &Value, context: Value) -> Result<bool> {
    attached_values().set_with(target, DATA_CONTEXT_MEMBER, context, Value::same_as)
}

/// The data context of `target`, or [`Value::Null`].
pub fn data_context(target: &Value) -> Value {
    attached_values()
        .get(target, DATA_CONTEXT_MEMBER)
        .filter(|value| !value.is_unset())
        .unwrap_or(Value::Null)
}

/// Where a source path is rooted.
#[derive(Clone, Debug, Default)]
pub enum SourceSyntax {
    /// The target's `DataContext`, observed so a new context rebinds.
    #[default]
    DataContext,
    /// The target itself.
    SelfSource,
    /// The root of the target's tree.
    Root,
    /// A named resource, or one of `$self`, `$root`, `$context`.
    Resource(String),
    /// The `level`-th ancestor of the target with the given type.
    Relative { ancestor: ValueType, level: usize },
    /// A named element.
    Element(String),
    /// A given object.
    Explicit(Value),
}

impl SourceSyntax {
    /// The observer root and path for `path` under this syntax.
    pub fn resolve(&self, target: &Value, path: &str, services: &BindingServices) -> Result<(Value, Arc<BindingPath>)> {
        let (root, path) = match self {
            Self::DataContext => (target.clone(), merge_path(DATA_CONTEXT_MEMBER, path)),
            Self::SelfSource => (target.clone(), path.to_string()),
            Self::Root => (services.tree_manager().root(target), path.to_string()),
            Self::Resource(name) => match name.as_str() {
                SELF_RESOURCE => (target.clone(), path.to_string()),
                ROOT_RESOURCE => (services.tree_manager().root(target), path.to_string()),
                CONTEXT_RESOURCE => (target.clone(), merge_path(DATA_CONTEXT_MEMBER, path)),
                _ => {
                    let value = services
                        .resources()
                        .resolve_object(name, true)?
                        .unwrap_or(Value::Null);
                    (value, path.to_string())
                }
            },
            Self::Relative { ancestor, level } => {
                let value = services
                    .tree_manager()
                    .find_relative(target, *ancestor, *level)
                    .ok_or_else(|| {
                        BindingError::InvalidSourceSyntax(format!(
                            "no ancestor of type '{}' at level {}",
                            ancestor.short_name(),
                            level
                        ))
                    })?;
                (value, path.to_string())
            }
            Self::Element(name) => {
                let value = services
                    .tree_manager()
                    .find_by_name(target, name)
                    .ok_or_else(|| BindingError::InvalidSourceSyntax(format!("no element named '{name}'")))?;
                (value, path.to_string())
            }
            Self::Explicit(value) => (value.clone(), path.to_string()),
        };
        tracing::trace!(target: TARGET, syntax = ?self, path = %path, "source resolved");
        Ok((root, BindingPath::parse(&path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::FnConverter;

    struct Element;
    struct Panel;

    fn element() -> Value {
        Value::new(Element)
    }

    #[test]
    fn test_objects_and_converters() {
        let resolver = ResourceResolver::new();
        resolver.add_object("answer", Value::new(42i32));
        assert_eq!(
            resolver.resolve_object("answer", true).unwrap().and_then(|v| v.get::<i32>()),
            Some(42)
        );
        assert!(resolver.resolve_object("missing", false).unwrap().is_none());
        assert!(matches!(
            resolver.resolve_object("missing", true),
            Err(BindingError::ResourceNotFound { .. })
        ));
        assert!(resolver.remove_object("answer"));

        let identity = FnConverter::new(|value, _| Ok(value)).shared();
        assert!(resolver.try_add_converter("id", identity.clone()));
        assert!(!resolver.try_add_converter("id", identity));
        assert!(resolver.resolve_converter("id", true).unwrap().is_some());
        assert!(matches!(
            resolver.resolve_converter("other", true),
            Err(BindingError::ConverterNotFound { .. })
        ));
        assert!(ResourceResolver::is_well_known("$root"));
    }

    #[test]
    fn test_default_tree_manager() {
        let root = Value::new(Panel);
        let middle = Value::new(Panel);
        let leaf = element();
        set_parent(&middle, root.clone()).unwrap();
        set_parent(&leaf, middle.clone()).unwrap();
        set_element_name(&root, "window").unwrap();

        let tree = DefaultTreeManager;
        assert!(tree.find_parent(&leaf).unwrap().same_as(&middle));
        assert!(tree.root(&leaf).same_as(&root));
        assert!(tree.find_by_name(&leaf, "window").unwrap().same_as(&root));
        assert!(tree.find_by_name(&leaf, "missing").is_none());

        let panel = ValueType::of::<Panel>();
        assert!(tree.find_relative(&leaf, panel, 1).unwrap().same_as(&middle));
        assert!(tree.find_relative(&leaf, panel, 2).unwrap().same_as(&root));
        assert!(tree.find_relative(&leaf, panel, 3).is_none());
    }

    #[test]
    fn test_source_syntax_resolution() {
        let services = BindingServices::new();
        services.resources().add_object("shared", Value::new(7i32));
        let target = element();

        let (root, path) = SourceSyntax::DataContext.resolve(&target, "Name", &services).unwrap();
        assert!(root.same_as(&target));
        assert_eq!(path.as_str(), "DataContext.Name");

        let (_, path) = SourceSyntax::DataContext.resolve(&target, "", &services).unwrap();
        assert_eq!(path.as_str(), "DataContext");

        let (root, path) = SourceSyntax::Resource("shared".into())
            .resolve(&target, "", &services)
            .unwrap();
        assert_eq!(root.get::<i32>(), Some(7));
        assert!(path.is_empty());

        let (_, path) = SourceSyntax::Resource(CONTEXT_RESOURCE.into())
            .resolve(&target, "[0]", &services)
            .unwrap();
        assert_eq!(path.as_str(), "DataContext[0]");

        let err = SourceSyntax::Element("nowhere".into())
            .resolve(&target, "", &services)
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_data_context_helpers() {
        let target = element();
        assert!(data_context(&target).is_null());
        assert!(set_data_context(&target, Value::new(5i32)).unwrap());
        assert!(!set_data_context(&target, data_context(&target)).unwrap());
        assert_eq!(data_context(&target).get::<i32>(), Some(5));
    }
}
