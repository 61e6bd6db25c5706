//! Binding construction.
//!
//! [`BindingBuilder`] turns a target object, a target path and a source
//! description into a live [`DataBinding`]. Configuration errors (bad path,
//! unknown member, unknown resource or converter, duplicate behavior) are
//! returned from [`BindingBuilder::build`]; nothing half-built survives.
//!
//! ```
//! use std::sync::Arc;
//! use trellis_core::{Bindable, BindingBuilder, BindingMember, BindingModeKind, BindingServices, Property, Value};
//!
//! struct Label {
//!     text: Property<String>,
//! }
//!
//! impl Bindable for Label {
//!     fn binding_members() -> Vec<BindingMember> {
//!         vec![BindingMember::from_property("Text", |l: &Label| &l.text)]
//!     }
//! }
//!
//! let services = BindingServices::new();
//! services.register_type::<Label>();
//!
//! let source = Arc::new(Label { text: Property::new("hello".to_string()) });
//! let target = Arc::new(Label { text: Property::new(String::new()) });
//!
//! let binding = BindingBuilder::with_services(&services, Value::from_arc(target.clone()), "Text")
//!     .to("Text")
//!     .source(Value::from_arc(source.clone()))
//!     .mode(BindingModeKind::OneWay)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(target.text.get(), "hello");
//! source.text.set("world".to_string());
//! assert_eq!(target.text.get(), "world");
//! binding.dispose();
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::accessor::{
    BindingSource, MultiFormatter, MultiSourceAccessor, SharedAccessor, SharedConverter, SingleSourceAccessor,
};
use crate::behavior::{DelayBindingBehavior, SharedBehavior, ValidatesOnExceptionsBehavior};
use crate::binding::DataBinding;
use crate::config::{BindingModeKind, BindingSettings};
use crate::error::{BindingError, Result};
use crate::logging::PerfSpan;
use crate::observer::PathObserver;
use crate::path::BindingPath;
use crate::resource::SourceSyntax;
use crate::services::{BindingServices, binding_services};
use crate::value::Value;

/// Fluent construction of a [`DataBinding`].
pub struct BindingBuilder<'a> {
    services: &'a BindingServices,
    settings: BindingSettings,
    target: Value,
    target_path: String,
    source_paths: Vec<String>,
    formatter: Option<MultiFormatter>,
    syntax: SourceSyntax,
    mode: Option<BindingModeKind>,
    converter: Option<SharedConverter>,
    converter_name: Option<String>,
    converter_parameter: Value,
    fallback: Option<Value>,
    target_null_value: Option<Value>,
    delay: Option<Duration>,
    target_delay: Option<Duration>,
    validates_on_exceptions: bool,
    behaviors: Vec<SharedBehavior>,
}

impl BindingBuilder<'static> {
    /// Bind `target_path` on `target`, using the process-wide services.
    pub fn new(target: Value, target_path: &str) -> Self {
        Self::with_services(binding_services(), target, target_path)
    }
}

impl<'a> BindingBuilder<'a> {
    /// Bind `target_path` on `target`, using `services`.
    pub fn with_services(services: &'a BindingServices, target: Value, target_path: &str) -> Self {
        Self {
            services,
            settings: services.settings(),
            target,
            target_path: target_path.to_string(),
            source_paths: vec![String::new()],
            formatter: None,
            syntax: SourceSyntax::DataContext,
            mode: None,
            converter: None,
            converter_name: None,
            converter_parameter: Value::Null,
            fallback: None,
            target_null_value: None,
            delay: None,
            target_delay: None,
            validates_on_exceptions: false,
            behaviors: Vec::new(),
        }
    }

    /// The source path.
    pub fn to(mut self, path: &str) -> Self {
        self.source_paths = vec![path.to_string()];
        self.formatter = None;
        self
    }

    /// Root the source path at `source` instead of the data context.
    pub fn source(mut self, source: Value) -> Self {
        self.syntax = SourceSyntax::Explicit(source);
        self
    }

    /// Root the source path per `syntax`.
    pub fn source_syntax(mut self, syntax: SourceSyntax) -> Self {
        self.syntax = syntax;
        self
    }

    /// Several source paths combined by `formatter`.
    pub fn multi<S, F>(mut self, paths: &[S], formatter: F) -> Self
    where
        S: AsRef<str>,
        F: Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.source_paths = paths.iter().map(|path| path.as_ref().to_string()).collect();
        self.formatter = Some(Arc::new(formatter));
        self
    }

    pub fn mode(mut self, mode: BindingModeKind) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn converter(mut self, converter: SharedConverter) -> Self {
        self.converter = Some(converter);
        self
    }

    /// A converter registered with the resource resolver.
    pub fn converter_name(mut self, name: &str) -> Self {
        self.converter_name = Some(name.to_string());
        self
    }

    pub fn converter_parameter(mut self, parameter: Value) -> Self {
        self.converter_parameter = parameter;
        self
    }

    /// Used when the source has no value.
    pub fn fallback(mut self, fallback: Value) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Used when the source value is null.
    pub fn target_null_value(mut self, value: Value) -> Self {
        self.target_null_value = Some(value);
        self
    }

    /// Delay source updates.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delay target updates.
    pub fn target_delay(mut self, delay: Duration) -> Self {
        self.target_delay = Some(delay);
        self
    }

    /// Collect update failures on a [`ValidatesOnExceptionsBehavior`].
    pub fn validates_on_exceptions(mut self) -> Self {
        self.validates_on_exceptions = true;
        self
    }

    /// Attach an extra behavior.
    pub fn behavior(mut self, behavior: SharedBehavior) -> Self {
        self.behaviors.push(behavior);
        self
    }

    /// Override the services' settings for this binding.
    pub fn settings(mut self, settings: BindingSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Build and start the binding.
    ///
    /// The returned handle owns the binding. Mode behaviors only hold it
    /// weakly, so updates stop once every handle is dropped.
    #[tracing::instrument(skip_all, target = "trellis_core::binding", level = "debug", fields(target_path = %self.target_path))]
    pub fn build(self) -> Result<DataBinding> {
        let _perf = PerfSpan::new("binding_build");
        let provider = self.services.member_provider();
        let options = self.settings.observer_options();

        let target_observer = PathObserver::new(
            self.target.clone(),
            BindingPath::parse(&self.target_path)?,
            provider.clone(),
            options,
        )?;
        let target: SharedAccessor = Arc::new(SingleSourceAccessor::new(BindingSource::new(target_observer)));

        let converter = match (&self.converter, &self.converter_name) {
            (Some(converter), _) => Some(converter.clone()),
            (None, Some(name)) => self.services.resources().resolve_converter(name, true)?,
            (None, None) => None,
        };

        let mut sources = Vec::with_capacity(self.source_paths.len());
        for path in &self.source_paths {
            let (root, path) = self.syntax.resolve(&self.target, path, self.services)?;
            sources.push(BindingSource::new(PathObserver::new(root, path, provider.clone(), options)?));
        }
        let source = self.source_accessor(sources, converter)?;

        let binding = DataBinding::new(target, source);
        binding.set_log_errors(self.settings.log_binding_errors);
        let mode = self.mode.unwrap_or(self.settings.default_mode);
        if let Err(err) = self.attach_behaviors(&binding, mode) {
            binding.dispose();
            return Err(err);
        }

        if self.settings.validate_on_build {
            binding.validate();
        }
        if self.settings.update_target_on_build {
            if mode.updates_target() {
                binding.update_target();
            } else if mode == BindingModeKind::OneWayToSource {
                binding.update_source();
            }
        }
        Ok(binding)
    }

    fn source_accessor(&self, mut sources: Vec<BindingSource>, converter: Option<SharedConverter>) -> Result<SharedAccessor> {
        match &self.formatter {
            Some(formatter) => {
                if sources.is_empty() {
                    return Err(BindingError::InvalidSourceSyntax("a multi binding needs at least one path".into()));
                }
                let formatter = formatter.clone();
                let mut accessor = MultiSourceAccessor::new(sources, move |values| formatter(values));
                if let Some(converter) = converter {
                    accessor = accessor.with_converter(converter, self.converter_parameter.clone());
                }
                if let Some(fallback) = &self.fallback {
                    accessor = accessor.with_fallback(fallback.clone());
                }
                if let Some(null_value) = &self.target_null_value {
                    accessor = accessor.with_target_null_value(null_value.clone());
                }
                Ok(Arc::new(accessor))
            }
            None => {
                let source = sources
                    .pop()
                    .ok_or_else(|| BindingError::InvalidSourceSyntax("no source path".into()))?;
                let mut accessor = SingleSourceAccessor::new(source);
                if let Some(converter) = converter {
                    accessor = accessor.with_converter(converter, self.converter_parameter.clone());
                }
                if let Some(fallback) = &self.fallback {
                    accessor = accessor.with_fallback(fallback.clone());
                }
                if let Some(null_value) = &self.target_null_value {
                    accessor = accessor.with_target_null_value(null_value.clone());
                }
                Ok(Arc::new(accessor))
            }
        }
    }

    fn attach_behaviors(&self, binding: &DataBinding, mode: BindingModeKind) -> Result<()> {
        binding.behaviors().add(mode.behavior())?;
        if let Some(delay) = self.delay.or(self.settings.default_delay) {
            binding.behaviors().add(Arc::new(DelayBindingBehavior::new(delay)))?;
        }
        if let Some(delay) = self.target_delay {
            binding.behaviors().add(Arc::new(DelayBindingBehavior::target(delay)))?;
        }
        if self.validates_on_exceptions {
            binding.behaviors().add(Arc::new(ValidatesOnExceptionsBehavior::new()))?;
        }
        for behavior in &self.behaviors {
            binding.behaviors().add(behavior.clone())?;
        }
        Ok(())
    }
}

/// Bind `target_path` on `target` to `source_path`, rooted at `source` or at
/// the target's data context, using the process-wide services.
///
/// Keep the returned handle for as long as the binding should stay live.
pub fn create_binding(target: Value, target_path: &str, source_path: &str, source: Option<Value>) -> Result<DataBinding> {
    let builder = BindingBuilder::new(target, target_path).to(source_path);
    match source {
        Some(source) => builder.source(source).build(),
        None => builder.build(),
    }
}
