//! Binding configuration.
//!
//! [`BindingSettings`] carries the defaults a
//! [`BindingBuilder`](crate::builder::BindingBuilder) applies when a binding
//! does not say otherwise. A process-wide copy lives in the
//! [`BindingServices`](crate::services::BindingServices); a builder may also be
//! handed its own settings.

use std::sync::Arc;
use std::time::Duration;

use crate::behavior::{
    NoneBindingMode, OneTimeBindingMode, OneWayBindingMode, OneWayToSourceBindingMode, SharedBehavior,
    TwoWayBindingMode,
};
use crate::observer::ObserverOptions;

/// The update direction of a binding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BindingModeKind {
    /// Both directions.
    #[default]
    TwoWay,
    /// Source to target.
    OneWay,
    /// Source to target, once.
    OneTime,
    /// Source to target once, then the binding disposes itself.
    OneTimeDispose,
    /// Target to source.
    OneWayToSource,
    /// No automatic updates.
    None,
}

impl BindingModeKind {
    /// A fresh mode behavior for one binding.
    pub fn behavior(self) -> SharedBehavior {
        match self {
            Self::TwoWay => Arc::new(TwoWayBindingMode::new()),
            Self::OneWay => Arc::new(OneWayBindingMode::new()),
            Self::OneTime => Arc::new(OneTimeBindingMode::new(false)),
            Self::OneTimeDispose => Arc::new(OneTimeBindingMode::new(true)),
            Self::OneWayToSource => Arc::new(OneWayToSourceBindingMode::new()),
            Self::None => Arc::new(NoneBindingMode::new()),
        }
    }

    /// Whether source changes reach the target.
    pub fn updates_target(self) -> bool {
        matches!(self, Self::TwoWay | Self::OneWay | Self::OneTime | Self::OneTimeDispose)
    }
}

/// Defaults applied when building bindings.
#[derive(Debug, Clone)]
pub struct BindingSettings {
    /// Mode used when a builder does not set one.
    pub default_mode: BindingModeKind,
    /// Hold the root object of each path weakly.
    pub hold_source_weakly: bool,
    /// Copy the source into the target as soon as the binding is built.
    pub update_target_on_build: bool,
    /// Validate the binding as soon as it is built.
    pub validate_on_build: bool,
    /// Delay applied to source updates when a builder does not set one.
    pub default_delay: Option<Duration>,
    /// Log swallowed update failures at error level.
    pub log_binding_errors: bool,
}

impl Default for BindingSettings {
    fn default() -> Self {
        Self {
            default_mode: BindingModeKind::TwoWay,
            hold_source_weakly: true,
            update_target_on_build: true,
            validate_on_build: false,
            default_delay: None,
            log_binding_errors: true,
        }
    }
}

impl BindingSettings {
    /// Start a builder from the defaults.
    pub fn builder() -> BindingSettingsBuilder {
        BindingSettingsBuilder::default()
    }

    /// Observer options matching these settings.
    pub fn observer_options(&self) -> ObserverOptions {
        ObserverOptions {
            hold_source_weakly: self.hold_source_weakly,
        }
    }
}

/// Fluent builder for [`BindingSettings`].
#[derive(Debug, Clone, Default)]
pub struct BindingSettingsBuilder {
    settings: BindingSettings,
}

impl BindingSettingsBuilder {
    /// Set the default mode.
    pub fn default_mode(mut self, mode: BindingModeKind) -> Self {
        self.settings.default_mode = mode;
        self
    }

    /// Hold path roots weakly or strongly.
    pub fn hold_source_weakly(mut self, weak: bool) -> Self {
        self.settings.hold_source_weakly = weak;
        self
    }

    /// Update the target when a binding is built.
    pub fn update_target_on_build(mut self, enabled: bool) -> Self {
        self.settings.update_target_on_build = enabled;
        self
    }

    /// Validate when a binding is built.
    pub fn validate_on_build(mut self, enabled: bool) -> Self {
        self.settings.validate_on_build = enabled;
        self
    }

    /// Delay source updates by default.
    pub fn default_delay(mut self, delay: Duration) -> Self {
        self.settings.default_delay = Some(delay);
        self
    }

    /// Log swallowed update failures.
    pub fn log_binding_errors(mut self, enabled: bool) -> Self {
        self.settings.log_binding_errors = enabled;
        self
    }

    /// Finish.
    pub fn build(self) -> BindingSettings {
        self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::BehaviorId;

    #[test]
    fn test_default_settings() {
        let settings = BindingSettings::default();
        assert_eq!(settings.default_mode, BindingModeKind::TwoWay);
        assert!(settings.hold_source_weakly);
        assert!(settings.update_target_on_build);
        assert!(!settings.validate_on_build);
        assert!(settings.default_delay.is_none());
        assert!(settings.observer_options().hold_source_weakly);
    }

    #[test]
    fn test_builder() {
        let settings = BindingSettings::builder()
            .default_mode(BindingModeKind::OneWay)
            .hold_source_weakly(false)
            .default_delay(Duration::from_millis(250))
            .log_binding_errors(false)
            .build();
        assert_eq!(settings.default_mode, BindingModeKind::OneWay);
        assert!(!settings.observer_options().hold_source_weakly);
        assert_eq!(settings.default_delay, Some(Duration::from_millis(250)));
        assert!(!settings.log_binding_errors);
    }

    #[test]
    fn test_modes_share_behavior_id() {
        for mode in [
            BindingModeKind::TwoWay,
            BindingModeKind::OneWay,
            BindingModeKind::OneTime,
            BindingModeKind::OneTimeDispose,
            BindingModeKind::OneWayToSource,
            BindingModeKind::None,
        ] {
            assert_eq!(mode.behavior().id(), BehaviorId::BINDING_MODE);
        }
        assert!(!BindingModeKind::OneWayToSource.updates_target());
    }
}
