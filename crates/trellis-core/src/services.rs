//! Binding services.
//!
//! [`BindingServices`] bundles what a binding builder needs besides its
//! arguments: the member provider, named resources, the tree manager and the
//! default settings. A process-wide instance is created on first use; call
//! [`init_binding_services`] before that to supply your own.

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::config::BindingSettings;
use crate::error::{BindingError, Result};
use crate::member::Bindable;
use crate::provider::MemberProvider;
use crate::resource::{DefaultTreeManager, ResourceResolver, TreeManager};

static GLOBAL_SERVICES: OnceLock<BindingServices> = OnceLock::new();

/// The collaborators used to build bindings.
pub struct BindingServices {
    member_provider: Arc<MemberProvider>,
    resources: Arc<ResourceResolver>,
    tree_manager: Arc<dyn TreeManager>,
    settings: RwLock<BindingSettings>,
}

impl Default for BindingServices {
    fn default() -> Self {
        Self::new()
    }
}

impl BindingServices {
    /// Services with a fresh member provider, no resources, the default tree
    /// manager and default settings.
    pub fn new() -> Self {
        Self {
            member_provider: Arc::new(MemberProvider::new()),
            resources: Arc::new(ResourceResolver::new()),
            tree_manager: Arc::new(DefaultTreeManager),
            settings: RwLock::new(BindingSettings::default()),
        }
    }

    /// Replace the member provider.
    pub fn with_member_provider(mut self, provider: Arc<MemberProvider>) -> Self {
        self.member_provider = provider;
        self
    }

    /// Replace the resource resolver.
    pub fn with_resources(mut self, resources: Arc<ResourceResolver>) -> Self {
        self.resources = resources;
        self
    }

    /// Replace the tree manager.
    pub fn with_tree_manager(mut self, tree_manager: Arc<dyn TreeManager>) -> Self {
        self.tree_manager = tree_manager;
        self
    }

    /// Replace the settings.
    pub fn with_settings(self, settings: BindingSettings) -> Self {
        *self.settings.write() = settings;
        self
    }

    /// Install `settings` as the process-wide services' settings.
    ///
    /// Fails if the process-wide services already exist.
    pub fn init_with_settings(settings: BindingSettings) -> Result<&'static BindingServices> {
        init_binding_services(Self::new().with_settings(settings))
    }

    pub fn member_provider(&self) -> &Arc<MemberProvider> {
        &self.member_provider
    }

    pub fn resources(&self) -> &Arc<ResourceResolver> {
        &self.resources
    }

    pub fn tree_manager(&self) -> &Arc<dyn TreeManager> {
        &self.tree_manager
    }

    /// A copy of the current settings.
    pub fn settings(&self) -> BindingSettings {
        self.settings.read().clone()
    }

    /// Replace the settings for bindings built from now on.
    pub fn set_settings(&self, settings: BindingSettings) {
        *self.settings.write() = settings;
    }

    /// Register the members of a bindable type with the member provider.
    pub fn register_type<T: Bindable>(&self) {
        self.member_provider.register_type::<T>();
    }
}

/// The process-wide services, created with defaults on first use.
pub fn binding_services() -> &'static BindingServices {
    GLOBAL_SERVICES.get_or_init(BindingServices::new)
}

/// Install the process-wide services.
///
/// Fails with [`BindingError::AlreadyInitialized`] once they exist, including
/// after an earlier call to [`binding_services`].
pub fn init_binding_services(services: BindingServices) -> Result<&'static BindingServices> {
    GLOBAL_SERVICES
        .set(services)
        .map_err(|_| BindingError::AlreadyInitialized)?;
    tracing::debug!(target: "trellis_core::services", "binding services initialized");
    Ok(binding_services())
}

static_assertions::assert_impl_all!(BindingServices: Send, Sync);
