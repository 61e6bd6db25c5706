//! Member resolution.
//!
//! The [`MemberProvider`] maps `(type, member name)` to a shared
//! [`BindingMember`]. Members come from three places, searched in order:
//!
//! 1. attached members registered for the exact type with
//!    [`MemberProvider::register`];
//! 2. attached members registered for every type with
//!    [`MemberProvider::register_for_all_types`] (such as `DataContext`);
//! 3. members the type declares itself through [`Bindable`] or
//!    [`MemberProvider::register_type_members`].
//!
//! Lookups are cached per `(TypeId, name, ignore_attached)`. Concurrent first
//! lookups of the same pair may both resolve, but only the first result is
//! stored. Any registration clears the cache.
//!
//! A declared member that cannot notify by itself borrows the observer of an
//! event member named `<name>Changed` or `<name>Change` on the same type.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::attached::{DATA_CONTEXT_MEMBER, PARENT_MEMBER, attached_auto_property};
use crate::error::{BindingError, Result};
use crate::member::{Bindable, BindingMember, MemberKind};
use crate::value::Value;

type CacheKey = (TypeId, String, bool);

#[derive(Default)]
struct TypeMembers {
    type_name: &'static str,
    members: HashMap<String, Arc<BindingMember>>,
}

/// Resolves and caches member descriptors.
pub struct MemberProvider {
    declared: RwLock<HashMap<TypeId, TypeMembers>>,
    attached: RwLock<HashMap<TypeId, HashMap<String, Arc<BindingMember>>>>,
    global_attached: RwLock<HashMap<String, Arc<BindingMember>>>,
    cache: RwLock<HashMap<CacheKey, Option<Arc<BindingMember>>>>,
}

impl Default for MemberProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemberProvider {
    /// Create a provider with the built-in attached members registered.
    pub fn new() -> Self {
        let provider = Self::empty();
        let mut global = provider.global_attached.write();
        global.insert(
            DATA_CONTEXT_MEMBER.to_string(),
            Arc::new(attached_auto_property::<Value>(DATA_CONTEXT_MEMBER)),
        );
        global.insert(
            PARENT_MEMBER.to_string(),
            Arc::new(attached_auto_property::<Value>(PARENT_MEMBER)),
        );
        drop(global);
        provider
    }

    /// Create a provider with nothing registered.
    pub fn empty() -> Self {
        Self {
            declared: RwLock::new(HashMap::new()),
            attached: RwLock::new(HashMap::new()),
            global_attached: RwLock::new(HashMap::new()),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Register the declared members of a [`Bindable`] type.
    pub fn register_type<T: Bindable>(&self) {
        self.register_type_members::<T>(T::binding_members());
    }

    /// Register declared members for `T`, replacing members with the same name.
    pub fn register_type_members<T: Any>(&self, members: Vec<BindingMember>) {
        let type_id = TypeId::of::<T>();
        {
            let mut declared = self.declared.write();
            let entry = declared.entry(type_id).or_default();
            entry.type_name = type_name::<T>();
            for member in members {
                entry.members.insert(member.name().to_string(), Arc::new(member));
            }
        }
        self.cache.write().clear();
        tracing::debug!(
            target: "trellis_core::member",
            type_name = type_name::<T>(),
            "registered type members"
        );
    }

    /// Register `Vec<V>` and `HashMap<String, V>` indexers.
    pub fn register_collection<V>(&self)
    where
        V: crate::value::IntoValue + Clone + Any + Send + Sync,
    {
        self.register_type_members::<Vec<V>>(vec![BindingMember::vec_indexer::<V>()]);
        self.register_type_members::<HashMap<String, V>>(vec![BindingMember::map_indexer::<V>()]);
    }

    /// Register an attached member for one type.
    ///
    /// Fails with [`BindingError::DuplicateMember`] if the name is taken and
    /// `rewrite` is false.
    pub fn register(
        &self,
        type_id: TypeId,
        path: &str,
        member: BindingMember,
        rewrite: bool,
    ) -> Result<()> {
        {
            let mut attached = self.attached.write();
            let members = attached.entry(type_id).or_default();
            if !rewrite && members.contains_key(path) {
                return Err(BindingError::DuplicateMember {
                    type_name: self.type_name(type_id),
                    member: path.to_string(),
                });
            }
            members.insert(path.to_string(), Arc::new(member));
        }
        self.cache.write().clear();
        tracing::debug!(target: "trellis_core::member", member = path, "attached member registered");
        Ok(())
    }

    /// Register an attached member for every type.
    pub fn register_for_all_types(&self, path: &str, member: BindingMember, rewrite: bool) -> Result<()> {
        {
            let mut global = self.global_attached.write();
            if !rewrite && global.contains_key(path) {
                return Err(BindingError::DuplicateMember {
                    type_name: "(all types)",
                    member: path.to_string(),
                });
            }
            global.insert(path.to_string(), Arc::new(member));
        }
        self.cache.write().clear();
        Ok(())
    }

    /// Remove an attached member registered for one type.
    pub fn unregister(&self, type_id: TypeId, path: &str) -> bool {
        let removed = self
            .attached
            .write()
            .get_mut(&type_id)
            .is_some_and(|members| members.remove(path).is_some());
        if removed {
            self.cache.write().clear();
        }
        removed
    }

    /// Resolve a member, or `None` if the type has no such member.
    pub fn get_member(&self, type_id: TypeId, path: &str, ignore_attached: bool) -> Option<Arc<BindingMember>> {
        let key = (type_id, path.to_string(), ignore_attached);
        if let Some(cached) = self.cache.read().get(&key) {
            return cached.clone();
        }

        let resolved = self.resolve(type_id, path, ignore_attached);
        let mut cache = self.cache.write();
        cache.entry(key).or_insert(resolved).clone()
    }

    /// Resolve a member, failing with [`BindingError::MemberNotFound`].
    pub fn try_get_member(&self, type_id: TypeId, path: &str, ignore_attached: bool) -> Result<Arc<BindingMember>> {
        self.get_member(type_id, path, ignore_attached)
            .ok_or_else(|| BindingError::member_not_found(self.type_name(type_id), path))
    }

    /// Whether the type has the member.
    pub fn has_member(&self, type_id: TypeId, path: &str, ignore_attached: bool) -> bool {
        self.get_member(type_id, path, ignore_attached).is_some()
    }

    /// Find the event that signals changes of `member_name`.
    ///
    /// Looks for `<name>Changed`, then `<name>Change`; only event members match.
    pub fn try_find_member_change_event(&self, type_id: TypeId, member_name: &str) -> Option<Arc<BindingMember>> {
        [format!("{member_name}Changed"), format!("{member_name}Change")]
            .iter()
            .filter_map(|name| self.get_member(type_id, name, false))
            .find(|member| member.kind() == MemberKind::Event)
    }

    /// The registered name of a type, for diagnostics.
    pub fn type_name(&self, type_id: TypeId) -> &'static str {
        self.declared
            .read()
            .get(&type_id)
            .map_or("(unregistered type)", |entry| entry.type_name)
    }

    fn resolve(&self, type_id: TypeId, path: &str, ignore_attached: bool) -> Option<Arc<BindingMember>> {
        if !ignore_attached {
            let attached = self
                .attached
                .read()
                .get(&type_id)
                .and_then(|members| members.get(path).cloned());
            if let Some(member) = attached {
                return Some(member);
            }
            if let Some(member) = self.global_attached.read().get(path).cloned() {
                return Some(member);
            }
        }

        let declared = self
            .declared
            .read()
            .get(&type_id)
            .and_then(|entry| entry.members.get(path).cloned())?;

        if declared.can_observe() || declared.kind() != MemberKind::Property {
            return Some(declared);
        }
        let event = self
            .declared
            .read()
            .get(&type_id)
            .and_then(|entry| {
                [format!("{path}Changed"), format!("{path}Change")]
                    .iter()
                    .filter_map(|name| entry.members.get(name))
                    .find(|member| member.kind() == MemberKind::Event)
                    .cloned()
            });
        match event {
            Some(event) => {
                tracing::trace!(
                    target: "trellis_core::member",
                    member = path,
                    event = event.name(),
                    "member observed through change event"
                );
                Some(Arc::new(declared.as_ref().clone().with_observer_of(&event)))
            }
            None => Some(declared),
        }
    }
}

static_assertions::assert_impl_all!(MemberProvider: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::property::Property;
    use crate::signal::Signal;

    struct Counter {
        count: Property<i32>,
        label: String,
        label_changed: Signal<()>,
    }

    impl Bindable for Counter {
        fn binding_members() -> Vec<BindingMember> {
            vec![
                BindingMember::from_property("Count", |c: &Counter| &c.count),
                BindingMember::property("Label", |c: &Counter| c.label.clone()),
                BindingMember::event("LabelChanged", |c: &Counter| &c.label_changed),
            ]
        }
    }

    #[test]
    fn test_declared_members_resolve() {
        let provider = MemberProvider::new();
        provider.register_type::<Counter>();
        let id = TypeId::of::<Counter>();

        assert!(provider.has_member(id, "Count", false));
        assert!(!provider.has_member(id, "Missing", false));
        assert!(provider.type_name(id).ends_with("Counter"));

        let first = provider.get_member(id, "Count", false).unwrap();
        let second = provider.get_member(id, "Count", false).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let err = provider.try_get_member(id, "Missing", false).unwrap_err();
        assert!(matches!(err, BindingError::MemberNotFound { .. }));
    }

    #[test]
    fn test_change_event_lookup() {
        let provider = MemberProvider::new();
        provider.register_type::<Counter>();
        let id = TypeId::of::<Counter>();

        let event = provider.try_find_member_change_event(id, "Label").unwrap();
        assert_eq!(event.name(), "LabelChanged");
        assert!(provider.try_find_member_change_event(id, "Count").is_none());

        // Label has no notifier of its own and borrows LabelChanged.
        assert!(provider.get_member(id, "Label", false).unwrap().can_observe());
    }

    #[test]
    fn test_attached_members() {
        let provider = MemberProvider::new();
        provider.register_type::<Counter>();
        let id = TypeId::of::<Counter>();

        assert!(provider.has_member(id, DATA_CONTEXT_MEMBER, false));
        assert!(!provider.has_member(id, DATA_CONTEXT_MEMBER, true));
        assert!(provider.has_member(TypeId::of::<String>(), DATA_CONTEXT_MEMBER, false));

        let extra = BindingMember::property("Extra", |_: &Counter| 1i32);
        provider.register(id, "Extra", extra.clone(), false).unwrap();
        assert!(provider.has_member(id, "Extra", false));
        assert!(!provider.has_member(id, "Extra", true));

        let err = provider.register(id, "Extra", extra.clone(), false).unwrap_err();
        assert!(matches!(err, BindingError::DuplicateMember { .. }));
        provider.register(id, "Extra", extra, true).unwrap();

        assert!(provider.unregister(id, "Extra"));
        assert!(!provider.has_member(id, "Extra", false));
        assert!(!provider.unregister(id, "Extra"));
    }

    #[test]
    fn test_collection_indexers() {
        let provider = MemberProvider::new();
        provider.register_collection::<String>();
        assert!(provider.has_member(TypeId::of::<Vec<String>>(), crate::path::INDEXER_MEMBER, true));
        assert!(provider.has_member(
            TypeId::of::<HashMap<String, String>>(),
            crate::path::INDEXER_MEMBER,
            true
        ));
    }

    #[test]
    fn test_concurrent_first_resolution() {
        let provider = Arc::new(MemberProvider::new());
        provider.register_type::<Counter>();
        let id = TypeId::of::<Counter>();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let provider = provider.clone();
                std::thread::spawn(move || provider.get_member(id, "Count", false).unwrap())
            })
            .collect();
        let members: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for member in &members[1..] {
            assert!(Arc::ptr_eq(&members[0], member));
        }
    }
}
