//! Core systems for Trellis.
//!
//! This crate provides the data binding engine of the Trellis framework:
//!
//! - **Values**: Type-erased values with unset and do-nothing markers
//! - **Signal/Slot System**: Type-safe notification used by every observable
//! - **Property System**: Reactive properties with change notification
//! - **Member Model**: Per-type descriptors for properties, indexers, events and attached values
//! - **Paths**: Parsed, interned member paths such as `Items[0].Name`
//! - **Path Observers**: Live tracking of the value at the end of a path
//! - **Bindings**: Two endpoints, a pluggable set of behaviors and a context
//! - **Builders**: Construction of bindings from paths, sources and settings
//!
//! # Signal/Slot Example
//!
//! ```
//! use trellis_core::Signal;
//!
//! let value_changed = Signal::<i32>::new();
//! let conn_id = value_changed.connect(|value| {
//!     println!("Value changed to: {}", value);
//! });
//!
//! value_changed.emit(42);
//! value_changed.disconnect(conn_id);
//! ```
//!
//! # Path Observer Example
//!
//! ```
//! use std::sync::Arc;
//! use trellis_core::{Bindable, BindingMember, MemberProvider, ObserverOptions, PathObserver, Property, Value};
//!
//! struct Person {
//!     name: Property<String>,
//! }
//!
//! impl Bindable for Person {
//!     fn binding_members() -> Vec<BindingMember> {
//!         vec![BindingMember::from_property("Name", |p: &Person| &p.name)]
//!     }
//! }
//!
//! let provider = MemberProvider::new();
//! provider.register_type::<Person>();
//!
//! let person = Arc::new(Person { name: Property::new("Ada".to_string()) });
//! let observer = PathObserver::parse(
//!     Value::from_arc(person.clone()),
//!     "Name",
//!     Arc::new(provider),
//!     ObserverOptions::default(),
//! )
//! .unwrap();
//!
//! assert_eq!(observer.value().get::<String>().as_deref(), Some("Ada"));
//! ```

pub mod accessor;
pub mod attached;
pub mod behavior;
pub mod binding;
mod builder;
mod config;
pub mod dispatch;
mod error;
pub mod logging;
pub mod member;
pub mod observer;
pub mod path;
pub mod property;
mod provider;
pub mod resource;
pub mod scheduler;
mod services;
pub mod signal;
pub mod value;
pub mod weak_event;

pub use accessor::{
    BindingSource, FnConverter, MultiFormatter, MultiSourceAccessor, SharedAccessor, SharedConverter,
    SingleSourceAccessor, SourceAccessor, ValueConverter,
};
pub use attached::{AttachedValues, DATA_CONTEXT_MEMBER, PARENT_MEMBER, attached_values};
pub use behavior::{
    BehaviorId, BindingBehavior, DelayBindingBehavior, NoneBindingMode, OneTimeBindingMode, OneWayBindingMode,
    OneWayToSourceBindingMode, SharedBehavior, TwoWayBindingMode, ValidatesOnExceptionsBehavior,
};
pub use binding::{
    Behaviors, BindingAction, BindingConstants, BindingContext, BindingEvent, BindingExceptionEvent, DataBinding,
    DataConstant, WeakDataBinding,
};
pub use builder::{BindingBuilder, create_binding};
pub use config::{BindingModeKind, BindingSettings, BindingSettingsBuilder};
pub use dispatch::{Dispatcher, invoke_on_affinity_thread, invoke_on_affinity_thread_async};
pub use error::{BindingError, Result};
pub use logging::{PathMembersDebug, PerfSpan, TreeFormatOptions, TreeStyle};
pub use member::{Bindable, BindingMember, MemberKind};
pub use observer::{ObserverOptions, ObserverState, PathMembers, PathObserver};
pub use path::{BindingPath, IndexArg, PathSegment, merge_path, merge_paths};
pub use property::{Property, ReadOnlyProperty};
pub use provider::MemberProvider;
pub use resource::{DefaultTreeManager, ResourceResolver, SourceSyntax, TreeManager};
pub use scheduler::DelayScheduler;
pub use services::{BindingServices, binding_services, init_binding_services};
pub use signal::{ConnectionId, ConnectionType, Signal};
pub use value::{BindableValue, FromValue, IntoValue, Value, ValueType};
pub use weak_event::{
    EventListener, EventListenerList, FnListener, SharedListener, Subscription, WeakEventListener, to_weak,
};
