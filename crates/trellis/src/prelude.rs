//! Prelude module for Trellis.
//!
//! This module re-exports the most commonly used types for convenient importing:
//!
//! ```ignore
//! use trellis::prelude::*;
//! ```
//!
//! This provides access to:
//! - Values (`Value`, `IntoValue`, `FromValue`)
//! - Signal/slot system (`Signal`, `Property`, `ConnectionType`)
//! - Member model (`Bindable`, `BindingMember`, the `Bindable` derive)
//! - Observers and bindings (`PathObserver`, `DataBinding`, `BindingBuilder`)

// ============================================================================
// Values
// ============================================================================

pub use crate::value::{BindableValue, FromValue, IntoValue, Value, ValueType};

// ============================================================================
// Signal/Slot and Property System
// ============================================================================

pub use crate::property::{Property, ReadOnlyProperty};
pub use crate::signal::{ConnectionId, ConnectionType, Signal};

// ============================================================================
// Member Model
// ============================================================================

pub use crate::member::{Bindable, BindingMember, MemberKind};
pub use crate::MemberProvider;
pub use trellis_macros::Bindable;

// ============================================================================
// Paths and Observers
// ============================================================================

pub use crate::observer::{ObserverOptions, PathObserver};
pub use crate::path::BindingPath;

// ============================================================================
// Bindings
// ============================================================================

pub use crate::binding::{BindingAction, DataBinding};
pub use crate::{
    BindingBuilder, BindingError, BindingModeKind, BindingServices, BindingSettings, FnConverter, SourceSyntax,
};
