//! Trellis - A Rust-native MVVM data binding engine.
//!
//! This is the umbrella crate that re-exports all public APIs.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use trellis::prelude::*;
//!
//! #[derive(Bindable)]
//! struct Person {
//!     name: Property<String>,
//! }
//!
//! let services = BindingServices::new();
//! Person::register_bindable(services.member_provider());
//!
//! let source = Arc::new(Person { name: Property::new("Ada".to_string()) });
//! let target = Arc::new(Person { name: Property::new(String::new()) });
//!
//! let binding = BindingBuilder::with_services(&services, Value::from_arc(target.clone()), "Name")
//!     .to("Name")
//!     .source(Value::from_arc(source.clone()))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(target.name.get(), "Ada");
//! binding.dispose();
//! ```

pub use trellis_core::*;
pub use trellis_macros::*;

pub mod prelude;
