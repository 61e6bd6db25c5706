//! Error types for Trellis.
//!
//! Errors fall into three groups:
//!
//! - **Configuration errors** are programmer mistakes discovered while a
//!   binding is being built (bad path syntax, unknown member, duplicate
//!   behavior kind). They propagate to whoever is constructing the binding.
//! - **Runtime errors** happen while a live binding evaluates (a getter,
//!   setter, converter or validator fails). They never escape the update
//!   operations of a [`DataBinding`](crate::binding::DataBinding); they are
//!   logged and surfaced through its exception signal instead.
//! - **Lifetime errors** report that a binding was disposed or that its source
//!   was dropped. Callers treat them as no-ops.

use std::fmt;

use crate::binding::BindingAction;

/// Result type alias for binding operations.
pub type Result<T> = std::result::Result<T, BindingError>;

/// Errors produced by the binding engine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BindingError {
    /// A member path could not be parsed.
    #[error("Invalid binding path '{path}' at position {position}: {message}")]
    InvalidPath {
        path: String,
        position: usize,
        message: String,
    },

    /// No member with the given name exists on the type.
    #[error("The member '{member}' cannot be found on the type '{type_name}'")]
    MemberNotFound {
        type_name: &'static str,
        member: String,
    },

    /// A member with this name is already registered for the type.
    #[error("The member '{member}' is already registered on the type '{type_name}'")]
    DuplicateMember {
        type_name: &'static str,
        member: String,
    },

    /// Two behaviors with the same kind id were added to one binding.
    #[error("The binding already has a behavior '{existing}' with the same id as '{new}'")]
    DuplicateBehavior { existing: String, new: String },

    /// A named resource is not registered.
    #[error("The resource '{name}' cannot be found")]
    ResourceNotFound { name: String },

    /// A named converter is not registered.
    #[error("The converter '{name}' cannot be found")]
    ConverterNotFound { name: String },

    /// Attempted to write through a member that has no setter.
    #[error("The member '{member}' is read-only")]
    ReadOnlyMember { member: String },

    /// A binding source description cannot be resolved.
    #[error("Invalid binding source: {0}")]
    InvalidSourceSyntax(String),

    /// A value had a different runtime type than the member expects.
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },

    /// A getter, setter or subscription failed while evaluating a member.
    #[error("Failed to evaluate member '{member}': {message}")]
    Evaluation { member: String, message: String },

    /// A value converter failed.
    #[error("Conversion failed: {0}")]
    Conversion(String),

    /// A validation step failed.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The operation is not supported by this member or accessor.
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// A runtime error wrapped with the binding and action it occurred in.
    #[error("A binding error has occurred, action '{action}', binding '{binding}': {source}")]
    Wrapped {
        action: BindingAction,
        binding: String,
        #[source]
        source: Box<BindingError>,
    },

    /// The binding has been disposed.
    #[error("The binding has been disposed")]
    Disposed,

    /// The source object of an observer has been dropped.
    #[error("The binding source is no longer alive")]
    SourceReleased,

    /// The process-wide binding services were initialized twice.
    #[error("The binding services are already initialized")]
    AlreadyInitialized,
}

impl BindingError {
    /// Create a path syntax error.
    pub fn invalid_path(path: impl Into<String>, position: usize, message: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            position,
            message: message.into(),
        }
    }

    /// Create a missing-member error.
    pub fn member_not_found(type_name: &'static str, member: impl Into<String>) -> Self {
        Self::MemberNotFound {
            type_name,
            member: member.into(),
        }
    }

    /// Create an evaluation error for a member.
    pub fn evaluation(member: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Evaluation {
            member: member.into(),
            message: message.to_string(),
        }
    }

    /// Wrap an error with the identity of the binding that raised it.
    pub fn wrap(action: BindingAction, binding: impl Into<String>, source: BindingError) -> Self {
        Self::Wrapped {
            action,
            binding: binding.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error is a build-time configuration mistake.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidPath { .. }
                | Self::MemberNotFound { .. }
                | Self::DuplicateMember { .. }
                | Self::DuplicateBehavior { .. }
                | Self::ResourceNotFound { .. }
                | Self::ConverterNotFound { .. }
                | Self::InvalidSourceSyntax(_)
                | Self::AlreadyInitialized
        )
    }

    /// Whether this error only reports that something is no longer alive.
    pub fn is_lifetime(&self) -> bool {
        matches!(self, Self::Disposed | Self::SourceReleased)
    }

    /// The innermost error, looking through [`BindingError::Wrapped`].
    pub fn root_cause(&self) -> &BindingError {
        match self {
            Self::Wrapped { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(BindingError::invalid_path("A..B", 2, "empty member").is_configuration());
        assert!(BindingError::member_not_found("Foo", "Bar").is_configuration());
        assert!(!BindingError::Conversion("bad".into()).is_configuration());
        assert!(BindingError::Disposed.is_lifetime());
        assert!(!BindingError::Disposed.is_configuration());
    }

    #[test]
    fn test_wrapped_error_display_and_cause() {
        let inner = BindingError::evaluation("Name", "boom");
        let wrapped = BindingError::wrap(BindingAction::UpdateTarget, "Text <- Name", inner.clone());

        let text = wrapped.to_string();
        assert!(text.contains("UpdateTarget"));
        assert!(text.contains("Text <- Name"));
        assert!(text.contains("boom"));
        assert_eq!(wrapped.root_cause(), &inner);
    }
}
