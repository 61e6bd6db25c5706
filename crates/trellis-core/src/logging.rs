//! Logging and debugging facilities for Trellis.
//!
//! This module provides:
//! - Target names for filtering the `tracing` output of each subsystem
//! - Debug visualization of an observer's resolved path chain
//! - [`PerfSpan`] guards for timing operations
//!
//! # Tracing Integration
//!
//! Trellis uses the `tracing` crate for instrumentation. To see logs, install
//! a tracing subscriber in your application:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("trellis_core::observer=trace,trellis_core::binding=debug")
//!         .init();
//! }
//! ```
//!
//! # Debug Visualization
//!
//! Use [`PathMembersDebug`] to see how far a path currently resolves:
//!
//! ```ignore
//! use trellis_core::logging::PathMembersDebug;
//!
//! println!("{}", PathMembersDebug::new().format(&observer));
//! ```

use std::fmt::Write as FmtWrite;

use crate::observer::PathObserver;

/// `tracing` targets, one per subsystem.
pub mod targets {
    /// Core framework target.
    pub const CORE: &str = "trellis_core";
    /// Path parsing and interning.
    pub const PATH: &str = "trellis_core::path";
    /// Member descriptors and resolution.
    pub const MEMBER: &str = "trellis_core::member";
    /// Path observers.
    pub const OBSERVER: &str = "trellis_core::observer";
    /// Data bindings.
    pub const BINDING: &str = "trellis_core::binding";
    /// Binding behaviors.
    pub const BEHAVIOR: &str = "trellis_core::behavior";
    /// Signal/slot system.
    pub const SIGNAL: &str = "trellis_core::signal";
    /// Weak listeners and subscriptions.
    pub const WEAK_EVENT: &str = "trellis_core::weak_event";
    /// Resources and source resolution.
    pub const RESOURCE: &str = "trellis_core::resource";
    /// Affinity thread dispatch.
    pub const DISPATCH: &str = "trellis_core::dispatch";
    /// Delay scheduler.
    pub const SCHEDULER: &str = "trellis_core::scheduler";
    /// Performance spans.
    pub const PERF: &str = "trellis_core::perf";
}

/// Style options for path chain visualization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeStyle {
    /// `` `-- `` branches.
    Ascii,
    /// Box-drawing branches.
    #[default]
    Unicode,
    /// One line, segments joined by arrows.
    Compact,
}

/// Configuration for path chain debug output.
#[derive(Debug, Clone)]
pub struct TreeFormatOptions {
    /// Branch drawing style.
    pub style: TreeStyle,
    /// Whether to show the member kind of each segment.
    pub show_kinds: bool,
    /// Whether to show each segment's subscription generation.
    pub show_generations: bool,
    /// Whether to list segments that do not currently resolve.
    pub show_unresolved: bool,
    /// Spaces added per nesting level.
    pub indent_size: usize,
}

impl Default for TreeFormatOptions {
    fn default() -> Self {
        Self {
            style: TreeStyle::default(),
            show_kinds: true,
            show_generations: false,
            show_unresolved: true,
            indent_size: 2,
        }
    }
}

impl TreeFormatOptions {
    /// Everything, including subscription generations.
    pub fn detailed() -> Self {
        Self {
            show_generations: true,
            ..Default::default()
        }
    }

    /// Resolved segment names only.
    pub fn minimal() -> Self {
        Self {
            show_kinds: false,
            show_generations: false,
            show_unresolved: false,
            ..Default::default()
        }
    }
}

/// Renders the resolved segment chain of a [`PathObserver`].
#[derive(Debug, Clone, Default)]
pub struct PathMembersDebug {
    options: TreeFormatOptions,
}

impl PathMembersDebug {
    /// Create a visualizer with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a visualizer with custom options.
    pub fn with_options(options: TreeFormatOptions) -> Self {
        Self { options }
    }

    /// Format the chain of `observer`.
    pub fn format(&self, observer: &PathObserver) -> String {
        let mut output = String::new();
        let path = observer.path();
        let _ = writeln!(
            output,
            "Path '{}' ({:?}, {} available):",
            path,
            observer.state(),
            if observer.all_members_available() { "all" } else { "not all" }
        );

        if self.options.style == TreeStyle::Compact {
            let segments: Vec<String> = observer
                .segments()
                .iter()
                .map(|snapshot| {
                    let marker = if snapshot.subscribed { "*" } else { "" };
                    format!("{}{}", snapshot.segment, marker)
                })
                .collect();
            let _ = writeln!(output, "  {}", segments.join(" -> "));
            return output;
        }

        let snapshots = observer.segments();
        let resolved = snapshots.len();
        let total = if self.options.show_unresolved {
            path.len()
        } else {
            resolved
        };

        for (depth, snapshot) in snapshots.iter().enumerate() {
            output.push_str(&self.build_prefix(depth + 1));
            output.push_str(&snapshot.segment);
            if self.options.show_kinds {
                let _ = write!(output, " ({:?})", snapshot.kind);
            }
            if self.options.show_generations {
                let _ = write!(output, " [gen {}]", snapshot.generation);
            }
            if !snapshot.subscribed {
                output.push_str(" (not observed)");
            }
            output.push('\n');
        }

        for depth in resolved..total {
            output.push_str(&self.build_prefix(depth + 1));
            let segment = path
                .segments()
                .get(depth)
                .map(ToString::to_string)
                .unwrap_or_default();
            let _ = writeln!(output, "{segment} (unresolved)");
        }

        if total == 0 {
            output.push_str("  (self)\n");
        }
        output
    }

    /// Build the prefix string for a chain node.
    fn build_prefix(&self, depth: usize) -> String {
        let (branch, corner) = match self.options.style {
            TreeStyle::Ascii => (" ", "`-- "),
            TreeStyle::Unicode => (" ", "\u{2514}\u{2500}\u{2500} "),
            TreeStyle::Compact => ("", "- "),
        };

        let mut prefix = String::new();
        for _ in 0..depth.saturating_sub(1) {
            prefix.push_str(branch);
            for _ in 0..self.options.indent_size {
                prefix.push(' ');
            }
        }
        prefix.push_str(corner);
        prefix
    }
}

/// Keeps a `trellis_core::perf` span entered until dropped.
#[derive(Debug)]
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Enter a span for `name`.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: "trellis_core::perf", "perf", operation = name);
        Self { span: span.entered() }
    }
}

/// `tracing` macros preset to the `trellis_core` target.
#[macro_export]
macro_rules! trellis_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "trellis_core", $($arg)*)
    };
}

#[macro_export]
macro_rules! trellis_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "trellis_core", $($arg)*)
    };
}

#[macro_export]
macro_rules! trellis_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "trellis_core", $($arg)*)
    };
}

#[macro_export]
macro_rules! trellis_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "trellis_core", $($arg)*)
    };
}
