//! Logging facilities for Collate.
//!
//! Collate uses the `tracing` crate for instrumentation and never installs a
//! subscriber itself. To see logs, install one in your application:
//!
//! ```ignore
//! fn main() {
//!     tracing_subscriber::fmt()
//!         .with_env_filter("collate=debug")
//!         .init();
//!
//!     // Your application code...
//! }
//! ```
//!
//! Every event is emitted with one of the [`targets`] so that subsystems can
//! be filtered independently, e.g. `collate::virtual_collection=trace`.

/// Span names used throughout Collate for tracing.
pub mod span_names {
    /// Full rebuild of a virtual collection.
    pub const REBUILD: &str = "collate::rebuild";
    /// Incremental insertion into a virtual collection.
    pub const PATCH: &str = "collate::patch";
}

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Signal/slot system target.
    pub const SIGNAL: &str = "collate_core::signal";
    /// Source collection target.
    pub const COLLECTION: &str = "collate::collection";
    /// Record target.
    pub const RECORD: &str = "collate::record";
    /// Virtual collection target.
    pub const VIRTUAL_COLLECTION: &str = "collate::virtual_collection";
    /// Performance spans.
    pub const PERF: &str = "collate::perf";
}

/// A guard that keeps a tracing span entered until it is dropped.
///
/// This is useful for tracking the duration of operations such as rebuilds.
#[derive(Debug)]
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span.
    ///
    /// The span will be active until the guard is dropped.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: targets::PERF, "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perf_span() {
        // Just ensure it compiles and doesn't panic without a subscriber
        let _span = PerfSpan::new("test_operation");
    }

    #[test]
    fn test_perf_span_with_subscriber() {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter("collate=trace")
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let _span = PerfSpan::new(span_names::REBUILD);
            tracing::debug!(target: targets::VIRTUAL_COLLECTION, entries = 3, "inside perf span");
        });
    }

    #[test]
    fn test_targets_are_namespaced() {
        assert!(targets::SIGNAL.starts_with("collate_core::"));
        assert!(targets::VIRTUAL_COLLECTION.starts_with("collate::"));
    }
}
