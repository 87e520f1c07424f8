//! docmetrics-core - turns document-database command replies into metrics.
//!
//! Provides:
//! - `document` - ordered document model decoded from BSON replies
//! - `sample` - samples, descriptors, diagnostics, de-duplication
//! - `naming` - versioned path-to-name policy and the legacy rename table
//! - `flatten` - generic document-to-samples engine
//! - `extract` - lock, cache, legacy and routing-node extractors
//! - `role` - node-role resolution
//! - `collector` - collector trait, sink and the document collector
//! - `transport` - command runner abstraction and its in-memory mock
//! - `topology` - base labels

pub mod collector;
pub mod document;
pub mod extract;
pub mod flatten;
pub mod naming;
pub mod role;
pub mod sample;
pub mod topology;
pub mod transport;

pub use collector::{
    Collector, CollectorOptions, CollectorSpec, DocumentCollector, Extractors, ScrapeReport, Sink,
};
pub use document::{Document, Value};
pub use sample::{Descriptor, Diagnostic, DiagnosticKind, Extraction, Labels, MetricKind, Sample, SampleSet};

/// Crate version with the git revision it was built from.
pub const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("DOCMETRICS_GIT_SHA"),
    ")"
);
