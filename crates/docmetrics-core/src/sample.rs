//! Metric samples and the per-scrape bookkeeping around them.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::Serialize;

/// Label set of a sample. Sorted, so two label sets built in different
/// orders compare equal.
pub type Labels = BTreeMap<String, String>;

/// Identity of a sample for emission purposes.
pub type SampleKey = (String, Labels);

/// Metric type advertised to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
}

/// One named, labeled numeric observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub name: String,
    pub value: f64,
    pub labels: Labels,
    pub kind: MetricKind,
}

impl Sample {
    pub fn gauge(name: impl Into<String>, value: f64, labels: Labels) -> Self {
        Self {
            name: name.into(),
            value,
            labels,
            kind: MetricKind::Gauge,
        }
    }

    pub fn counter(name: impl Into<String>, value: f64, labels: Labels) -> Self {
        Self {
            name: name.into(),
            value,
            labels,
            kind: MetricKind::Counter,
        }
    }

    pub fn key(&self) -> SampleKey {
        (self.name.clone(), self.labels.clone())
    }
}

/// Static description of a metric a collector may emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Descriptor {
    pub name: &'static str,
    pub help: &'static str,
    pub kind: MetricKind,
}

/// Category of a non-fatal scrape issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// A reply could not be decoded into a document.
    Decode,
    /// A sub-structure an extractor looks for is absent.
    MissingField,
    /// A command failed at the transport or server level.
    Command,
    /// The node role could not be determined.
    RoleResolution,
    /// The scrape was cancelled before this step finished.
    Cancelled,
    /// Two samples with the same name and labels; the later one was dropped.
    NameCollision,
    /// A leaf that cannot be represented as a sample (NaN, infinity).
    UnsupportedValue,
}

/// A non-fatal issue recorded instead of failing the scrape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub source: &'static str,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn new(source: &'static str, kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            source,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {:?}: {}", self.source, self.kind, self.message)
    }
}

/// Output of one pipeline stage: the samples it produced and whatever
/// went wrong on the way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub samples: Vec<Sample>,
    pub diagnostics: Vec<Diagnostic>,
}

impl From<Sample> for Extraction {
    fn from(sample: Sample) -> Self {
        Self {
            samples: vec![sample],
            diagnostics: Vec::new(),
        }
    }
}

impl Extraction {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn has_diagnostic(&self, kind: DiagnosticKind) -> bool {
        self.diagnostics.iter().any(|d| d.kind == kind)
    }
}

/// Ordered sample accumulator that refuses duplicate identities.
///
/// The first sample for a `(name, labels)` pair is kept; every later one is
/// dropped and recorded as a [`DiagnosticKind::NameCollision`].
#[derive(Debug)]
pub struct SampleSet {
    source: &'static str,
    samples: Vec<Sample>,
    keys: HashSet<SampleKey>,
    diagnostics: Vec<Diagnostic>,
}

impl SampleSet {
    pub fn new(source: &'static str) -> Self {
        Self {
            source,
            samples: Vec::new(),
            keys: HashSet::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Adds a sample. Returns `false` if its identity was already taken.
    pub fn push(&mut self, sample: Sample) -> bool {
        if !self.keys.insert(sample.key()) {
            self.diagnostics.push(Diagnostic::new(
                self.source,
                DiagnosticKind::NameCollision,
                format!("duplicate sample {}{:?} dropped", sample.name, sample.labels),
            ));
            return false;
        }
        self.samples.push(sample);
        true
    }

    pub fn diagnose(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::new(self.source, kind, message));
    }

    /// Merges another stage's output, keeping its diagnostics.
    pub fn extend(&mut self, extraction: Extraction) {
        self.diagnostics.extend(extraction.diagnostics);
        for sample in extraction.samples {
            self.push(sample);
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn into_extraction(self) -> Extraction {
        Extraction {
            samples: self.samples,
            diagnostics: self.diagnostics,
        }
    }
}

/// Builds a label set from string pairs.
pub fn labels<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Labels {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_order_does_not_change_identity() {
        let a = Sample::gauge("m", 1.0, labels([("x", "1"), ("y", "2")]));
        let b = Sample::gauge("m", 2.0, labels([("y", "2"), ("x", "1")]));
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn sample_set_keeps_first_and_reports_duplicate() {
        let mut set = SampleSet::new("test");
        assert!(set.push(Sample::gauge("m", 1.0, Labels::new())));
        assert!(!set.push(Sample::gauge("m", 2.0, Labels::new())));
        assert!(set.push(Sample::gauge("m", 3.0, labels([("k", "v")]))));

        let out = set.into_extraction();
        assert_eq!(out.samples.len(), 2);
        assert_eq!(out.samples[0].value, 1.0);
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].kind, DiagnosticKind::NameCollision);
    }

    #[test]
    fn extend_carries_diagnostics_over() {
        let mut set = SampleSet::new("outer");
        let inner = Extraction {
            samples: vec![Sample::counter("c", 1.0, Labels::new())],
            diagnostics: vec![Diagnostic::new("inner", DiagnosticKind::MissingField, "gone")],
        };
        set.extend(inner);
        let out = set.into_extraction();
        assert_eq!(out.samples.len(), 1);
        assert!(out.has_diagnostic(DiagnosticKind::MissingField));
    }
}
