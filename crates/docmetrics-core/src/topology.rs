//! Base labels supplied by the deployment inventory.

use crate::sample::Labels;

/// Source of the labels attached to every sample of a collector.
///
/// Implementations must be cheap and free of I/O; they are called once
/// per scrape on the scrape path.
pub trait LabelsSource: Send + Sync {
    fn base_labels(&self) -> Labels;
}

/// Fixed label set, known at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    labels: Labels,
}

impl StaticTopology {
    pub fn new(labels: Labels) -> Self {
        Self { labels }
    }
}

impl LabelsSource for StaticTopology {
    fn base_labels(&self) -> Labels {
        self.labels.clone()
    }
}
