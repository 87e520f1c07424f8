//! WiredTiger cache eviction total.

use crate::document::Document;
use crate::sample::{Descriptor, Labels, MetricKind, Sample};

use super::locate;

pub const DESCRIPTOR: Descriptor = Descriptor {
    name: "mongodb_mongod_wiredtiger_cache_evicted_total",
    help: "WiredTiger cache pages evicted, modified and unmodified",
    kind: MetricKind::Counter,
};

const EVICTION_FIELDS: &[&str] = &["modified pages evicted", "unmodified pages evicted"];

/// Sums the eviction counters of the WiredTiger cache section.
///
/// Returns `None` when the section or any of its counters is missing; the
/// caller omits the metric rather than reporting zero.
pub fn cache_evicted_total(doc: Option<&Document>, base_labels: &Labels) -> Option<Sample> {
    let cache = locate(doc?, &["serverStatus"], &["wiredTiger", "cache"])?;
    let mut total = 0.0;
    for field in EVICTION_FIELDS {
        total += cache.get_number(field)?;
    }
    Some(Sample::counter(DESCRIPTOR.name, total, base_labels.clone()))
}
