//! Lock statistics.
//!
//! The server reports locks as `locks.<resource>.<family>.<mode>`, e.g.
//! `locks.Global.acquireCount.W`. Resources and modes are open-ended, so they
//! become the `resource` and `mode` labels of one metric per family.

use crate::document::Document;
use crate::sample::{Descriptor, DiagnosticKind, Extraction, Labels, MetricKind, Sample, SampleSet};

use super::locate;

const SOURCE: &str = "locks";

struct Family {
    key: &'static str,
    descriptor: Descriptor,
}

const FAMILIES: &[Family] = &[
    Family {
        key: "acquireCount",
        descriptor: Descriptor {
            name: "mongodb_locks_acquire_count_total",
            help: "Number of times the lock was acquired in the given mode",
            kind: MetricKind::Counter,
        },
    },
    Family {
        key: "acquireWaitCount",
        descriptor: Descriptor {
            name: "mongodb_locks_acquire_wait_count_total",
            help: "Number of lock acquisitions that had to wait",
            kind: MetricKind::Counter,
        },
    },
    Family {
        key: "timeAcquiringMicros",
        descriptor: Descriptor {
            name: "mongodb_locks_time_acquiring_micros_total",
            help: "Cumulative wait time for lock acquisitions in microseconds",
            kind: MetricKind::Counter,
        },
    },
    Family {
        key: "deadlockCount",
        descriptor: Descriptor {
            name: "mongodb_locks_deadlock_count_total",
            help: "Number of deadlocks encountered while acquiring the lock",
            kind: MetricKind::Counter,
        },
    },
];

pub fn descriptors() -> Vec<Descriptor> {
    FAMILIES.iter().map(|f| f.descriptor.clone()).collect()
}

/// Emits one sample per (resource, family, mode) found in the lock table.
pub fn lock_stats(doc: Option<&Document>, base_labels: &Labels) -> Extraction {
    let mut out = SampleSet::new(SOURCE);

    let Some(table) = doc.and_then(|d| locate(d, &["serverStatus"], &["locks"])) else {
        out.diagnose(DiagnosticKind::MissingField, "no lock table in document");
        return out.into_extraction();
    };

    for (resource, entry) in table.iter() {
        let Some(entry) = entry.as_document() else {
            continue;
        };
        for family in FAMILIES {
            let Some(modes) = entry.get_document(family.key) else {
                continue;
            };
            for (mode, count) in modes.iter() {
                let Some(count) = count.as_number() else {
                    continue;
                };
                let mut labels = base_labels.clone();
                labels.insert("resource".to_string(), resource.to_string());
                labels.insert("mode".to_string(), mode.to_string());
                out.push(Sample::counter(family.descriptor.name, count, labels));
            }
        }
    }

    out.into_extraction()
}
