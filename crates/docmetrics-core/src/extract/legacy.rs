//! Curated metrics kept for dashboards built against older exporters.
//!
//! Unlike the other extractors this one talks to the server: each metric
//! comes from its own administrative command, and a failed command only
//! costs the metrics that command would have produced.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::document::Document;
use crate::sample::{
    Descriptor, DiagnosticKind, Extraction, Labels, MetricKind, Sample, SampleSet,
};
use crate::transport::{Command, CommandRunner, FetchError, fetch_document};

const SOURCE: &str = "legacy";
const ADMIN: &str = "admin";

const STORAGE_ENGINE: Descriptor = Descriptor {
    name: "mongodb_mongod_storage_engine",
    help: "The storage engine used by the server",
    kind: MetricKind::Gauge,
};

const VERSION_INFO: Descriptor = Descriptor {
    name: "mongodb_version_info",
    help: "Software version of the server",
    kind: MetricKind::Gauge,
};

const REPLSET_MY_STATE: Descriptor = Descriptor {
    name: "mongodb_mongod_replset_my_state",
    help: "Replica set state of this member",
    kind: MetricKind::Gauge,
};

pub const PROFILE_ENTRIES: Descriptor = Descriptor {
    name: "mongodb_mongod_profile_entries",
    help: "Number of profiler entries returned by the last scrape",
    kind: MetricKind::Gauge,
};

/// Names produced by [`legacy_metrics`].
pub fn descriptors() -> Vec<Descriptor> {
    vec![STORAGE_ENGINE, VERSION_INFO, REPLSET_MY_STATE]
}

/// Builds a sample from a decoded sub-command reply.
type Reading = fn(&Document, &Labels) -> Option<Sample>;

const SUB_COMMANDS: &[(&str, Reading)] = &[
    ("serverStatus", storage_engine),
    ("buildInfo", version_info),
    ("replSetGetStatus", replset_my_state),
];

/// Issues the legacy sub-commands.
///
/// Stops issuing commands once `cancel` fires; what was read so far is
/// returned together with a `Cancelled` diagnostic.
pub async fn legacy_metrics<R: CommandRunner + ?Sized>(
    runner: &R,
    cancel: &CancellationToken,
    base_labels: &Labels,
) -> Extraction {
    let mut out = SampleSet::new(SOURCE);

    for &(name, reading) in SUB_COMMANDS {
        let reply = match fetch_document(runner, cancel, ADMIN, &Command::new(name, 1)).await {
            Ok(reply) => reply,
            Err(e) if e.is_cancelled() => {
                out.diagnose(DiagnosticKind::Cancelled, format!("{} not issued", name));
                break;
            }
            Err(e) => {
                debug!(command = name, error = %e, "legacy sub-command failed");
                let kind = match e {
                    FetchError::Decode(_) => DiagnosticKind::Decode,
                    FetchError::Command(_) => DiagnosticKind::Command,
                };
                out.diagnose(kind, format!("{}: {}", name, e));
                continue;
            }
        };
        match reading(&reply, base_labels) {
            Some(sample) => {
                out.push(sample);
            }
            None => out.diagnose(
                DiagnosticKind::MissingField,
                format!("{} reply lacks the expected field", name),
            ),
        }
    }

    out.into_extraction()
}

fn with_label(base: &Labels, key: &str, value: &str) -> Labels {
    let mut labels = base.clone();
    labels.insert(key.to_string(), value.to_string());
    labels
}

fn storage_engine(reply: &Document, base: &Labels) -> Option<Sample> {
    let engine = reply.get_document("storageEngine")?.get_str("name")?;
    Some(Sample::gauge(
        STORAGE_ENGINE.name,
        1.0,
        with_label(base, "engine", engine),
    ))
}

fn version_info(reply: &Document, base: &Labels) -> Option<Sample> {
    let version = reply.get_str("version")?;
    Some(Sample::gauge(
        VERSION_INFO.name,
        1.0,
        with_label(base, "mongodb", version),
    ))
}

fn replset_my_state(reply: &Document, base: &Labels) -> Option<Sample> {
    let state = reply.get_number("myState")?;
    let set = reply.get_str("set").unwrap_or_default();
    Some(Sample::gauge(
        REPLSET_MY_STATE.name,
        state,
        with_label(base, "set", set),
    ))
}

/// Number of profiler entries in a `find` reply's `cursor.firstBatch`.
pub fn profile_entries(doc: Option<&Document>, base: &Labels) -> Option<Sample> {
    let batch = doc?.get_path(&["cursor", "firstBatch"])?.as_sequence()?;
    Some(Sample::gauge(
        PROFILE_ENTRIES.name,
        batch.len() as f64,
        base.clone(),
    ))
}
