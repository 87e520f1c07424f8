//! Cluster-wide metrics only a routing node can answer.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::document::Document;
use crate::flatten::flatten_with_diagnostics;
use crate::sample::{DiagnosticKind, Extraction, Labels, SampleSet};
use crate::transport::{Command, CommandRunner, FetchError, fetch_document};

const SOURCE: &str = "routing";

/// Sub-command and the flattening prefix of its reply.
const SUB_COMMANDS: &[(&str, &str)] = &[
    ("listShards", "mongos.listShards"),
    ("balancerStatus", "mongos.balancerStatus"),
    ("listDatabases", "mongos.listDatabases"),
];

/// Reply bookkeeping that says nothing about the cluster.
const ENVELOPE_FIELDS: &[&str] = &["ok", "$clusterTime", "operationTime"];

/// Issues the routing sub-commands on `admin` and flattens their replies
/// under `mongodb_mongos_*`.
pub async fn routing_metrics<R: CommandRunner + ?Sized>(
    runner: &R,
    cancel: &CancellationToken,
    base_labels: &Labels,
) -> Extraction {
    let mut out = SampleSet::new(SOURCE);

    for &(name, prefix) in SUB_COMMANDS {
        let mut reply = match fetch_document(runner, cancel, "admin", &Command::new(name, 1)).await
        {
            Ok(reply) => reply,
            Err(e) if e.is_cancelled() => {
                out.diagnose(DiagnosticKind::Cancelled, format!("{} not issued", name));
                break;
            }
            Err(e) => {
                debug!(command = name, error = %e, "routing sub-command failed");
                let kind = match e {
                    FetchError::Decode(_) => DiagnosticKind::Decode,
                    FetchError::Command(_) => DiagnosticKind::Command,
                };
                out.diagnose(kind, format!("{}: {}", name, e));
                continue;
            }
        };
        strip_envelope(&mut reply);
        out.extend(flatten_with_diagnostics(
            prefix,
            Some(&reply),
            base_labels,
            true,
        ));
    }

    out.into_extraction()
}

fn strip_envelope(reply: &mut Document) {
    for field in ENVELOPE_FIELDS {
        reply.remove(field);
    }
}
