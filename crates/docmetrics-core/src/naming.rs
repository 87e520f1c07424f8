//! Metric-name policy.
//!
//! Dashboards key on exact metric names, so everything that turns a document
//! path into a name lives here and is versioned as a whole. Changing any
//! table or rule below means bumping [`NAMING_VERSION`].
//!
//! Rules, applied in order to a dotted path such as
//! `serverStatus.wiredTiger.cache.pages read`:
//!
//! 1. the longest matching entry of [`PREFIX_SUBSTITUTIONS`] replaces the
//!    head of the path (only on a `.` boundary);
//! 2. every character outside `[A-Za-z0-9_]` becomes `_`;
//! 3. ASCII letters are lower-cased;
//! 4. runs of `_` collapse, leading and trailing `_` are trimmed;
//! 5. the namespace `mongodb_` is prepended.
//!
//! With compatibility mode on, [`legacy_rename`] maps selected derived names
//! to the names the previous exporter generation used.

use std::borrow::Cow;
use std::fmt;

use crate::sample::{Descriptor, MetricKind};

pub const NAMING_VERSION: u32 = 1;

pub const NAMESPACE: &str = "mongodb";

/// Path heads shortened before sanitizing. Longest entries first.
pub const PREFIX_SUBSTITUTIONS: &[(&str, &str)] = &[
    ("serverStatus.wiredTiger.transaction", "ss_wt_txn"),
    ("local.oplog.rs.stats.wiredTiger", "oplog_stats_wt"),
    ("collStats.storageStats", "collstats_storage"),
    ("collStats.latencyStats", "collstats_latency"),
    ("serverStatus.wiredTiger", "ss_wt"),
    ("local.oplog.rs.stats", "oplog_stats"),
    ("replSetGetStatus", "rs"),
    ("systemMetrics", "sys"),
    ("serverStatus", "ss"),
];

/// First name tokens owned by the extractors and the legacy rename table.
/// A generic collector prefix may not derive to any of these.
pub const RESERVED_STEMS: &[&str] = &[
    "locks",
    "mongos",
    "mongod",
    "op",
    "connections",
    "memory",
    "asserts",
    "instance",
    "version",
];

/// Disambiguating fields looked up in sequence elements, in order.
pub const DISCRIMINATORS: &[&str] = &["name", "_id"];

/// Joins a parent path and a key with `.`.
pub fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

/// Derives the metric name of a dotted path.
pub fn metric_name(path: &str) -> String {
    let token = sanitize(&substitute_prefix(path));
    if token.is_empty() {
        NAMESPACE.to_string()
    } else {
        format!("{}_{}", NAMESPACE, token)
    }
}

/// Label key used for the elements of a sequence stored under `key`.
/// Label names may not start with a digit, so such keys get a leading `_`.
pub fn sequence_label(key: &str) -> String {
    let token = sanitize(key);
    if token.is_empty() {
        "idx".to_string()
    } else if token.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{}_idx", token)
    } else {
        format!("{}_idx", token)
    }
}

fn substitute_prefix(path: &str) -> Cow<'_, str> {
    for (from, to) in PREFIX_SUBSTITUTIONS {
        if path == *from {
            return Cow::Borrowed(to);
        }
        if let Some(rest) = path.strip_prefix(from)
            && rest.starts_with('.')
        {
            return Cow::Owned(format!("{}{}", to, rest));
        }
    }
    Cow::Borrowed(path)
}

/// Maps a path fragment to a metric-name-safe token.
pub fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

/// Error raised when a collector prefix would intrude on a reserved name range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingError {
    /// The prefix derives to an empty token.
    EmptyPrefix,
    /// The prefix derives to a stem owned by an extractor.
    ReservedStem { prefix: String, stem: String },
}

impl fmt::Display for NamingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NamingError::EmptyPrefix => write!(f, "metric prefix must not be empty"),
            NamingError::ReservedStem { prefix, stem } => write!(
                f,
                "metric prefix '{}' derives to reserved stem '{}'",
                prefix, stem
            ),
        }
    }
}

impl std::error::Error for NamingError {}

/// Validated path prefix for the generic samples of a collector.
///
/// Every generic name of a collector starts with `mongodb_<stem>_` where the
/// stem is derived from this prefix and is never one of [`RESERVED_STEMS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricPrefix(String);

impl MetricPrefix {
    pub fn new(prefix: impl Into<String>) -> Result<Self, NamingError> {
        let prefix = prefix.into();
        let stem = stem_of(&prefix).ok_or(NamingError::EmptyPrefix)?;
        if RESERVED_STEMS.contains(&stem.as_str()) {
            return Err(NamingError::ReservedStem { prefix, stem });
        }
        Ok(Self(prefix))
    }

    /// For built-in prefixes already known to validate.
    pub(crate) fn trusted(prefix: &'static str) -> Self {
        Self(prefix.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn stem_of(prefix: &str) -> Option<String> {
    let token = sanitize(&substitute_prefix(prefix));
    token
        .split('_')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

enum Match {
    Prefix(&'static str),
    Exact(&'static str),
}

struct Rename {
    matcher: Match,
    legacy: &'static str,
    help: &'static str,
    suffix_label: Option<&'static str>,
    kind: MetricKind,
}

const LEGACY_RENAMES: &[Rename] = &[
    Rename {
        matcher: Match::Prefix("mongodb_ss_opcounters_"),
        legacy: "mongodb_op_counters_total",
        help: "Operations by type since the server started",
        suffix_label: Some("type"),
        kind: MetricKind::Counter,
    },
    Rename {
        matcher: Match::Prefix("mongodb_ss_opcountersrepl_"),
        legacy: "mongodb_mongod_op_counters_repl_total",
        help: "Replicated operations by type since the server started",
        suffix_label: Some("type"),
        kind: MetricKind::Counter,
    },
    Rename {
        matcher: Match::Prefix("mongodb_ss_connections_"),
        legacy: "mongodb_connections",
        help: "Connections by state",
        suffix_label: Some("state"),
        kind: MetricKind::Gauge,
    },
    Rename {
        matcher: Match::Prefix("mongodb_ss_mem_"),
        legacy: "mongodb_memory",
        help: "Memory usage in MiB by type",
        suffix_label: Some("type"),
        kind: MetricKind::Gauge,
    },
    Rename {
        matcher: Match::Prefix("mongodb_ss_asserts_"),
        legacy: "mongodb_asserts_total",
        help: "Asserts raised since the server started, by type",
        suffix_label: Some("type"),
        kind: MetricKind::Counter,
    },
    Rename {
        matcher: Match::Prefix("mongodb_ss_metrics_document_"),
        legacy: "mongodb_mongod_metrics_document_total",
        help: "Documents accessed or modified, by state",
        suffix_label: Some("state"),
        kind: MetricKind::Counter,
    },
    Rename {
        matcher: Match::Exact("mongodb_ss_uptime"),
        legacy: "mongodb_instance_uptime_seconds",
        help: "Seconds since the server started",
        suffix_label: None,
        kind: MetricKind::Counter,
    },
];

/// Legacy identity for a derived metric name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyName {
    pub name: &'static str,
    /// Label carrying the part of the derived name the legacy name folds away.
    pub label: Option<(&'static str, String)>,
    pub kind: MetricKind,
}

/// Looks up the legacy name of a derived metric name.
pub fn legacy_rename(derived: &str) -> Option<LegacyName> {
    LEGACY_RENAMES.iter().find_map(|rule| {
        let label = match rule.matcher {
            Match::Exact(name) => {
                if derived != name {
                    return None;
                }
                None
            }
            Match::Prefix(prefix) => {
                let suffix = derived.strip_prefix(prefix).filter(|s| !s.is_empty())?;
                rule.suffix_label.map(|key| (key, suffix.to_string()))
            }
        };
        Some(LegacyName {
            name: rule.legacy,
            label,
            kind: rule.kind,
        })
    })
}

/// Legacy names reachable from samples flattened under `prefix`.
pub fn legacy_descriptors(prefix: &MetricPrefix) -> Vec<Descriptor> {
    let head = format!("{}_", metric_name(prefix.as_str()));
    LEGACY_RENAMES
        .iter()
        .filter(|rule| match rule.matcher {
            Match::Prefix(p) | Match::Exact(p) => p.starts_with(&head),
        })
        .map(|rule| Descriptor {
            name: rule.legacy,
            help: rule.help,
            kind: rule.kind,
        })
        .collect()
}
