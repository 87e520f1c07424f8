//! Generic document flattening.
//!
//! Walks a [`Document`] depth first and turns every numeric or boolean leaf
//! into a gauge named after its path. Sequences of documents do not extend
//! the name: each element contributes a `<key>_idx` label instead, so the
//! number of distinct metric names stays bounded by the document shape.

use crate::document::{Document, Value};
use crate::naming;
use crate::sample::{DiagnosticKind, Extraction, Labels, MetricKind, Sample, SampleSet};

const SOURCE: &str = "flatten";

/// Flattens `doc` into samples. Absent or empty documents give no samples.
pub fn flatten(
    prefix: &str,
    doc: Option<&Document>,
    base_labels: &Labels,
    compatible: bool,
) -> Vec<Sample> {
    flatten_with_diagnostics(prefix, doc, base_labels, compatible).samples
}

/// Like [`flatten`], also returning the issues met while walking
/// (dropped non-finite numbers, name collisions).
pub fn flatten_with_diagnostics(
    prefix: &str,
    doc: Option<&Document>,
    base_labels: &Labels,
    compatible: bool,
) -> Extraction {
    let mut walker = Walker {
        compatible,
        out: SampleSet::new(SOURCE),
    };
    if let Some(doc) = doc {
        walker.document(prefix, doc, base_labels);
    }
    walker.out.into_extraction()
}

struct Walker {
    compatible: bool,
    out: SampleSet,
}

impl Walker {
    fn document(&mut self, path: &str, doc: &Document, labels: &Labels) {
        for (key, value) in doc.iter() {
            let child = naming::join_path(path, key);
            self.value(&child, key, value, labels);
        }
    }

    fn value(&mut self, path: &str, key: &str, value: &Value, labels: &Labels) {
        match value {
            Value::Number(n) => self.leaf(path, *n, labels),
            Value::Bool(b) => self.leaf(path, if *b { 1.0 } else { 0.0 }, labels),
            Value::String(_) | Value::Null => {}
            Value::Document(doc) => self.document(path, doc, labels),
            Value::Sequence(items) => self.sequence(path, key, items, labels),
        }
    }

    fn sequence(&mut self, path: &str, key: &str, items: &[Value], labels: &Labels) {
        let label_key = free_label_key(naming::sequence_label(key), labels);
        for (pos, item) in items.iter().enumerate() {
            match item {
                Value::Document(doc) => {
                    let mut element_labels = labels.clone();
                    let discriminator = discriminator(doc).unwrap_or_else(|| pos.to_string());
                    element_labels.insert(label_key.clone(), discriminator);
                    self.document(path, doc, &element_labels);
                }
                Value::Number(_)
                | Value::Bool(_)
                | Value::String(_)
                | Value::Null
                | Value::Sequence(_) => {}
            }
        }
    }

    fn leaf(&mut self, path: &str, value: f64, labels: &Labels) {
        if !value.is_finite() {
            self.out.diagnose(
                DiagnosticKind::UnsupportedValue,
                format!("non-finite value at {} dropped", path),
            );
            return;
        }

        let name = naming::metric_name(path);
        let legacy = if self.compatible {
            naming::legacy_rename(&name)
        } else {
            None
        };
        let sample = match legacy {
            Some(legacy) => match legacy.label {
                Some((key, _)) if labels.contains_key(key) => Sample::gauge(name, value, labels.clone()),
                Some((key, suffix)) => {
                    let mut labels = labels.clone();
                    labels.insert(key.to_string(), suffix);
                    legacy_sample(legacy.name, legacy.kind, value, labels)
                }
                None => legacy_sample(legacy.name, legacy.kind, value, labels.clone()),
            },
            None => Sample::gauge(name, value, labels.clone()),
        };
        self.out.push(sample);
    }
}

fn legacy_sample(name: &str, kind: MetricKind, value: f64, labels: Labels) -> Sample {
    Sample {
        name: name.to_string(),
        value,
        labels,
        kind,
    }
}

/// Enclosing sequences under the same key keep their labels: the inner
/// one gets a depth suffix (`x_idx`, `x_idx2`, ...).
fn free_label_key(key: String, labels: &Labels) -> String {
    let mut candidate = key.clone();
    let mut depth = 1;
    while labels.contains_key(&candidate) {
        depth += 1;
        candidate = format!("{}{}", key, depth);
    }
    candidate
}

fn discriminator(doc: &Document) -> Option<String> {
    naming::DISCRIMINATORS
        .iter()
        .find_map(|field| doc.get_str(field))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::labels;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Document {
        Document::from_json(json).unwrap()
    }

    #[test]
    fn numeric_leaf_with_base_labels() {
        let d = doc(json!({"a": {"b": {"c": 42}}}));
        let base = labels([("rs", "x")]);
        let samples = flatten("", Some(&d), &base, false);
        assert_eq!(
            samples,
            vec![Sample {
                name: "mongodb_a_b_c".to_string(),
                value: 42.0,
                labels: base,
                kind: MetricKind::Gauge,
            }]
        );
    }

    #[test]
    fn booleans_map_to_one_and_zero() {
        let d = doc(json!({"up": true, "down": false}));
        let samples = flatten("", Some(&d), &Labels::new(), false);
        assert_eq!(samples[0].value, 1.0);
        assert_eq!(samples[1].value, 0.0);
    }

    #[test]
    fn strings_and_nulls_are_dropped() {
        let d = doc(json!({"host": "db1", "gone": null, "n": 1}));
        let samples = flatten("p", Some(&d), &Labels::new(), false);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].name, "mongodb_p_n");
    }

    #[test]
    fn empty_and_absent_documents_give_nothing() {
        assert!(flatten("p", None, &Labels::new(), true).is_empty());
        assert!(flatten("p", Some(&Document::new()), &Labels::new(), true).is_empty());
    }

    #[test]
    fn sequence_elements_become_labels() {
        let d = doc(json!({
            "members": [
                {"name": "h1:27017", "health": 1, "stateStr": "PRIMARY"},
                {"name": "h2:27017", "health": 0}
            ],
            "shards": [{"_id": "rs0", "state": 1}],
            "batch": [{"millis": 3}, {"millis": 5}, "skipped"]
        }));
        let samples = flatten("rs", Some(&d), &labels([("cl", "c1")]), false);

        let names: Vec<&str> = samples.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "mongodb_rs_members_health",
                "mongodb_rs_members_health",
                "mongodb_rs_shards_state",
                "mongodb_rs_batch_millis",
                "mongodb_rs_batch_millis",
            ]
        );
        assert_eq!(samples[0].labels["members_idx"], "h1:27017");
        assert_eq!(samples[0].labels["cl"], "c1");
        assert_eq!(samples[1].labels["members_idx"], "h2:27017");
        assert_eq!(samples[2].labels["shards_idx"], "rs0");
        assert_eq!(samples[3].labels["batch_idx"], "0");
        assert_eq!(samples[4].labels["batch_idx"], "1");
    }

    #[test]
    fn nested_sequences_under_one_key_keep_both_labels() {
        let d = doc(json!({"x": [
            {"name": "a", "x": [{"v": 1}]},
            {"name": "b", "x": [{"v": 2}]}
        ]}));
        let out = flatten_with_diagnostics("p", Some(&d), &Labels::new(), false);

        assert!(out.diagnostics.is_empty(), "{:?}", out.diagnostics);
        assert_eq!(out.samples.len(), 2);
        assert_eq!(out.samples[0].name, "mongodb_p_x_x_v");
        assert_eq!(out.samples[0].labels, labels([("x_idx", "a"), ("x_idx2", "0")]));
        assert_eq!(out.samples[1].labels, labels([("x_idx", "b"), ("x_idx2", "0")]));
        assert_eq!(out.samples[1].value, 2.0);
    }

    #[test]
    fn sequence_label_does_not_replace_base_label() {
        let d = doc(json!({"members": [{"name": "h1", "health": 1}]}));
        let base = labels([("members_idx", "fixed")]);
        let samples = flatten("rs", Some(&d), &base, false);
        assert_eq!(samples[0].labels["members_idx"], "fixed");
        assert_eq!(samples[0].labels["members_idx2"], "h1");
    }

    #[test]
    fn colliding_paths_keep_first_sample() {
        let d = doc(json!({"a.b": 1, "a_b": 2, "A": {"B": 3}}));
        let out = flatten_with_diagnostics("", Some(&d), &Labels::new(), false);
        assert_eq!(out.samples.len(), 1);
        assert_eq!(out.samples[0].value, 1.0);
        assert_eq!(
            out.diagnostics
                .iter()
                .filter(|d| d.kind == DiagnosticKind::NameCollision)
                .count(),
            2
        );
    }

    #[test]
    fn non_finite_numbers_are_reported() {
        let mut d = Document::new();
        d.insert("nan", f64::NAN);
        d.insert("ok", 1);
        let out = flatten_with_diagnostics("", Some(&d), &Labels::new(), false);
        assert_eq!(out.samples.len(), 1);
        assert!(out.has_diagnostic(DiagnosticKind::UnsupportedValue));
    }

    #[test]
    fn compatible_mode_applies_legacy_names() {
        let d = doc(json!({
            "opcounters": {"insert": 5, "query": 7},
            "uptime": 100,
            "connections": {"current": 3},
            "host": "db1"
        }));
        let modern = flatten("serverStatus", Some(&d), &Labels::new(), false);
        assert_eq!(modern[0].name, "mongodb_ss_opcounters_insert");
        assert_eq!(modern[2].name, "mongodb_ss_uptime");

        let legacy = flatten("serverStatus", Some(&d), &Labels::new(), true);
        assert_eq!(legacy[0].name, "mongodb_op_counters_total");
        assert_eq!(legacy[0].labels["type"], "insert");
        assert_eq!(legacy[0].kind, MetricKind::Counter);
        assert_eq!(legacy[1].labels["type"], "query");
        assert_eq!(legacy[2].name, "mongodb_instance_uptime_seconds");
        assert_eq!(legacy[3].name, "mongodb_connections");
        assert_eq!(legacy[3].labels["state"], "current");
    }

    #[test]
    fn legacy_rename_skipped_when_label_key_taken() {
        let d = doc(json!({"opcounters": {"insert": 5}}));
        let base = labels([("type", "replset")]);
        let samples = flatten("serverStatus", Some(&d), &base, true);
        assert_eq!(samples[0].name, "mongodb_ss_opcounters_insert");
        assert_eq!(samples[0].labels["type"], "replset");
    }

    #[test]
    fn flattening_is_deterministic() {
        let d = doc(json!({
            "b": {"x": 1, "y": [{"name": "n1", "v": 2}, {"v": 3}]},
            "a": true,
            "wiredTiger": {"cache": {"pages read": 10}}
        }));
        let base = labels([("rs", "x")]);
        let first = flatten("serverStatus", Some(&d), &base, true);
        let second = flatten("serverStatus", Some(&d), &base, true);
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);
    }
}
