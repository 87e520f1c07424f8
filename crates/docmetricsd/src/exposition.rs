//! Prometheus text rendering of a merged scrape.
//!
//! Every scrape fills a throwaway [`Registry`], one metric family per
//! sample name, and hands it to the [`TextEncoder`]. The registry checks
//! metric and label names; a family it rejects is logged and left out so
//! that one odd document key cannot fail the whole scrape.

use std::collections::{BTreeMap, BTreeSet};

use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tracing::warn;

use docmetrics_core::{Descriptor, MetricKind, Sample};

/// Help text for names no collector describes.
const GENERIC_HELP: &str = "Value read from a server document";

pub fn render(samples: &[Sample], descriptors: &[Descriptor]) -> prometheus::Result<String> {
    let registry = registry(samples, descriptors);
    let mut buf = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buf)?;
    String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

fn registry(samples: &[Sample], descriptors: &[Descriptor]) -> Registry {
    let mut families: BTreeMap<&str, Vec<&Sample>> = BTreeMap::new();
    for sample in samples {
        families.entry(&sample.name).or_default().push(sample);
    }

    let registry = Registry::new();
    for (name, members) in families {
        if let Err(e) = register_family(&registry, name, &members, descriptors) {
            warn!(metric = name, error = %e, "metric family left out of the exposition");
        }
    }
    registry
}

fn register_family(
    registry: &Registry,
    name: &str,
    members: &[&Sample],
    descriptors: &[Descriptor],
) -> prometheus::Result<()> {
    let help = descriptors
        .iter()
        .find(|d| d.name == name)
        .map_or(GENERIC_HELP, |d| d.help);
    // Members may carry different label sets; missing ones render empty.
    let label_names: Vec<&str> = members
        .iter()
        .flat_map(|s| s.labels.keys().map(String::as_str))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let opts = Opts::new(name, help);

    let kind = members.first().map_or(MetricKind::Gauge, |s| s.kind);
    match kind {
        MetricKind::Counter => {
            let family = CounterVec::new(opts, &label_names)?;
            registry.register(Box::new(family.clone()))?;
            for sample in members {
                if sample.value < 0.0 {
                    warn!(metric = name, value = sample.value, "negative counter value dropped");
                    continue;
                }
                family
                    .get_metric_with_label_values(&label_values(&label_names, sample))?
                    .inc_by(sample.value);
            }
        }
        MetricKind::Gauge => {
            let family = GaugeVec::new(opts, &label_names)?;
            registry.register(Box::new(family.clone()))?;
            for sample in members {
                family
                    .get_metric_with_label_values(&label_values(&label_names, sample))?
                    .set(sample.value);
            }
        }
    }
    Ok(())
}

fn label_values<'a>(names: &[&str], sample: &'a Sample) -> Vec<&'a str> {
    names
        .iter()
        .map(|key| sample.labels.get(*key).map_or("", String::as_str))
        .collect()
}
