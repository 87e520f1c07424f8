//! The document collector: one primary command, flattened, plus the
//! specialized extractors its spec enables when compatibility mode is on.

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Collector, ScrapeReport, Sink, SinkError};
use crate::document::Document;
use crate::extract::{self, cache, legacy, locks};
use crate::flatten::flatten_with_diagnostics;
use crate::naming::{self, MetricPrefix};
use crate::role::{NodeRole, resolve_role};
use crate::sample::{Descriptor, Diagnostic, DiagnosticKind, Extraction, SampleKey};
use crate::topology::LabelsSource;
use crate::transport::{Command, CommandRunner, FetchError, fetch_document};

const SOURCE: &str = "collector";

/// Specialized extractors a collector runs in compatibility mode.
///
/// The presets split them so that no two collectors emit the same name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Extractors {
    pub locks: bool,
    pub legacy: bool,
    pub cache: bool,
    pub routing: bool,
    pub profile_entries: bool,
}

impl Extractors {
    pub const NONE: Self = Self {
        locks: false,
        legacy: false,
        cache: false,
        routing: false,
        profile_entries: false,
    };

    /// Everything read from or issued against the node itself.
    pub const NODE: Self = Self {
        locks: true,
        legacy: true,
        cache: true,
        routing: true,
        profile_entries: false,
    };

    pub const PROFILE: Self = Self {
        profile_entries: true,
        ..Self::NONE
    };
}

/// What a [`DocumentCollector`] asks for and how its samples are named.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorSpec {
    pub name: String,
    pub database: String,
    pub command: Command,
    pub prefix: MetricPrefix,
    pub extractors: Extractors,
}

impl CollectorSpec {
    /// Profiler entries of `database`.
    pub fn system_profile(database: &str) -> Self {
        Self {
            name: "profile".to_string(),
            database: database.to_string(),
            command: Command::new("find", "system.profile"),
            prefix: MetricPrefix::trusted("profile"),
            extractors: Extractors::PROFILE,
        }
    }

    /// `serverStatus` of the node.
    pub fn server_status() -> Self {
        Self {
            name: "server_status".to_string(),
            database: "admin".to_string(),
            command: Command::new("serverStatus", 1),
            prefix: MetricPrefix::trusted("serverStatus"),
            extractors: Extractors::NODE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectorOptions {
    /// Emit legacy names and run the specialized extractors.
    pub compatible: bool,
}

pub struct DocumentCollector<R: CommandRunner + ?Sized> {
    runner: Arc<R>,
    topology: Arc<dyn LabelsSource>,
    spec: CollectorSpec,
    options: CollectorOptions,
}

impl<R: CommandRunner + ?Sized> DocumentCollector<R> {
    pub fn new(
        runner: Arc<R>,
        topology: Arc<dyn LabelsSource>,
        spec: CollectorSpec,
        options: CollectorOptions,
    ) -> Self {
        Self {
            runner,
            topology,
            spec,
            options,
        }
    }

    pub fn spec(&self) -> &CollectorSpec {
        &self.spec
    }

    pub fn options(&self) -> CollectorOptions {
        self.options
    }

    async fn primary_document(
        &self,
        cancel: &CancellationToken,
        scrape: &mut Scrape<'_>,
    ) -> ControlFlow<(), Option<Document>> {
        match fetch_document(
            &*self.runner,
            cancel,
            &self.spec.database,
            &self.spec.command,
        )
        .await
        {
            Ok(doc) => ControlFlow::Continue(Some(doc)),
            Err(e) if e.is_cancelled() => {
                scrape.cancel("primary command");
                ControlFlow::Break(())
            }
            Err(e) => {
                warn!(
                    collector = %self.spec.name,
                    command = self.spec.command.name(),
                    error = %e,
                    "primary command failed, continuing with an empty document"
                );
                let kind = match e {
                    FetchError::Decode(_) => DiagnosticKind::Decode,
                    FetchError::Command(_) => DiagnosticKind::Command,
                };
                scrape.diagnose(kind, format!("{}: {}", self.spec.command.name(), e));
                ControlFlow::Continue(None)
            }
        }
    }

    async fn run(&self, cancel: &CancellationToken, scrape: &mut Scrape<'_>) -> ControlFlow<()> {
        let base = self.topology.base_labels();
        let compatible = self.options.compatible;

        let primary = self.primary_document(cancel, scrape).await?;
        let doc = primary.as_ref();

        scrape
            .stream(flatten_with_diagnostics(
                self.spec.prefix.as_str(),
                doc,
                &base,
                compatible,
            ))
            .await?;

        if !compatible {
            return ControlFlow::Continue(());
        }
        let enabled = self.spec.extractors;

        if enabled.locks {
            scrape.stream(extract::lock_stats(doc, &base)).await?;
        }

        if enabled.legacy {
            scrape
                .stream(extract::legacy_metrics(&*self.runner, cancel, &base).await)
                .await?;
        }

        if enabled.profile_entries {
            if let Some(sample) = extract::profile_entries(doc, &base) {
                scrape.stream(Extraction::from(sample)).await?;
            }
        }

        if enabled.cache {
            if let Some(sample) = extract::cache_evicted_total(doc, &base) {
                scrape.stream(Extraction::from(sample)).await?;
            }
        }

        if !enabled.routing {
            return ControlFlow::Continue(());
        }
        let resolution = resolve_role(&*self.runner, cancel).await;
        match &resolution {
            Err(e) if e.is_cancelled() => {
                scrape.cancel("role resolution");
                return ControlFlow::Break(());
            }
            Err(e) => {
                warn!(collector = %self.spec.name, error = %e, "skipping routing metrics");
                scrape.diagnose(DiagnosticKind::RoleResolution, e.to_string());
            }
            Ok(_) => {}
        }
        if NodeRole::from_resolution(&resolution) == NodeRole::Routing {
            scrape
                .stream(extract::routing_metrics(&*self.runner, cancel, &base).await)
                .await?;
        }

        ControlFlow::Continue(())
    }
}

#[async_trait]
impl<R: CommandRunner + ?Sized> Collector for DocumentCollector<R> {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn describe(&self) -> Vec<Descriptor> {
        if !self.options.compatible {
            return Vec::new();
        }
        let enabled = self.spec.extractors;
        let mut out = naming::legacy_descriptors(&self.spec.prefix);
        if enabled.locks {
            out.extend(locks::descriptors());
        }
        if enabled.legacy {
            out.extend(legacy::descriptors());
        }
        if enabled.profile_entries {
            out.push(legacy::PROFILE_ENTRIES);
        }
        if enabled.cache {
            out.push(cache::DESCRIPTOR);
        }
        out
    }

    async fn collect(&self, sink: &Sink, cancel: &CancellationToken) -> ScrapeReport {
        let started = Instant::now();
        let mut scrape = Scrape::new(sink);
        let _ = self.run(cancel, &mut scrape).await;

        let report = ScrapeReport {
            collector: self.spec.name.clone(),
            emitted: scrape.emitted,
            diagnostics: scrape.diagnostics,
            cancelled: scrape.cancelled,
            duration: started.elapsed(),
        };
        debug!(
            collector = %report.collector,
            emitted = report.emitted,
            diagnostics = report.diagnostics.len(),
            cancelled = report.cancelled,
            elapsed_ms = report.duration.as_millis() as u64,
            "scrape finished"
        );
        report
    }
}

/// Per-call state of a scrape.
struct Scrape<'a> {
    sink: &'a Sink,
    seen: HashSet<SampleKey>,
    emitted: usize,
    diagnostics: Vec<Diagnostic>,
    cancelled: bool,
}

impl<'a> Scrape<'a> {
    fn new(sink: &'a Sink) -> Self {
        Self {
            sink,
            seen: HashSet::new(),
            emitted: 0,
            diagnostics: Vec::new(),
            cancelled: false,
        }
    }

    fn diagnose(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        self.diagnostics
            .push(Diagnostic::new(SOURCE, kind, message));
    }

    fn cancel(&mut self, stage: &str) {
        self.cancelled = true;
        self.diagnose(DiagnosticKind::Cancelled, format!("cancelled during {}", stage));
    }

    /// Writes a stage's samples, dropping identities an earlier stage
    /// already emitted. Breaks once the sink refuses or the stage itself
    /// was cut short by cancellation.
    async fn stream(&mut self, extraction: Extraction) -> ControlFlow<()> {
        let stage_cancelled = extraction.has_diagnostic(DiagnosticKind::Cancelled);
        self.diagnostics.extend(extraction.diagnostics);

        for sample in extraction.samples {
            if !self.seen.insert(sample.key()) {
                self.diagnose(
                    DiagnosticKind::NameCollision,
                    format!("duplicate sample {}{:?} dropped", sample.name, sample.labels),
                );
                continue;
            }
            match self.sink.send(sample).await {
                Ok(()) => self.emitted += 1,
                Err(SinkError::Cancelled) => {
                    self.cancel("streaming");
                    return ControlFlow::Break(());
                }
                Err(SinkError::Closed) => {
                    self.cancelled = true;
                    self.diagnose(DiagnosticKind::Cancelled, "sample receiver closed");
                    return ControlFlow::Break(());
                }
            }
        }

        if stage_cancelled {
            self.cancelled = true;
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Value;
    use crate::sample::{Labels, Sample, labels};
    use crate::topology::StaticTopology;
    use crate::transport::{CommandError, MockRunner};
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn doc(json: serde_json::Value) -> Document {
        Document::from_json(json).unwrap()
    }

    fn topology() -> Arc<dyn LabelsSource> {
        Arc::new(StaticTopology::new(labels([("rs_nm", "rs0")])))
    }

    fn server_status_reply() -> Document {
        doc(json!({
            "host": "db1",
            "uptime": 3600,
            "opcounters": {"insert": 5, "query": 7},
            "connections": {"current": 12, "available": 800},
            "locks": {
                "Global": {"acquireCount": {"r": 10, "w": 2}},
                "Database": {"acquireCount": {"r": 7, "w": 1}}
            },
            "wiredTiger": {"cache": {
                "modified pages evicted": 3,
                "unmodified pages evicted": 4
            }},
            "storageEngine": {"name": "wiredTiger"},
            "ok": 1
        }))
    }

    fn data_node() -> MockRunner {
        MockRunner::new()
            .with_reply("admin", "serverStatus", server_status_reply())
            .with_reply("admin", "buildInfo", doc(json!({"version": "4.4.6"})))
            .with_reply(
                "admin",
                "replSetGetStatus",
                doc(json!({"set": "rs0", "myState": 1})),
            )
            .with_reply("admin", "isMaster", doc(json!({"ismaster": true, "setName": "rs0"})))
    }

    fn collector(
        runner: MockRunner,
        spec: CollectorSpec,
        compatible: bool,
    ) -> (Arc<MockRunner>, DocumentCollector<MockRunner>) {
        let runner = Arc::new(runner);
        let collector = DocumentCollector::new(
            runner.clone(),
            topology(),
            spec,
            CollectorOptions { compatible },
        );
        (runner, collector)
    }

    async fn drain(mut rx: mpsc::Receiver<Sample>) -> Vec<Sample> {
        let mut out = Vec::new();
        while let Some(sample) = rx.recv().await {
            out.push(sample);
        }
        out
    }

    async fn scrape(collector: &DocumentCollector<MockRunner>) -> (ScrapeReport, Vec<Sample>) {
        let cancel = CancellationToken::new();
        let (sink, rx) = Sink::channel(1024, cancel.clone());
        let report = collector.collect(&sink, &cancel).await;
        drop(sink);
        (report, drain(rx).await)
    }

    fn names(samples: &[Sample]) -> Vec<&str> {
        samples.iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn preset_prefixes_validate() {
        for spec in [CollectorSpec::system_profile("test"), CollectorSpec::server_status()] {
            assert_eq!(MetricPrefix::new(spec.prefix.as_str()), Ok(spec.prefix.clone()));
        }
    }

    #[tokio::test]
    async fn plain_mode_emits_only_generic_samples() {
        let (runner, collector) = collector(data_node(), CollectorSpec::server_status(), false);
        let (report, samples) = scrape(&collector).await;

        assert!(!report.cancelled);
        assert_eq!(report.emitted, samples.len());
        assert!(names(&samples).contains(&"mongodb_ss_opcounters_insert"));
        assert!(names(&samples).contains(&"mongodb_ss_uptime"));
        assert!(samples.iter().all(|s| s.name.starts_with("mongodb_ss_")));
        assert!(samples.iter().all(|s| s.labels["rs_nm"] == "rs0"));
        assert_eq!(runner.calls(), vec!["admin.serverStatus".to_string()]);
        assert!(collector.describe().is_empty());
    }

    #[tokio::test]
    async fn compatible_mode_runs_every_extractor() {
        let (runner, collector) = collector(data_node(), CollectorSpec::server_status(), true);
        let (report, samples) = scrape(&collector).await;
        let names = names(&samples);

        assert!(!report.cancelled);
        assert!(names.contains(&"mongodb_op_counters_total"));
        assert!(names.contains(&"mongodb_instance_uptime_seconds"));
        assert!(names.contains(&"mongodb_mongod_storage_engine"));
        assert!(names.contains(&"mongodb_version_info"));
        assert!(names.contains(&"mongodb_mongod_replset_my_state"));
        assert_eq!(
            names
                .iter()
                .filter(|n| **n == "mongodb_locks_acquire_count_total")
                .count(),
            4
        );
        let evicted = samples
            .iter()
            .find(|s| s.name == "mongodb_mongod_wiredtiger_cache_evicted_total")
            .unwrap();
        assert_eq!(evicted.value, 7.0);

        assert_eq!(runner.call_count("isMaster"), 1);
        assert_eq!(runner.call_count("listShards"), 0);
        assert!(!collector.describe().is_empty());
    }

    #[tokio::test]
    async fn no_sample_identity_is_emitted_twice() {
        let (_, collector) = collector(data_node(), CollectorSpec::server_status(), true);
        let (report, samples) = scrape(&collector).await;
        let mut seen = HashSet::new();
        for sample in &samples {
            assert!(seen.insert(sample.key()), "duplicate {:?}", sample.key());
        }
        assert!(!report
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::NameCollision));
    }

    #[tokio::test]
    async fn routing_node_adds_cluster_metrics() {
        let runner = data_node()
            .with_reply("admin", "isMaster", doc(json!({"ismaster": true, "msg": "isdbgrid"})))
            .with_reply(
                "admin",
                "listShards",
                doc(json!({"shards": [{"_id": "s1", "state": 1}], "ok": 1})),
            )
            .with_reply("admin", "balancerStatus", doc(json!({"numBalancerRounds": 3})))
            .with_reply("admin", "listDatabases", doc(json!({"totalSize": 10})));
        let (_, collector) = collector(runner, CollectorSpec::server_status(), true);
        let (_, samples) = scrape(&collector).await;
        let names = names(&samples);
        assert!(names.contains(&"mongodb_mongos_listshards_shards_state"));
        assert!(names.contains(&"mongodb_mongos_balancerstatus_numbalancerrounds"));
        assert!(names.contains(&"mongodb_mongos_listdatabases_totalsize"));
    }

    #[tokio::test]
    async fn unknown_role_skips_routing() {
        let runner = data_node().with_error(
            "admin",
            "isMaster",
            CommandError::Transport("connection refused".into()),
        );
        let (runner, collector) = collector(runner, CollectorSpec::server_status(), true);
        let (report, samples) = scrape(&collector).await;

        assert!(!report.cancelled);
        assert!(report
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::RoleResolution));
        assert_eq!(runner.call_count("listShards"), 0);
        assert!(samples.iter().all(|s| !s.name.starts_with("mongodb_mongos_")));
        assert!(names(&samples).contains(&"mongodb_locks_acquire_count_total"));
    }

    #[tokio::test]
    async fn undecodable_primary_reply_still_completes() {
        let runner = data_node().with_raw("admin", "serverStatus", vec![0xff; 3]);
        let (_, collector) = collector(runner, CollectorSpec::server_status(), false);
        let (report, samples) = scrape(&collector).await;

        assert!(samples.is_empty());
        assert_eq!(report.emitted, 0);
        assert!(!report.cancelled);
        assert!(report
            .diagnostics
            .iter()
            .any(|d| d.kind == DiagnosticKind::Decode));
    }

    #[tokio::test]
    async fn profile_preset_reads_first_batch() {
        let reply = Document::new().with(
            "cursor",
            Document::new()
                .with(
                    "firstBatch",
                    vec![
                        Value::from(Document::new().with("op", "query").with("millis", 4)),
                        Value::from(Document::new().with("op", "insert").with("millis", 1)),
                    ],
                )
                .with("id", 0),
        );
        let runner = MockRunner::new().with_reply("test", "find", reply);
        let (runner, collector) = collector(runner, CollectorSpec::system_profile("test"), false);
        let (_, samples) = scrape(&collector).await;

        let millis: Vec<(&str, f64)> = samples
            .iter()
            .filter(|s| s.name == "mongodb_profile_cursor_firstbatch_millis")
            .map(|s| (s.labels["firstbatch_idx"].as_str(), s.value))
            .collect();
        assert_eq!(millis, vec![("0", 4.0), ("1", 1.0)]);
        assert_eq!(runner.calls(), vec!["test.find".to_string()]);
    }

    #[tokio::test]
    async fn profile_preset_runs_only_the_entry_count_in_compatible_mode() {
        let reply = Document::new().with(
            "cursor",
            Document::new().with(
                "firstBatch",
                vec![Value::from(Document::new().with("millis", 4))],
            ),
        );
        let runner = data_node().with_reply("test", "find", reply);
        let (runner, collector) = collector(runner, CollectorSpec::system_profile("test"), true);
        let (report, samples) = scrape(&collector).await;

        assert!(report.diagnostics.is_empty(), "{:?}", report.diagnostics);
        let entries = samples
            .iter()
            .find(|s| s.name == "mongodb_mongod_profile_entries")
            .unwrap();
        assert_eq!(entries.value, 1.0);
        assert!(!names(&samples).contains(&"mongodb_version_info"));
        assert_eq!(runner.calls(), vec!["test.find".to_string()]);

        let described: Vec<&str> = collector.describe().iter().map(|d| d.name).collect();
        assert_eq!(described, vec!["mongodb_mongod_profile_entries"]);
    }

    #[test]
    fn presets_describe_disjoint_names() {
        let runner: Arc<MockRunner> = Arc::new(MockRunner::new());
        let options = CollectorOptions { compatible: true };
        let profile = DocumentCollector::new(
            runner.clone(),
            topology(),
            CollectorSpec::system_profile("test"),
            options,
        );
        let status = DocumentCollector::new(runner, topology(), CollectorSpec::server_status(), options);

        let status_names: HashSet<&str> = status.describe().iter().map(|d| d.name).collect();
        assert!(status_names.contains("mongodb_op_counters_total"));
        assert!(status_names.contains("mongodb_instance_uptime_seconds"));
        assert!(status_names.contains("mongodb_locks_acquire_count_total"));
        for d in profile.describe() {
            assert!(!status_names.contains(d.name), "{} described twice", d.name);
        }
    }

    #[tokio::test]
    async fn cancellation_mid_command_keeps_streamed_samples() {
        let runner = data_node().with_delay("admin", "buildInfo", Duration::from_secs(30));
        let (runner, collector) = collector(runner, CollectorSpec::server_status(), true);

        let cancel = CancellationToken::new();
        let (sink, rx) = Sink::channel(1024, cancel.clone());
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let report = collector.collect(&sink, &cancel).await;
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(sink);
        let samples = drain(rx).await;

        assert!(report.cancelled);
        assert_eq!(report.emitted, samples.len());
        // Generic and lock samples were streamed before the stall.
        assert!(names(&samples).contains(&"mongodb_op_counters_total"));
        assert!(names(&samples).contains(&"mongodb_locks_acquire_count_total"));
        // Nothing after it.
        assert!(!names(&samples).contains(&"mongodb_mongod_storage_engine"));
        assert!(!names(&samples).contains(&"mongodb_mongod_wiredtiger_cache_evicted_total"));
        assert_eq!(runner.call_count("isMaster"), 0);
    }

    #[tokio::test]
    async fn concurrent_collects_are_independent() {
        let (_, collector) = collector(data_node(), CollectorSpec::server_status(), true);
        let collector = Arc::new(collector);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let collector = collector.clone();
            handles.push(tokio::spawn(async move {
                let cancel = CancellationToken::new();
                let (sink, rx) = Sink::channel(16, cancel.clone());
                let drained = tokio::spawn(drain(rx));
                let report = collector.collect(&sink, &cancel).await;
                drop(sink);
                (report, drained.await.unwrap())
            }));
        }

        let mut counts = Vec::new();
        for handle in handles {
            let (report, samples) = handle.await.unwrap();
            assert_eq!(report.emitted, samples.len());
            counts.push(samples.len());
        }
        assert!(counts.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn base_labels_reach_every_sample() {
        let (_, collector) = collector(data_node(), CollectorSpec::server_status(), true);
        let (_, samples) = scrape(&collector).await;
        let expected: Labels = labels([("rs_nm", "rs0")]);
        for sample in &samples {
            assert_eq!(sample.labels.get("rs_nm"), expected.get("rs_nm"), "{}", sample.name);
        }
    }
}
