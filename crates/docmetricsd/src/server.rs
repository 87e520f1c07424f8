//! HTTP surface: scrape fan-out and the axum router.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tracing::{debug, error, warn};

use docmetrics_core::collector::{Collector, CollectorOptions, DocumentCollector, ScrapeReport, Sink};
use docmetrics_core::topology::{LabelsSource, StaticTopology};
use docmetrics_core::transport::CommandRunner;
use docmetrics_core::{Descriptor, Diagnostic, Sample, SampleSet};

use crate::config::Config;
use crate::exposition;

pub struct AppState {
    pub config: Config,
    pub collectors: Vec<Arc<dyn Collector>>,
    descriptors: Vec<Descriptor>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: Config, collectors: Vec<Arc<dyn Collector>>) -> Self {
        let mut descriptors: Vec<Descriptor> = Vec::new();
        for collector in &collectors {
            for d in collector.describe() {
                if !descriptors.iter().any(|known| known.name == d.name) {
                    descriptors.push(d);
                }
            }
        }
        Self {
            config,
            collectors,
            descriptors,
        }
    }
}

/// Builds the configured collectors over one shared runner.
pub fn build_collectors(config: &Config, runner: Arc<dyn CommandRunner>) -> Vec<Arc<dyn Collector>> {
    let topology: Arc<dyn LabelsSource> = Arc::new(StaticTopology::new(config.labels.clone()));
    let options = CollectorOptions {
        compatible: config.compatible,
    };
    config
        .collector_specs()
        .into_iter()
        .map(|spec| {
            Arc::new(DocumentCollector::new(
                runner.clone(),
                topology.clone(),
                spec,
                options,
            )) as Arc<dyn Collector>
        })
        .collect()
}

/// Result of one scrape across all collectors.
#[derive(Debug, Serialize)]
pub struct ScrapeOutcome {
    pub samples: Vec<Sample>,
    pub reports: Vec<ScrapeReport>,
    /// Cross-collector duplicates dropped while merging.
    pub merge_diagnostics: Vec<Diagnostic>,
    pub timed_out: bool,
    pub duration: Duration,
}

/// Runs every collector concurrently under one deadline and merges their
/// samples in collector order.
pub async fn scrape(state: &AppState) -> ScrapeOutcome {
    let started = Instant::now();
    let cancel = CancellationToken::new();
    let capacity = state.config.sink_capacity;

    let mut tasks = JoinSet::new();
    for (index, collector) in state.collectors.iter().enumerate() {
        let collector = collector.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            let (sink, mut rx) = Sink::channel(capacity, cancel.clone());
            let collect = async move { collector.collect(&sink, &cancel).await };
            let drain = async move {
                let mut samples = Vec::new();
                while let Some(sample) = rx.recv().await {
                    samples.push(sample);
                }
                samples
            };
            let (report, samples) = tokio::join!(collect, drain);
            (index, report, samples)
        });
    }

    let join_all = async {
        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "collector task failed"),
            }
        }
        results
    };
    tokio::pin!(join_all);

    let mut timed_out = false;
    let mut results = tokio::select! {
        results = &mut join_all => results,
        _ = tokio::time::sleep(state.config.scrape_timeout) => {
            timed_out = true;
            cancel.cancel();
            (&mut join_all).await
        }
    };
    results.sort_by_key(|(index, _, _)| *index);

    let mut merged = SampleSet::new("scrape");
    let mut reports = Vec::with_capacity(results.len());
    for (_, report, samples) in results {
        for sample in samples {
            merged.push(sample);
        }
        reports.push(report);
    }
    let merged = merged.into_extraction();

    if timed_out {
        warn!(
            timeout_ms = state.config.scrape_timeout.as_millis() as u64,
            partial_samples = merged.samples.len(),
            "scrape timed out, serving partial results"
        );
    }
    for diagnostic in &merged.diagnostics {
        warn!(%diagnostic, "dropped duplicate sample");
    }
    debug!(
        samples = merged.samples.len(),
        collectors = reports.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "scrape complete"
    );

    ScrapeOutcome {
        samples: merged.samples,
        reports,
        merge_diagnostics: merged.diagnostics,
        timed_out,
        duration: started.elapsed(),
    }
}

pub fn router(state: SharedState) -> Router {
    let telemetry_path = state.config.telemetry_path.clone();
    Router::new()
        .route(&telemetry_path, get(handle_metrics))
        .route("/health", get(handle_health))
        .route("/debug/scrape", get(handle_debug_scrape))
        .with_state(state)
        .layer(CompressionLayer::new())
}

async fn handle_metrics(State(state): State<SharedState>) -> impl IntoResponse {
    let outcome = scrape(&state).await;
    match exposition::render(&outcome.samples, &state.descriptors) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        ),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                e.to_string(),
            )
        }
    }
}

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_debug_scrape(State(state): State<SharedState>) -> Json<ScrapeOutcome> {
    Json(scrape(&state).await)
}
