//! Collectors and the sink they stream samples into.
//!
//! A [`Collector`] turns one scrape into samples. It writes them to a
//! [`Sink`] as each stage completes instead of returning them at the end,
//! so a scrape cut short by cancellation still delivers what it had.

mod document;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::sample::{Descriptor, Diagnostic, Sample};

pub use document::{CollectorOptions, CollectorSpec, DocumentCollector, Extractors};

/// Why a sample could not be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkError {
    /// The scrape was cancelled.
    Cancelled,
    /// The receiving side is gone.
    Closed,
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Cancelled => write!(f, "scrape cancelled"),
            SinkError::Closed => write!(f, "sample receiver closed"),
        }
    }
}

impl std::error::Error for SinkError {}

/// Bounded, cancellable sample channel.
///
/// `send` waits for capacity, so a slow consumer slows the collector down.
/// Once the scrape token fires nothing more is accepted.
#[derive(Debug, Clone)]
pub struct Sink {
    tx: mpsc::Sender<Sample>,
    cancel: CancellationToken,
}

impl Sink {
    pub fn new(tx: mpsc::Sender<Sample>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Creates a sink and the receiver its samples arrive on.
    pub fn channel(capacity: usize, cancel: CancellationToken) -> (Self, mpsc::Receiver<Sample>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx, cancel), rx)
    }

    pub async fn send(&self, sample: Sample) -> Result<(), SinkError> {
        if self.cancel.is_cancelled() {
            return Err(SinkError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SinkError::Cancelled),
            sent = self.tx.send(sample) => sent.map_err(|_| SinkError::Closed),
        }
    }
}

/// Outcome of one `collect` call.
#[derive(Debug, Clone, Serialize)]
pub struct ScrapeReport {
    pub collector: String,
    /// Samples written to the sink.
    pub emitted: usize,
    pub diagnostics: Vec<Diagnostic>,
    pub cancelled: bool,
    pub duration: Duration,
}

/// A source of samples.
///
/// Implementations hold no per-scrape state; `collect` may run concurrently
/// with itself.
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;

    /// Metrics with a fixed name this collector may emit. No I/O.
    fn describe(&self) -> Vec<Descriptor>;

    async fn collect(&self, sink: &Sink, cancel: &CancellationToken) -> ScrapeReport;
}
