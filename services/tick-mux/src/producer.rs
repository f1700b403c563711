//! Stream producers
//!
//! A producer reads one source, parses every data line into a record
//! tagged with the source's entity id and pushes it into the ingestion
//! buffer. Whatever happens (open failure, read error, timeout,
//! cancellation, panic) the source is reported finished exactly once, so
//! the aggregator's termination check never waits on a dead producer.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, warn};
use types::ids::EntityId;
use types::record::{LineFilter, LineKind, Record};

use crate::ingestion::IngestionBuffer;
use crate::metrics::MuxMetrics;
use crate::source::{LineStream, SourceId, SourceOpener};

/// How a source's ingestion ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SourceOutcome {
    /// End of source reached.
    Completed,
    /// The source could not be opened; it contributes nothing.
    Unavailable(String),
    /// Reading stopped partway; records pushed before the failure stay.
    Failed(String),
    TimedOut,
    Cancelled,
    Panicked(String),
}

impl SourceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SourceOutcome::Completed)
    }
}

/// Per-source ingestion summary.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: String,
    pub entity_id: EntityId,
    pub outcome: SourceOutcome,
    pub records: u64,
    pub malformed: u64,
    pub elapsed_ms: u64,
}

/// Cooperative cancellation flag shared by the driver and its producers.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every producer to stop at its next line.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Reports a source finished when dropped.
struct CompletionGuard<'a> {
    buffer: &'a IngestionBuffer,
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        // Underflow is logged by the buffer; nothing else to do here.
        let _remaining = self.buffer.source_finished();
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    records: u64,
    malformed: u64,
}

/// Reads sources into a shared ingestion buffer.
pub struct StreamProducer<'a> {
    buffer: &'a IngestionBuffer,
    filter: &'a LineFilter,
    timeout: Option<Duration>,
    cancel: &'a CancelHandle,
    metrics: &'a MuxMetrics,
}

impl<'a> StreamProducer<'a> {
    pub fn new(
        buffer: &'a IngestionBuffer,
        filter: &'a LineFilter,
        timeout: Option<Duration>,
        cancel: &'a CancelHandle,
        metrics: &'a MuxMetrics,
    ) -> Self {
        Self {
            buffer,
            filter,
            timeout,
            cancel,
            metrics,
        }
    }

    /// Ingest one source. Always marks the source finished on return.
    pub fn run(&self, source: &SourceId, opener: &dyn SourceOpener) -> SourceReport {
        let started = Instant::now();
        let mut tally = Tally::default();
        let outcome = self.run_counted(source, opener, started, &mut tally);
        self.finish(source, outcome, started, tally)
    }

    /// Like `run`, but a panic inside the source or parser becomes a
    /// `Panicked` outcome instead of unwinding into the worker. Records
    /// pushed before the panic stay in the buffer and in the report.
    pub fn run_isolated(&self, source: &SourceId, opener: &dyn SourceOpener) -> SourceReport {
        let started = Instant::now();
        let mut tally = Tally::default();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_counted(source, opener, started, &mut tally)
        }));
        let outcome = result.unwrap_or_else(|payload| {
            let reason = panic_message(payload.as_ref());
            error!(source = %source, reason = %reason, "Producer panicked");
            SourceOutcome::Panicked(reason)
        });
        self.finish(source, outcome, started, tally)
    }

    fn run_counted(
        &self,
        source: &SourceId,
        opener: &dyn SourceOpener,
        started: Instant,
        tally: &mut Tally,
    ) -> SourceOutcome {
        let _guard = CompletionGuard {
            buffer: self.buffer,
        };
        self.metrics.record_source_started();

        match opener.open(source) {
            Ok(lines) => self.ingest_lines(source, lines, started, tally),
            Err(err) => {
                warn!(source = %source, error = %err, "Source unavailable, skipping");
                SourceOutcome::Unavailable(err.to_string())
            }
        }
    }

    fn finish(
        &self,
        source: &SourceId,
        outcome: SourceOutcome,
        started: Instant,
        tally: Tally,
    ) -> SourceReport {
        let elapsed = started.elapsed();
        self.metrics
            .record_source_outcome(&outcome, u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX));

        if outcome.is_success() {
            debug!(source = %source, records = tally.records, malformed = tally.malformed, "Source ingested");
        }

        SourceReport {
            source: source.name().to_string(),
            entity_id: source.entity_id().clone(),
            outcome,
            records: tally.records,
            malformed: tally.malformed,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn ingest_lines(
        &self,
        source: &SourceId,
        lines: LineStream,
        started: Instant,
        tally: &mut Tally,
    ) -> SourceOutcome {
        let entity_id = source.entity_id();

        for (index, line) in lines.enumerate() {
            if self.cancel.is_cancelled() {
                debug!(source = %source, records = tally.records, "Cancelled");
                return SourceOutcome::Cancelled;
            }
            if self.timeout.is_some_and(|limit| started.elapsed() > limit) {
                warn!(source = %source, records = tally.records, "Source timed out");
                return SourceOutcome::TimedOut;
            }

            let line = match line {
                Ok(line) => line,
                Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                    tally.malformed += 1;
                    self.metrics.record_malformed();
                    debug!(source = %source, line = index + 1, error = %err, "Skipping undecodable line");
                    continue;
                }
                Err(err) => {
                    warn!(source = %source, line = index + 1, error = %err, "Read failed");
                    return SourceOutcome::Failed(err.to_string());
                }
            };

            if self.filter.classify(index, &line) != LineKind::Data {
                continue;
            }

            match Record::parse_line(&line, entity_id) {
                Ok(record) => {
                    if let Err(err) = self.buffer.push(record) {
                        return SourceOutcome::Failed(err.to_string());
                    }
                    tally.records += 1;
                    self.metrics.record_pushed();
                }
                Err(err) => {
                    tally.malformed += 1;
                    self.metrics.record_malformed();
                    debug!(source = %source, line = index + 1, error = %err, "Skipping malformed line");
                }
            }
        }

        SourceOutcome::Completed
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
