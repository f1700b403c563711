//! Driver: wires producers, the aggregator and the emitter together
//!
//! Sources are pulled from a crossbeam work queue by a bounded pool of
//! producer threads. A single aggregator thread drains the ingestion
//! buffer. Every thread is scoped, so `ingest` never returns while one
//! is still running.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::aggregator::Aggregator;
use crate::config::MuxConfig;
use crate::emitter::{EmitReport, Emitter};
use crate::error::MuxError;
use crate::ingestion::IngestionBuffer;
use crate::metrics::MuxMetrics;
use crate::ordering::OrderingBook;
use crate::producer::{CancelHandle, SourceReport, StreamProducer};
use crate::sink::SinkOpener;
use crate::source::{SourceCatalog, SourceId, SourceOpener};

/// Result of the ingestion phase.
pub struct Ingested {
    pub book: OrderingBook,
    /// One report per source, sorted by source name.
    pub reports: Vec<SourceReport>,
}

/// Summary of a complete run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub sources: usize,
    pub sources_failed: usize,
    pub records_ingested: u64,
    pub malformed: u64,
    pub emit: EmitReport,
    pub elapsed_ms: u64,
    pub source_reports: Vec<SourceReport>,
}

pub struct MarketDataMux {
    config: MuxConfig,
    metrics: Arc<MuxMetrics>,
    cancel: CancelHandle,
}

impl MarketDataMux {
    pub fn new(config: MuxConfig) -> Self {
        Self {
            config,
            metrics: Arc::new(MuxMetrics::new()),
            cancel: CancelHandle::new(),
        }
    }

    pub fn metrics(&self) -> Arc<MuxMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Handle that stops every producer at its next line.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Enumerate, ingest, order and emit.
    ///
    /// Per-source failures are reported in the result, not returned as
    /// errors. A run with no usable sources emits an empty output.
    pub fn run(
        &self,
        catalog: &dyn SourceCatalog,
        opener: &dyn SourceOpener,
        sink: &dyn SinkOpener,
    ) -> Result<RunReport, MuxError> {
        let started = Instant::now();
        let sources = catalog.enumerate()?;
        info!(
            sources = sources.len(),
            workers = self.config.worker_count(sources.len()),
            mode = ?self.config.aggregator_mode,
            "Starting multiplex run"
        );

        let Ingested { mut book, reports } = self.ingest(sources, opener)?;
        let emit = Emitter::new(&self.metrics).emit(&mut book, sink)?;

        let sources_failed = reports.iter().filter(|r| !r.outcome.is_success()).count();
        let report = RunReport {
            sources: reports.len(),
            sources_failed,
            records_ingested: reports.iter().map(|r| r.records).sum(),
            malformed: reports.iter().map(|r| r.malformed).sum(),
            emit,
            elapsed_ms: millis(started.elapsed()),
            source_reports: reports,
        };

        info!(
            sources = report.sources,
            failed = report.sources_failed,
            records = report.emit.records_written,
            malformed = report.malformed,
            elapsed_ms = report.elapsed_ms,
            "Multiplex run finished"
        );
        Ok(report)
    }

    /// Ingest `sources` into an ordering structure without emitting.
    pub fn ingest(
        &self,
        sources: Vec<SourceId>,
        opener: &dyn SourceOpener,
    ) -> Result<Ingested, MuxError> {
        let workers = self.config.worker_count(sources.len());
        let buffer = IngestionBuffer::new(sources.len());

        let (queue_tx, queue_rx) = channel::unbounded::<SourceId>();
        for source in sources {
            // The driver holds a receiver, so the queue cannot be closed.
            if let Err(channel::SendError(orphan)) = queue_tx.send(source) {
                error!(source = %orphan, "Work queue closed, source skipped");
                let _ = buffer.source_finished();
            }
        }
        drop(queue_tx);

        let buffer = &buffer;
        let metrics = &*self.metrics;
        let cancel = &self.cancel;
        let filter = &self.config.line_filter;
        let timeout = self.config.source_timeout;
        let mode = self.config.aggregator_mode;
        let capacity = self.config.heap_capacity_hint;

        thread::scope(|scope| {
            let aggregator = scope.spawn(move || {
                let mut aggregator = Aggregator::new(mode, capacity);
                metrics.record_aggregated(aggregator.run(buffer));
                aggregator.into_book()
            });

            let handles: Vec<_> = (0..workers)
                .map(|worker| {
                    let queue = queue_rx.clone();
                    scope.spawn(move || {
                        let producer = StreamProducer::new(buffer, filter, timeout, cancel, metrics);
                        let mut reports = Vec::new();
                        for source in queue.iter() {
                            reports.push(producer.run_isolated(&source, opener));
                        }
                        debug!(worker, sources = reports.len(), "Worker finished");
                        reports
                    })
                })
                .collect();

            // Every source is queued; the aggregator may leave the rendezvous
            // once the last one reports finished.
            buffer.mark_dispatched();

            let mut reports = Vec::new();
            let mut panicked = None;
            for (worker, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(mut done) => reports.append(&mut done),
                    Err(_) => {
                        error!(worker, "Producer worker panicked");
                        panicked.get_or_insert(worker);
                    }
                }
            }

            // Sources a dead worker never picked up still count as finished.
            for orphan in queue_rx.try_iter() {
                warn!(source = %orphan, "Source never ran");
                let _ = buffer.source_finished();
            }

            let book = aggregator.join().map_err(|_| {
                error!("Aggregator thread panicked");
                MuxError::AggregatorPanicked
            })?;
            if let Some(worker) = panicked {
                return Err(MuxError::WorkerPanicked { worker });
            }

            reports.sort_by(|a, b| a.source.cmp(&b.source));
            for report in reports.iter().filter(|r| !r.outcome.is_success()) {
                debug!(source = %report.source, outcome = ?report.outcome, "Source did not complete");
            }

            Ok(Ingested { book, reports })
        })
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AggregatorMode;
    use crate::error::{CatalogError, EmitError};
    use crate::producer::SourceOutcome;
    use crate::sink::MemorySink;
    use crate::source::MemorySource;

    fn two_symbols() -> MemorySource {
        MemorySource::new()
            .with_text(
                "AAA",
                "header\n09:30:00.000,10.00,100,NYSE,TRADE\n09:30:00.500,10.10,50,NYSE,TRADE\n",
            )
            .with_text(
                "BBB",
                "header\n09:30:00.000,20.00,200,ARCA,QUOTE\n09:30:00.200,20.05,10,ARCA,TRADE\n",
            )
    }

    struct FailingCatalog;

    impl SourceCatalog for FailingCatalog {
        fn enumerate(&self) -> Result<Vec<SourceId>, CatalogError> {
            Err(CatalogError::List {
                root: "/nowhere".into(),
                cause: std::io::Error::new(std::io::ErrorKind::NotFound, "no such directory"),
            })
        }
    }

    #[test]
    fn test_run_merges_sources() {
        let source = two_symbols();
        let sink = MemorySink::new();
        let mux = MarketDataMux::new(MuxConfig::default());

        let report = mux.run(&source, &source, &sink).unwrap();
        assert_eq!(report.sources, 2);
        assert_eq!(report.sources_failed, 0);
        assert_eq!(report.records_ingested, 4);
        assert_eq!(report.emit.records_written, 4);
        assert_eq!(
            sink.lines(),
            vec![
                "AAA,09:30:00.000,10.00,100,NYSE,TRADE",
                "BBB,09:30:00.000,20.00,200,ARCA,QUOTE",
                "BBB,09:30:00.200,20.05,10,ARCA,TRADE",
                "AAA,09:30:00.500,10.10,50,NYSE,TRADE",
            ]
        );
        assert_eq!(mux.metrics().export()["records_aggregated"], 4);
    }

    #[test]
    fn test_ingest_without_sources() {
        let mux = MarketDataMux::new(MuxConfig::default());
        let ingested = mux.ingest(Vec::new(), &MemorySource::new()).unwrap();
        assert!(ingested.book.is_empty());
        assert!(ingested.reports.is_empty());
    }

    #[test]
    fn test_reports_sorted_and_failures_kept() {
        let source = two_symbols().with_missing("CCC");
        let mux = MarketDataMux::new(MuxConfig {
            workers: Some(3),
            aggregator_mode: AggregatorMode::Pipelined,
            ..MuxConfig::default()
        });

        let ids = source.enumerate().unwrap();
        let ingested = mux.ingest(ids, &source).unwrap();
        let names: Vec<_> = ingested.reports.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(names, vec!["AAA", "BBB", "CCC"]);
        assert!(matches!(
            ingested.reports[2].outcome,
            SourceOutcome::Unavailable(_)
        ));
        assert_eq!(ingested.book.len(), 4);
    }

    #[test]
    fn test_catalog_failure_surfaces() {
        let mux = MarketDataMux::new(MuxConfig::default());
        let err = mux
            .run(&FailingCatalog, &MemorySource::new(), &MemorySink::new())
            .unwrap_err();
        assert!(matches!(err, MuxError::Catalog(_)));
    }

    #[test]
    fn test_sink_failure_surfaces() {
        let source = two_symbols();
        let mux = MarketDataMux::new(MuxConfig::default());
        let err = mux
            .run(&source, &source, &MemorySink::unavailable())
            .unwrap_err();
        assert!(matches!(err, MuxError::Emit(EmitError::SinkUnavailable(_))));
    }

    #[test]
    fn test_cancel_before_run() {
        let source = two_symbols();
        let sink = MemorySink::new();
        let mux = MarketDataMux::new(MuxConfig::default());
        mux.cancel_handle().cancel();

        let report = mux.run(&source, &source, &sink).unwrap();
        assert_eq!(report.sources_failed, 2);
        assert!(report
            .source_reports
            .iter()
            .all(|r| r.outcome == SourceOutcome::Cancelled));
        assert!(sink.lines().is_empty());
        assert!(sink.is_finished());
    }
}
