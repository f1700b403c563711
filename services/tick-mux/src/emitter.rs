//! Emitter: writes the ordered result set to the sink
//!
//! Drains the ordering structure with repeated extract-min and appends one
//! line per record. A SHA-256 over the emitted lines identifies the output,
//! so two runs over the same inputs can be compared without diffing files.
//! The first sink failure aborts the remaining writes and is reported once;
//! records not yet written stay in the ordering structure.

use std::time::Instant;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::error::EmitError;
use crate::metrics::MuxMetrics;
use crate::ordering::OrderingBook;
use crate::sink::{RecordSink, SinkOpener};

/// Summary of a successful emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmitReport {
    pub records_written: u64,
    /// Hex SHA-256 over every emitted line including its newline.
    pub checksum: String,
}

pub struct Emitter<'a> {
    metrics: &'a MuxMetrics,
}

impl<'a> Emitter<'a> {
    pub fn new(metrics: &'a MuxMetrics) -> Self {
        Self { metrics }
    }

    /// Open the sink and drain `book` into it.
    ///
    /// If the sink cannot be opened, `book` is left untouched.
    pub fn emit(
        &self,
        book: &mut OrderingBook,
        opener: &dyn SinkOpener,
    ) -> Result<EmitReport, EmitError> {
        let mut sink = opener.open_sink().map_err(|err| {
            error!(error = %err, pending = book.len(), "Sink unavailable");
            self.metrics.record_emit_failure();
            EmitError::SinkUnavailable(err)
        })?;
        self.drain_into(book, sink.as_mut())
    }

    /// Drain `book` into an already-open sink.
    pub fn drain_into(
        &self,
        book: &mut OrderingBook,
        sink: &mut dyn RecordSink,
    ) -> Result<EmitReport, EmitError> {
        let started = Instant::now();
        let mut hasher = Sha256::new();
        let mut written = 0u64;

        while let Some(record) = book.peek_min() {
            let line = record.to_line();
            if let Err(cause) = sink.append(&line) {
                // The failed record stays in the book with everything after it.
                let remaining = book.len();
                error!(written, remaining, error = %cause, "Sink write failed, output is partial");
                return Err(self.partial(written, remaining, cause));
            }
            book.pop_min();
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
            written += 1;
        }

        if let Err(cause) = sink.finish() {
            error!(written, error = %cause, "Sink flush failed, output may be partial");
            return Err(self.partial(written, 0, cause));
        }

        self.metrics.record_emitted(written);
        let checksum = format!("{:x}", hasher.finalize());
        info!(
            records = written,
            checksum = %checksum,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Emit finished"
        );

        Ok(EmitReport {
            records_written: written,
            checksum,
        })
    }

    fn partial(&self, written: u64, remaining: usize, cause: std::io::Error) -> EmitError {
        self.metrics.record_emitted(written);
        self.metrics.record_emit_failure();
        EmitError::Partial {
            written,
            remaining,
            cause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use types::ids::EntityId;
    use types::record::Record;

    fn book_of(entries: &[(&str, &str)]) -> OrderingBook {
        let mut book = OrderingBook::new();
        for (entity, ts) in entries {
            book.insert(
                Record::parse_line(&format!("{ts},1.00,10,NYSE,TRADE"), &EntityId::new(*entity))
                    .unwrap(),
            );
        }
        book
    }

    #[test]
    fn test_emits_in_order() {
        let metrics = MuxMetrics::new();
        let sink = MemorySink::new();
        let mut book = book_of(&[
            ("AAA", "09:30:00.500"),
            ("BBB", "09:30:00.200"),
            ("BBB", "09:30:00.000"),
            ("AAA", "09:30:00.000"),
        ]);

        let report = Emitter::new(&metrics).emit(&mut book, &sink).unwrap();
        assert_eq!(report.records_written, 4);
        assert_eq!(report.checksum.len(), 64);
        assert!(book.is_empty());
        assert!(sink.is_finished());
        assert_eq!(
            sink.lines(),
            vec![
                "AAA,09:30:00.000,1.00,10,NYSE,TRADE",
                "BBB,09:30:00.000,1.00,10,NYSE,TRADE",
                "BBB,09:30:00.200,1.00,10,NYSE,TRADE",
                "AAA,09:30:00.500,1.00,10,NYSE,TRADE",
            ]
        );
        assert_eq!(metrics.export()["records_emitted"], 4);
    }

    #[test]
    fn test_checksum_is_deterministic() {
        let metrics = MuxMetrics::new();
        let entries = [("AAA", "09:30:00.000"), ("BBB", "09:30:00.001")];

        let first = Emitter::new(&metrics)
            .emit(&mut book_of(&entries), &MemorySink::new())
            .unwrap();
        let second = Emitter::new(&metrics)
            .emit(&mut book_of(&entries), &MemorySink::new())
            .unwrap();
        assert_eq!(first.checksum, second.checksum);

        let other = Emitter::new(&metrics)
            .emit(&mut book_of(&entries[..1]), &MemorySink::new())
            .unwrap();
        assert_ne!(first.checksum, other.checksum);
    }

    #[test]
    fn test_empty_book_still_finishes_sink() {
        let metrics = MuxMetrics::new();
        let sink = MemorySink::new();
        let report = Emitter::new(&metrics).emit(&mut OrderingBook::new(), &sink).unwrap();
        assert_eq!(report.records_written, 0);
        assert!(sink.is_finished());
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn test_unavailable_sink_keeps_book() {
        let metrics = MuxMetrics::new();
        let mut book = book_of(&[("AAA", "09:30:00.000")]);

        let err = Emitter::new(&metrics)
            .emit(&mut book, &MemorySink::unavailable())
            .unwrap_err();
        assert!(matches!(err, EmitError::SinkUnavailable(_)));
        assert_eq!(book.len(), 1);
        assert_eq!(metrics.export()["emit_failures"], 1);
    }

    #[test]
    fn test_partial_write_is_flagged() {
        let metrics = MuxMetrics::new();
        let sink = MemorySink::failing_after(2);
        let mut book = book_of(&[
            ("AAA", "09:30:00.000"),
            ("AAA", "09:30:00.001"),
            ("AAA", "09:30:00.002"),
            ("AAA", "09:30:00.003"),
        ]);

        let err = Emitter::new(&metrics).emit(&mut book, &sink).unwrap_err();
        match err {
            EmitError::Partial {
                written, remaining, ..
            } => {
                assert_eq!(written, 2);
                assert_eq!(remaining, 2);
            }
            other => panic!("Expected Partial, got {:?}", other),
        }
        assert_eq!(sink.lines().len(), 2);
        assert!(!sink.is_finished());
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn test_retry_after_partial_write_loses_nothing() {
        let metrics = MuxMetrics::new();
        let emitter = Emitter::new(&metrics);
        let mut book = book_of(&[
            ("AAA", "09:30:00.003"),
            ("AAA", "09:30:00.001"),
            ("AAA", "09:30:00.000"),
            ("AAA", "09:30:00.002"),
        ]);

        let first = MemorySink::failing_after(2);
        let err = emitter.emit(&mut book, &first).unwrap_err();
        assert!(matches!(err, EmitError::Partial { remaining: 2, .. }));

        let second = MemorySink::new();
        let report = emitter.emit(&mut book, &second).unwrap();
        assert_eq!(report.records_written, 2);
        assert!(book.is_empty());

        let mut all = first.lines();
        all.extend(second.lines());
        assert_eq!(
            all,
            vec![
                "AAA,09:30:00.000,1.00,10,NYSE,TRADE",
                "AAA,09:30:00.001,1.00,10,NYSE,TRADE",
                "AAA,09:30:00.002,1.00,10,NYSE,TRADE",
                "AAA,09:30:00.003,1.00,10,NYSE,TRADE",
            ]
        );
    }
}
