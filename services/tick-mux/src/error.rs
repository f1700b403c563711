//! Error taxonomy for the multiplexer
//!
//! Per-source failures (`SourceError`) are contained inside the producer
//! that hit them and surface only as warnings in the run report. Catalog
//! and sink failures are terminal for the run and reach the caller as
//! `MuxError`.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

// ── Source side ─────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to open source {name}: {cause}")]
    Open {
        name: String,
        #[source]
        cause: io::Error,
    },

    #[error("source {name} not found")]
    NotFound { name: String },

    #[error("invalid source name {name:?}")]
    InvalidName { name: String },
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to list sources under {}: {cause}", .root.display())]
    List {
        root: PathBuf,
        #[source]
        cause: io::Error,
    },
}

// ── Sink side ───────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to open sink {}: {cause}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        cause: io::Error,
    },

    #[error("sink unavailable: {reason}")]
    Unavailable { reason: String },
}

#[derive(Error, Debug)]
pub enum EmitError {
    #[error("sink unavailable, nothing written: {0}")]
    SinkUnavailable(#[from] SinkError),

    #[error("partial output: {written} records written, {remaining} not written: {cause}")]
    Partial {
        written: u64,
        remaining: usize,
        #[source]
        cause: io::Error,
    },
}

impl EmitError {
    /// Records that reached the sink before the failure.
    pub fn records_written(&self) -> u64 {
        match self {
            EmitError::SinkUnavailable(_) => 0,
            EmitError::Partial { written, .. } => *written,
        }
    }
}

// ── Pipeline ────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum MuxError {
    #[error("source enumeration failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("emit failed: {0}")]
    Emit(#[from] EmitError),

    #[error("aggregator thread panicked")]
    AggregatorPanicked,

    #[error("producer worker {worker} panicked")]
    WorkerPanicked { worker: usize },
}
