//! Configuration for the multiplexer

use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use types::record::LineFilter;

/// When the aggregator starts draining the ingestion buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatorMode {
    /// Wait until every source is dispatched and finished, then drain.
    #[default]
    Rendezvous,
    /// Drain concurrently with the producers.
    Pipelined,
}

/// Configuration for a `MarketDataMux` run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MuxConfig {
    /// Producer pool size. `None` uses the available parallelism.
    pub workers: Option<usize>,
    pub aggregator_mode: AggregatorMode,
    /// Per-source ingestion deadline, checked between lines.
    pub source_timeout: Option<Duration>,
    pub line_filter: LineFilter,
    /// Initial ordering-structure capacity.
    pub heap_capacity_hint: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            workers: None,
            aggregator_mode: AggregatorMode::default(),
            source_timeout: None,
            line_filter: LineFilter::default(),
            heap_capacity_hint: 100_000,
        }
    }
}

impl MuxConfig {
    /// Number of producer threads for `sources` inputs: never more than
    /// there are sources, at least one when there is any.
    pub fn worker_count(&self, sources: usize) -> usize {
        if sources == 0 {
            return 0;
        }
        let wanted = self.workers.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(4)
        });
        wanted.clamp(1, sources)
    }
}
