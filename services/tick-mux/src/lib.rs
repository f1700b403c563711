//! Tick Multiplexer
//!
//! Merges many per-symbol market data streams into one stream ordered by
//! timestamp, with the symbol as tie-break:
//! - One producer per source, run by a bounded worker pool
//! - A shared ingestion buffer with completion tracking
//! - A single aggregator feeding a min-ordered structure
//! - An emitter writing `symbol,timestamp,price,size,venue,type` lines
//!
//! # Architecture
//!
//! ```text
//!  AAPL.txt   IBM.txt   MSFT.txt ...
//!     │          │         │
//! ┌───▼──────────▼─────────▼───┐
//! │  Producers (worker pool)   │  ← parse, tag with symbol
//! └─────────────┬──────────────┘
//!               │ push / source_finished
//!       ┌───────▼────────┐
//!       │IngestionBuffer │  ← FIFO + pending-source counter
//!       └───────┬────────┘
//!               │ pop_front
//!        ┌──────▼──────┐
//!        │ Aggregator  │
//!        └──────┬──────┘
//!               │ insert
//!        ┌──────▼──────┐
//!        │OrderingBook │  ← min-heap on (timestamp, symbol)
//!        └──────┬──────┘
//!               │ pop_min
//!        ┌──────▼──────┐
//!        │  Emitter    │ ─► result.txt
//!        └─────────────┘
//! ```

pub mod aggregator;
pub mod config;
pub mod emitter;
pub mod error;
pub mod ingestion;
pub mod metrics;
pub mod ordering;
pub mod pipeline;
pub mod producer;
pub mod sink;
pub mod source;

pub use config::{AggregatorMode, MuxConfig};
pub use error::MuxError;
pub use pipeline::{MarketDataMux, RunReport};

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";
