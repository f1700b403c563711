//! Synchronized ingestion buffer shared by producers and the aggregator
//!
//! Producers push parsed records; the aggregator pops them in arrival
//! order. The buffer also tracks how many sources are still running and
//! whether the driver has finished dispatching sources, which together
//! decide when ingestion is complete.
//!
//! Invariants:
//! - Queue, pending-source counter and dispatch flag live under one lock
//! - `pending_sources` only decreases and never underflows
//! - No record is accepted once `pending_sources` has reached zero
//! - Every wait re-checks its predicate after waking

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace};
use types::record::Record;

/// Errors raised by buffer operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IngestionError {
    #[error("buffer closed: all sources already finished, record for {entity} rejected")]
    Closed { entity: String },

    #[error("source_finished called with no pending sources")]
    CounterUnderflow,
}

/// Point-in-time buffer statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferStats {
    pub queued: usize,
    pub pending_sources: usize,
    pub dispatched: bool,
    pub records_pushed: u64,
    pub records_popped: u64,
    /// Largest queue length observed.
    pub high_water_mark: usize,
}

struct BufferState {
    queue: VecDeque<Record>,
    pending_sources: usize,
    dispatched: bool,
    records_pushed: u64,
    records_popped: u64,
    high_water_mark: usize,
}

impl BufferState {
    /// Ingestion is complete once every dispatched source has finished.
    fn is_complete(&self) -> bool {
        self.dispatched && self.pending_sources == 0
    }
}

/// FIFO of pending records plus completion tracking.
pub struct IngestionBuffer {
    state: Mutex<BufferState>,
    ready: Condvar,
}

impl IngestionBuffer {
    /// Create a buffer expecting `pending_sources` producers.
    pub fn new(pending_sources: usize) -> Self {
        debug!(pending_sources, "IngestionBuffer initialized");

        Self {
            state: Mutex::new(BufferState {
                queue: VecDeque::new(),
                pending_sources,
                dispatched: false,
                records_pushed: 0,
                records_popped: 0,
                high_water_mark: 0,
            }),
            ready: Condvar::new(),
        }
    }

    /// Append a record and wake one waiting consumer.
    pub fn push(&self, record: Record) -> Result<(), IngestionError> {
        {
            let mut state = self.state.lock();
            if state.pending_sources == 0 {
                error!(
                    entity = %record.entity_id,
                    timestamp = %record.timestamp,
                    "Push after all sources finished, dropping record"
                );
                return Err(IngestionError::Closed {
                    entity: record.entity_id.to_string(),
                });
            }

            state.queue.push_back(record);
            state.records_pushed += 1;
            state.high_water_mark = state.high_water_mark.max(state.queue.len());
        }
        self.ready.notify_one();
        Ok(())
    }

    /// Remove the oldest record, blocking while the queue is empty.
    ///
    /// Returns `None` only when the queue is empty and ingestion is
    /// complete; the check happens under the buffer lock so a queue that
    /// is empty between two pushes is never mistaken for the end.
    pub fn pop_front(&self) -> Option<Record> {
        let mut state = self.state.lock();
        loop {
            if let Some(record) = state.queue.pop_front() {
                state.records_popped += 1;
                return Some(record);
            }
            if state.is_complete() {
                trace!("Buffer drained and ingestion complete");
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Mark one source as finished and wake every waiter.
    ///
    /// Returns the number of sources still pending.
    pub fn source_finished(&self) -> Result<usize, IngestionError> {
        let remaining = {
            let mut state = self.state.lock();
            if state.pending_sources == 0 {
                error!("source_finished with no pending sources, ignoring");
                return Err(IngestionError::CounterUnderflow);
            }
            state.pending_sources -= 1;
            state.pending_sources
        };
        self.ready.notify_all();
        Ok(remaining)
    }

    /// True once no source is pending.
    pub fn all_sources_done(&self) -> bool {
        self.state.lock().pending_sources == 0
    }

    /// Record that the driver has handed out every source. Set once.
    pub fn mark_dispatched(&self) {
        {
            let mut state = self.state.lock();
            if state.dispatched {
                return;
            }
            state.dispatched = true;
            debug!(pending_sources = state.pending_sources, "All sources dispatched");
        }
        self.ready.notify_all();
    }

    /// Block until every source is dispatched and finished.
    pub fn wait_for_dispatch(&self) {
        let mut state = self.state.lock();
        while !state.is_complete() {
            self.ready.wait(&mut state);
        }
    }

    /// Whether every source is dispatched and finished.
    pub fn is_complete(&self) -> bool {
        self.state.lock().is_complete()
    }

    /// Number of records currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    pub fn stats(&self) -> BufferStats {
        let state = self.state.lock();
        BufferStats {
            queued: state.queue.len(),
            pending_sources: state.pending_sources,
            dispatched: state.dispatched,
            records_pushed: state.records_pushed,
            records_popped: state.records_popped,
            high_water_mark: state.high_water_mark,
        }
    }
}
