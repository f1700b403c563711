//! Aggregator: drains the ingestion buffer into the ordering structure
//!
//! ```text
//! WaitingForDispatch ──► Draining ──► Finished
//! ```
//!
//! In `Rendezvous` mode the aggregator first waits until every source is
//! dispatched and finished; in `Pipelined` mode it drains from the start.
//! Either way draining ends only when the buffer reports empty *and*
//! complete under its own lock.

use std::time::Instant;

use tracing::{debug, info};

use crate::config::AggregatorMode;
use crate::ingestion::IngestionBuffer;
use crate::ordering::OrderingBook;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorState {
    WaitingForDispatch,
    Draining,
    Finished,
}

pub struct Aggregator {
    mode: AggregatorMode,
    state: AggregatorState,
    book: OrderingBook,
    drained: u64,
}

impl Aggregator {
    pub fn new(mode: AggregatorMode, capacity_hint: usize) -> Self {
        Self {
            mode,
            state: AggregatorState::WaitingForDispatch,
            book: OrderingBook::with_capacity(capacity_hint),
            drained: 0,
        }
    }

    pub fn state(&self) -> AggregatorState {
        self.state
    }

    /// Drive the state machine to `Finished`. Returns the number of
    /// records drained by this call.
    pub fn run(&mut self, buffer: &IngestionBuffer) -> u64 {
        if self.state == AggregatorState::Finished {
            return 0;
        }
        let started = Instant::now();

        if self.mode == AggregatorMode::Rendezvous {
            debug!("Aggregator waiting for all sources");
            buffer.wait_for_dispatch();
        }
        self.transition(AggregatorState::Draining);

        let before = self.drained;
        while let Some(record) = buffer.pop_front() {
            self.book.insert(record);
            self.drained += 1;
        }

        self.transition(AggregatorState::Finished);
        let stats = buffer.stats();
        info!(
            records = self.drained,
            mode = ?self.mode,
            high_water_mark = stats.high_water_mark,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Aggregation finished"
        );
        self.drained - before
    }

    /// Hand over the ordering structure.
    pub fn into_book(self) -> OrderingBook {
        self.book
    }

    fn transition(&mut self, next: AggregatorState) {
        debug!(from = ?self.state, to = ?next, "Aggregator state change");
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use types::ids::EntityId;
    use types::record::Record;

    fn make_record(entity: &str, ms: u32) -> Record {
        Record::parse_line(
            &format!("09:30:00.{ms:03},1,1,NYSE,TRADE"),
            &EntityId::new(entity),
        )
        .unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let buffer = IngestionBuffer::new(1);
        buffer.push(make_record("AAA", 5)).unwrap();
        buffer.push(make_record("AAA", 9)).unwrap();
        buffer.source_finished().unwrap();
        buffer.mark_dispatched();

        let mut aggregator = Aggregator::new(AggregatorMode::Rendezvous, 16);
        assert_eq!(aggregator.state(), AggregatorState::WaitingForDispatch);

        assert_eq!(aggregator.run(&buffer), 2);
        assert_eq!(aggregator.state(), AggregatorState::Finished);
        assert_eq!(aggregator.run(&buffer), 0);

        let book = aggregator.into_book();
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn test_rendezvous_waits_for_all_sources() {
        let buffer = Arc::new(IngestionBuffer::new(2));
        let (tx, rx) = channel::bounded(1);

        let handle = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut aggregator = Aggregator::new(AggregatorMode::Rendezvous, 16);
                aggregator.run(&buffer);
                tx.send(()).unwrap();
                aggregator.into_book()
            })
        };

        buffer.push(make_record("BBB", 2)).unwrap();
        buffer.source_finished().unwrap();
        buffer.mark_dispatched();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        // Rendezvous mode leaves records queued until every source is done.
        assert_eq!(buffer.len(), 1);

        buffer.push(make_record("AAA", 2)).unwrap();
        buffer.source_finished().unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let sorted = handle.join().unwrap().into_sorted_vec();
        assert_eq!(sorted[0].entity_id.as_str(), "AAA");
        assert_eq!(sorted[1].entity_id.as_str(), "BBB");
    }

    #[test]
    fn test_pipelined_drains_while_sources_run() {
        let buffer = Arc::new(IngestionBuffer::new(1));
        let handle = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                let mut aggregator = Aggregator::new(AggregatorMode::Pipelined, 16);
                aggregator.run(&buffer);
                aggregator.into_book()
            })
        };

        buffer.push(make_record("AAA", 1)).unwrap();
        // The pipelined aggregator consumes records before the source ends.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while !buffer.is_empty() && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(buffer.is_empty());

        buffer.push(make_record("AAA", 2)).unwrap();
        buffer.mark_dispatched();
        buffer.source_finished().unwrap();

        let book = handle.join().unwrap();
        assert_eq!(book.len(), 2);
    }

    #[test]
    fn test_no_sources() {
        let buffer = IngestionBuffer::new(0);
        buffer.mark_dispatched();

        let mut aggregator = Aggregator::new(AggregatorMode::Rendezvous, 0);
        assert_eq!(aggregator.run(&buffer), 0);
        assert!(aggregator.into_book().is_empty());
    }
}
