//! Ordering structure for aggregated records
//!
//! A min-heap keyed by `(timestamp, entity_id)`. `BinaryHeap` is a
//! max-heap, so entries are wrapped in `Reverse`. Each entry also carries
//! its insertion sequence number: records with an identical key come out
//! in insertion order, which keeps a source's own line order intact and
//! makes extraction fully deterministic for a given insertion order.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use types::record::Record;

struct HeapEntry {
    record: Record,
    seq: u64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.record
            .merge_key()
            .cmp(&other.record.merge_key())
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Multiset of records with O(log n) insert and extract-min.
#[derive(Default)]
pub struct OrderingBook {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    next_seq: u64,
}

impl OrderingBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: BinaryHeap::with_capacity(capacity),
            next_seq: 0,
        }
    }

    #[inline]
    pub fn insert(&mut self, record: Record) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(HeapEntry { record, seq }));
    }

    /// Remove and return the smallest record.
    #[inline]
    pub fn pop_min(&mut self) -> Option<Record> {
        self.heap.pop().map(|Reverse(entry)| entry.record)
    }

    pub fn peek_min(&self) -> Option<&Record> {
        self.heap.peek().map(|Reverse(entry)| &entry.record)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drain in ascending order.
    pub fn drain_ordered(&mut self) -> impl Iterator<Item = Record> + '_ {
        std::iter::from_fn(move || self.pop_min())
    }

    /// Consume the book, returning every record in ascending order.
    pub fn into_sorted_vec(mut self) -> Vec<Record> {
        let mut out = Vec::with_capacity(self.heap.len());
        out.extend(self.drain_ordered());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use types::ids::EntityId;

    fn make_record(entity: &str, ts: &str, price: &str) -> Record {
        Record::parse_line(&format!("{ts},{price},100,NYSE,TRADE"), &EntityId::new(entity)).unwrap()
    }

    #[test]
    fn test_empty_book() {
        let mut book = OrderingBook::new();
        assert!(book.is_empty());
        assert!(book.peek_min().is_none());
        assert!(book.pop_min().is_none());
    }

    #[test]
    fn test_tie_broken_by_entity_ascending() {
        let mut book = OrderingBook::new();
        book.insert(make_record("AAA", "09:30:00.500", "1"));
        book.insert(make_record("BBB", "09:30:00.000", "1"));
        book.insert(make_record("BBB", "09:30:00.200", "1"));
        book.insert(make_record("AAA", "09:30:00.000", "1"));

        let order: Vec<String> = book
            .into_sorted_vec()
            .iter()
            .map(|r| format!("{}@{}", r.entity_id, r.timestamp))
            .collect();
        assert_eq!(
            order,
            vec![
                "AAA@09:30:00.000",
                "BBB@09:30:00.000",
                "BBB@09:30:00.200",
                "AAA@09:30:00.500",
            ]
        );
    }

    #[test]
    fn test_identical_keys_keep_insertion_order() {
        let mut book = OrderingBook::new();
        book.insert(make_record("AAA", "09:30:00.000", "3"));
        book.insert(make_record("AAA", "09:30:00.000", "1"));
        book.insert(make_record("AAA", "09:30:00.000", "2"));

        let prices: Vec<String> = book.drain_ordered().map(|r| r.price).collect();
        assert_eq!(prices, vec!["3", "1", "2"]);
    }

    #[test]
    fn test_peek_matches_pop() {
        let mut book = OrderingBook::with_capacity(4);
        book.insert(make_record("MSFT", "10:00:00.000", "1"));
        book.insert(make_record("IBM", "09:00:00.000", "1"));

        assert_eq!(book.peek_min().unwrap().entity_id.as_str(), "IBM");
        assert_eq!(book.pop_min().unwrap().entity_id.as_str(), "IBM");
        assert_eq!(book.len(), 1);
    }

    proptest! {
        #[test]
        fn prop_extraction_is_sorted_and_complete(
            entries in proptest::collection::vec((0u32..20, 0usize..4), 0..200)
        ) {
            let entities = ["AAA", "BBB", "CCC", "DDD"];
            let mut book = OrderingBook::new();
            let mut expected = Vec::new();
            for (ms, e) in &entries {
                let record = make_record(entities[*e], &format!("09:30:00.{ms:03}"), "1");
                expected.push(record.clone());
                book.insert(record);
            }

            let out = book.into_sorted_vec();
            prop_assert_eq!(out.len(), expected.len());
            for pair in out.windows(2) {
                prop_assert!(pair[0].merge_key() <= pair[1].merge_key());
            }

            let mut sorted_out = out.clone();
            sorted_out.sort();
            expected.sort();
            prop_assert_eq!(sorted_out, expected);
        }
    }
}
