//! Build-time key -> occurrences map.
//!
//! Populated once from the record stream, read once by the direct index
//! writer, then dropped. Nothing is ever removed.

use std::collections::HashMap;

use crate::storage::format::Record;

/// Multi-valued map from key to the sequences it was seen at.
///
/// Sequences for a key are kept in insertion order, which is ascending
/// because the reader assigns them in stream order.
#[derive(Debug, Default)]
pub struct KeyIndexBuilder {
    occurrences: HashMap<u32, Vec<u32>>,
    record_count: u64,
}

impl KeyIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key` occurred at `sequence`. Amortized O(1).
    pub fn insert(&mut self, key: u32, sequence: u32) {
        self.occurrences.entry(key).or_default().push(sequence);
        self.record_count += 1;
    }

    pub fn insert_record(&mut self, record: Record) {
        self.insert(record.key, record.sequence);
    }

    /// Number of sequences recorded for `key`.
    pub fn count(&self, key: u32) -> usize {
        self.occurrences.get(&key).map_or(0, Vec::len)
    }

    /// Sequences recorded for `key`, in occurrence order. Empty if absent.
    pub fn entries(&self, key: u32) -> &[u32] {
        self.occurrences.get(&key).map_or(&[], Vec::as_slice)
    }

    /// Number of distinct keys seen.
    pub fn len(&self) -> usize {
        self.occurrences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty()
    }

    /// Total insertions across all keys.
    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    /// Occupied keys in ascending order.
    ///
    /// O(K log K) where K = distinct keys. Lets the writer jump over runs
    /// of absent keys instead of probing the map once per domain value.
    pub fn sorted_keys(&self) -> Vec<u32> {
        let mut keys: Vec<u32> = self.occurrences.keys().copied().collect();
        keys.sort_unstable();
        keys
    }
}

impl FromIterator<Record> for KeyIndexBuilder {
    fn from_iter<I: IntoIterator<Item = Record>>(iter: I) -> Self {
        let mut index = Self::new();
        for record in iter {
            index.insert_record(record);
        }
        index
    }
}

// ── Tests ──────────────────────────────────────────────────────────
