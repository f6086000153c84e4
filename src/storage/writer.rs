//! Writers for the direct index and the overflow log.
//!
//! `DirectAddressWriter` drains a `KeyIndexBuilder` across the whole key
//! domain, emitting exactly one entry per key in ascending key order.
//! Keys with more than one occurrence are handed to an `OverflowWriter`,
//! which therefore receives them in ascending order too.

use std::io::Write;

use crate::error::{IndexError, Result};
use crate::storage::format::{DirectEntry, Record, ENTRY_SIZE};
use crate::storage::key_index::KeyIndexBuilder;

/// Absent entries written per `write_all` call when filling gaps.
const ZERO_CHUNK_ENTRIES: u64 = 16 * 1024;

/// Emit a progress event every this many keys.
const PROGRESS_INTERVAL: u64 = 1 << 26;

/// Direct index counts produced by a full drain of the key index.
///
/// Duplicate counts live on the `OverflowWriter` that received them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Entries written to the direct index (== domain size).
    pub entries_written: u64,
    /// Keys that map to a single sequence.
    pub unique_keys: u64,
}

// ── OverflowWriter ─────────────────────────────────────────────────

/// Append-only writer for the overflow log.
///
/// Keys must arrive in strictly ascending order, each exactly once, with
/// its full occurrence list.
pub struct OverflowWriter<W: Write> {
    inner: W,
    last_key: Option<u32>,
    keys_written: u64,
    records_written: u64,
}

impl<W: Write> OverflowWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            last_key: None,
            keys_written: 0,
            records_written: 0,
        }
    }

    /// Append every occurrence of `key`, in the order given.
    pub fn append(&mut self, key: u32, sequences: &[u32]) -> Result<()> {
        if let Some(last) = self.last_key {
            if key <= last {
                return Err(IndexError::InvalidFormat(format!(
                    "Overflow key {} appended after key {}",
                    key, last
                )));
            }
        }
        for &sequence in sequences {
            Record::new(key, sequence).write_to(&mut self.inner)?;
        }
        self.last_key = Some(key);
        self.keys_written += 1;
        self.records_written += sequences.len() as u64;
        Ok(())
    }

    /// Distinct keys appended.
    pub fn keys_written(&self) -> u64 {
        self.keys_written
    }

    /// Records appended across all keys.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Flush and return the underlying writer.
    pub fn finish(mut self) -> Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

// ── DirectAddressWriter ────────────────────────────────────────────

/// Writer for the direct index: one u32 LE entry per key of the domain.
pub struct DirectAddressWriter<W: Write> {
    inner: W,
    domain_size: u64,
    entries_written: u64,
    zeros: Vec<u8>,
}

impl<W: Write> DirectAddressWriter<W> {
    /// Create a writer for a domain of `domain_size` keys (at most 2^32).
    pub fn new(inner: W, domain_size: u64) -> Self {
        debug_assert!(domain_size <= 1u64 << 32);
        Self {
            inner,
            domain_size,
            entries_written: 0,
            zeros: Vec::new(),
        }
    }

    /// Entries written so far. Also the next key to be written.
    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    /// Write the entry for the next key in order.
    pub fn write_entry(&mut self, entry: DirectEntry) -> Result<()> {
        self.check_room(1)?;
        self.inner.write_all(&entry.encode().to_le_bytes())?;
        self.advance(1);
        Ok(())
    }

    /// Write `count` consecutive absent entries.
    pub fn write_absent(&mut self, count: u64) -> Result<()> {
        self.check_room(count)?;
        if self.zeros.is_empty() && count > 0 {
            self.zeros = vec![0u8; ZERO_CHUNK_ENTRIES as usize * ENTRY_SIZE];
        }
        let mut remaining = count;
        while remaining > 0 {
            let n = remaining.min(ZERO_CHUNK_ENTRIES);
            self.inner.write_all(&self.zeros[..n as usize * ENTRY_SIZE])?;
            self.advance(n);
            remaining -= n;
        }
        Ok(())
    }

    /// Traverse every key of the domain in ascending order.
    ///
    /// - no occurrences: `ABSENT`
    /// - one occurrence: that sequence
    /// - more: `DUPLICATE_SENTINEL`, and all occurrences go to `overflow`
    ///
    /// Runs of absent keys are written in bulk; the output is identical to
    /// probing `index.count(key)` for every key.
    pub fn drain<O: Write>(
        mut self,
        index: &KeyIndexBuilder,
        overflow: &mut OverflowWriter<O>,
    ) -> Result<(W, DrainStats)> {
        let mut stats = DrainStats::default();

        for key in index.sorted_keys() {
            let position = key as u64;
            if position >= self.domain_size {
                return Err(IndexError::KeyOutOfDomain {
                    key,
                    key_bits: self.domain_size.trailing_zeros() as u8,
                });
            }
            self.write_absent(position - self.entries_written)?;

            let sequences = index.entries(key);
            let entry = DirectEntry::for_sequences(sequences);
            match entry {
                DirectEntry::Unique(_) => stats.unique_keys += 1,
                DirectEntry::Duplicate => overflow.append(key, sequences)?,
                DirectEntry::Absent => {}
            }
            self.write_entry(entry)?;
        }

        self.write_absent(self.domain_size - self.entries_written)?;
        stats.entries_written = self.entries_written;

        let inner = self.finish()?;
        Ok((inner, stats))
    }

    /// Flush and return the underlying writer.
    ///
    /// Fails unless exactly one entry per key has been written.
    pub fn finish(mut self) -> Result<W> {
        if self.entries_written != self.domain_size {
            return Err(IndexError::InvalidFormat(format!(
                "Direct index incomplete: {} of {} entries written",
                self.entries_written, self.domain_size
            )));
        }
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn check_room(&self, count: u64) -> Result<()> {
        if self.entries_written + count > self.domain_size {
            return Err(IndexError::InvalidFormat(format!(
                "Direct index overrun: {} + {} entries exceeds domain of {}",
                self.entries_written, count, self.domain_size
            )));
        }
        Ok(())
    }

    fn advance(&mut self, count: u64) {
        let before = self.entries_written / PROGRESS_INTERVAL;
        self.entries_written += count;
        if self.entries_written / PROGRESS_INTERVAL != before {
            tracing::debug!(
                "direct index progress: {}/{} keys",
                self.entries_written,
                self.domain_size
            );
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
