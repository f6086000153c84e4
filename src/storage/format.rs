//! Binary format types for the direct index and its overflow log.
//!
//! Neither file carries a header. Both are flat arrays of little-endian
//! fixed-width records, so an entry's position is its address.
//!
//! # Direct index
//!
//! ```text
//! Offset   Size  Field
//! k * 4    4     entry for key k: u32
//! ```
//!
//! One entry per key in the domain, in key order. An entry is `ABSENT`,
//! `DUPLICATE_SENTINEL`, or the unique sequence number of the key.
//!
//! # Overflow log
//!
//! ```text
//! Offset   Size  Field
//! i * 8    4     key: u32
//! i * 8+4  4     sequence: u32
//! ```
//!
//! Only keys with two or more occurrences appear. Records are grouped by
//! ascending key and ordered by ascending sequence within a key.

use std::io::Write;

use crate::error::{IndexError, Result};

/// Size of one direct index entry.
pub const ENTRY_SIZE: usize = 4;

/// Size of one encoded record in the overflow log.
pub const RECORD_SIZE: usize = 8;

/// Direct index entry for a key with no occurrences.
pub const ABSENT: u32 = 0;

/// Direct index entry for a key with two or more occurrences.
pub const DUPLICATE_SENTINEL: u32 = u32::MAX;

/// Read u32 from byte slice at offset (little-endian).
#[inline]
pub(crate) fn read_u32_at(data: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&data[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

// ── Direct Entry ──────────────────────────────────────────────────

/// Decoded direct index entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectEntry {
    Absent,
    Unique(u32),
    Duplicate,
}

impl DirectEntry {
    /// Encode an occurrence set as its direct index entry.
    ///
    /// `sequences` must not contain `ABSENT` or `DUPLICATE_SENTINEL`;
    /// the reader guarantees that for every sequence it assigns.
    pub fn for_sequences(sequences: &[u32]) -> Self {
        match sequences {
            [] => DirectEntry::Absent,
            [seq] => DirectEntry::Unique(*seq),
            _ => DirectEntry::Duplicate,
        }
    }

    pub fn encode(self) -> u32 {
        match self {
            DirectEntry::Absent => ABSENT,
            DirectEntry::Unique(seq) => seq,
            DirectEntry::Duplicate => DUPLICATE_SENTINEL,
        }
    }

    pub fn decode(raw: u32) -> Self {
        match raw {
            ABSENT => DirectEntry::Absent,
            DUPLICATE_SENTINEL => DirectEntry::Duplicate,
            seq => DirectEntry::Unique(seq),
        }
    }
}

// ── Record ────────────────────────────────────────────────────────

/// A source key and the 1-based position it was read at.
///
/// The overflow log is a flat array of these, one per occurrence of a
/// duplicated key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    pub key: u32,
    pub sequence: u32,
}

impl Record {
    pub fn new(key: u32, sequence: u32) -> Self {
        Self { key, sequence }
    }

    /// Write record to writer (8 bytes, little-endian).
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.key.to_le_bytes())?;
        w.write_all(&self.sequence.to_le_bytes())?;
        Ok(())
    }

    /// Decode from an 8-byte slice.
    pub fn from_slice(buf: &[u8]) -> Self {
        Self {
            key: read_u32_at(buf, 0),
            sequence: read_u32_at(buf, 4),
        }
    }

    /// Decode a whole overflow log.
    ///
    /// Fails if the length is not a whole number of records. Ordering is
    /// checked separately by `validate_order`.
    pub fn decode_all(data: &[u8]) -> Result<Vec<Self>> {
        if data.len() % RECORD_SIZE != 0 {
            return Err(IndexError::InvalidFormat(format!(
                "Overflow log length {} is not a multiple of {}",
                data.len(),
                RECORD_SIZE
            )));
        }
        Ok(data
            .chunks_exact(RECORD_SIZE)
            .map(Self::from_slice)
            .collect())
    }

    /// Check the log is grouped by ascending key with strictly ascending
    /// sequences inside each group.
    pub fn validate_order(records: &[Self]) -> Result<()> {
        for (i, pair) in records.windows(2).enumerate() {
            let (prev, next) = (pair[0], pair[1]);
            let ordered = prev.key < next.key
                || (prev.key == next.key && prev.sequence < next.sequence);
            if !ordered {
                return Err(IndexError::InvalidFormat(format!(
                    "Overflow record {} ({}, {}) is out of order after ({}, {})",
                    i + 1,
                    next.key,
                    next.sequence,
                    prev.key,
                    prev.sequence
                )));
            }
        }
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────
