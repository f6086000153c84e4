//! Read-only lookup over a published index.
//!
//! The direct index is memory-mapped and answers every key with one 4-byte
//! read at `key * 4`. The overflow log is loaded once at open time together
//! with a sorted key -> record range table, so a duplicate lookup is a
//! binary search over duplicated keys rather than a scan of the log.
//!
//! `LookupEngine` never writes. It is `Send + Sync` and meant to be shared
//! behind an `Arc` by any number of serving threads without locking.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use serde::Serialize;

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::storage::format::{read_u32_at, DirectEntry, Record, ENTRY_SIZE};

/// Answer to a single-key lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "sequences", rename_all = "camelCase")]
pub enum LookupResult {
    Absent,
    Unique(u32),
    /// All sequences for the key, in original occurrence order.
    Duplicates(Vec<u32>),
}

/// Contiguous run of overflow records sharing one key.
#[derive(Debug, Clone, Copy)]
struct OverflowGroup {
    key: u32,
    start: usize,
    len: usize,
}

/// Index shape, for logging and the stats request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub key_bits: u8,
    pub domain_size: u64,
    pub duplicate_keys: usize,
    pub overflow_records: usize,
}

/// Lookup engine over the direct index and overflow log.
pub struct LookupEngine {
    direct: Mmap,
    key_bits: u8,
    overflow: Vec<Record>,
    groups: Vec<OverflowGroup>,
}

impl LookupEngine {
    /// Open the index files named by `config` under `data_dir`.
    pub fn open(data_dir: &Path, config: &IndexConfig) -> Result<Self> {
        config.validate()?;
        let paths = config.paths(data_dir);
        Self::open_files(&paths.index, &paths.overflow, config.key_bits)
    }

    /// Open an index from explicit file paths.
    ///
    /// Validates the direct index size against the domain, and the overflow
    /// log's framing, ordering, and agreement with the direct index.
    pub fn open_files(index_path: &Path, overflow_path: &Path, key_bits: u8) -> Result<Self> {
        if !(1..=32).contains(&key_bits) {
            return Err(IndexError::InvalidConfig(format!(
                "key_bits must be in 1..=32, got {}",
                key_bits
            )));
        }
        let domain_size = 1u64 << key_bits;
        let expected_len = domain_size * ENTRY_SIZE as u64;

        let file = File::open(index_path)?;
        let actual_len = file.metadata()?.len();
        if actual_len != expected_len {
            return Err(IndexError::InvalidFormat(format!(
                "Direct index {} is {} bytes, expected {} for a {}-bit domain",
                index_path.display(),
                actual_len,
                expected_len,
                key_bits
            )));
        }
        let direct = unsafe { Mmap::map(&file) }?;
        #[cfg(unix)]
        direct.advise(memmap2::Advice::Random)?;

        let overflow = Record::decode_all(&std::fs::read(overflow_path)?)?;
        Record::validate_order(&overflow)?;
        let groups = group_overflow(&overflow);

        let engine = Self {
            direct,
            key_bits,
            overflow,
            groups,
        };
        engine.check_groups()?;

        tracing::info!(
            "index loaded: {}-bit domain, {} duplicate keys, {} overflow records",
            key_bits,
            engine.groups.len(),
            engine.overflow.len()
        );
        Ok(engine)
    }

    /// Look up every source position carrying `key`.
    pub fn lookup(&self, key: u32) -> Result<LookupResult> {
        match self.entry(key)? {
            DirectEntry::Absent => Ok(LookupResult::Absent),
            DirectEntry::Unique(seq) => Ok(LookupResult::Unique(seq)),
            DirectEntry::Duplicate => {
                let records = self.overflow_records(key).ok_or_else(|| {
                    IndexError::InvalidFormat(format!(
                        "Key {} is marked duplicate but has no overflow records",
                        key
                    ))
                })?;
                Ok(LookupResult::Duplicates(
                    records.iter().map(|r| r.sequence).collect(),
                ))
            }
        }
    }

    /// Decoded direct index entry for `key`.
    pub fn entry(&self, key: u32) -> Result<DirectEntry> {
        if (key as u64) >= self.domain_size() {
            return Err(IndexError::KeyOutOfDomain {
                key,
                key_bits: self.key_bits,
            });
        }
        let offset = key as usize * ENTRY_SIZE;
        Ok(DirectEntry::decode(read_u32_at(&self.direct, offset)))
    }

    pub fn domain_size(&self) -> u64 {
        1u64 << self.key_bits
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            key_bits: self.key_bits,
            domain_size: self.domain_size(),
            duplicate_keys: self.groups.len(),
            overflow_records: self.overflow.len(),
        }
    }

    fn overflow_records(&self, key: u32) -> Option<&[Record]> {
        self.groups
            .binary_search_by_key(&key, |g| g.key)
            .ok()
            .map(|i| {
                let group = self.groups[i];
                &self.overflow[group.start..group.start + group.len]
            })
    }

    /// Every overflow group must belong to an in-domain key whose direct
    /// entry is the sentinel, and hold at least two records.
    fn check_groups(&self) -> Result<()> {
        for group in &self.groups {
            if group.len < 2 {
                return Err(IndexError::InvalidFormat(format!(
                    "Overflow key {} has {} record(s), expected at least 2",
                    group.key, group.len
                )));
            }
            match self.entry(group.key) {
                Ok(DirectEntry::Duplicate) => {}
                Ok(other) => {
                    return Err(IndexError::InvalidFormat(format!(
                        "Overflow key {} has direct entry {:?}, expected duplicate",
                        group.key, other
                    )));
                }
                Err(IndexError::KeyOutOfDomain { key, .. }) => {
                    return Err(IndexError::InvalidFormat(format!(
                        "Overflow key {} is outside the {}-bit domain",
                        key, self.key_bits
                    )));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// Split an ordered overflow log into per-key runs.
fn group_overflow(records: &[Record]) -> Vec<OverflowGroup> {
    let mut groups: Vec<OverflowGroup> = Vec::new();
    for (i, record) in records.iter().enumerate() {
        match groups.last_mut() {
            Some(group) if group.key == record.key => group.len += 1,
            _ => groups.push(OverflowGroup {
                key: record.key,
                start: i,
                len: 1,
            }),
        }
    }
    groups
}

// ── Tests ──────────────────────────────────────────────────────────
