//! Index configuration.
//!
//! Read once from `qtable.json` in the data directory. When the file is
//! absent every field takes its default, which reproduces the canonical
//! layout:
//!
//! ```text
//! data/
//! +-- table            # source: raw u32 LE keys
//! +-- biliquery.bin    # direct index: one u32 LE entry per key
//! +-- duplicate.bin    # overflow: (key u32 LE, sequence u32 LE) records
//! +-- qtable.json      # optional IndexConfig
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

/// Config file name inside the data directory.
pub const CONFIG_FILE: &str = "qtable.json";

/// What the reader does with a source whose length is not a whole number
/// of blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailingBlockPolicy {
    /// Exclude the partial block from the index and log a warning.
    #[default]
    Drop,
    /// Abort the build with `IndexError::TrailingBlock`.
    Reject,
}

/// Build and lookup configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Source table, relative to the data directory.
    pub source_file: PathBuf,
    /// Direct index file, relative to the data directory.
    pub index_file: PathBuf,
    /// Overflow file, relative to the data directory.
    pub overflow_file: PathBuf,
    /// Source read granularity in bytes. Positive multiple of 4.
    pub block_size: usize,
    /// Width of the key domain. The direct index holds `2^key_bits` entries.
    pub key_bits: u8,
    /// Handling of a trailing partial block in the source.
    pub trailing_block: TrailingBlockPolicy,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            source_file: PathBuf::from("table"),
            index_file: PathBuf::from("biliquery.bin"),
            overflow_file: PathBuf::from("duplicate.bin"),
            block_size: 4096,
            key_bits: 32,
            trailing_block: TrailingBlockPolicy::Drop,
        }
    }
}

impl IndexConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn block_size(mut self, bytes: usize) -> Self {
        self.block_size = bytes;
        self
    }

    pub fn key_bits(mut self, bits: u8) -> Self {
        self.key_bits = bits;
        self
    }

    pub fn trailing_block(mut self, policy: TrailingBlockPolicy) -> Self {
        self.trailing_block = policy;
        self
    }

    /// Read config from the data directory. Returns None if the file doesn't exist.
    pub fn read_from(data_dir: &Path) -> Result<Option<Self>> {
        let path = data_dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(Some(config))
    }

    /// Read config from the data directory, falling back to defaults.
    pub fn load(data_dir: &Path) -> Result<Self> {
        Ok(Self::read_from(data_dir)?.unwrap_or_default())
    }

    /// Write config to the data directory.
    pub fn write_to(&self, data_dir: &Path) -> Result<()> {
        let path = data_dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.block_size % 4 != 0 {
            return Err(IndexError::InvalidConfig(format!(
                "block_size must be a positive multiple of 4, got {}",
                self.block_size
            )));
        }
        if !(1..=32).contains(&self.key_bits) {
            return Err(IndexError::InvalidConfig(format!(
                "key_bits must be in 1..=32, got {}",
                self.key_bits
            )));
        }
        Ok(())
    }

    /// Number of keys in the domain, `2^key_bits`.
    pub fn domain_size(&self) -> u64 {
        1u64 << self.key_bits
    }

    /// Whether `key` addresses an entry of the direct index.
    pub fn contains_key(&self, key: u32) -> bool {
        (key as u64) < self.domain_size()
    }

    /// Resolved paths of the three files under `data_dir`.
    pub fn paths(&self, data_dir: &Path) -> IndexPaths {
        IndexPaths {
            source: data_dir.join(&self.source_file),
            index: data_dir.join(&self.index_file),
            overflow: data_dir.join(&self.overflow_file),
        }
    }
}

/// Absolute locations of the source table and both index files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPaths {
    pub source: PathBuf,
    pub index: PathBuf,
    pub overflow: PathBuf,
}

// ── Tests ──────────────────────────────────────────────────────────
