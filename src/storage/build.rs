//! Index construction pipeline and the gate in front of it.
//!
//! ```text
//! BuildGate::decide ──Skip──────────────────────────────┐
//!        │                                               │
//!      Build                                             ▼
//!        │                                            serving
//!   RecordReader ─► KeyIndexBuilder ─► DirectAddressWriter ─► biliquery.bin
//!                                          └─► OverflowWriter ─► duplicate.bin
//! ```
//!
//! Everything here is single-threaded and synchronous. Both outputs are
//! written to `*.tmp` siblings and renamed into place once synced, overflow
//! first and the direct index last, so the gate only ever sees a direct
//! index whose overflow log is already complete.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::{IndexConfig, IndexPaths};
use crate::error::{IndexError, Result};
use crate::storage::key_index::KeyIndexBuilder;
use crate::storage::reader::RecordReader;
use crate::storage::writer::{DirectAddressWriter, OverflowWriter};

/// Output buffer size for both index files.
const WRITE_BUFFER_SIZE: usize = 1 << 20;

// ── Build Gate ─────────────────────────────────────────────────────

/// Whether the construction pipeline has to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildDecision {
    /// No direct index at the canonical location.
    Build,
    /// A direct index exists and is served as-is.
    Skip,
}

/// Idempotency check in front of the pipeline.
///
/// Presence of the direct index file is the only signal. Its contents are
/// not inspected, so an index damaged after publication is served until
/// an operator removes it.
pub struct BuildGate;

impl BuildGate {
    /// Fails if presence cannot be determined, so an unreadable index is
    /// never rebuilt over.
    pub fn decide(index_path: &Path) -> Result<BuildDecision> {
        if index_path.try_exists()? {
            Ok(BuildDecision::Skip)
        } else {
            Ok(BuildDecision::Build)
        }
    }
}

// ── Build Report ───────────────────────────────────────────────────

/// Summary of a completed build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// Records read from the source (== highest sequence assigned).
    pub records: u64,
    /// Keys written as a unique sequence.
    pub unique_keys: u64,
    /// Keys written as the duplicate sentinel.
    pub duplicate_keys: u64,
    /// Records appended to the overflow log.
    pub overflow_records: u64,
    /// Bytes of trailing partial block excluded from the index.
    pub dropped_bytes: usize,
    /// Entries in the direct index.
    pub domain_size: u64,
    pub elapsed: Duration,
}

/// What the top-level driver did about the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Built(BuildReport),
    Skipped,
}

/// Run the gate and, if it says so, the full pipeline.
///
/// On return both index files are complete and closed.
pub fn ensure_index(data_dir: &Path, config: &IndexConfig) -> Result<BuildOutcome> {
    let paths = config.paths(data_dir);
    match BuildGate::decide(&paths.index)? {
        BuildDecision::Skip => {
            tracing::info!("index found at {}, skipping build", paths.index.display());
            Ok(BuildOutcome::Skipped)
        }
        BuildDecision::Build => {
            tracing::warn!("index not found at {}, recreating...", paths.index.display());
            build_index(&paths, config).map(BuildOutcome::Built)
        }
    }
}

// ── Pipeline ───────────────────────────────────────────────────────

/// Build both index files from the source table, unconditionally.
///
/// Existing outputs are replaced. Callers that want idempotence go through
/// `ensure_index`.
pub fn build_index(paths: &IndexPaths, config: &IndexConfig) -> Result<BuildReport> {
    config.validate()?;
    let start = Instant::now();

    let index_tmp = tmp_path(&paths.index);
    let overflow_tmp = tmp_path(&paths.overflow);

    let result = build_to(paths, &index_tmp, &overflow_tmp, config, start);
    if result.is_err() {
        let _ = fs::remove_file(&index_tmp);
        let _ = fs::remove_file(&overflow_tmp);
    }
    result
}

fn build_to(
    paths: &IndexPaths,
    index_tmp: &Path,
    overflow_tmp: &Path,
    config: &IndexConfig,
    start: Instant,
) -> Result<BuildReport> {
    let (key_index, records, dropped_bytes) = load_source(&paths.source, config)?;

    let direct = DirectAddressWriter::new(
        BufWriter::with_capacity(WRITE_BUFFER_SIZE, File::create(index_tmp)?),
        config.domain_size(),
    );
    let mut overflow = OverflowWriter::new(BufWriter::with_capacity(
        WRITE_BUFFER_SIZE,
        File::create(overflow_tmp)?,
    ));

    let (direct, stats) = direct.drain(&key_index, &mut overflow)?;
    drop(key_index);

    let duplicate_keys = overflow.keys_written();
    let overflow_records = overflow.records_written();
    sync_and_close(overflow.finish()?)?;
    sync_and_close(direct)?;

    fs::rename(overflow_tmp, &paths.overflow)?;
    fs::rename(index_tmp, &paths.index)?;

    let report = BuildReport {
        records,
        unique_keys: stats.unique_keys,
        duplicate_keys,
        overflow_records,
        dropped_bytes,
        domain_size: stats.entries_written,
        elapsed: start.elapsed(),
    };
    tracing::info!(
        "index created: {} records, {} unique keys, {} duplicate keys ({} overflow records) in {:?}",
        report.records,
        report.unique_keys,
        report.duplicate_keys,
        report.overflow_records,
        report.elapsed
    );
    Ok(report)
}

/// Read the whole source into a key index.
///
/// Returns the index, the records read, and the trailing bytes dropped.
fn load_source(source: &Path, config: &IndexConfig) -> Result<(KeyIndexBuilder, u64, usize)> {
    let mut reader = RecordReader::open(source, config)?;
    let mut key_index = KeyIndexBuilder::new();

    while let Some(record) = reader.next_record()? {
        if !config.contains_key(record.key) {
            return Err(IndexError::KeyOutOfDomain {
                key: record.key,
                key_bits: config.key_bits,
            });
        }
        key_index.insert_record(record);
    }

    let records = reader.records_read();
    tracing::info!("import completed: {} items", records);
    Ok((key_index, records, reader.dropped_bytes()))
}

fn sync_and_close(writer: BufWriter<File>) -> Result<()> {
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

// ── Tests ──────────────────────────────────────────────────────────
