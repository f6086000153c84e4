//! Source table reader.
//!
//! The source is a raw concatenation of u32 LE keys. It is consumed in
//! whole blocks; a block that cannot be filled ends the stream, so a
//! trailing partial block never reaches the index unless the policy
//! rejects it outright.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::config::{IndexConfig, TrailingBlockPolicy};
use crate::error::{IndexError, Result};
use crate::storage::format::{read_u32_at, Record, DUPLICATE_SENTINEL};

/// Streams `(key, sequence)` records from a source table.
///
/// Sequences start at 1 and increase by one per key in stream order.
pub struct RecordReader<R> {
    inner: R,
    policy: TrailingBlockPolicy,
    block: Vec<u8>,
    /// Valid bytes in `block`.
    filled: usize,
    /// Read position inside `block`.
    pos: usize,
    next_sequence: u64,
    dropped_bytes: usize,
    done: bool,
}

impl RecordReader<BufReader<File>> {
    /// Open the source table named by `config` at `path`.
    pub fn open(path: &Path, config: &IndexConfig) -> Result<Self> {
        config.validate()?;
        let file = File::open(path)?;
        advise_sequential(&file);
        Self::new(
            BufReader::with_capacity(config.block_size.max(8 * 1024), file),
            config.block_size,
            config.trailing_block,
        )
    }
}

impl<R: Read> RecordReader<R> {
    /// Wrap any byte stream. `block_size` must be a positive multiple of 4.
    pub fn new(inner: R, block_size: usize, policy: TrailingBlockPolicy) -> Result<Self> {
        if block_size == 0 || block_size % 4 != 0 {
            return Err(IndexError::InvalidConfig(format!(
                "block_size must be a positive multiple of 4, got {}",
                block_size
            )));
        }
        Ok(Self {
            inner,
            policy,
            block: vec![0u8; block_size],
            filled: 0,
            pos: 0,
            next_sequence: 1,
            dropped_bytes: 0,
            done: false,
        })
    }

    /// Number of records yielded so far.
    pub fn records_read(&self) -> u64 {
        self.next_sequence - 1
    }

    /// Bytes of the trailing partial block that were excluded.
    pub fn dropped_bytes(&self) -> usize {
        self.dropped_bytes
    }

    /// Next record, or None once the last whole block is exhausted.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        if self.pos == self.filled {
            if self.done || !self.fill_block()? {
                return Ok(None);
            }
        }

        if self.next_sequence >= DUPLICATE_SENTINEL as u64 {
            return Err(IndexError::SequenceOverflow(self.next_sequence));
        }

        let key = read_u32_at(&self.block, self.pos);
        let sequence = self.next_sequence as u32;
        self.pos += 4;
        self.next_sequence += 1;
        Ok(Some(Record::new(key, sequence)))
    }

    /// Load the next whole block. Returns false at end of stream.
    fn fill_block(&mut self) -> Result<bool> {
        let mut read = 0;
        while read < self.block.len() {
            match self.inner.read(&mut self.block[read..]) {
                Ok(0) => break,
                Ok(n) => read += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if read == self.block.len() {
            self.filled = read;
            self.pos = 0;
            return Ok(true);
        }

        self.done = true;
        self.filled = 0;
        self.pos = 0;
        if read > 0 {
            self.dropped_bytes = read;
            match self.policy {
                TrailingBlockPolicy::Drop => {
                    tracing::warn!(
                        "source ends with a partial block of {} bytes, excluded from index",
                        read
                    );
                }
                TrailingBlockPolicy::Reject => {
                    return Err(IndexError::TrailingBlock { bytes: read });
                }
            }
        }
        Ok(false)
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Hint the kernel that the source is read front to back once.
#[cfg(target_os = "linux")]
fn advise_sequential(file: &File) {
    use std::os::unix::io::AsRawFd;
    // Advisory only; failure changes nothing about correctness.
    unsafe {
        libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_SEQUENTIAL);
    }
}

#[cfg(not(target_os = "linux"))]
fn advise_sequential(_file: &File) {}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode_keys(keys: &[u32]) -> Vec<u8> {
        keys.iter().flat_map(|k| k.to_le_bytes()).collect()
    }

    fn collect(reader: RecordReader<Cursor<Vec<u8>>>) -> Vec<Record> {
        reader.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_sequences_start_at_one() {
        let reader = RecordReader::new(
            Cursor::new(encode_keys(&[5, 5, 7])),
            4,
            TrailingBlockPolicy::Drop,
        )
        .unwrap();
        let records = collect(reader);
        assert_eq!(
            records,
            vec![Record::new(5, 1), Record::new(5, 2), Record::new(7, 3)]
        );
    }

    #[test]
    fn test_keys_are_little_endian() {
        let reader = RecordReader::new(
            Cursor::new(vec![0x01, 0x02, 0x03, 0x04]),
            4,
            TrailingBlockPolicy::Drop,
        )
        .unwrap();
        let records = collect(reader);
        assert_eq!(records[0].key, 0x0403_0201);
    }

    #[test]
    fn test_empty_source() {
        let mut reader =
            RecordReader::new(Cursor::new(Vec::new()), 16, TrailingBlockPolicy::Reject).unwrap();
        assert!(reader.next_record().unwrap().is_none());
        assert_eq!(reader.records_read(), 0);
        assert_eq!(reader.dropped_bytes(), 0);
    }

    #[test]
    fn test_multiple_whole_blocks() {
        let keys: Vec<u32> = (100..112).collect();
        let reader =
            RecordReader::new(Cursor::new(encode_keys(&keys)), 16, TrailingBlockPolicy::Drop)
                .unwrap();
        let records = collect(reader);
        assert_eq!(records.len(), 12);
        assert_eq!(records[11], Record::new(111, 12));
    }

    #[test]
    fn test_trailing_partial_block_dropped() {
        // Two whole 8-byte blocks plus one key of a third block.
        let mut reader = RecordReader::new(
            Cursor::new(encode_keys(&[1, 2, 3, 4, 5])),
            8,
            TrailingBlockPolicy::Drop,
        )
        .unwrap();
        let mut keys = Vec::new();
        while let Some(record) = reader.next_record().unwrap() {
            keys.push(record.key);
        }
        assert_eq!(keys, vec![1, 2, 3, 4]);
        assert_eq!(reader.records_read(), 4);
        assert_eq!(reader.dropped_bytes(), 4);
    }

    #[test]
    fn test_source_shorter_than_one_block_yields_nothing() {
        let mut reader = RecordReader::new(
            Cursor::new(encode_keys(&[5, 5, 7])),
            4096,
            TrailingBlockPolicy::Drop,
        )
        .unwrap();
        assert!(reader.next_record().unwrap().is_none());
        assert_eq!(reader.dropped_bytes(), 12);
    }

    #[test]
    fn test_ragged_byte_tail_dropped() {
        let mut bytes = encode_keys(&[9]);
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        let mut reader =
            RecordReader::new(Cursor::new(bytes), 4, TrailingBlockPolicy::Drop).unwrap();
        assert_eq!(reader.next_record().unwrap(), Some(Record::new(9, 1)));
        assert!(reader.next_record().unwrap().is_none());
        assert_eq!(reader.dropped_bytes(), 2);
    }

    #[test]
    fn test_trailing_partial_block_rejected() {
        let mut reader = RecordReader::new(
            Cursor::new(encode_keys(&[1, 2, 3])),
            8,
            TrailingBlockPolicy::Reject,
        )
        .unwrap();
        assert_eq!(reader.next_record().unwrap(), Some(Record::new(1, 1)));
        assert_eq!(reader.next_record().unwrap(), Some(Record::new(2, 2)));
        let err = reader.next_record().unwrap_err();
        assert!(matches!(err, IndexError::TrailingBlock { bytes: 4 }));
    }

    #[test]
    fn test_sequence_never_reaches_sentinel() {
        let mut reader = RecordReader::new(
            Cursor::new(encode_keys(&[1, 2])),
            4,
            TrailingBlockPolicy::Drop,
        )
        .unwrap();
        reader.next_sequence = DUPLICATE_SENTINEL as u64 - 1;
        assert_eq!(
            reader.next_record().unwrap(),
            Some(Record::new(1, DUPLICATE_SENTINEL - 1))
        );
        let err = reader.next_record().unwrap_err();
        assert!(matches!(err, IndexError::SequenceOverflow(s) if s == DUPLICATE_SENTINEL as u64));
    }

    #[test]
    fn test_block_size_must_be_positive_multiple_of_four() {
        for block_size in [0, 6] {
            let result = RecordReader::new(
                Cursor::new(vec![1u8; 12]),
                block_size,
                TrailingBlockPolicy::Drop,
            );
            assert!(matches!(result, Err(IndexError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_open_validates_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table");
        std::fs::write(&path, vec![1u8; 12]).unwrap();

        for block_size in [0, 6] {
            let config = IndexConfig::new().block_size(block_size);
            let result = RecordReader::open(&path, &config);
            assert!(matches!(result, Err(IndexError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_open_missing_source_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = RecordReader::open(&dir.path().join("table"), &IndexConfig::default());
        assert!(matches!(result, Err(IndexError::Io(_))));
    }
}
