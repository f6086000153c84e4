//! Property test: every source record is accounted for exactly once.
//!
//! For arbitrary key streams over a small domain, the unique entries of
//! the direct index plus the overflow records must equal the number of
//! records read, and each key's lookup must return exactly the positions
//! it occurred at.

use std::collections::BTreeMap;

use proptest::prelude::*;
use qtable::storage::DUPLICATE_SENTINEL;
use qtable::{ensure_index, BuildOutcome, IndexConfig, LookupEngine, LookupResult};
use tempfile::TempDir;

const KEY_BITS: u8 = 6;

fn expected_positions(keys: &[u32]) -> BTreeMap<u32, Vec<u32>> {
    let mut positions: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for (i, &key) in keys.iter().enumerate() {
        positions.entry(key).or_default().push(i as u32 + 1);
    }
    positions
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn records_conserved(keys in prop::collection::vec(0u32..(1 << KEY_BITS), 0..200)) {
        let dir = TempDir::new().unwrap();
        let config = IndexConfig::new().key_bits(KEY_BITS).block_size(4);
        let bytes: Vec<u8> = keys.iter().flat_map(|k| k.to_le_bytes()).collect();
        std::fs::write(dir.path().join("table"), bytes).unwrap();

        let report = match ensure_index(dir.path(), &config).unwrap() {
            BuildOutcome::Built(report) => report,
            BuildOutcome::Skipped => panic!("fresh directory must build"),
        };
        prop_assert_eq!(report.records, keys.len() as u64);
        prop_assert_eq!(report.unique_keys + report.overflow_records, keys.len() as u64);

        let direct = std::fs::read(dir.path().join("biliquery.bin")).unwrap();
        let entries: Vec<u32> = direct
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        prop_assert_eq!(entries.len(), 1usize << KEY_BITS);

        let unique = entries.iter().filter(|&&e| e != 0 && e != DUPLICATE_SENTINEL).count() as u64;
        let overflow_len = std::fs::metadata(dir.path().join("duplicate.bin")).unwrap().len() / 8;
        prop_assert_eq!(unique + overflow_len, keys.len() as u64);

        let expected = expected_positions(&keys);
        let engine = LookupEngine::open(dir.path(), &config).unwrap();
        for key in 0..(1u32 << KEY_BITS) {
            let want = match expected.get(&key).map(Vec::as_slice) {
                None => LookupResult::Absent,
                Some([seq]) => LookupResult::Unique(*seq),
                Some(seqs) => LookupResult::Duplicates(seqs.to_vec()),
            };
            prop_assert_eq!(engine.lookup(key).unwrap(), want);
        }
    }
}
