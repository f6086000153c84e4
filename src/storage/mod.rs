//! Direct-addressed key index.
//!
//! Build side:
//! - `reader` -- streams `(key, sequence)` records from the source table
//! - `key_index` -- build-time key -> occurrences map
//! - `writer` -- direct index and overflow log writers
//! - `build` -- build gate and the construction pipeline
//!
//! Serve side:
//! - `lookup` -- read-only O(1) lookup over the published files
//!
//! Shared:
//! - `format` -- entry encoding and the overflow record codec

pub mod build;
pub mod format;
pub mod key_index;
pub mod lookup;
pub mod reader;
pub mod writer;

pub use build::{build_index, ensure_index, BuildDecision, BuildGate, BuildOutcome, BuildReport};
pub use format::{DirectEntry, Record, ABSENT, DUPLICATE_SENTINEL};
pub use key_index::KeyIndexBuilder;
pub use lookup::{EngineStats, LookupEngine, LookupResult};
pub use reader::RecordReader;
pub use writer::{DirectAddressWriter, DrainStats, OverflowWriter};
