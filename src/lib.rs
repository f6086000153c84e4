//! qtable -- direct-addressed lookup index over the 32-bit key space.
//!
//! Builds, once, a disk-resident array with one entry per possible key
//! that answers "which source positions carry this key?" with a single
//! read, plus an overflow log for keys that occur more than once. The
//! published files are immutable and served read-only.

pub mod config;
pub mod error;
pub mod storage;

pub use config::{IndexConfig, IndexPaths, TrailingBlockPolicy};
pub use error::{IndexError, Result};
pub use storage::{
    ensure_index, BuildDecision, BuildGate, BuildOutcome, BuildReport, LookupEngine, LookupResult,
};
