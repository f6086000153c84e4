//! Error types for index construction and lookup

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Source has a trailing partial block of {bytes} bytes")]
    TrailingBlock { bytes: usize },

    #[error("Sequence {0} collides with the duplicate sentinel")]
    SequenceOverflow(u64),

    #[error("Key {key} is outside the {key_bits}-bit key domain")]
    KeyOutOfDomain { key: u32, key_bits: u8 },
}

impl IndexError {
    /// Get error code for wire protocol
    pub fn code(&self) -> &'static str {
        match self {
            IndexError::InvalidFormat(_) => "INVALID_FORMAT",
            IndexError::InvalidConfig(_) => "INVALID_CONFIG",
            IndexError::TrailingBlock { .. } => "TRAILING_BLOCK",
            IndexError::SequenceOverflow(_) => "SEQUENCE_OVERFLOW",
            IndexError::KeyOutOfDomain { .. } => "KEY_OUT_OF_DOMAIN",
            _ => "INTERNAL_ERROR",
        }
    }
}
