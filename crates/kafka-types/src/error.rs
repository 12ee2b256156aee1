//! Error types for kafka-types crate.

use thiserror::Error;

/// Errors that can occur while framing or unframing wire payloads.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KafkaTypesError {
    #[error("Payload too short for schema header: {len} bytes, need at least 5")]
    TooShort { len: usize },

    #[error("Invalid magic byte: expected 0x00, got 0x{0:02x}")]
    InvalidMagicByte(u8),

    #[error("Value cannot be rendered as JSON: {0}")]
    Textual(String),
}

/// Result type alias for kafka-types operations.
pub type Result<T> = std::result::Result<T, KafkaTypesError>;
