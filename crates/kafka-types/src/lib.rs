//! Shared Kafka message types for seal-runner.
//!
//! This crate holds the data that flows between the consumer, the producer and
//! the job services, plus the schema-registry wire framing both sides agree on.
//!
//! # Wire Format
//!
//! ```text
//! [0x00][schema id: u32 big-endian][Avro binary body]
//! ```
//!
//! # Modules
//!
//! - [`message`] - raw and decoded message representations
//! - [`wire`] - framing and unframing of schema-tagged payloads
//! - [`textual`] - Avro JSON rendering of decoded values
//! - [`error`] - wire-level error types

pub mod error;
pub mod message;
pub mod textual;
pub mod wire;

pub use error::{KafkaTypesError, Result};
pub use message::{DecodedMessage, RawMessage};
pub use textual::to_avro_json;
pub use wire::{frame, unframe, HEADER_LEN, MAGIC_BYTE};

/// Numeric schema identifier issued by the schema registry.
///
/// Immutable once issued; used as the schema cache key.
pub type SchemaId = u32;
