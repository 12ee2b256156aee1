//! Kafka message types.
//!
//! [`RawMessage`] is exactly what the transport hands over; [`DecodedMessage`]
//! is what dispatch sees after the writer schema has been resolved.

use crate::error::{KafkaTypesError, Result};
use crate::textual::to_avro_json;
use crate::SchemaId;
use apache_avro::types::Value;
use apache_avro::Schema;
use std::sync::Arc;

/// A message as delivered by the broker, before any decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Kafka topic name
    pub topic: String,
    /// Kafka partition number
    pub partition: i32,
    /// Kafka offset within the partition
    pub offset: i64,
    /// Message key (empty when the record had none)
    pub key: Vec<u8>,
    /// Wire-format value
    pub value: Vec<u8>,
    /// Message timestamp in milliseconds since epoch (if available)
    pub timestamp: Option<i64>,
}

impl RawMessage {
    pub fn new(
        topic: impl Into<String>,
        partition: i32,
        offset: i64,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
            key: key.into(),
            value: value.into(),
            timestamp: None,
        }
    }
}

/// A message whose value has been decoded with its writer schema.
///
/// Constructed once per raw message and consumed once by dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMessage {
    pub schema_id: SchemaId,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Message key rendered as UTF-8
    pub key: String,
    /// Decoded Avro value
    pub value: Value,
    /// Writer schema the value was decoded with
    pub schema: Arc<Schema>,
}

impl DecodedMessage {
    /// Render the value in its Avro JSON form under the writer schema.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        to_avro_json(&self.value, &self.schema)
    }

    /// JSON text of the value, as handed to job services.
    pub fn textual(&self) -> Result<String> {
        let json = self.to_json()?;
        serde_json::to_string(&json).map_err(|e| KafkaTypesError::Textual(e.to_string()))
    }
}
