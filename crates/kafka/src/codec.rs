//! Avro codec pipeline.
//!
//! [`Codec`] wraps one parsed schema. The free functions combine the wire
//! framing from `kafka-types` with codecs resolved through a [`SchemaCache`].

use crate::cache::SchemaCache;
use crate::error::{Error, Result};
use crate::registry::SchemaRegistry;
use apache_avro::types::Value;
use apache_avro::{from_avro_datum, to_avro_datum, Schema};
use bytes::Bytes;
use kafka_types::{wire, DecodedMessage, RawMessage, SchemaId};
use std::sync::Arc;

/// A parsed schema able to encode and decode Avro binary bodies.
///
/// Immutable after construction and shared behind `Arc` by the cache.
#[derive(Debug, Clone)]
pub struct Codec {
    schema: Arc<Schema>,
    text: String,
}

impl Codec {
    /// Parse schema text.
    ///
    /// Accepts JSON schema text as well as a bare primitive name such as
    /// `string` or `long`, which is shorthand for its quoted form.
    pub fn parse(text: &str) -> Result<Self> {
        let trimmed = text.trim();

        match Schema::parse_str(trimmed) {
            Ok(schema) => Ok(Self {
                schema: Arc::new(schema),
                text: trimmed.to_string(),
            }),
            Err(e) if is_bare_name(trimmed) => {
                let quoted = format!("\"{trimmed}\"");
                let schema = Schema::parse_str(&quoted)
                    .map_err(|_| Error::BadData(format!("Failed to parse schema: {e}")))?;
                Ok(Self {
                    schema: Arc::new(schema),
                    text: quoted,
                })
            }
            Err(e) => Err(Error::BadData(format!("Failed to parse schema: {e}"))),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Shared handle to the schema, carried by decoded messages.
    pub fn shared_schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    /// Schema text in its JSON form, suitable for registration.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Decode one Avro binary body.
    pub fn decode(&self, body: &[u8]) -> Result<Value> {
        let mut reader = body;
        let value = from_avro_datum(&self.schema, &mut reader, None)
            .map_err(|e| Error::BadData(format!("Failed to decode Avro body: {e}")))?;

        if !reader.is_empty() {
            return Err(Error::BadData(format!(
                "{} trailing bytes after Avro datum",
                reader.len()
            )));
        }

        // A short read inside a datum comes back as Null rather than an error
        if !value.validate(&self.schema) {
            return Err(Error::BadData(format!(
                "Avro body does not match schema {}",
                self.text
            )));
        }

        Ok(value)
    }

    /// Encode one value to an Avro binary body.
    pub fn encode(&self, value: Value) -> Result<Vec<u8>> {
        if !value.validate(&self.schema) {
            return Err(Error::InvalidType(format!(
                "value does not match schema {}",
                self.text
            )));
        }

        to_avro_datum(&self.schema, value)
            .map_err(|e| Error::InvalidType(format!("Failed to encode Avro value: {e}")))
    }

    /// Build a schema-conforming value from textual input.
    ///
    /// JSON text is resolved against the schema; anything that is not JSON is
    /// taken as a bare string.
    pub fn value_from_json(&self, text: &[u8]) -> Result<Value> {
        let value = match serde_json::from_slice::<serde_json::Value>(text) {
            Ok(json) => Value::from(json),
            Err(_) => Value::String(String::from_utf8_lossy(text).into_owned()),
        };

        value.resolve(&self.schema).map_err(|e| {
            Error::InvalidType(format!("value does not match schema {}: {e}", self.text))
        })
    }
}

fn is_bare_name(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Split a wire payload and decode its body with the writer schema.
pub async fn decode<R: SchemaRegistry>(
    cache: &SchemaCache<R>,
    data: &[u8],
) -> Result<(SchemaId, Value)> {
    let (schema_id, body) = wire::unframe(data)?;
    let codec = cache.get_schema(schema_id).await?;
    let value = codec.decode(body)?;
    Ok((schema_id, value))
}

/// Encode a value with the chosen schema and prefix the wire header.
pub async fn encode<R: SchemaRegistry>(
    cache: &SchemaCache<R>,
    schema_id: SchemaId,
    value: Value,
) -> Result<Bytes> {
    let codec = cache.get_schema(schema_id).await?;
    let body = codec.encode(value)?;
    Ok(wire::frame(schema_id, &body))
}

/// Decode a broker message into the form handed to dispatch.
pub async fn decode_message<R: SchemaRegistry>(
    cache: &SchemaCache<R>,
    raw: &RawMessage,
) -> Result<DecodedMessage> {
    let (schema_id, body) = wire::unframe(&raw.value)?;
    let codec = cache.get_schema(schema_id).await?;
    let value = codec.decode(body)?;

    Ok(DecodedMessage {
        schema_id,
        topic: raw.topic.clone(),
        partition: raw.partition,
        offset: raw.offset,
        key: String::from_utf8_lossy(&raw.key).into_owned(),
        value,
        schema: codec.shared_schema(),
    })
}
