//! Kafka consumer library for seal-runner: consumes messages whose values are
//! Avro-encoded in the schema-registry wire format and hands them to a
//! dispatcher.
//!
//! Features:
//!
//! - Schema Cache: resolve numeric schema ids into reusable codecs, fetching each id from the registry once
//! - Codec Pipeline: split the wire header, decode with the writer schema, and encode the other way round
//! - Consumer Groups: session and claim handling that survives rebalances, with graceful shutdown
//! - Error Policies: skip or stop on a failing message, bounded or unbounded rejoin retries

/// Schema id to codec cache backed by a registry
pub mod cache;

/// Avro encode/decode over the wire format
pub mod codec;

/// Runner driving a consumer group and dispatching decoded messages
///
/// Created from a [`ConsumerConfig`] and a [`Dispatch`] implementation.
pub mod consumer;
pub mod error;

/// Session, claim and handler contract between the runner and the transport
pub mod group;
pub mod registry;

/// In-memory registry and consumer group for tests
pub mod testing;
pub mod transport;

// Re-export main types for easy access
pub use cache::SchemaCache;
pub use codec::{decode, decode_message, encode, Codec};
pub use consumer::{AvroConsumer, ConsumerConfig, Dispatch, ErrorPolicy, RetryPolicy};
pub use error::{Error, Result};
pub use group::{run_session, Claim, ConsumerGroup, GroupHandler, OffsetMarker, Session};
pub use kafka_types::{DecodedMessage, RawMessage, SchemaId};
pub use registry::{HttpSchemaRegistry, SchemaRegistry};
pub use transport::KafkaConsumerGroup;
