//! Kafka producer library for seal-runner
//!
//! Publishes Avro values in the schema-registry wire format so that the
//! seal-runner consumer (or any registry-aware consumer) can decode them.
//!
//! ## Features
//!
//! - **Subject registration**: schemas are registered under `<topic>-value` and cached by subject
//! - **Textual values**: JSON text, or a bare string for string schemas, resolved against the schema
//! - **Pluggable sink**: [`KafkaSink`] for real brokers, any [`MessageSink`] for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use seal_runner_kafka_producer::{AvroProducer, ProducerConfig};
//!
//! #[tokio::main]
//! async fn main() -> seal_runner_kafka::Result<()> {
//!     let producer = AvroProducer::connect(&ProducerConfig::default())?;
//!
//!     producer.publish("test", "string", "key-1", b"hello").await?;
//!     producer.close().await
//! }
//! ```

use apache_avro::types::Value;
use async_trait::async_trait;
use kafka_types::{frame, SchemaId};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use seal_runner_kafka::{codec, Error, HttpSchemaRegistry, Result, SchemaCache, SchemaRegistry};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, info_span, Instrument, Span};

/// Configuration for the Avro producer
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Kafka brokers (comma-separated list)
    pub brokers: String,
    /// Schema registry base URLs, tried in order
    pub schema_registries: Vec<String>,
    /// Delivery timeout per message in milliseconds
    pub message_timeout_ms: u64,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            schema_registries: vec!["http://localhost:8081".to_string()],
            message_timeout_ms: 5000,
        }
    }
}

/// Destination for framed payloads.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Deliver one record, returning once the broker acknowledged it.
    async fn send(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<()>;

    /// Wait for every outstanding delivery.
    async fn flush(&self) -> Result<()>;
}

/// [`MessageSink`] backed by an rdkafka `FutureProducer`
pub struct KafkaSink {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaSink {
    pub fn new(brokers: &str, message_timeout_ms: u64) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", message_timeout_ms.to_string())
            .create()
            .map_err(|e| Error::InvalidConfig(format!("Failed to create Kafka producer: {e}")))?;

        Ok(Self {
            producer,
            timeout: Duration::from_millis(message_timeout_ms),
        })
    }
}

fn delivery_error(topic: &str, err: KafkaError) -> Error {
    match err {
        KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut) => {
            Error::Timeout(format!("delivery to topic {topic} timed out"))
        }
        KafkaError::MessageProduction(
            RDKafkaErrorCode::MessageSizeTooLarge | RDKafkaErrorCode::InvalidMessage,
        ) => Error::BadData(format!("topic {topic} rejected the message: {err}")),
        other => Error::Unavailable(format!("Failed to send message to topic {topic}: {other}")),
    }
}

#[async_trait]
impl MessageSink for KafkaSink {
    async fn send(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<()> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map_err(|(err, _)| delivery_error(topic, err))?;

        debug!(topic, partition, offset, "Message delivered");
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        self.producer.flush(Timeout::After(self.timeout)).map_err(|e| match e {
            KafkaError::Flush(RDKafkaErrorCode::OperationTimedOut) => {
                Error::Timeout("timed out flushing producer".to_string())
            }
            other => Error::Unavailable(format!("Failed to flush producer: {other}")),
        })
    }
}

/// Producer encoding values with registry schemas before sending them.
pub struct AvroProducer<S = KafkaSink, R = HttpSchemaRegistry> {
    sink: S,
    cache: Arc<SchemaCache<R>>,
    closed: AtomicBool,
    span: Span,
}

impl AvroProducer<KafkaSink, HttpSchemaRegistry> {
    /// Build a producer for real brokers and schema registries.
    pub fn connect(config: &ProducerConfig) -> Result<Self> {
        let registry = HttpSchemaRegistry::new(config.schema_registries.clone())?;
        let sink = KafkaSink::new(&config.brokers, config.message_timeout_ms)?;
        Ok(Self::new(sink, Arc::new(SchemaCache::new(registry))))
    }
}

impl<S: MessageSink, R: SchemaRegistry> AvroProducer<S, R> {
    pub fn new(sink: S, cache: Arc<SchemaCache<R>>) -> Self {
        Self {
            sink,
            cache,
            closed: AtomicBool::new(false),
            span: info_span!("producer"),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn cache(&self) -> &SchemaCache<R> {
        &self.cache
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed("producer is closed".to_string()));
        }
        Ok(())
    }

    /// Publish a textual value with the schema registered under
    /// `<topic>-value`.
    ///
    /// `message_type` is Avro schema text, or a bare primitive name such as
    /// `string`. `value` is JSON text, or any text for string schemas.
    pub async fn publish(
        &self,
        topic: &str,
        message_type: &str,
        key: &str,
        value: &[u8],
    ) -> Result<()> {
        self.ensure_open()?;

        async {
            let subject = format!("{topic}-value");
            let (schema_id, codec) = self.cache.register(&subject, message_type).await?;

            let value = codec.value_from_json(value)?;
            let payload = frame(schema_id, &codec.encode(value)?);

            self.sink.send(topic, key.as_bytes(), &payload).await?;
            info!(topic, key, schema_id, "Message published");
            Ok::<(), Error>(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Publish an already structured value with an explicitly chosen schema
    /// id.
    pub async fn publish_value(
        &self,
        topic: &str,
        schema_id: SchemaId,
        key: &str,
        value: Value,
    ) -> Result<()> {
        self.ensure_open()?;

        async {
            let payload = codec::encode(&self.cache, schema_id, value).await?;
            self.sink.send(topic, key.as_bytes(), &payload).await?;
            debug!(topic, key, schema_id, "Message published");
            Ok::<(), Error>(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Flush outstanding deliveries. Publishing afterwards fails with
    /// [`Error::Closed`].
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::Closed("producer already closed".to_string()));
        }
        self.sink.flush().instrument(self.span.clone()).await
    }
}
