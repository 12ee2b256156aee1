//! One-shot message publishing.
//!
//! CLI command: `kafka producer <KEY> <VALUE> [--topic test] [--schema string]`

use crate::config::{producer_config, ConfigFile};
use crate::ProduceArgs;
use anyhow::Context;
use seal_runner_kafka::SchemaRegistry;
use seal_runner_kafka_producer::{AvroProducer, MessageSink};
use tracing::info;

pub async fn run(args: &ProduceArgs, file: &ConfigFile) -> anyhow::Result<()> {
    let config = producer_config(&args.kafka, file, args.message_timeout_ms);
    info!("Brokers: {}", config.brokers);

    let producer = AvroProducer::connect(&config).context("Failed to create Kafka producer")?;
    publish(&producer, args).await
}

/// Publish the message described by `args`, then flush and close the
/// producer.
pub async fn publish<S, R>(producer: &AvroProducer<S, R>, args: &ProduceArgs) -> anyhow::Result<()>
where
    S: MessageSink,
    R: SchemaRegistry,
{
    producer
        .publish(&args.topic, &args.schema, &args.key, args.value.as_bytes())
        .await
        .with_context(|| format!("Failed to publish to topic '{}'", args.topic))?;

    producer
        .close()
        .await
        .context("Failed to flush producer")?;

    Ok(())
}
