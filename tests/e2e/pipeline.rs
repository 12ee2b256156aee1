//! Producer → consumer runner → services
//!
//! Test flow:
//! 1. Publish vehicles (string schema) and trips (record schema) through the
//!    Avro producer into a capturing sink
//! 2. Play the captured records back as one consumer group session
//! 3. Verify each topic's messages ran in its routed service and every
//!    offset was marked

use async_trait::async_trait;
use clap::Parser;
use kafka_types::RawMessage;
use seal_runner::commands::produce;
use seal_runner::{ConfigFile, ProduceArgs, ServeArgs, ServeSettings};
use seal_runner_kafka::testing::{MemoryConsumerGroup, MemoryRegistry, ScriptedSession, SessionEnd};
use seal_runner_kafka::{AvroConsumer, Error, Result, SchemaCache};
use seal_runner_kafka_producer::{AvroProducer, MessageSink};
use seal_runner_services::{CarsService, Dispatcher, RoutesService, ServiceRegistry};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const ROUTE_SCHEMA: &str = r#"{
    "type": "record",
    "name": "Route",
    "fields": [
        {"name": "from", "type": "string"},
        {"name": "to", "type": "string"},
        {"name": "stops", "type": {"type": "array", "items": "string"}}
    ]
}"#;

/// Keeps every published record in order.
#[derive(Default)]
struct CapturingSink {
    sent: Mutex<Vec<(String, Vec<u8>, Vec<u8>)>>,
}

impl CapturingSink {
    /// Records of `topic` as a single partition, offsets counting from 0.
    fn partition(&self, topic: &str) -> Vec<RawMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| t == topic)
            .enumerate()
            .map(|(offset, (t, key, payload))| {
                RawMessage::new(t.as_str(), 0, offset as i64, key.clone(), payload.clone())
            })
            .collect()
    }
}

#[async_trait]
impl MessageSink for CapturingSink {
    async fn send(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((topic.to_string(), key.to_vec(), payload.to_vec()));
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .expect("test timed out")
}

fn serve_settings(flags: &[&str]) -> ServeSettings {
    let args =
        ServeArgs::try_parse_from(std::iter::once("serve").chain(flags.iter().copied())).unwrap();
    ServeSettings::resolve(&args, &ConfigFile::default()).unwrap()
}

#[tokio::test]
async fn test_published_messages_run_in_routed_services() {
    tracing_subscriber::fmt()
        .with_env_filter("seal_runner=debug,seal_runner_kafka=debug")
        .try_init()
        .ok();

    let registry = Arc::new(MemoryRegistry::new());

    // Step 1: publish
    let producer = AvroProducer::new(
        CapturingSink::default(),
        Arc::new(SchemaCache::new(registry.clone())),
    );
    producer
        .publish("vehicles", "string", "car-1", b"volvo")
        .await
        .unwrap();
    producer
        .publish("vehicles", "string", "car-2", b"saab")
        .await
        .unwrap();
    producer
        .publish(
            "trips",
            ROUTE_SCHEMA,
            "trip-1",
            br#"{"from":"Oslo","to":"Bergen","stops":["Voss"]}"#,
        )
        .await
        .unwrap();

    let args =
        ProduceArgs::try_parse_from(["producer", "car-3", "tesla", "--topic", "vehicles"]).unwrap();
    produce::publish(&producer, &args).await.unwrap();

    assert!(matches!(
        producer.publish("vehicles", "string", "car-4", b"late").await,
        Err(Error::Closed(_))
    ));
    assert_eq!(registry.registration_count(), 2);

    // Step 2: consume
    let settings = serve_settings(&[
        "--topics",
        "vehicles,trips",
        "--route",
        "vehicles=cars",
        "--route",
        "trips=routes",
    ]);

    let cars = Arc::new(CarsService::new(Duration::from_millis(1)));
    let routes = Arc::new(RoutesService::new());
    let services = ServiceRegistry::builder()
        .register(cars.clone())
        .register(routes.clone())
        .build()
        .unwrap();
    let dispatcher = Dispatcher::new(
        Arc::new(services),
        settings.routes.clone(),
        settings.job_timeout,
    )
    .unwrap();

    let sink = producer.sink();
    let group = MemoryConsumerGroup::new(vec![ScriptedSession::new(SessionEnd::Hold)
        .partition("vehicles", 0, sink.partition("vehicles"))
        .partition("trips", 0, sink.partition("trips"))]);
    let marker = group.marker();

    let consumer = AvroConsumer::new(
        group,
        Arc::new(SchemaCache::new(registry.clone())),
        Arc::new(dispatcher),
        &settings.consumer,
    );
    let shutdown = CancellationToken::new();

    let driver = async {
        marker.wait_for(4).await;
        shutdown.cancel();
    };
    let (result, ()) = within(async { tokio::join!(consumer.run(shutdown.clone()), driver) }).await;

    // Step 3: verify
    result.unwrap();
    assert_eq!(cars.completed_jobs(), 3);
    assert_eq!(routes.completed_jobs(), 1);
    assert_eq!(marker.offsets("vehicles", 0), vec![0, 1, 2]);
    assert_eq!(marker.offsets("trips", 0), vec![0]);
    assert_eq!(consumer.group().close_count(), 1);

    // One fetch per schema id, however many messages used it
    assert_eq!(registry.fetch_count(), 2);
    assert_eq!(consumer.cache().len().await, 2);
}

#[tokio::test]
async fn test_unrouted_topic_is_skipped_and_marked() {
    let registry = Arc::new(MemoryRegistry::new());
    let producer = AvroProducer::new(
        CapturingSink::default(),
        Arc::new(SchemaCache::new(registry.clone())),
    );
    producer
        .publish("orphans", "string", "k", b"nobody")
        .await
        .unwrap();
    producer
        .publish("test", "string", "k", b"somebody")
        .await
        .unwrap();

    let settings = serve_settings(&["--topics", "orphans,test"]);
    let cars = Arc::new(CarsService::new(Duration::ZERO));
    let services = ServiceRegistry::builder()
        .register(cars.clone())
        .build()
        .unwrap();
    let dispatcher = Dispatcher::new(Arc::new(services), settings.routes.clone(), None).unwrap();

    let sink = producer.sink();
    let group = MemoryConsumerGroup::new(vec![ScriptedSession::new(SessionEnd::Hold)
        .partition("orphans", 0, sink.partition("orphans"))
        .partition("test", 0, sink.partition("test"))]);
    let marker = group.marker();

    let consumer = AvroConsumer::new(
        group,
        Arc::new(SchemaCache::new(registry)),
        Arc::new(dispatcher),
        &settings.consumer,
    );
    let shutdown = CancellationToken::new();

    let driver = async {
        marker.wait_for(2).await;
        shutdown.cancel();
    };
    let (result, ()) = within(async { tokio::join!(consumer.run(shutdown.clone()), driver) }).await;

    result.unwrap();
    assert_eq!(marker.offsets("orphans", 0), vec![0]);
    assert_eq!(marker.offsets("test", 0), vec![0]);
    assert_eq!(cars.completed_jobs(), 1);
}
