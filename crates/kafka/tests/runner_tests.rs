//! Runner behavior against the in-memory consumer group.

use apache_avro::types::Value;
use async_trait::async_trait;
use seal_runner_kafka::testing::{
    MemoryConsumerGroup, MemoryRegistry, RecordingMarker, ScriptedSession, SessionEnd,
};
use seal_runner_kafka::{
    AvroConsumer, Codec, ConsumerConfig, DecodedMessage, Dispatch, Error, ErrorPolicy, RawMessage,
    Result, RetryPolicy, SchemaCache,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SCHEMA_ID: u32 = 7;
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Fixtures
// =============================================================================

/// Initialize logging for tests
fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "seal_runner_kafka=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

fn message(partition: i32, offset: i64, text: &str) -> RawMessage {
    let codec = Codec::parse("string").unwrap();
    let body = codec.encode(Value::String(text.to_string())).unwrap();
    let value = kafka_types::frame(SCHEMA_ID, &body);
    RawMessage::new("test", partition, offset, format!("k{offset}"), value.to_vec())
}

fn messages(partition: i32, offsets: std::ops::Range<i64>) -> Vec<RawMessage> {
    offsets
        .map(|offset| message(partition, offset, &format!("m{offset}")))
        .collect()
}

fn corrupt(partition: i32, offset: i64) -> RawMessage {
    RawMessage::new("test", partition, offset, "bad", vec![0x00, 0x00])
}

fn config(on_error: ErrorPolicy, max_retries: Option<u32>) -> ConsumerConfig {
    ConsumerConfig {
        on_error,
        retry: RetryPolicy {
            max_retries,
            backoff: Duration::from_millis(5),
        },
        ..Default::default()
    }
}

fn cache() -> Arc<SchemaCache<MemoryRegistry>> {
    Arc::new(SchemaCache::new(
        MemoryRegistry::new().with_schema(SCHEMA_ID, "\"string\""),
    ))
}

/// Records every dispatched message and checks it was not marked yet.
struct RecordingDispatch {
    marker: Arc<RecordingMarker>,
    dispatched: Mutex<Vec<(i32, i64, String)>>,
    marked_early: AtomicBool,
    fail_once: Mutex<HashSet<i64>>,
    block_at: Option<(i64, Arc<Notify>, Arc<Notify>)>,
}

impl RecordingDispatch {
    fn new(marker: Arc<RecordingMarker>) -> Self {
        Self {
            marker,
            dispatched: Mutex::new(Vec::new()),
            marked_early: AtomicBool::new(false),
            fail_once: Mutex::new(HashSet::new()),
            block_at: None,
        }
    }

    fn failing_once_at(self, offset: i64) -> Self {
        self.fail_once.lock().unwrap().insert(offset);
        self
    }

    /// Announce on `started` when `offset` is dispatched, then wait for
    /// `release` before returning.
    fn blocking_at(mut self, offset: i64, started: Arc<Notify>, release: Arc<Notify>) -> Self {
        self.block_at = Some((offset, started, release));
        self
    }

    fn offsets(&self, partition: i32) -> Vec<i64> {
        self.dispatched
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _, _)| *p == partition)
            .map(|(_, offset, _)| *offset)
            .collect()
    }
}

#[async_trait]
impl Dispatch for RecordingDispatch {
    async fn dispatch(&self, message: &DecodedMessage) -> Result<()> {
        if self
            .marker
            .offsets(&message.topic, message.partition)
            .contains(&message.offset)
        {
            self.marked_early.store(true, Ordering::SeqCst);
        }

        self.dispatched.lock().unwrap().push((
            message.partition,
            message.offset,
            message.textual().unwrap(),
        ));

        if let Some((offset, started, release)) = &self.block_at {
            if *offset == message.offset {
                started.notify_one();
                release.notified().await;
            }
        }

        if self.fail_once.lock().unwrap().remove(&message.offset) {
            return Err(Error::Job {
                service: "test".to_string(),
                source: anyhow::anyhow!("flaky failure at {}", message.offset),
            });
        }

        Ok(())
    }
}

async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .expect("test timed out")
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_cancel_mid_message_completes_it_and_stops_partition() {
    init_logging();
    let group = MemoryConsumerGroup::new(vec![ScriptedSession::new(SessionEnd::Hold)
        .partition("test", 3, messages(3, 98..104))]);
    let marker = group.marker();

    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let dispatch = Arc::new(
        RecordingDispatch::new(marker.clone()).blocking_at(100, started.clone(), release.clone()),
    );

    let consumer = AvroConsumer::new(
        group,
        cache(),
        dispatch.clone(),
        &config(ErrorPolicy::Skip, None),
    );
    let shutdown = CancellationToken::new();

    let driver = async {
        started.notified().await;
        shutdown.cancel();
        release.notify_one();
    };

    let (result, ()) = within(async { tokio::join!(consumer.run(shutdown.clone()), driver) }).await;

    result.unwrap();
    assert_eq!(dispatch.offsets(3), vec![98, 99, 100]);
    assert_eq!(marker.offsets("test", 3), vec![98, 99, 100]);
    assert_eq!(consumer.group().close_count(), 1);
    assert!(!dispatch.marked_early.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_shutdown_before_ready_closes_once() {
    init_logging();
    let group = MemoryConsumerGroup::new(vec![ScriptedSession::new(SessionEnd::Fail(
        "broker down".to_string(),
    ))]);
    let marker = group.marker();
    let consumer = AvroConsumer::new(
        group,
        cache(),
        Arc::new(RecordingDispatch::new(marker)),
        &config(ErrorPolicy::Skip, None),
    );

    let shutdown = CancellationToken::new();
    shutdown.cancel();

    within(consumer.run(shutdown)).await.unwrap();
    assert_eq!(consumer.group().close_count(), 1);
}

#[tokio::test]
async fn test_close_failure_is_fatal() {
    init_logging();
    let group = MemoryConsumerGroup::new(vec![]).failing_close("coordinator gone");
    let marker = group.marker();
    let consumer = AvroConsumer::new(
        group,
        cache(),
        Arc::new(RecordingDispatch::new(marker)),
        &config(ErrorPolicy::Skip, None),
    );
    let mut ready = consumer.ready();
    let shutdown = CancellationToken::new();

    let driver = async {
        ready.wait_for(|ready| *ready).await.unwrap();
        shutdown.cancel();
    };

    let (result, ()) = within(async { tokio::join!(consumer.run(shutdown.clone()), driver) }).await;

    let err = result.unwrap_err();
    assert!(err.is_fatal(), "unexpected error: {err}");
    assert_eq!(consumer.group().close_count(), 1);
}

#[tokio::test]
async fn test_run_twice_is_closed() {
    init_logging();
    let group = MemoryConsumerGroup::new(vec![]);
    let marker = group.marker();
    let consumer = AvroConsumer::new(
        group,
        cache(),
        Arc::new(RecordingDispatch::new(marker)),
        &config(ErrorPolicy::Skip, None),
    );

    let shutdown = CancellationToken::new();
    shutdown.cancel();

    within(consumer.run(shutdown.clone())).await.unwrap();
    assert!(matches!(
        within(consumer.run(shutdown)).await,
        Err(Error::Closed(_))
    ));
    assert_eq!(consumer.group().close_count(), 1);
}

// =============================================================================
// Ordering and marking
// =============================================================================

#[tokio::test]
async fn test_dispatch_order_follows_partition_order() {
    init_logging();
    let group = MemoryConsumerGroup::new(vec![ScriptedSession::new(SessionEnd::Hold)
        .partition("test", 0, messages(0, 0..25))
        .partition("test", 1, messages(1, 100..125))]);
    let marker = group.marker();
    let dispatch = Arc::new(RecordingDispatch::new(marker.clone()));

    let consumer = AvroConsumer::new(
        group,
        cache(),
        dispatch.clone(),
        &config(ErrorPolicy::Skip, None),
    );
    let shutdown = CancellationToken::new();

    let driver = async {
        marker.wait_for(50).await;
        shutdown.cancel();
    };

    let (result, ()) = within(async { tokio::join!(consumer.run(shutdown.clone()), driver) }).await;

    result.unwrap();
    assert_eq!(dispatch.offsets(0), (0..25).collect::<Vec<_>>());
    assert_eq!(dispatch.offsets(1), (100..125).collect::<Vec<_>>());
    assert_eq!(marker.offsets("test", 0), dispatch.offsets(0));
    assert_eq!(marker.offsets("test", 1), dispatch.offsets(1));
    assert!(!dispatch.marked_early.load(Ordering::SeqCst));

    let payloads: Vec<String> = dispatch
        .dispatched
        .lock()
        .unwrap()
        .iter()
        .filter(|(p, o, _)| *p == 0 && *o == 3)
        .map(|(_, _, payload)| payload.clone())
        .collect();
    assert_eq!(payloads, vec!["\"m3\"".to_string()]);
}

// =============================================================================
// Error policies
// =============================================================================

#[tokio::test]
async fn test_skip_policy_marks_undecodable_message() {
    init_logging();
    let group = MemoryConsumerGroup::new(vec![ScriptedSession::new(SessionEnd::Hold).partition(
        "test",
        0,
        vec![message(0, 0, "a"), corrupt(0, 1), message(0, 2, "c")],
    )]);
    let marker = group.marker();
    let dispatch = Arc::new(RecordingDispatch::new(marker.clone()));

    let consumer = AvroConsumer::new(
        group,
        cache(),
        dispatch.clone(),
        &config(ErrorPolicy::Skip, None),
    );
    let shutdown = CancellationToken::new();

    let driver = async {
        marker.wait_for(3).await;
        shutdown.cancel();
    };

    let (result, ()) = within(async { tokio::join!(consumer.run(shutdown.clone()), driver) }).await;

    result.unwrap();
    assert_eq!(dispatch.offsets(0), vec![0, 2]);
    assert_eq!(marker.offsets("test", 0), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_stop_policy_leaves_failure_unmarked_and_rejoins() {
    init_logging();
    let group = MemoryConsumerGroup::new(vec![
        ScriptedSession::new(SessionEnd::Hold).partition("test", 0, messages(0, 0..3)),
        // Redelivery from the last marked position after rejoining
        ScriptedSession::new(SessionEnd::Hold).partition("test", 0, messages(0, 1..3)),
    ]);
    let marker = group.marker();
    let dispatch = Arc::new(RecordingDispatch::new(marker.clone()).failing_once_at(1));

    let consumer = AvroConsumer::new(
        group,
        cache(),
        dispatch.clone(),
        &config(ErrorPolicy::Stop, None),
    );
    let shutdown = CancellationToken::new();

    let driver = async {
        marker.wait_for(3).await;
        shutdown.cancel();
    };

    let (result, ()) = within(async { tokio::join!(consumer.run(shutdown.clone()), driver) }).await;

    result.unwrap();
    assert_eq!(dispatch.offsets(0), vec![0, 1, 1, 2]);
    assert_eq!(marker.offsets("test", 0), vec![0, 1, 2]);
    assert_eq!(consumer.group().session_count(), 2);
}

// =============================================================================
// Rejoining
// =============================================================================

#[tokio::test]
async fn test_rejoin_after_revocation_raises_readiness_again() {
    init_logging();
    let group = MemoryConsumerGroup::new(vec![
        ScriptedSession::new(SessionEnd::Revoke).partition("test", 0, messages(0, 0..2)),
        ScriptedSession::new(SessionEnd::Hold).partition("test", 1, messages(1, 0..2)),
    ]);
    let marker = group.marker();
    let consumer = AvroConsumer::new(
        group,
        cache(),
        Arc::new(RecordingDispatch::new(marker.clone())),
        &config(ErrorPolicy::Skip, None),
    );
    let ready = consumer.ready();
    let shutdown = CancellationToken::new();

    let driver = async {
        marker.wait_for(4).await;
        assert!(*ready.borrow());
        shutdown.cancel();
    };

    let (result, ()) = within(async { tokio::join!(consumer.run(shutdown.clone()), driver) }).await;

    result.unwrap();
    assert_eq!(consumer.group().session_count(), 2);
    assert_eq!(marker.offsets("test", 1), vec![0, 1]);
    assert!(!*consumer.ready().borrow());
}

#[tokio::test]
async fn test_retries_exhausted() {
    init_logging();
    let group = MemoryConsumerGroup::new(
        (0..5)
            .map(|i| ScriptedSession::new(SessionEnd::Fail(format!("attempt {i}"))))
            .collect(),
    );
    let marker = group.marker();
    let consumer = AvroConsumer::new(
        group,
        cache(),
        Arc::new(RecordingDispatch::new(marker)),
        &config(ErrorPolicy::Skip, Some(2)),
    );

    let result = within(consumer.run(CancellationToken::new())).await;

    assert!(matches!(result, Err(Error::RetriesExhausted(2))));
    assert_eq!(consumer.group().consume_count(), 3);
    assert_eq!(consumer.group().close_count(), 1);
}

#[tokio::test]
async fn test_transient_failures_recover_without_limit() {
    init_logging();
    let group = MemoryConsumerGroup::new(vec![
        ScriptedSession::new(SessionEnd::Fail("one".to_string())),
        ScriptedSession::new(SessionEnd::Fail("two".to_string())),
        ScriptedSession::new(SessionEnd::Hold).partition("test", 0, messages(0, 0..1)),
    ]);
    let marker = group.marker();
    let consumer = AvroConsumer::new(
        group,
        cache(),
        Arc::new(RecordingDispatch::new(marker.clone())),
        &config(ErrorPolicy::Skip, None),
    );
    let shutdown = CancellationToken::new();

    let driver = async {
        marker.wait_for(1).await;
        shutdown.cancel();
    };

    let (result, ()) = within(async { tokio::join!(consumer.run(shutdown.clone()), driver) }).await;

    result.unwrap();
    assert_eq!(consumer.group().consume_count(), 3);
}
