//! rdkafka-backed [`ConsumerGroup`].
//!
//! A single `StreamConsumer` is polled by the task calling
//! [`ConsumerGroup::consume`]; rebalance callbacks surface as events on an
//! unbounded channel, and every fetched message is routed to the bounded
//! channel of its partition's claim. Offsets are stored after processing and
//! committed by librdkafka's auto-commit, and once more on close.

use crate::consumer::ConsumerConfig;
use crate::error::{Error, Result};
use crate::group::{run_session, Claim, ConsumerGroup, GroupHandler, OffsetMarker, Session};
use async_trait::async_trait;
use kafka_types::RawMessage;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::types::RDKafkaErrorCode;
use rdkafka::{ClientContext, Offset, TopicPartitionList};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Partitions = Vec<(String, i32)>;

#[derive(Debug)]
enum GroupEvent {
    Assigned(Partitions),
    Revoked(Partitions),
    Failed(String),
}

/// Forwards rebalance notifications from librdkafka's callback thread.
pub struct GroupContext {
    events: mpsc::UnboundedSender<GroupEvent>,
}

impl ClientContext for GroupContext {}

impl ConsumerContext for GroupContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        if let Rebalance::Revoke(tpl) = rebalance {
            let _ = self.events.send(GroupEvent::Revoked(partitions(tpl)));
        }
    }

    fn post_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(tpl) => {
                let _ = self.events.send(GroupEvent::Assigned(partitions(tpl)));
            }
            Rebalance::Error(e) => {
                let _ = self.events.send(GroupEvent::Failed(e.to_string()));
            }
            Rebalance::Revoke(_) => {}
        }
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!("Offsets committed"),
            Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {}
            Err(e) => warn!(error = %e, "Offset commit failed"),
        }
    }
}

fn partitions(tpl: &TopicPartitionList) -> Partitions {
    tpl.elements()
        .iter()
        .map(|elem| (elem.topic().to_string(), elem.partition()))
        .collect()
}

fn raw_message(message: &BorrowedMessage<'_>) -> RawMessage {
    RawMessage {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec).unwrap_or_default(),
        value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        timestamp: message.timestamp().to_millis(),
    }
}

/// Stores `offset + 1` for the next auto-commit.
struct StoreOffsets {
    consumer: Arc<StreamConsumer<GroupContext>>,
}

impl OffsetMarker for StoreOffsets {
    fn mark_offset(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(topic, partition, Offset::Offset(offset + 1))?;
        self.consumer.store_offsets(&tpl)?;
        Ok(())
    }
}

// One poll result, detached from the consumer borrow before anything awaits.
enum Polled {
    Event(Option<GroupEvent>),
    Message(KafkaResult<RawMessage>),
}

pub struct KafkaConsumerGroup {
    consumer: Arc<StreamConsumer<GroupContext>>,
    events: Mutex<mpsc::UnboundedReceiver<GroupEvent>>,
    channel_buffer_size: usize,
    generation: AtomicU64,
    subscribed: AtomicBool,
    closed: AtomicBool,
}

impl KafkaConsumerGroup {
    pub fn new(config: &ConsumerConfig) -> Result<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let consumer: StreamConsumer<GroupContext> = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("session.timeout.ms", config.session_timeout_ms.to_string())
            .set("fetch.min.bytes", config.fetch_min_bytes.to_string())
            .set("fetch.wait.max.ms", config.fetch_wait_max_ms.to_string())
            .set("enable.partition.eof", "false")
            .create_with_context(GroupContext { events: events_tx })
            .map_err(|e| Error::InvalidConfig(format!("Failed to create consumer: {e}")))?;

        Ok(Self {
            consumer: Arc::new(consumer),
            events: Mutex::new(events_rx),
            channel_buffer_size: config.channel_buffer_size.max(1),
            generation: AtomicU64::new(0),
            subscribed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    fn subscribe(&self, topics: &[String]) -> Result<()> {
        if self.subscribed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        if let Err(e) = self.consumer.subscribe(&topics) {
            self.subscribed.store(false, Ordering::SeqCst);
            return Err(e.into());
        }

        info!(topics = ?topics, "Subscribed to topics");
        Ok(())
    }

    // Leaving the group makes the next subscribe rejoin from the committed
    // offsets, which is how unmarked messages get redelivered.
    fn leave(&self) {
        if self.subscribed.swap(false, Ordering::SeqCst) {
            self.consumer.unsubscribe();
            info!("Left consumer group");
        }
    }

    async fn route(
        senders: &HashMap<(String, i32), mpsc::Sender<RawMessage>>,
        message: RawMessage,
        session_token: &CancellationToken,
    ) {
        let Some(sender) = senders.get(&(message.topic.clone(), message.partition)) else {
            warn!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                "Message for a partition outside the current assignment"
            );
            return;
        };

        tokio::select! {
            biased;
            _ = session_token.cancelled() => {}
            sent = sender.send(message) => {
                if sent.is_err() {
                    debug!("Claim already returned, dropping message");
                }
            }
        }
    }
}

#[async_trait]
impl ConsumerGroup for KafkaConsumerGroup {
    async fn consume(
        &self,
        topics: &[String],
        handler: Arc<dyn GroupHandler>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed("consumer group is closed".to_string()));
        }

        self.subscribe(topics)?;
        let mut events = self.events.lock().await;

        // Joining: poll until the coordinator hands out an assignment
        let mut pending = Vec::new();
        let assignment = loop {
            let step = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(()),
                event = events.recv() => Polled::Event(event),
                message = self.consumer.recv() => Polled::Message(message.map(|m| raw_message(&m))),
            };

            match step {
                Polled::Event(Some(GroupEvent::Assigned(assignment))) => break assignment,
                Polled::Event(Some(GroupEvent::Revoked(_))) => pending.clear(),
                Polled::Event(Some(GroupEvent::Failed(e))) => {
                    return Err(Error::Unavailable(format!("rebalance failed: {e}")));
                }
                Polled::Event(None) => {
                    return Err(Error::Internal("rebalance event channel closed".to_string()));
                }
                Polled::Message(Ok(message)) => pending.push(message),
                Polled::Message(Err(e)) => warn!(error = %e, "Error while joining consumer group"),
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let session_token = shutdown.child_token();

        let mut senders = HashMap::new();
        let mut claims = Vec::new();
        for (topic, partition) in &assignment {
            let (tx, rx) = mpsc::channel(self.channel_buffer_size);
            senders.insert((topic.clone(), *partition), tx);
            claims.push(Claim::new(topic.clone(), *partition, rx));
        }

        info!(generation, partitions = ?assignment, "Consumer group session started");

        let marker = Arc::new(StoreOffsets {
            consumer: self.consumer.clone(),
        });
        let session = Arc::new(Session::new(
            generation,
            assignment,
            marker,
            session_token.clone(),
        ));
        let worker = tokio::spawn(run_session(handler, session, claims));

        for message in pending {
            Self::route(&senders, message, &session_token).await;
        }

        let mut revoked = false;
        let outcome = loop {
            let step = tokio::select! {
                biased;
                _ = session_token.cancelled() => None,
                event = events.recv() => Some(Polled::Event(event)),
                message = self.consumer.recv() => Some(Polled::Message(message.map(|m| raw_message(&m)))),
            };

            // None once the session token is cancelled
            match step {
                None => break Ok(()),
                Some(Polled::Event(Some(GroupEvent::Revoked(partitions)))) => {
                    info!(generation, partitions = ?partitions, "Partitions revoked");
                    revoked = true;
                    break Ok(());
                }
                Some(Polled::Event(Some(GroupEvent::Assigned(partitions)))) => {
                    warn!(generation, partitions = ?partitions, "Assignment received mid-session, ignoring");
                }
                Some(Polled::Event(Some(GroupEvent::Failed(e)))) => {
                    break Err(Error::Unavailable(format!("rebalance failed: {e}")));
                }
                Some(Polled::Event(None)) => {
                    break Err(Error::Internal("rebalance event channel closed".to_string()));
                }
                Some(Polled::Message(Ok(message))) => Self::route(&senders, message, &session_token).await,
                Some(Polled::Message(Err(e))) => warn!(generation, error = %e, "Error receiving message"),
            }
        };

        session_token.cancel();
        drop(senders);

        let session_result = match worker.await {
            Ok(result) => result,
            Err(e) => Err(Error::Internal(format!("session task failed: {e}"))),
        };

        info!(generation, "Consumer group session ended");

        let result = outcome.and(session_result);
        if result.is_err() && !revoked && !shutdown.is_cancelled() {
            self.leave();
        }
        result
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::Closed("consumer group already closed".to_string()));
        }

        match self.consumer.commit_consumer_state(CommitMode::Sync) {
            Ok(()) | Err(KafkaError::ConsumerCommit(RDKafkaErrorCode::NoOffset)) => {}
            Err(e) => return Err(e.into()),
        }

        self.consumer.unsubscribe();
        self.subscribed.store(false, Ordering::SeqCst);
        info!("Consumer group closed");
        Ok(())
    }
}
