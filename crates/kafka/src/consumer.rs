use crate::cache::SchemaCache;
use crate::codec;
use crate::error::{Error, Result};
use crate::group::{Claim, ConsumerGroup, GroupHandler, Session};
use crate::registry::{HttpSchemaRegistry, SchemaRegistry};
use crate::transport::KafkaConsumerGroup;
use async_trait::async_trait;
use kafka_types::{DecodedMessage, RawMessage};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

/// Configuration for the Kafka consumer runner
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Kafka brokers (comma-separated list)
    pub brokers: String,
    /// Consumer group ID
    pub group_id: String,
    /// Topics to consume from
    pub topics: Vec<String>,
    /// Schema registry base URLs, tried in order
    pub schema_registries: Vec<String>,
    /// Auto offset reset strategy ("earliest" or "latest")
    ///
    /// "earliest" means a new group starts from the beginning of each
    /// partition rather than only seeing messages produced after it joined.
    pub auto_offset_reset: String,
    /// Session timeout in milliseconds
    pub session_timeout_ms: u32,
    /// Minimum bytes the broker accumulates before answering a fetch
    pub fetch_min_bytes: u32,
    /// Maximum time the broker waits for `fetch_min_bytes`
    pub fetch_wait_max_ms: u32,
    /// Capacity of each partition's message channel
    ///
    /// Messages fetched but not yet processed sit here; a full channel pauses
    /// polling until the claim catches up.
    pub channel_buffer_size: usize,
    /// What to do when decoding or dispatching a message fails
    pub on_error: ErrorPolicy,
    /// Rejoin behavior after a failed session
    pub retry: RetryPolicy,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "seal-runner-kafka".to_string(),
            topics: vec!["test".to_string()],
            schema_registries: vec!["http://localhost:8081".to_string()],
            auto_offset_reset: "earliest".to_string(),
            session_timeout_ms: 6000,
            fetch_min_bytes: 1,
            fetch_wait_max_ms: 100,
            channel_buffer_size: 10,
            on_error: ErrorPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ConsumerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.brokers.trim().is_empty() {
            return Err(Error::InvalidConfig("brokers must not be empty".to_string()));
        }
        if self.group_id.trim().is_empty() {
            return Err(Error::InvalidConfig("group id must not be empty".to_string()));
        }
        if self.topics.is_empty() || self.topics.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::InvalidConfig(
                "at least one non-empty topic is required".to_string(),
            ));
        }
        if self.channel_buffer_size == 0 {
            return Err(Error::InvalidConfig(
                "channel buffer size must be at least 1".to_string(),
            ));
        }
        if !matches!(self.auto_offset_reset.as_str(), "earliest" | "latest") {
            return Err(Error::InvalidConfig(format!(
                "auto offset reset must be 'earliest' or 'latest', got '{}'",
                self.auto_offset_reset
            )));
        }
        Ok(())
    }
}

/// Handling of a message whose decode or dispatch failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Log the error and mark the offset anyway.
    #[default]
    Skip,
    /// Leave the offset unmarked and end the session so the message is
    /// redelivered after rejoining.
    Stop,
}

impl FromStr for ErrorPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(ErrorPolicy::Skip),
            "stop" => Ok(ErrorPolicy::Stop),
            other => Err(Error::InvalidConfig(format!(
                "unknown error policy '{other}', expected 'skip' or 'stop'"
            ))),
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::Skip => write!(f, "skip"),
            ErrorPolicy::Stop => write!(f, "stop"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failed sessions tolerated before giving up; `None` retries
    /// forever.
    pub max_retries: Option<u32>,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: None,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Receives every successfully decoded message.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, message: &DecodedMessage) -> Result<()>;
}

/// Per-session handler: decodes each claimed message and dispatches it
/// before marking.
struct ClaimHandler<R> {
    cache: Arc<SchemaCache<R>>,
    dispatch: Arc<dyn Dispatch>,
    on_error: ErrorPolicy,
    ready: Arc<watch::Sender<bool>>,
    span: Span,
}

impl<R: SchemaRegistry> ClaimHandler<R> {
    async fn process(&self, message: &RawMessage) -> Result<()> {
        let decoded = codec::decode_message(&self.cache, message).await?;
        debug!(
            topic = %decoded.topic,
            partition = decoded.partition,
            offset = decoded.offset,
            schema_id = decoded.schema_id,
            "Dispatching message"
        );
        self.dispatch.dispatch(&decoded).await
    }

    fn mark(&self, session: &Session, message: &RawMessage) {
        if let Err(e) = session.mark_message(message) {
            warn!(
                topic = %message.topic,
                partition = message.partition,
                offset = message.offset,
                error = %e,
                "Failed to mark offset"
            );
        }
    }

    async fn consume(&self, session: &Session, mut claim: Claim) -> Result<()> {
        loop {
            let message = tokio::select! {
                biased;
                _ = session.cancelled() => return Ok(()),
                message = claim.recv() => match message {
                    Some(message) => message,
                    None => return Ok(()),
                },
            };

            match self.process(&message).await {
                Ok(()) => self.mark(session, &message),
                Err(e) => match self.on_error {
                    ErrorPolicy::Skip => {
                        warn!(
                            offset = message.offset,
                            error = %e,
                            "Failed to process message, skipping"
                        );
                        self.mark(session, &message);
                    }
                    ErrorPolicy::Stop => {
                        error!(
                            offset = message.offset,
                            error = %e,
                            "Failed to process message, ending session"
                        );
                        return Err(e);
                    }
                },
            }
        }
    }
}

#[async_trait]
impl<R: SchemaRegistry + 'static> GroupHandler for ClaimHandler<R> {
    async fn setup(&self, session: &Session) -> Result<()> {
        info!(parent: &self.span, generation = session.generation(), "Session ready");
        self.ready.send_replace(true);
        Ok(())
    }

    async fn cleanup(&self, session: &Session) -> Result<()> {
        debug!(parent: &self.span, generation = session.generation(), "Session cleaned up");
        Ok(())
    }

    async fn consume_claim(&self, session: &Session, claim: Claim) -> Result<()> {
        let span = info_span!(
            parent: &self.span,
            "claim",
            topic = %claim.topic(),
            partition = claim.partition(),
            generation = session.generation()
        );
        self.consume(session, claim).instrument(span).await
    }
}

async fn wait_ready(ready: &mut watch::Receiver<bool>) -> bool {
    ready.wait_for(|ready| *ready).await.is_ok()
}

/// Consumer-group runner decoding Avro messages and handing them to a
/// [`Dispatch`].
pub struct AvroConsumer<G, R = HttpSchemaRegistry> {
    group: G,
    handler: Arc<ClaimHandler<R>>,
    topics: Vec<String>,
    retry: RetryPolicy,
    ready: Arc<watch::Sender<bool>>,
    finished: AtomicBool,
    span: Span,
}

impl AvroConsumer<KafkaConsumerGroup, HttpSchemaRegistry> {
    /// Build a runner talking to real brokers and schema registries.
    pub fn connect(config: &ConsumerConfig, dispatch: Arc<dyn Dispatch>) -> Result<Self> {
        config.validate()?;
        let registry = HttpSchemaRegistry::new(config.schema_registries.clone())?;
        let group = KafkaConsumerGroup::new(config)?;

        Ok(Self::new(
            group,
            Arc::new(SchemaCache::new(registry)),
            dispatch,
            config,
        ))
    }
}

impl<G, R> AvroConsumer<G, R>
where
    G: ConsumerGroup,
    R: SchemaRegistry + 'static,
{
    pub fn new(
        group: G,
        cache: Arc<SchemaCache<R>>,
        dispatch: Arc<dyn Dispatch>,
        config: &ConsumerConfig,
    ) -> Self {
        let span = info_span!("kafka", group_id = %config.group_id);
        let (ready, _) = watch::channel(false);
        let ready = Arc::new(ready);

        let handler = Arc::new(ClaimHandler {
            cache,
            dispatch,
            on_error: config.on_error,
            ready: ready.clone(),
            span: span.clone(),
        });

        Self {
            group,
            handler,
            topics: config.topics.clone(),
            retry: config.retry,
            ready,
            finished: AtomicBool::new(false),
            span,
        }
    }

    /// Readiness signal: `true` while a session is set up.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    pub fn group(&self) -> &G {
        &self.group
    }

    pub fn cache(&self) -> &SchemaCache<R> {
        &self.handler.cache
    }

    /// Run until `shutdown` is cancelled or the group fails permanently,
    /// then close the group.
    ///
    /// A failure to close is reported as [`Error::Fatal`].
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Err(Error::Closed("consumer runner already ran".to_string()));
        }

        self.run_until_closed(shutdown)
            .instrument(self.span.clone())
            .await
    }

    async fn run_until_closed(&self, shutdown: CancellationToken) -> Result<()> {
        info!(topics = ?self.topics, "Starting Kafka consumer");

        let outcome = {
            let consume_loop = self.consume_loop(&shutdown);
            tokio::pin!(consume_loop);

            let mut ready = self.ready.subscribe();
            let mut outcome = None;

            tokio::select! {
                result = &mut consume_loop => outcome = Some(result),
                up = wait_ready(&mut ready) => if up {
                    info!("Kafka consumer up and running");
                },
                _ = shutdown.cancelled() => {}
            }

            if outcome.is_none() {
                tokio::select! {
                    result = &mut consume_loop => outcome = Some(result),
                    _ = shutdown.cancelled() => info!("Shutdown requested, waiting for claims"),
                }
            }

            match outcome {
                Some(result) => result,
                None => consume_loop.await,
            }
        };

        if let Err(e) = &outcome {
            error!(error = %e, "Kafka consumer stopped");
        }

        if let Err(e) = self.group.close().await {
            error!(error = %e, "Failed to close consumer group");
            return Err(Error::Fatal(format!("failed to close consumer group: {e}")));
        }

        info!("Kafka consumer stopped");
        outcome
    }

    async fn consume_loop(&self, shutdown: &CancellationToken) -> Result<()> {
        let handler: Arc<dyn GroupHandler> = self.handler.clone();
        let mut failures: u32 = 0;

        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            let result = self
                .group
                .consume(&self.topics, handler.clone(), shutdown)
                .await;

            self.ready.send_replace(false);

            if shutdown.is_cancelled() {
                if let Err(e) = result {
                    warn!(error = %e, "Session ended with error during shutdown");
                }
                return Ok(());
            }

            match result {
                Ok(()) => {
                    failures = 0;
                    info!("Consumer group session ended, rejoining");
                }
                Err(e @ Error::Closed(_)) => return Err(e),
                Err(e) => {
                    failures += 1;
                    if let Some(max_retries) = self.retry.max_retries {
                        if failures > max_retries {
                            error!(error = %e, "Consumer group session failed, giving up");
                            return Err(Error::RetriesExhausted(max_retries));
                        }
                    }

                    warn!(
                        error = %e,
                        attempt = failures,
                        backoff_ms = self.retry.backoff.as_millis() as u64,
                        "Consumer group session failed, rejoining"
                    );

                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(self.retry.backoff) => {}
                    }
                }
            }
        }
    }
}
