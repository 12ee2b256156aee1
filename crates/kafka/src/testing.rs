//! In-memory stand-ins for the registry and the consumer-group transport.
//!
//! These let the runner, the producer and the services be exercised without a
//! broker or an HTTP registry.

use crate::error::{Error, Result};
use crate::group::{run_session, Claim, ConsumerGroup, GroupHandler, OffsetMarker, Session};
use crate::registry::SchemaRegistry;
use async_trait::async_trait;
use kafka_types::{RawMessage, SchemaId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct RegistryState {
    schemas: HashMap<SchemaId, String>,
    subjects: HashMap<String, Vec<SchemaId>>,
}

/// Schema registry held in memory.
///
/// Registration assigns ids above the highest known one and returns the
/// existing id when the same text is registered again.
#[derive(Default)]
pub struct MemoryRegistry {
    state: Mutex<RegistryState>,
    fetches: AtomicUsize,
    registrations: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, id: SchemaId, schema: &str) -> Self {
        self.state.get_mut().schemas.insert(id, schema.to_string());
        self
    }

    /// Number of `fetch_schema_by_id` calls, including failed ones.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of `register_schema` calls.
    pub fn registration_count(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub async fn schema_text(&self, id: SchemaId) -> Option<String> {
        self.state.lock().await.schemas.get(&id).cloned()
    }

    pub async fn subject_versions(&self, subject: &str) -> Vec<SchemaId> {
        self.state
            .lock()
            .await
            .subjects
            .get(subject)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SchemaRegistry for MemoryRegistry {
    async fn fetch_schema_by_id(&self, id: SchemaId) -> Result<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .await
            .schemas
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::schema_not_found(id))
    }

    async fn register_schema(&self, subject: &str, schema: &str) -> Result<SchemaId> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;

        let existing = state
            .schemas
            .iter()
            .find(|(_, text)| text.as_str() == schema)
            .map(|(id, _)| *id);

        let id = match existing {
            Some(id) => id,
            None => {
                let id = state.schemas.keys().max().map_or(1, |max| max + 1);
                state.schemas.insert(id, schema.to_string());
                id
            }
        };

        let versions = state.subjects.entry(subject.to_string()).or_default();
        if !versions.contains(&id) {
            versions.push(id);
        }

        Ok(id)
    }
}

/// One marked position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mark {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Offset marker that remembers every mark in order.
pub struct RecordingMarker {
    marks: watch::Sender<Vec<Mark>>,
}

impl Default for RecordingMarker {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingMarker {
    pub fn new() -> Self {
        let (marks, _) = watch::channel(Vec::new());
        Self { marks }
    }

    pub fn marks(&self) -> Vec<Mark> {
        self.marks.borrow().clone()
    }

    /// Marked offsets of one partition, in marking order.
    pub fn offsets(&self, topic: &str, partition: i32) -> Vec<i64> {
        self.marks
            .borrow()
            .iter()
            .filter(|m| m.topic == topic && m.partition == partition)
            .map(|m| m.offset)
            .collect()
    }

    /// Wait until at least `count` marks have been recorded.
    pub async fn wait_for(&self, count: usize) {
        let mut marks = self.marks.subscribe();
        let _ = marks.wait_for(|marks| marks.len() >= count).await;
    }
}

impl OffsetMarker for RecordingMarker {
    fn mark_offset(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        self.marks.send_modify(|marks| {
            marks.push(Mark {
                topic: topic.to_string(),
                partition,
                offset,
            })
        });
        Ok(())
    }
}

/// How a scripted session ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// Partitions are revoked once every scripted message has been handed
    /// out and the claims have drained.
    Revoke,
    /// The session stays open until shutdown or a failing claim ends it.
    Hold,
    /// Joining fails with [`Error::Unavailable`]; no session is created.
    Fail(String),
}

/// Scripted result of one `consume` call.
#[derive(Debug, Clone)]
pub struct ScriptedSession {
    partitions: Vec<(String, i32, Vec<RawMessage>)>,
    end: SessionEnd,
}

impl ScriptedSession {
    pub fn new(end: SessionEnd) -> Self {
        Self {
            partitions: Vec::new(),
            end,
        }
    }

    /// Assign a partition delivering `messages` in order.
    pub fn partition(mut self, topic: &str, partition: i32, messages: Vec<RawMessage>) -> Self {
        self.partitions.push((topic.to_string(), partition, messages));
        self
    }
}

/// Consumer group that plays back scripted sessions.
///
/// When the script runs out, `consume` holds an empty session until
/// shutdown.
pub struct MemoryConsumerGroup {
    script: StdMutex<VecDeque<ScriptedSession>>,
    marker: Arc<RecordingMarker>,
    consumes: AtomicUsize,
    sessions: AtomicU64,
    closes: AtomicUsize,
    close_error: Option<String>,
}

impl MemoryConsumerGroup {
    pub fn new(sessions: Vec<ScriptedSession>) -> Self {
        Self {
            script: StdMutex::new(sessions.into()),
            marker: Arc::new(RecordingMarker::new()),
            consumes: AtomicUsize::new(0),
            sessions: AtomicU64::new(0),
            closes: AtomicUsize::new(0),
            close_error: None,
        }
    }

    /// Make every `close` fail with `Unavailable(reason)`.
    pub fn failing_close(mut self, reason: &str) -> Self {
        self.close_error = Some(reason.to_string());
        self
    }

    pub fn marker(&self) -> Arc<RecordingMarker> {
        self.marker.clone()
    }

    pub fn consume_count(&self) -> usize {
        self.consumes.load(Ordering::SeqCst)
    }

    /// Sessions that were actually set up.
    pub fn session_count(&self) -> u64 {
        self.sessions.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn next_session(&self) -> Option<ScriptedSession> {
        match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }
}

#[async_trait]
impl ConsumerGroup for MemoryConsumerGroup {
    async fn consume(
        &self,
        _topics: &[String],
        handler: Arc<dyn GroupHandler>,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        self.consumes.fetch_add(1, Ordering::SeqCst);
        if self.close_count() > 0 {
            return Err(Error::Closed("consumer group is closed".to_string()));
        }

        let scripted = self
            .next_session()
            .unwrap_or_else(|| ScriptedSession::new(SessionEnd::Hold));

        if let SessionEnd::Fail(reason) = &scripted.end {
            return Err(Error::Unavailable(reason.clone()));
        }

        let generation = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        let token = shutdown.child_token();

        let mut senders = Vec::new();
        let mut claims = Vec::new();
        let mut assignments = Vec::new();
        for (topic, partition, messages) in scripted.partitions {
            let (tx, rx) = mpsc::channel(messages.len().max(1));
            for message in messages {
                tx.try_send(message)
                    .map_err(|e| Error::Internal(format!("scripted message not queued: {e}")))?;
            }
            assignments.push((topic.clone(), partition));
            claims.push(Claim::new(topic, partition, rx));
            senders.push(tx);
        }

        let session = Arc::new(Session::new(
            generation,
            assignments,
            self.marker.clone(),
            token.clone(),
        ));

        let hold = scripted.end == SessionEnd::Hold;
        if hold {
            let token = token.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                drop(senders);
            });
        } else {
            drop(senders);
        }

        let result = run_session(handler, session, claims).await;
        if hold {
            token.cancelled().await;
        }
        token.cancel();
        result
    }

    async fn close(&self) -> Result<()> {
        if self.closes.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(Error::Closed("consumer group already closed".to_string()));
        }

        match &self.close_error {
            Some(reason) => Err(Error::Unavailable(reason.clone())),
            None => Ok(()),
        }
    }
}
