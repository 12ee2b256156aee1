//! Consumer-group contract.
//!
//! A [`ConsumerGroup`] runs one session at a time: it joins, learns its
//! partition assignment, hands one [`Claim`] per partition to a
//! [`GroupHandler`], and returns once the session has ended and every claim
//! has returned. The runner in [`crate::consumer`] drives it in a loop.

use crate::error::{Error, Result};
use async_trait::async_trait;
use kafka_types::RawMessage;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, error};

/// Records processed positions so they are committed by the transport.
pub trait OffsetMarker: Send + Sync {
    /// Mark `offset` of `topic`/`partition` as processed.
    fn mark_offset(&self, topic: &str, partition: i32, offset: i64) -> Result<()>;
}

/// One generation of partition ownership.
pub struct Session {
    generation: u64,
    assignments: Vec<(String, i32)>,
    marker: Arc<dyn OffsetMarker>,
    token: CancellationToken,
}

impl Session {
    pub fn new(
        generation: u64,
        assignments: Vec<(String, i32)>,
        marker: Arc<dyn OffsetMarker>,
        token: CancellationToken,
    ) -> Self {
        Self {
            generation,
            assignments,
            marker,
            token,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// `(topic, partition)` pairs owned by this session.
    pub fn assignments(&self) -> &[(String, i32)] {
        &self.assignments
    }

    pub fn mark_message(&self, message: &RawMessage) -> Result<()> {
        self.marker
            .mark_offset(&message.topic, message.partition, message.offset)
    }

    /// Resolves once the session has been ended, by revocation, shutdown or
    /// a failing claim.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// End the session; every claim loop stops at its next message boundary.
    pub fn end(&self) {
        self.token.cancel();
    }
}

/// Ordered message delivery for one partition within one session.
pub struct Claim {
    topic: String,
    partition: i32,
    messages: mpsc::Receiver<RawMessage>,
}

impl Claim {
    pub fn new(topic: impl Into<String>, partition: i32, messages: mpsc::Receiver<RawMessage>) -> Self {
        Self {
            topic: topic.into(),
            partition,
            messages,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Next message in offset order; `None` once the transport stops feeding
    /// this claim.
    pub async fn recv(&mut self) -> Option<RawMessage> {
        self.messages.recv().await
    }
}

/// Callbacks invoked by a [`ConsumerGroup`] over a session's lifetime.
#[async_trait]
pub trait GroupHandler: Send + Sync {
    /// Runs once before any claim is consumed.
    async fn setup(&self, session: &Session) -> Result<()>;

    /// Runs once after every claim has returned.
    async fn cleanup(&self, session: &Session) -> Result<()>;

    /// Process one claim until it is exhausted or the session ends.
    async fn consume_claim(&self, session: &Session, claim: Claim) -> Result<()>;
}

/// Group membership over a set of topics.
#[async_trait]
pub trait ConsumerGroup: Send + Sync {
    /// Join the group and run one session to completion.
    ///
    /// Returns `Ok(())` when the session ended normally (revocation or
    /// `shutdown`), and an error when the session or a claim failed.
    async fn consume(
        &self,
        topics: &[String],
        handler: Arc<dyn GroupHandler>,
        shutdown: &CancellationToken,
    ) -> Result<()>;

    /// Leave the group and release the transport. Calling it twice fails with
    /// [`Error::Closed`].
    async fn close(&self) -> Result<()>;
}

/// Drive `handler` over one session: `setup`, one task per claim, then
/// `cleanup` after all claims have returned.
///
/// A failing claim ends the session for the others. The first error is
/// returned.
pub async fn run_session(
    handler: Arc<dyn GroupHandler>,
    session: Arc<Session>,
    claims: Vec<Claim>,
) -> Result<()> {
    let generation = session.generation();

    if let Err(e) = handler.setup(&session).await {
        session.end();
        return Err(e);
    }

    let mut workers = JoinSet::new();
    for claim in claims {
        let handler = handler.clone();
        let session = session.clone();
        workers.spawn(async move {
            let topic = claim.topic().to_string();
            let partition = claim.partition();
            let result = handler.consume_claim(&session, claim).await;
            if result.is_err() {
                session.end();
            }
            debug!(topic = %topic, partition, "Claim returned");
            result
        });
    }

    let mut first_error = None;
    while let Some(joined) = workers.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                session.end();
                Err(Error::Internal(format!("claim worker failed: {e}")))
            }
        };

        if let Err(e) = result {
            error!(generation, error = %e, "Claim ended with error");
            first_error.get_or_insert(e);
        }
    }

    let cleanup = handler.cleanup(&session).await;

    match first_error {
        Some(e) => Err(e),
        None => cleanup,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingMarker;
    use std::sync::Mutex;

    #[derive(Default)]
    struct EventLog {
        events: Mutex<Vec<String>>,
        fail_partition: Option<i32>,
    }

    impl EventLog {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GroupHandler for EventLog {
        async fn setup(&self, session: &Session) -> Result<()> {
            self.events
                .lock()
                .unwrap()
                .push(format!("setup {}", session.generation()));
            Ok(())
        }

        async fn cleanup(&self, session: &Session) -> Result<()> {
            self.events
                .lock()
                .unwrap()
                .push(format!("cleanup {}", session.generation()));
            Ok(())
        }

        async fn consume_claim(&self, session: &Session, mut claim: Claim) -> Result<()> {
            if Some(claim.partition()) == self.fail_partition {
                return Err(Error::BadData("poisoned".to_string()));
            }

            loop {
                tokio::select! {
                    biased;
                    _ = session.cancelled() => return Ok(()),
                    message = claim.recv() => match message {
                        Some(message) => {
                            session.mark_message(&message)?;
                            self.events
                                .lock()
                                .unwrap()
                                .push(format!("{}/{}", message.partition, message.offset));
                        }
                        None => return Ok(()),
                    },
                }
            }
        }
    }

    fn claim_with(partition: i32, offsets: &[i64]) -> Claim {
        let (tx, rx) = mpsc::channel(offsets.len().max(1));
        for &offset in offsets {
            tx.try_send(RawMessage::new("test", partition, offset, vec![], vec![]))
                .unwrap();
        }
        Claim::new("test", partition, rx)
    }

    fn session(marker: Arc<RecordingMarker>) -> Arc<Session> {
        Arc::new(Session::new(
            1,
            vec![("test".to_string(), 0), ("test".to_string(), 1)],
            marker,
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn test_cleanup_runs_after_all_claims() {
        let handler = Arc::new(EventLog::default());
        let marker = Arc::new(RecordingMarker::new());

        run_session(
            handler.clone(),
            session(marker.clone()),
            vec![claim_with(0, &[0, 1]), claim_with(1, &[5])],
        )
        .await
        .unwrap();

        let events = handler.events();
        assert_eq!(events.first().map(String::as_str), Some("setup 1"));
        assert_eq!(events.last().map(String::as_str), Some("cleanup 1"));
        assert_eq!(events.len(), 5);
        assert_eq!(marker.offsets("test", 0), vec![0, 1]);
        assert_eq!(marker.offsets("test", 1), vec![5]);
    }

    #[tokio::test]
    async fn test_failing_claim_ends_session_and_returns_error() {
        let handler = Arc::new(EventLog {
            fail_partition: Some(1),
            ..Default::default()
        });
        let marker = Arc::new(RecordingMarker::new());
        let session = session(marker);

        // Partition 0 is never closed, so it only returns once the session ends
        let (_tx, rx) = mpsc::channel(1);
        let claims = vec![Claim::new("test", 0, rx), claim_with(1, &[0])];

        let result = run_session(handler.clone(), session.clone(), claims).await;

        assert!(matches!(result, Err(Error::BadData(_))));
        assert!(session.is_cancelled());
        assert_eq!(handler.events().last().map(String::as_str), Some("cleanup 1"));
    }
}
