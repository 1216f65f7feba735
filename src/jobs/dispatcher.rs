//! Job submission.
//!
//! The listener hands jobs to a [`JobDispatcher`] and never sees them again.
//! [`QueuedJobDispatcher`] is the bundled implementation: submission is a
//! non-blocking `try_send` onto a bounded queue drained by an external worker.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DispatchError;

use super::queue::JobQueue;

/// Payload key carrying the path a node was moved to.
pub const MOVED_PATH_KEY: &str = "movedAssetOrPagePath";

/// Job properties.
pub type JobPayload = Map<String, Value>;

/// Accepts jobs for asynchronous execution.
///
/// `submit` returns once the job is accepted, not once it has run.
pub trait JobDispatcher: Send + Sync {
    /// Enqueue a job.
    ///
    /// # Errors
    /// The job was not accepted (unknown topic, queue full or closed).
    fn submit(&self, topic: &str, payload: JobPayload) -> Result<(), DispatchError>;
}

/// Unique identifier for a job.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new random job id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

/// A job as accepted by the queue.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchedJob {
    pub id: JobId,
    pub topic: String,
    pub payload: JobPayload,
    pub created_at: DateTime<Utc>,
}

impl DispatchedJob {
    /// Job with a fresh id stamped now.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            id: JobId::new(),
            topic: topic.into(),
            payload,
            created_at: Utc::now(),
        }
    }

    /// The moved path, if this is a move job.
    #[must_use]
    pub fn moved_path(&self) -> Option<&str> {
        self.payload.get(MOVED_PATH_KEY).and_then(Value::as_str)
    }
}

/// Build the payload of a reference-update job for `path`.
#[must_use]
pub fn move_payload(path: &str) -> JobPayload {
    let mut payload = JobPayload::new();
    payload.insert(MOVED_PATH_KEY.to_string(), Value::String(path.to_string()));
    payload
}

#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    /// Max queued jobs before `submit` fails with `QueueFull`.
    pub capacity: usize,
    /// Topics accepted by `submit`. Empty accepts any non-empty topic.
    pub topics: Vec<String>,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            topics: Vec::new(),
        }
    }
}

/// Dispatcher backed by a bounded in-process queue.
#[derive(Debug)]
pub struct QueuedJobDispatcher {
    cfg: JobQueueConfig,
    tx: Sender<DispatchedJob>,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

impl QueuedJobDispatcher {
    /// Create a dispatcher and the queue its jobs land on.
    #[must_use]
    pub fn new(cfg: JobQueueConfig) -> (Self, JobQueue) {
        let capacity = cfg.capacity.max(1);
        let (tx, rx) = bounded::<DispatchedJob>(capacity);
        let dispatcher = Self {
            cfg: JobQueueConfig { capacity, ..cfg },
            tx,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        };
        (dispatcher, JobQueue::new(rx))
    }

    /// Jobs accepted onto the queue so far.
    #[must_use]
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Jobs refused because the queue was full or closed.
    #[must_use]
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn accepts_topic(&self, topic: &str) -> bool {
        !topic.trim().is_empty() && (self.cfg.topics.is_empty() || self.cfg.topics.iter().any(|t| t == topic))
    }
}

impl JobDispatcher for QueuedJobDispatcher {
    fn submit(&self, topic: &str, payload: JobPayload) -> Result<(), DispatchError> {
        if !self.accepts_topic(topic) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(DispatchError::InvalidTopic {
                topic: topic.to_string(),
            });
        }

        let job = DispatchedJob::new(topic, payload);
        let id = job.id;
        match self.tx.try_send(job) {
            Ok(()) => {
                self.accepted.fetch_add(1, Ordering::Relaxed);
                debug!(topic, job_id = ?id, "job queued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(topic, capacity = self.cfg.capacity, "job queue full");
                Err(DispatchError::QueueFull {
                    topic: topic.to_string(),
                    capacity: self.cfg.capacity,
                })
            }
            Err(TrySendError::Disconnected(_)) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(DispatchError::Disconnected {
                    topic: topic.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn submitted_job_reaches_queue() {
        let (dispatcher, queue) = QueuedJobDispatcher::new(JobQueueConfig::default());
        dispatcher.submit("t/move", move_payload("/content/dam/a.jpg")).unwrap();

        let job = queue.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(job.topic, "t/move");
        assert_eq!(job.moved_path(), Some("/content/dam/a.jpg"));
        assert_eq!(dispatcher.accepted(), 1);
    }

    #[test]
    fn full_queue_rejects_without_blocking() {
        let (dispatcher, _queue) = QueuedJobDispatcher::new(JobQueueConfig {
            capacity: 1,
            topics: Vec::new(),
        });
        dispatcher.submit("t", JobPayload::new()).unwrap();
        let err = dispatcher.submit("t", JobPayload::new()).unwrap_err();
        assert_eq!(
            err,
            DispatchError::QueueFull {
                topic: "t".to_string(),
                capacity: 1
            }
        );
        assert_eq!(dispatcher.rejected(), 1);
    }

    #[test]
    fn dropped_queue_disconnects() {
        let (dispatcher, queue) = QueuedJobDispatcher::new(JobQueueConfig::default());
        drop(queue);
        let err = dispatcher.submit("t", JobPayload::new()).unwrap_err();
        assert!(matches!(err, DispatchError::Disconnected { .. }));
    }

    #[test]
    fn unknown_topics_are_rejected() {
        let (dispatcher, _queue) = QueuedJobDispatcher::new(JobQueueConfig {
            capacity: 4,
            topics: vec!["allowed".to_string()],
        });
        assert!(dispatcher.submit("allowed", JobPayload::new()).is_ok());
        assert!(matches!(
            dispatcher.submit("other", JobPayload::new()),
            Err(DispatchError::InvalidTopic { .. })
        ));
        assert!(matches!(
            dispatcher.submit(" ", JobPayload::new()),
            Err(DispatchError::InvalidTopic { .. })
        ));
    }

    #[test]
    fn job_serializes_with_payload() {
        let job = DispatchedJob::new("t", move_payload("/content/p"));
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["payload"]["movedAssetOrPagePath"], "/content/p");
        assert_eq!(json["topic"], "t");
    }
}
