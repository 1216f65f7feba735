//! Deferred work submitted after a move.

/// Dispatcher trait, job types and the queued dispatcher.
pub mod dispatcher;
/// Receiving end of the job queue.
pub mod queue;

pub use dispatcher::{
    move_payload, DispatchedJob, JobDispatcher, JobId, JobPayload, JobQueueConfig, QueuedJobDispatcher,
    MOVED_PATH_KEY,
};
pub use queue::JobQueue;
