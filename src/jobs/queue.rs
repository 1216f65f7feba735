use std::time::Duration;

use crossbeam_channel::Receiver;

use super::dispatcher::DispatchedJob;

/// Receiving end of a [`super::QueuedJobDispatcher`].
///
/// Handed to whatever worker executes the jobs. Dropping it makes further
/// submissions fail with `Disconnected`.
#[derive(Debug)]
pub struct JobQueue {
    rx: Receiver<DispatchedJob>,
}

impl JobQueue {
    pub(crate) fn new(rx: Receiver<DispatchedJob>) -> Self {
        Self { rx }
    }

    /// Receive the next job (blocking). `None` once every dispatcher is gone.
    #[must_use]
    pub fn recv(&self) -> Option<DispatchedJob> {
        self.rx.recv().ok()
    }

    /// Receive the next job, waiting at most `timeout`.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<DispatchedJob> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Take every job queued right now.
    #[must_use]
    pub fn drain(&self) -> Vec<DispatchedJob> {
        self.rx.try_iter().collect()
    }

    /// Number of jobs waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// True when no job is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
