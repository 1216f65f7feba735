//! Per-batch move handling.
//!
//! For every delivered batch the processor opens one service resolver, walks the
//! events in order and, for each moved node whose configuration asks for it,
//! queues a reference-update job.
//!
//! Failure handling is asymmetric:
//! - a path that no longer resolves, or a resource without move settings,
//!   abandons the *rest of the batch*;
//! - a backend or dispatch error only skips the event that raised it.
//!
//! One stale path therefore discards every later event of the same batch. This
//! is the long-standing behaviour of the listener and is kept as is; the
//! `aborted_batches` counter makes it visible.

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{ListenerConfig, DEFAULT_SERVICE_IDENTITY, MOVE_JOB_TOPIC};
use crate::error::MoveRefResult;
use crate::event::ChangeEvent;
use crate::jobs::{move_payload, JobDispatcher};
use crate::repository::{EventListener, ResolverFactory, ResourceResolver};
use crate::resource_config::{ConfigResolver, ResourceConfiguration};

/// What was missing when configuration stopped a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigMissing {
    /// No configuration applies to the resource.
    Configuration,
    /// Configuration exists but has no move settings.
    MoveSettings,
}

/// Why a batch stopped before its last event.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BatchAbort {
    /// No resolver could be opened; nothing was processed.
    ResolverUnavailable,
    /// The event path did not resolve to a resource.
    ResolutionMiss { path: String },
    /// The resource had no usable configuration.
    ConfigurationMiss { path: String, missing: ConfigMissing },
}

/// Result of one `handle_batch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    /// Events delivered in the batch.
    pub received: usize,
    /// Events fully handled (dispatched, declined, or failed in isolation).
    pub processed: usize,
    /// Jobs accepted by the dispatcher.
    pub dispatched: usize,
    /// Events that hit a backend or dispatch error.
    pub failed: usize,
    /// Set when the batch stopped early.
    pub aborted: Option<BatchAbort>,
}

impl BatchOutcome {
    /// Events never looked at because the batch was abandoned.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.received - self.processed
    }
}

/// Lifetime counters of a processor.
#[derive(Debug, Default)]
struct ProcessorStats {
    batches: AtomicU64,
    dispatched: AtomicU64,
    aborted_batches: AtomicU64,
    event_failures: AtomicU64,
    resolver_failures: AtomicU64,
}

/// Point-in-time copy of the processor counters.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStatsSnapshot {
    pub batches: u64,
    pub dispatched: u64,
    pub aborted_batches: u64,
    pub event_failures: u64,
    pub resolver_failures: u64,
}

/// Closes the wrapped resolver when dropped, on every exit path.
struct ResolverGuard {
    inner: Box<dyn ResourceResolver>,
}

impl Deref for ResolverGuard {
    type Target = dyn ResourceResolver;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl Drop for ResolverGuard {
    fn drop(&mut self) {
        self.inner.close();
    }
}

enum EventStep {
    Dispatched,
    Declined,
    Abort(BatchAbort),
}

/// Turns batches of move events into reference-update jobs.
pub struct MoveEventProcessor {
    resolvers: Arc<dyn ResolverFactory>,
    configs: Arc<dyn ConfigResolver>,
    jobs: Arc<dyn JobDispatcher>,
    service_identity: String,
    job_topic: String,
    stats: ProcessorStats,
}

impl std::fmt::Debug for MoveEventProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MoveEventProcessor")
            .field("service_identity", &self.service_identity)
            .field("job_topic", &self.job_topic)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl MoveEventProcessor {
    /// Processor using the default service identity and job topic.
    #[must_use]
    pub fn new(
        resolvers: Arc<dyn ResolverFactory>,
        configs: Arc<dyn ConfigResolver>,
        jobs: Arc<dyn JobDispatcher>,
    ) -> Self {
        Self {
            resolvers,
            configs,
            jobs,
            service_identity: DEFAULT_SERVICE_IDENTITY.to_string(),
            job_topic: MOVE_JOB_TOPIC.to_string(),
            stats: ProcessorStats::default(),
        }
    }

    /// Processor taking identity and topic from `cfg`.
    #[must_use]
    pub fn with_config(
        resolvers: Arc<dyn ResolverFactory>,
        configs: Arc<dyn ConfigResolver>,
        jobs: Arc<dyn JobDispatcher>,
        cfg: &ListenerConfig,
    ) -> Self {
        Self {
            service_identity: cfg.service_identity.clone(),
            job_topic: cfg.job_topic.clone(),
            ..Self::new(resolvers, configs, jobs)
        }
    }

    /// Topic jobs are submitted under.
    #[must_use]
    pub fn job_topic(&self) -> &str {
        &self.job_topic
    }

    /// Snapshot of the lifetime counters.
    #[must_use]
    pub fn stats(&self) -> ProcessorStatsSnapshot {
        ProcessorStatsSnapshot {
            batches: self.stats.batches.load(Ordering::Relaxed),
            dispatched: self.stats.dispatched.load(Ordering::Relaxed),
            aborted_batches: self.stats.aborted_batches.load(Ordering::Relaxed),
            event_failures: self.stats.event_failures.load(Ordering::Relaxed),
            resolver_failures: self.stats.resolver_failures.load(Ordering::Relaxed),
        }
    }

    /// Handle one batch of events in delivery order.
    ///
    /// Opens exactly one resolver for the batch and closes it before returning,
    /// whichever way the batch ends.
    pub fn handle_batch(&self, events: &[ChangeEvent]) -> BatchOutcome {
        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        let mut outcome = BatchOutcome {
            received: events.len(),
            ..BatchOutcome::default()
        };

        let resolver = match self.resolvers.service_resolver(&self.service_identity) {
            Ok(inner) => ResolverGuard { inner },
            Err(err) => {
                self.stats.resolver_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    identity = %self.service_identity,
                    error = %err,
                    "service resource resolver unavailable; move batch dropped"
                );
                outcome.aborted = Some(BatchAbort::ResolverUnavailable);
                return outcome;
            }
        };

        for event in events {
            match self.handle_event(&*resolver, event) {
                Ok(EventStep::Dispatched) => {
                    outcome.processed += 1;
                    outcome.dispatched += 1;
                }
                Ok(EventStep::Declined) => outcome.processed += 1,
                Ok(EventStep::Abort(abort)) => {
                    self.stats.aborted_batches.fetch_add(1, Ordering::Relaxed);
                    outcome.aborted = Some(abort);
                    break;
                }
                Err(err) => {
                    self.stats.event_failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        path = %event.path,
                        error = %err,
                        transient = err.is_transient(),
                        "error while handling asset or page move"
                    );
                    outcome.processed += 1;
                    outcome.failed += 1;
                }
            }
        }

        if outcome.aborted.is_some() {
            warn!(
                received = outcome.received,
                skipped = outcome.skipped(),
                "move batch abandoned before its last event"
            );
        } else {
            debug!(
                received = outcome.received,
                dispatched = outcome.dispatched,
                failed = outcome.failed,
                "move batch handled"
            );
        }
        outcome
    }

    fn handle_event(&self, resolver: &dyn ResourceResolver, event: &ChangeEvent) -> MoveRefResult<EventStep> {
        let Some(resource) = resolver.resolve(&event.path)? else {
            error!(path = %event.path, "could not resolve moved asset or page");
            return Ok(EventStep::Abort(BatchAbort::ResolutionMiss {
                path: event.path.clone(),
            }));
        };

        let settings = match self.configs.read_config(&resource)? {
            Some(ResourceConfiguration {
                settings: Some(settings),
            }) => settings,
            found => {
                let missing = if found.is_some() {
                    ConfigMissing::MoveSettings
                } else {
                    ConfigMissing::Configuration
                };
                error!(
                    path = %resource.path,
                    missing = ?missing,
                    "no move configuration for resource; cannot handle move"
                );
                return Ok(EventStep::Abort(BatchAbort::ConfigurationMiss {
                    path: resource.path,
                    missing,
                }));
            }
        };

        if !settings.update_references_on_move {
            debug!(path = %event.path, "reference update on move disabled");
            return Ok(EventStep::Declined);
        }

        self.jobs.submit(&self.job_topic, move_payload(&event.path))?;
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        info!(path = %event.path, from = %event.origin_subtree, topic = %self.job_topic, "reference update job queued");
        Ok(EventStep::Dispatched)
    }
}

impl EventListener for MoveEventProcessor {
    fn on_events(&self, events: Vec<ChangeEvent>) {
        let _ = self.handle_batch(&events);
    }
}
