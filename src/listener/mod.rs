//! The move listener: subscription lifecycle plus per-batch processing.
//!
//! Events flow from the repository's observation facility, already filtered by
//! the registration made in [`SubscriptionManager::start`], into
//! [`MoveEventProcessor::handle_batch`], which resolves each moved path, reads
//! its configuration and queues reference-update jobs.

/// Per-batch resolution and job dispatch.
pub mod processor;
/// Registration of the listener with the repository.
pub mod subscription;

use std::sync::Arc;

use crate::config::ListenerConfig;
use crate::jobs::JobDispatcher;
use crate::repository::{Repository, ResolverFactory};
use crate::resource_config::ConfigResolver;

pub use processor::{BatchAbort, BatchOutcome, ConfigMissing, MoveEventProcessor, ProcessorStatsSnapshot};
pub use subscription::{SubscriptionManager, SubscriptionState};

/// Wire a processor and its subscription manager from one config.
///
/// The manager is returned inactive; call `start` to register.
#[must_use]
pub fn move_listener(
    repository: Arc<dyn Repository>,
    resolvers: Arc<dyn ResolverFactory>,
    configs: Arc<dyn ConfigResolver>,
    jobs: Arc<dyn JobDispatcher>,
    cfg: &ListenerConfig,
) -> (SubscriptionManager, Arc<MoveEventProcessor>) {
    let processor = Arc::new(MoveEventProcessor::with_config(resolvers, configs, jobs, cfg));
    let manager = SubscriptionManager::with_config(repository, processor.clone(), cfg);
    (manager, processor)
}
