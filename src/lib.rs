//! # moveref - reference updates for moved content
//!
//! moveref watches a hierarchical content repository for moves of folders and
//! pages and, when a move is observed, queues a job that updates references to
//! the moved path elsewhere in the system.
//!
//! ## Core Concepts
//!
//! - **SubscriptionManager**: logs in with a service identity and registers the
//!   listener for `Moved` events below `/content`
//! - **MoveEventProcessor**: handles each delivered batch with its own
//!   short-lived resolver and decides per event whether to queue a job
//! - **ConfigResolver**: tells the processor whether a resource wants reference
//!   updates on move
//! - **JobDispatcher**: accepts the follow-up job; execution happens elsewhere
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use moveref::{move_listener, InMemoryRepository, ListenerConfig, PropertyConfigResolver};
//! use moveref::jobs::{JobQueueConfig, QueuedJobDispatcher};
//!
//! let repo = Arc::new(InMemoryRepository::default());
//! let (jobs, queue) = QueuedJobDispatcher::new(JobQueueConfig::default());
//! let (manager, _processor) = move_listener(
//!     repo.clone(),
//!     repo.clone(),
//!     Arc::new(PropertyConfigResolver),
//!     Arc::new(jobs),
//!     &ListenerConfig::default(),
//! );
//! manager.start();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod jobs;
pub mod listener;
pub mod repository;
pub mod resource_config;

// Re-export primary types at crate root for convenience
pub use config::{ListenerConfig, DEFAULT_SERVICE_IDENTITY, MOVE_JOB_TOPIC};
pub use error::{ConfigError, DispatchError, MoveRefError, MoveRefResult, RepositoryError};
pub use event::{ChangeEvent, EventKind, EventOrigin};
pub use filter::{EventFilter, EventFilterBuilder, CONTENT_ROOT, MOVE_NODE_TYPES};
pub use jobs::{DispatchedJob, JobDispatcher, JobPayload, JobQueue, QueuedJobDispatcher, MOVED_PATH_KEY};
pub use listener::{
    move_listener, BatchAbort, BatchOutcome, ConfigMissing, MoveEventProcessor, SubscriptionManager,
    SubscriptionState,
};
pub use repository::{
    Actor, EventListener, InMemoryRepository, MemoryRepositoryConfig, ObservationManager, RegistrationId,
    Repository, Resource, ResolverFactory, ResourceResolver, Session,
};
pub use resource_config::{
    ConfigResolver, MoveSettings, PathPrefixConfigResolver, PropertyConfigResolver, ResourceConfiguration,
    CONFIG_PROPERTY,
};
