//! Repository boundary: traits plus an in-memory backend.

pub mod memory;
pub mod traits;

pub use memory::{Actor, InMemoryRepository, MemoryBatch, MemoryRepositoryConfig};
pub use traits::{
    EventListener, ObservationManager, RegistrationId, Repository, Resource, ResolverFactory,
    ResourceResolver, Session,
};
