//! Abstract repository traits.
//!
//! These traits are the boundary between the move listener and the content
//! repository: privileged sessions, the observation facility, and short-lived
//! service resolvers. Backends implement them; the listener only consumes them.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::event::ChangeEvent;
use crate::filter::EventFilter;

/// A resolved repository resource.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub path: String,
    /// Primary node type of the backing node.
    pub resource_type: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Resource {
    /// Resource without properties.
    #[must_use]
    pub fn new(path: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            resource_type: resource_type.into(),
            properties: Map::new(),
        }
    }

    /// Builder-style property setter.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    /// Property value by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Last path segment.
    #[must_use]
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }
}

/// Identifier of a listener registration on an [`ObservationManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistrationId(Uuid);

impl RegistrationId {
    /// Create a new random registration id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for RegistrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Callback invoked by the observation facility with each batch of events.
///
/// Batches are delivered on the facility's own thread, one at a time per
/// registration.
pub trait EventListener: Send + Sync {
    /// Handle one delivered batch. Events arrive in repository order.
    fn on_events(&self, events: Vec<ChangeEvent>);
}

/// Change-notification facility of a session.
pub trait ObservationManager: Send + Sync {
    /// Register `listener` for events inside `filter`.
    fn add_listener(
        &self,
        filter: EventFilter,
        listener: Arc<dyn EventListener>,
    ) -> Result<RegistrationId, RepositoryError>;

    /// Remove a registration. Batches already being delivered may still complete.
    fn remove_listener(&self, registration: RegistrationId) -> Result<(), RepositoryError>;
}

/// An authenticated repository session.
pub trait Session: Send + Sync {
    /// Identity the session was opened for.
    fn user_id(&self) -> &str;

    /// The session's observation facility.
    ///
    /// # Errors
    /// `UnsupportedOperation` if the backend cannot observe changes.
    fn observation_manager(&self) -> Result<Arc<dyn ObservationManager>, RepositoryError>;

    /// Release the session. Idempotent.
    fn logout(&self);

    /// False once `logout` has been called.
    fn is_live(&self) -> bool;
}

/// Entry point for privileged sessions.
pub trait Repository: Send + Sync {
    /// Open a session for a configured service identity.
    ///
    /// # Errors
    /// `LoginFailed` if the identity is unknown or not permitted.
    fn login_service(&self, identity: &str) -> Result<Box<dyn Session>, RepositoryError>;
}

/// Short-lived handle used to resolve paths into resources.
pub trait ResourceResolver: Send {
    /// Resolve an absolute path. `Ok(None)` means no resource lives there.
    fn resolve(&self, path: &str) -> Result<Option<Resource>, RepositoryError>;

    /// Release the handle. Idempotent.
    fn close(&mut self);

    /// False once `close` has been called.
    fn is_live(&self) -> bool;
}

/// Hands out service resolvers.
pub trait ResolverFactory: Send + Sync {
    /// Open a resolver for a configured service identity.
    fn service_resolver(&self, identity: &str) -> Result<Box<dyn ResourceResolver>, RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resource_name_is_last_segment() {
        let r = Resource::new("/content/dam/a.jpg", "dam:Asset");
        assert_eq!(r.name(), "a.jpg");
    }

    #[test]
    fn resource_properties_roundtrip_through_builder() {
        let r = Resource::new("/content/site", "cq:Page").with_property("title", json!("Site"));
        assert_eq!(r.property("title"), Some(&json!("Site")));
        assert_eq!(r.property("missing"), None);
    }

    #[test]
    fn registration_ids_are_unique() {
        assert_ne!(RegistrationId::new(), RegistrationId::new());
    }
}
