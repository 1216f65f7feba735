//! Subscription lifecycle.
//!
//! The [`SubscriptionManager`] owns the privileged session used to register the
//! move listener and nothing else: batches are resolved with their own
//! short-lived resolvers. `start` and `stop` are the only mutators of the
//! subscription state.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use crate::config::ListenerConfig;
use crate::error::RepositoryError;
use crate::filter::EventFilter;
use crate::repository::{EventListener, ObservationManager, RegistrationId, Repository, Session};

/// Lifecycle state of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// No listener registered and no session held.
    Inactive,
    /// Listener registered on a live session.
    Active,
}

/// Logs the session out when dropped.
struct SessionGuard {
    session: Box<dyn Session>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.session.logout();
    }
}

/// A live registration. The session is released when this is dropped, so the
/// registration can never outlive it.
struct ActiveSubscription {
    observation: Arc<dyn ObservationManager>,
    registration: RegistrationId,
    _session: SessionGuard,
}

/// Attaches a listener to the repository's move events and detaches it again.
pub struct SubscriptionManager {
    repository: Arc<dyn Repository>,
    listener: Arc<dyn EventListener>,
    service_identity: String,
    filter: EventFilter,
    active: Mutex<Option<ActiveSubscription>>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("service_identity", &self.service_identity)
            .field("filter", &self.filter)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SubscriptionManager {
    /// Manager for the default move watch on `/content`.
    #[must_use]
    pub fn new(repository: Arc<dyn Repository>, listener: Arc<dyn EventListener>) -> Self {
        Self::with_config(repository, listener, &ListenerConfig::default())
    }

    /// Manager taking its service identity from `cfg`. The filter is always
    /// [`EventFilter::move_watch`].
    #[must_use]
    pub fn with_config(
        repository: Arc<dyn Repository>,
        listener: Arc<dyn EventListener>,
        cfg: &ListenerConfig,
    ) -> Self {
        Self {
            repository,
            listener,
            service_identity: cfg.service_identity.clone(),
            filter: EventFilter::move_watch(),
            active: Mutex::new(None),
        }
    }

    /// The filter registered by `start`.
    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        if self.lock().is_some() {
            SubscriptionState::Active
        } else {
            SubscriptionState::Inactive
        }
    }

    /// Shorthand for `state() == Active`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == SubscriptionState::Active
    }

    /// Id of the live registration, if any.
    #[must_use]
    pub fn registration(&self) -> Option<RegistrationId> {
        self.lock().as_ref().map(|a| a.registration)
    }

    /// Log in and register the listener.
    ///
    /// Failures are logged by kind and leave the manager `Inactive` with no
    /// session held. There is no retry; a failed start needs an external restart.
    pub fn start(&self) -> SubscriptionState {
        let mut active = self.lock();
        if active.is_some() {
            warn!(identity = %self.service_identity, "move listener already registered");
            return SubscriptionState::Active;
        }

        match self.subscribe() {
            Ok(subscription) => {
                info!(
                    root = %self.filter.root_path,
                    registration = %subscription.registration,
                    node_types = ?self.filter.node_types,
                    "move listener registered"
                );
                *active = Some(subscription);
                SubscriptionState::Active
            }
            Err(err) => {
                if err.is_authentication() {
                    error!(
                        identity = %self.service_identity,
                        error = %err,
                        "service login failed; move listener not registered"
                    );
                } else if err.is_unsupported() {
                    error!(
                        error = %err,
                        "repository does not support observation; move listener not registered"
                    );
                } else {
                    error!(
                        error = %err,
                        transient = err.is_transient(),
                        "repository error; move listener not registered"
                    );
                }
                SubscriptionState::Inactive
            }
        }
    }

    /// Unregister the listener and release the session.
    ///
    /// An unregistration failure is logged; the session is released regardless.
    /// The state lock is held until the session is released, so a concurrent
    /// `start` cannot register alongside a subscription still being torn down.
    pub fn stop(&self) {
        let mut active = self.lock();
        let Some(subscription) = active.take() else {
            debug!("move listener not registered; nothing to stop");
            return;
        };

        match subscription.observation.remove_listener(subscription.registration) {
            Ok(()) => info!(registration = %subscription.registration, "move listener removed"),
            Err(err) => error!(
                registration = %subscription.registration,
                error = %err,
                "failed to remove move listener"
            ),
        }
        // Dropping the subscription logs the session out.
        drop(subscription);
        drop(active);
    }

    fn subscribe(&self) -> Result<ActiveSubscription, RepositoryError> {
        let session = SessionGuard {
            session: self.repository.login_service(&self.service_identity)?,
        };
        let observation = session.session.observation_manager()?;
        let registration = observation.add_listener(self.filter.clone(), Arc::clone(&self.listener))?;
        Ok(ActiveSubscription {
            observation,
            registration,
            _session: session,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActiveSubscription>> {
        // The state is a plain Option; a panic elsewhere cannot leave it torn.
        self.active.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::event::ChangeEvent;
    use crate::repository::{InMemoryRepository, MemoryRepositoryConfig};

    struct Noop;

    impl EventListener for Noop {
        fn on_events(&self, _events: Vec<ChangeEvent>) {}
    }

    #[test]
    fn start_and_stop_pair_session() {
        let repo = Arc::new(InMemoryRepository::default());
        let manager = SubscriptionManager::new(repo.clone(), Arc::new(Noop));

        assert_eq!(manager.start(), SubscriptionState::Active);
        assert!(manager.registration().is_some());
        assert_eq!(repo.open_sessions(), 1);
        assert_eq!(repo.listener_count(), 1);

        manager.stop();
        assert_eq!(manager.state(), SubscriptionState::Inactive);
        assert_eq!(repo.open_sessions(), 0);
        assert_eq!(repo.listener_count(), 0);
    }

    #[test]
    fn second_start_keeps_single_registration() {
        let repo = Arc::new(InMemoryRepository::default());
        let manager = SubscriptionManager::new(repo.clone(), Arc::new(Noop));
        manager.start();
        let first = manager.registration();
        assert_eq!(manager.start(), SubscriptionState::Active);
        assert_eq!(manager.registration(), first);
        assert_eq!(repo.open_sessions(), 1);
    }

    #[test]
    fn unsupported_observation_releases_session() {
        let repo = Arc::new(InMemoryRepository::new(MemoryRepositoryConfig {
            observation_supported: false,
            ..MemoryRepositoryConfig::default()
        }));
        let manager = SubscriptionManager::new(repo.clone(), Arc::new(Noop));
        assert_eq!(manager.start(), SubscriptionState::Inactive);
        assert_eq!(repo.open_sessions(), 0);
    }

    #[test]
    fn drop_stops_subscription() {
        let repo = Arc::new(InMemoryRepository::default());
        {
            let manager = SubscriptionManager::new(repo.clone(), Arc::new(Noop));
            manager.start();
            assert_eq!(repo.open_sessions(), 1);
        }
        assert_eq!(repo.open_sessions(), 0);
        assert_eq!(repo.listener_count(), 0);
    }

    #[test]
    fn config_never_changes_filter() {
        let repo = Arc::new(InMemoryRepository::default());
        let cfg = ListenerConfig {
            service_identity: "other-service".to_string(),
            ..ListenerConfig::default()
        };
        let manager = SubscriptionManager::with_config(repo, Arc::new(Noop), &cfg);
        assert_eq!(manager.filter(), &EventFilter::move_watch());
    }
}
