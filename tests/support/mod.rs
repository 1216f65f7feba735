//! Scriptable fakes for the repository, config and job boundaries.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{bounded, Receiver, Sender};
use serde_json::Value;

use moveref::jobs::JobPayload;
use moveref::{
    ChangeEvent, ConfigResolver, DispatchError, EventFilter, EventListener, EventOrigin, JobDispatcher,
    ObservationManager, RegistrationId, Repository, RepositoryError, ResolverFactory, Resource,
    ResourceConfiguration, ResourceResolver, Session, CONFIG_PROPERTY, MOVED_PATH_KEY,
};

pub fn moved(path: &str) -> ChangeEvent {
    ChangeEvent::moved("/content/dam/previous", path, "sling:OrderedFolder", EventOrigin::SameInstance)
}

// ---------------------------------------------------------------------------
// Resolvers

#[derive(Debug, Default)]
pub struct ResolverCounters {
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub resolved: Mutex<Vec<String>>,
}

#[derive(Default)]
pub struct FakeResolverFactory {
    resources: HashSet<String>,
    configs: HashMap<String, Value>,
    failing: HashSet<String>,
    unavailable: bool,
    pub counters: Arc<ResolverCounters>,
}

impl FakeResolverFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(mut self, path: &str) -> Self {
        self.resources.insert(path.to_string());
        self
    }

    pub fn with_failing(mut self, path: &str) -> Self {
        self.failing.insert(path.to_string());
        self
    }

    /// Resource at `path` carrying `config` in its config property.
    pub fn with_config_property(mut self, path: &str, config: Value) -> Self {
        self.resources.insert(path.to_string());
        self.configs.insert(path.to_string(), config);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.counters.closed.load(Ordering::SeqCst)
    }

    pub fn resolved(&self) -> Vec<String> {
        self.counters.resolved.lock().unwrap().clone()
    }
}

impl ResolverFactory for FakeResolverFactory {
    fn service_resolver(&self, identity: &str) -> Result<Box<dyn ResourceResolver>, RepositoryError> {
        if self.unavailable {
            return Err(RepositoryError::LoginFailed {
                identity: identity.to_string(),
                reason: "resolver factory unavailable".to_string(),
            });
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeResolver {
            resources: self.resources.clone(),
            configs: self.configs.clone(),
            failing: self.failing.clone(),
            counters: Arc::clone(&self.counters),
            live: true,
        }))
    }
}

struct FakeResolver {
    resources: HashSet<String>,
    configs: HashMap<String, Value>,
    failing: HashSet<String>,
    counters: Arc<ResolverCounters>,
    live: bool,
}

impl ResourceResolver for FakeResolver {
    fn resolve(&self, path: &str) -> Result<Option<Resource>, RepositoryError> {
        self.counters.resolved.lock().unwrap().push(path.to_string());
        if self.failing.contains(path) {
            return Err(RepositoryError::backend(format!("cannot read {path}")));
        }
        if !self.resources.contains(path) {
            return Ok(None);
        }
        let mut resource = Resource::new(path, "sling:OrderedFolder");
        if let Some(config) = self.configs.get(path) {
            resource = resource.with_property(CONFIG_PROPERTY, config.clone());
        }
        Ok(Some(resource))
    }

    fn close(&mut self) {
        // Counts every call so double-closes show up in assertions.
        self.live = false;
        self.counters.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

// ---------------------------------------------------------------------------
// Configuration

#[derive(Default)]
pub struct MapConfig {
    configs: HashMap<String, ResourceConfiguration>,
    failing: HashSet<String>,
}

impl MapConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, update: bool) -> Self {
        self.configs
            .insert(path.to_string(), ResourceConfiguration::with_update(update));
        self
    }

    pub fn without_settings(mut self, path: &str) -> Self {
        self.configs
            .insert(path.to_string(), ResourceConfiguration { settings: None });
        self
    }

    pub fn with_failing(mut self, path: &str) -> Self {
        self.failing.insert(path.to_string());
        self
    }
}

impl ConfigResolver for MapConfig {
    fn read_config(&self, resource: &Resource) -> Result<Option<ResourceConfiguration>, RepositoryError> {
        if self.failing.contains(&resource.path) {
            return Err(RepositoryError::backend("config store unavailable"));
        }
        Ok(self.configs.get(&resource.path).copied())
    }
}

// ---------------------------------------------------------------------------
// Jobs

#[derive(Default)]
pub struct RecordingDispatcher {
    jobs: Mutex<Vec<(String, JobPayload)>>,
    failing: HashSet<String>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(mut self, path: &str) -> Self {
        self.failing.insert(path.to_string());
        self
    }

    pub fn jobs(&self) -> Vec<(String, JobPayload)> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.jobs()
            .iter()
            .filter_map(|(_, payload)| payload.get(MOVED_PATH_KEY).and_then(|v| v.as_str()).map(str::to_string))
            .collect()
    }
}

impl JobDispatcher for RecordingDispatcher {
    fn submit(&self, topic: &str, payload: JobPayload) -> Result<(), DispatchError> {
        let path = payload
            .get(MOVED_PATH_KEY)
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        if self.failing.contains(path) {
            return Err(DispatchError::Disconnected {
                topic: topic.to_string(),
            });
        }
        self.jobs.lock().unwrap().push((topic.to_string(), payload));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Repository

#[derive(Debug, Default)]
pub struct RepoCounters {
    pub logins: AtomicUsize,
    pub logouts: AtomicUsize,
    pub registered: Mutex<Vec<EventFilter>>,
    pub removals: AtomicUsize,
}

/// Parks `remove_listener` until the test releases it.
pub struct RemoveHook {
    entered: Sender<()>,
    release: Receiver<()>,
}

impl RemoveHook {
    /// The hook, a receiver signalled when `remove_listener` is entered and a
    /// sender that lets it return.
    pub fn new() -> (Arc<Self>, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = bounded(1);
        let (release_tx, release_rx) = bounded(1);
        let hook = Arc::new(Self {
            entered: entered_tx,
            release: release_rx,
        });
        (hook, entered_rx, release_tx)
    }

    fn park(&self) {
        let _ = self.entered.send(());
        let _ = self.release.recv();
    }
}

#[derive(Default)]
pub struct FakeRepository {
    pub login_error: Option<RepositoryError>,
    pub observation_error: Option<RepositoryError>,
    pub register_error: Option<RepositoryError>,
    pub remove_error: Option<RepositoryError>,
    pub remove_hook: Option<Arc<RemoveHook>>,
    pub counters: Arc<RepoCounters>,
}

impl FakeRepository {
    pub fn logins(&self) -> usize {
        self.counters.logins.load(Ordering::SeqCst)
    }

    pub fn logouts(&self) -> usize {
        self.counters.logouts.load(Ordering::SeqCst)
    }

    pub fn removals(&self) -> usize {
        self.counters.removals.load(Ordering::SeqCst)
    }

    pub fn registered(&self) -> Vec<EventFilter> {
        self.counters.registered.lock().unwrap().clone()
    }
}

impl Repository for FakeRepository {
    fn login_service(&self, identity: &str) -> Result<Box<dyn Session>, RepositoryError> {
        if let Some(err) = &self.login_error {
            return Err(err.clone());
        }
        self.counters.logins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            user_id: identity.to_string(),
            observation_error: self.observation_error.clone(),
            register_error: self.register_error.clone(),
            remove_error: self.remove_error.clone(),
            remove_hook: self.remove_hook.clone(),
            counters: Arc::clone(&self.counters),
            live: Mutex::new(true),
        }))
    }
}

struct FakeSession {
    user_id: String,
    observation_error: Option<RepositoryError>,
    register_error: Option<RepositoryError>,
    remove_error: Option<RepositoryError>,
    remove_hook: Option<Arc<RemoveHook>>,
    counters: Arc<RepoCounters>,
    live: Mutex<bool>,
}

impl Session for FakeSession {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn observation_manager(&self) -> Result<Arc<dyn ObservationManager>, RepositoryError> {
        if let Some(err) = &self.observation_error {
            return Err(err.clone());
        }
        Ok(Arc::new(FakeObservation {
            register_error: self.register_error.clone(),
            remove_error: self.remove_error.clone(),
            remove_hook: self.remove_hook.clone(),
            counters: Arc::clone(&self.counters),
        }))
    }

    fn logout(&self) {
        // Counts every call so double-logouts show up in assertions.
        *self.live.lock().unwrap() = false;
        self.counters.logouts.fetch_add(1, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        *self.live.lock().unwrap()
    }
}

struct FakeObservation {
    register_error: Option<RepositoryError>,
    remove_error: Option<RepositoryError>,
    remove_hook: Option<Arc<RemoveHook>>,
    counters: Arc<RepoCounters>,
}

impl ObservationManager for FakeObservation {
    fn add_listener(
        &self,
        filter: EventFilter,
        _listener: Arc<dyn EventListener>,
    ) -> Result<RegistrationId, RepositoryError> {
        if let Some(err) = &self.register_error {
            return Err(err.clone());
        }
        self.counters.registered.lock().unwrap().push(filter);
        Ok(RegistrationId::new())
    }

    fn remove_listener(&self, _registration: RegistrationId) -> Result<(), RepositoryError> {
        self.counters.removals.fetch_add(1, Ordering::SeqCst);
        if let Some(hook) = &self.remove_hook {
            hook.park();
        }
        match &self.remove_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

pub struct NoopListener;

impl EventListener for NoopListener {
    fn on_events(&self, _events: Vec<ChangeEvent>) {}
}
