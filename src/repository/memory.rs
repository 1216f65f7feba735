//! In-memory repository backend.
//!
//! This module provides a thread-safe node tree implementing the repository
//! traits: service sessions, observation with filtered batch delivery, and
//! service resolvers. It is intended for embedded usage, tests, and as a
//! reference implementation.
//!
//! Every mutating call (or [`InMemoryRepository::batch`]) produces one event
//! batch. Batches are delivered on a dedicated `moveref-observation` thread, one
//! at a time, so listeners never run on the thread that made the change.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde_json::{Map, Value};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::event::{ChangeEvent, EventKind, EventOrigin};
use crate::filter::EventFilter;

use super::traits::{
    EventListener, ObservationManager, RegistrationId, Repository, Resource, ResolverFactory,
    ResourceResolver, Session,
};

#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub struct MemoryRepositoryConfig {
    /// Identities accepted by `login_service` and `service_resolver`.
    /// Empty accepts any identity.
    pub service_identities: Vec<String>,
    /// Whether sessions expose an observation manager.
    pub observation_supported: bool,
    /// Max queued event batches before new batches are dropped.
    pub delivery_queue_capacity: usize,
}

impl Default for MemoryRepositoryConfig {
    fn default() -> Self {
        Self {
            service_identities: Vec::new(),
            observation_supported: true,
            delivery_queue_capacity: 1024,
        }
    }
}

/// Who made a change. Decides the [`EventOrigin`] each listener sees.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Actor {
    /// A session opened for this service identity. Listeners registered by a
    /// session of the same identity see the change as local.
    Service(String),
    /// Some other session on this instance.
    Anonymous,
    /// Another cluster instance.
    Cluster,
}

impl Actor {
    fn origin_for(&self, listener_identity: &str) -> EventOrigin {
        match self {
            Self::Service(id) if id == listener_identity => EventOrigin::Local,
            Self::Service(_) | Self::Anonymous => EventOrigin::SameInstance,
            Self::Cluster => EventOrigin::External,
        }
    }
}

#[derive(Debug, Clone)]
struct Node {
    node_type: String,
    properties: Map<String, Value>,
}

struct ListenerEntry {
    session: Uuid,
    identity: String,
    filter: Arc<EventFilter>,
    listener: Arc<dyn EventListener>,
}

enum DeliveryMsg {
    Batch { actor: Actor, events: Vec<ChangeEvent> },
    Flush { reply: Sender<()> },
}

struct Shared {
    cfg: MemoryRepositoryConfig,
    nodes: RwLock<BTreeMap<String, Node>>,
    listeners: RwLock<HashMap<RegistrationId, ListenerEntry>>,
    failing_paths: RwLock<HashSet<String>>,
    open_sessions: AtomicUsize,
    open_resolvers: AtomicUsize,
    leaked_resolvers: AtomicU64,
}

impl Shared {
    fn check_identity(&self, identity: &str) -> Result<(), RepositoryError> {
        if self.cfg.service_identities.is_empty()
            || self.cfg.service_identities.iter().any(|id| id == identity)
        {
            return Ok(());
        }
        Err(RepositoryError::LoginFailed {
            identity: identity.to_string(),
            reason: "unknown service identity".to_string(),
        })
    }

    fn drop_session_listeners(&self, session: Uuid) {
        match self.listeners.write() {
            Ok(mut guard) => guard.retain(|_, entry| entry.session != session),
            Err(_) => warn!("listener table lock poisoned; session listeners not dropped"),
        }
    }
}

fn lock_err(context: &'static str) -> RepositoryError {
    RepositoryError::backend(format!("poisoned lock: {context}"))
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rsplit_once('/') {
        Some(("", _)) if path.len() > 1 => Some("/"),
        Some((parent, _)) if !parent.is_empty() => Some(parent),
        _ => None,
    }
}

fn validate_path(path: &str) -> Result<(), RepositoryError> {
    let ok = path.starts_with('/')
        && (path == "/" || !path.ends_with('/'))
        && !path.contains("//");
    if ok {
        Ok(())
    } else {
        Err(RepositoryError::backend(format!("invalid path '{path}'")))
    }
}

fn in_subtree(candidate: &str, root: &str) -> bool {
    candidate == root
        || candidate
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Mutations applied under one write lock and published as one event batch.
///
/// Changes are not transactional: mutations that succeeded before an error stay
/// applied and their events are still published.
pub struct MemoryBatch<'a> {
    nodes: &'a mut BTreeMap<String, Node>,
    events: Vec<ChangeEvent>,
}

impl MemoryBatch<'_> {
    /// Returns true if a node exists at `path`, counting this batch's changes.
    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.nodes.contains_key(path)
    }

    /// Create a node. The parent must exist.
    pub fn add_node(&mut self, path: &str, node_type: &str) -> Result<(), RepositoryError> {
        validate_path(path)?;
        if self.nodes.contains_key(path) {
            return Err(RepositoryError::backend(format!("node already exists: {path}")));
        }
        let parent = parent_of(path)
            .ok_or_else(|| RepositoryError::backend("cannot add the root node"))?;
        if !self.nodes.contains_key(parent) {
            return Err(RepositoryError::backend(format!("parent not found: {parent}")));
        }

        self.nodes.insert(
            path.to_string(),
            Node {
                node_type: node_type.to_string(),
                properties: Map::new(),
            },
        );
        self.events.push(ChangeEvent::at(
            EventKind::NodeAdded,
            path,
            node_type,
            EventOrigin::SameInstance,
        ));
        Ok(())
    }

    /// Set a property on an existing node.
    pub fn set_property(&mut self, path: &str, name: &str, value: Value) -> Result<(), RepositoryError> {
        let node = self
            .nodes
            .get_mut(path)
            .ok_or_else(|| RepositoryError::backend(format!("node not found: {path}")))?;
        node.properties.insert(name.to_string(), value);
        let node_type = node.node_type.clone();
        self.events.push(ChangeEvent::at(
            EventKind::PropertyChanged,
            path,
            node_type,
            EventOrigin::SameInstance,
        ));
        Ok(())
    }

    /// Move a node and its whole subtree. Emits one `Moved` event for the moved node.
    pub fn move_node(&mut self, from: &str, to: &str) -> Result<(), RepositoryError> {
        validate_path(from)?;
        validate_path(to)?;
        if from == "/" {
            return Err(RepositoryError::backend("cannot move the root node"));
        }
        let Some(node_type) = self.nodes.get(from).map(|n| n.node_type.clone()) else {
            return Err(RepositoryError::backend(format!("node not found: {from}")));
        };
        if self.nodes.contains_key(to) {
            return Err(RepositoryError::backend(format!("node already exists: {to}")));
        }
        if in_subtree(to, from) {
            return Err(RepositoryError::backend(format!("cannot move {from} below itself")));
        }
        match parent_of(to) {
            Some(parent) if self.nodes.contains_key(parent) => {}
            _ => return Err(RepositoryError::backend(format!("destination parent missing for {to}"))),
        }

        let moved: Vec<String> = self
            .nodes
            .range(from.to_string()..)
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(from))
            .filter(|k| in_subtree(k, from))
            .cloned()
            .collect();
        for old in moved {
            if let Some(node) = self.nodes.remove(&old) {
                let new = format!("{to}{}", &old[from.len()..]);
                self.nodes.insert(new, node);
            }
        }

        self.events.push(ChangeEvent::moved(from, to, node_type, EventOrigin::SameInstance));
        Ok(())
    }

    /// Remove a node and its subtree.
    pub fn remove_node(&mut self, path: &str) -> Result<(), RepositoryError> {
        if path == "/" {
            return Err(RepositoryError::backend("cannot remove the root node"));
        }
        let Some(node_type) = self.nodes.get(path).map(|n| n.node_type.clone()) else {
            return Err(RepositoryError::backend(format!("node not found: {path}")));
        };
        self.nodes.retain(|k, _| !in_subtree(k, path));
        self.events.push(ChangeEvent::at(
            EventKind::NodeRemoved,
            path,
            node_type,
            EventOrigin::SameInstance,
        ));
        Ok(())
    }
}

/// In-memory content repository.
pub struct InMemoryRepository {
    shared: Arc<Shared>,
    delivery_tx: Sender<DeliveryMsg>,
    dropped_batches: AtomicU64,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for InMemoryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRepository")
            .field("cfg", &self.shared.cfg)
            .field("open_sessions", &self.open_sessions())
            .field("open_resolvers", &self.open_resolvers())
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new(MemoryRepositoryConfig::default())
    }
}

impl InMemoryRepository {
    /// Create an empty repository containing only the root node `/`.
    ///
    /// # Panics
    /// Panics if the observation delivery thread cannot be spawned.
    #[must_use]
    pub fn new(cfg: MemoryRepositoryConfig) -> Self {
        let capacity = cfg.delivery_queue_capacity.max(1);
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                node_type: "rep:root".to_string(),
                properties: Map::new(),
            },
        );

        let shared = Arc::new(Shared {
            cfg,
            nodes: RwLock::new(nodes),
            listeners: RwLock::new(HashMap::new()),
            failing_paths: RwLock::new(HashSet::new()),
            open_sessions: AtomicUsize::new(0),
            open_resolvers: AtomicUsize::new(0),
            leaked_resolvers: AtomicU64::new(0),
        });

        let (delivery_tx, delivery_rx) = bounded::<DeliveryMsg>(capacity);
        let thread_shared = Arc::clone(&shared);
        let join = thread::Builder::new()
            .name("moveref-observation".to_string())
            .spawn(move || delivery_loop(&thread_shared, &delivery_rx))
            .expect("failed to spawn moveref observation thread");

        Self {
            shared,
            delivery_tx,
            dropped_batches: AtomicU64::new(0),
            join: Mutex::new(Some(join)),
        }
    }

    /// Apply several mutations as `actor` and publish their events as one batch.
    pub fn batch<F>(&self, actor: Actor, f: F) -> Result<(), RepositoryError>
    where
        F: FnOnce(&mut MemoryBatch<'_>) -> Result<(), RepositoryError>,
    {
        let mut nodes = self.shared.nodes.write().map_err(|_| lock_err("nodes"))?;
        let mut batch = MemoryBatch {
            nodes: &mut nodes,
            events: Vec::new(),
        };
        let result = f(&mut batch);
        let events = batch.events;

        // Enqueued before the tree unlocks so batches are delivered in mutation order.
        if !events.is_empty() {
            self.publish(actor, events);
        }
        drop(nodes);
        result
    }

    /// Create a node as an anonymous same-instance session.
    pub fn add_node(&self, path: &str, node_type: &str) -> Result<(), RepositoryError> {
        self.batch(Actor::Anonymous, |b| b.add_node(path, node_type))
    }

    /// Set a property as an anonymous same-instance session.
    pub fn set_property(&self, path: &str, name: &str, value: Value) -> Result<(), RepositoryError> {
        self.batch(Actor::Anonymous, |b| b.set_property(path, name, value))
    }

    /// Move a subtree as an anonymous same-instance session.
    pub fn move_node(&self, from: &str, to: &str) -> Result<(), RepositoryError> {
        self.batch(Actor::Anonymous, |b| b.move_node(from, to))
    }

    /// Remove a subtree as an anonymous same-instance session.
    pub fn remove_node(&self, path: &str) -> Result<(), RepositoryError> {
        self.batch(Actor::Anonymous, |b| b.remove_node(path))
    }

    /// Publish raw events as one batch without touching the tree.
    ///
    /// The origin of each event is recomputed per listener from `actor`.
    pub fn publish(&self, actor: Actor, events: Vec<ChangeEvent>) {
        match self.delivery_tx.try_send(DeliveryMsg::Batch { actor, events }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped_batches.fetch_add(1, Ordering::Relaxed);
                warn!("observation queue unavailable; event batch dropped");
            }
        }
    }

    /// Block until every batch published so far has been delivered.
    pub fn flush(&self) -> Result<(), RepositoryError> {
        let closed = || RepositoryError::Closed {
            what: "observation queue".to_string(),
        };
        let (reply_tx, reply_rx) = bounded::<()>(1);
        self.delivery_tx
            .send(DeliveryMsg::Flush { reply: reply_tx })
            .map_err(|_| closed())?;
        reply_rx.recv().map_err(|_| closed())
    }

    /// Make resolution of `path` fail with a backend error until cleared.
    pub fn fail_resolution_at(&self, path: &str) {
        if let Ok(mut guard) = self.shared.failing_paths.write() {
            guard.insert(path.to_string());
        }
    }

    /// Clear all injected resolution failures.
    pub fn clear_failures(&self) {
        if let Ok(mut guard) = self.shared.failing_paths.write() {
            guard.clear();
        }
    }

    /// Whether a node exists at `path`.
    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        self.shared
            .nodes
            .read()
            .map(|nodes| nodes.contains_key(path))
            .unwrap_or(false)
    }

    /// Node type at `path`, if the node exists.
    #[must_use]
    pub fn node_type(&self, path: &str) -> Option<String> {
        self.shared
            .nodes
            .read()
            .ok()
            .and_then(|nodes| nodes.get(path).map(|n| n.node_type.clone()))
    }

    /// Service sessions not yet logged out.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.shared.open_sessions.load(Ordering::Acquire)
    }

    /// Service resolvers not yet closed.
    #[must_use]
    pub fn open_resolvers(&self) -> usize {
        self.shared.open_resolvers.load(Ordering::Acquire)
    }

    /// Resolvers that were dropped without being closed.
    #[must_use]
    pub fn leaked_resolvers(&self) -> u64 {
        self.shared.leaked_resolvers.load(Ordering::Relaxed)
    }

    /// Registered observation listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.read().map(|l| l.len()).unwrap_or(0)
    }

    /// Event batches dropped because the delivery queue was full.
    #[must_use]
    pub fn dropped_batches(&self) -> u64 {
        self.dropped_batches.load(Ordering::Relaxed)
    }
}

impl Repository for InMemoryRepository {
    fn login_service(&self, identity: &str) -> Result<Box<dyn Session>, RepositoryError> {
        self.shared.check_identity(identity)?;
        self.shared.open_sessions.fetch_add(1, Ordering::AcqRel);
        debug!(identity, "service session opened");
        Ok(Box::new(MemorySession {
            id: Uuid::new_v4(),
            shared: Arc::clone(&self.shared),
            user_id: identity.to_string(),
            live: AtomicBool::new(true),
        }))
    }
}

impl ResolverFactory for InMemoryRepository {
    fn service_resolver(&self, identity: &str) -> Result<Box<dyn ResourceResolver>, RepositoryError> {
        self.shared.check_identity(identity)?;
        self.shared.open_resolvers.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(MemoryResolver {
            shared: Arc::clone(&self.shared),
            live: true,
        }))
    }
}

impl Drop for InMemoryRepository {
    fn drop(&mut self) {
        // Close the delivery channel so the worker exits once the queue drains.
        let (dummy_tx, _) = bounded::<DeliveryMsg>(1);
        drop(std::mem::replace(&mut self.delivery_tx, dummy_tx));

        // Detach rather than join: the last handle may be dropped from inside a
        // listener callback running on the delivery thread itself.
        if let Ok(mut guard) = self.join.lock() {
            drop(guard.take());
        }
    }
}

fn delivery_loop(shared: &Shared, rx: &Receiver<DeliveryMsg>) {
    for msg in rx {
        match msg {
            DeliveryMsg::Batch { actor, events } => deliver(shared, &actor, &events),
            DeliveryMsg::Flush { reply } => {
                let _ = reply.send(());
            }
        }
    }
}

fn deliver(shared: &Shared, actor: &Actor, events: &[ChangeEvent]) {
    let targets: Vec<(String, Arc<EventFilter>, Arc<dyn EventListener>)> = match shared.listeners.read() {
        Ok(guard) => guard
            .values()
            .map(|e| (e.identity.clone(), Arc::clone(&e.filter), Arc::clone(&e.listener)))
            .collect(),
        Err(_) => {
            error!("listener table lock poisoned; batch not delivered");
            return;
        }
    };

    for (identity, filter, listener) in targets {
        let origin = actor.origin_for(&identity);
        let batch: Vec<ChangeEvent> = events
            .iter()
            .map(|e| ChangeEvent { origin, ..e.clone() })
            .filter(|e| filter.matches(e))
            .collect();
        if batch.is_empty() {
            continue;
        }

        // A panicking listener must not take the delivery thread down with it.
        if panic::catch_unwind(AssertUnwindSafe(|| listener.on_events(batch))).is_err() {
            error!(identity = %identity, "event listener panicked while handling a batch");
        }
    }
}

struct MemorySession {
    id: Uuid,
    shared: Arc<Shared>,
    user_id: String,
    live: AtomicBool,
}

impl Session for MemorySession {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn observation_manager(&self) -> Result<Arc<dyn ObservationManager>, RepositoryError> {
        if !self.is_live() {
            return Err(RepositoryError::Closed {
                what: "session".to_string(),
            });
        }
        if !self.shared.cfg.observation_supported {
            return Err(RepositoryError::UnsupportedOperation {
                operation: "observation".to_string(),
            });
        }
        Ok(Arc::new(MemoryObservation {
            session: self.id,
            identity: self.user_id.clone(),
            shared: Arc::clone(&self.shared),
        }))
    }

    fn logout(&self) {
        if self.live.swap(false, Ordering::AcqRel) {
            self.shared.drop_session_listeners(self.id);
            self.shared.open_sessions.fetch_sub(1, Ordering::AcqRel);
            debug!(identity = %self.user_id, "service session closed");
        }
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.logout();
    }
}

struct MemoryObservation {
    session: Uuid,
    identity: String,
    shared: Arc<Shared>,
}

impl ObservationManager for MemoryObservation {
    fn add_listener(
        &self,
        filter: EventFilter,
        listener: Arc<dyn EventListener>,
    ) -> Result<RegistrationId, RepositoryError> {
        let id = RegistrationId::new();
        let mut guard = self.shared.listeners.write().map_err(|_| lock_err("listeners"))?;
        guard.insert(
            id,
            ListenerEntry {
                session: self.session,
                identity: self.identity.clone(),
                filter: Arc::new(filter),
                listener,
            },
        );
        Ok(id)
    }

    fn remove_listener(&self, registration: RegistrationId) -> Result<(), RepositoryError> {
        let mut guard = self.shared.listeners.write().map_err(|_| lock_err("listeners"))?;
        match guard.remove(&registration) {
            Some(_) => Ok(()),
            None => Err(RepositoryError::RegistrationNotFound {
                registration: registration.to_string(),
            }),
        }
    }
}

struct MemoryResolver {
    shared: Arc<Shared>,
    live: bool,
}

impl ResourceResolver for MemoryResolver {
    fn resolve(&self, path: &str) -> Result<Option<Resource>, RepositoryError> {
        if !self.live {
            return Err(RepositoryError::Closed {
                what: "resource resolver".to_string(),
            });
        }
        let failing = self
            .shared
            .failing_paths
            .read()
            .map_err(|_| lock_err("failing_paths"))?
            .contains(path);
        if failing {
            return Err(RepositoryError::backend(format!("read failed at {path}")));
        }

        let nodes = self.shared.nodes.read().map_err(|_| lock_err("nodes"))?;
        Ok(nodes.get(path).map(|node| Resource {
            path: path.to_string(),
            resource_type: node.node_type.clone(),
            properties: node.properties.clone(),
        }))
    }

    fn close(&mut self) {
        if self.live {
            self.live = false;
            self.shared.open_resolvers.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

impl Drop for MemoryResolver {
    fn drop(&mut self) {
        if self.live {
            warn!("service resolver dropped without close");
            self.shared.leaked_resolvers.fetch_add(1, Ordering::Relaxed);
            self.close();
        }
    }
}
