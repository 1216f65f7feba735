//! Change events emitted by the content repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of structural change observed in the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A node was created.
    NodeAdded,
    /// A node was removed.
    NodeRemoved,
    /// A node (with its subtree) was moved to a new path.
    Moved,
    /// A property on a node was added, changed or removed.
    PropertyChanged,
}

/// Where the change that produced an event originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOrigin {
    /// Caused by the session that registered the listener.
    Local,
    /// Caused by another session on the same repository instance.
    SameInstance,
    /// Caused on another cluster instance and replayed here.
    External,
}

/// A single change notification.
///
/// Events are immutable and consumed exactly once per delivery.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Absolute path of the affected node after the change.
    pub path: String,
    pub kind: EventKind,
    /// Path the node occupied before a move. Equal to `path` for other kinds.
    pub origin_subtree: String,
    /// Primary node type of the affected node.
    pub node_type: String,
    pub origin: EventOrigin,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Creates a `Moved` event for a node that went from `from` to `to`.
    #[must_use]
    pub fn moved(
        from: impl Into<String>,
        to: impl Into<String>,
        node_type: impl Into<String>,
        origin: EventOrigin,
    ) -> Self {
        Self {
            path: to.into(),
            kind: EventKind::Moved,
            origin_subtree: from.into(),
            node_type: node_type.into(),
            origin,
            timestamp: Utc::now(),
        }
    }

    /// Creates an event of any non-move kind at `path`.
    #[must_use]
    pub fn at(
        kind: EventKind,
        path: impl Into<String>,
        node_type: impl Into<String>,
        origin: EventOrigin,
    ) -> Self {
        let path = path.into();
        Self {
            origin_subtree: path.clone(),
            path,
            kind,
            node_type: node_type.into(),
            origin,
            timestamp: Utc::now(),
        }
    }
}
