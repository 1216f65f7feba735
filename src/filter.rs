//! Server-side event filters.
//!
//! An [`EventFilter`] scopes which change events are delivered to a listener:
//! by subtree, depth, node type, event kind and origin locality. The filter is
//! built once and never changes for the lifetime of a registration.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::event::{ChangeEvent, EventKind, EventOrigin};

/// Content root watched for moves.
pub const CONTENT_ROOT: &str = "/content";

/// Ordered folder node type.
pub const NT_SLING_ORDERED_FOLDER: &str = "sling:OrderedFolder";
/// Generic Sling folder node type.
pub const NT_SLING_FOLDER: &str = "sling:Folder";
/// Typed JCR folder node type.
pub const NT_FOLDER: &str = "nt:folder";
/// Page node type.
pub const NT_PAGE: &str = "cq:Page";

/// Node types whose moves trigger a reference update.
pub const MOVE_NODE_TYPES: [&str; 4] = [NT_SLING_ORDERED_FOLDER, NT_SLING_FOLDER, NT_FOLDER, NT_PAGE];

/// Scope of a listener registration.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub root_path: String,
    pub include_descendants: bool,
    /// Empty means any node type.
    pub node_types: BTreeSet<String>,
    pub exclude_local_origin: bool,
    pub exclude_external_origin: bool,
    /// Empty means any event kind.
    pub event_kinds: BTreeSet<EventKind>,
}

impl EventFilter {
    /// Start building a filter rooted at `root_path`.
    #[must_use]
    pub fn builder(root_path: impl Into<String>) -> EventFilterBuilder {
        EventFilterBuilder {
            filter: Self {
                root_path: root_path.into(),
                include_descendants: false,
                node_types: BTreeSet::new(),
                exclude_local_origin: false,
                exclude_external_origin: false,
                event_kinds: BTreeSet::new(),
            },
        }
    }

    /// The filter the move listener registers with: moves of folders and pages
    /// anywhere below `/content`, caused by other sessions on this instance.
    #[must_use]
    pub fn move_watch() -> Self {
        Self::builder(CONTENT_ROOT)
            .event_kinds([EventKind::Moved])
            .include_descendants(true)
            .exclude_local_origin(true)
            .node_types(MOVE_NODE_TYPES)
            .exclude_external_origin(true)
            .build()
    }

    /// Returns true if `event` falls inside this filter's scope.
    #[must_use]
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if !self.event_kinds.is_empty() && !self.event_kinds.contains(&event.kind) {
            return false;
        }

        match event.origin {
            EventOrigin::Local if self.exclude_local_origin => return false,
            EventOrigin::External if self.exclude_external_origin => return false,
            _ => {}
        }

        if !self.node_types.is_empty() && !self.node_types.contains(&event.node_type) {
            return false;
        }

        self.covers_path(&event.path)
    }

    fn covers_path(&self, path: &str) -> bool {
        let root = self.root_path.trim_end_matches('/');
        if self.include_descendants {
            if root.is_empty() {
                return path.starts_with('/');
            }
            return path == root
                || path
                    .strip_prefix(root)
                    .is_some_and(|rest| rest.starts_with('/'));
        }

        // Shallow filters only see direct children of the root.
        match path.rsplit_once('/') {
            Some((parent, _)) => parent == root,
            None => false,
        }
    }
}

/// Consuming builder for [`EventFilter`].
#[derive(Debug, Clone)]
pub struct EventFilterBuilder {
    filter: EventFilter,
}

impl EventFilterBuilder {
    /// Whether events below the root (at any depth) are included.
    #[must_use]
    pub const fn include_descendants(mut self, deep: bool) -> Self {
        self.filter.include_descendants = deep;
        self
    }

    /// Restrict to nodes of these primary types.
    #[must_use]
    pub fn node_types(mut self, types: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.filter.node_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to these event kinds.
    #[must_use]
    pub fn event_kinds(mut self, kinds: impl IntoIterator<Item = EventKind>) -> Self {
        self.filter.event_kinds = kinds.into_iter().collect();
        self
    }

    /// Drop events caused by the registering session.
    #[must_use]
    pub const fn exclude_local_origin(mut self, exclude: bool) -> Self {
        self.filter.exclude_local_origin = exclude;
        self
    }

    /// Drop events replayed from other cluster instances.
    #[must_use]
    pub const fn exclude_external_origin(mut self, exclude: bool) -> Self {
        self.filter.exclude_external_origin = exclude;
        self
    }

    /// Finish the filter.
    #[must_use]
    pub fn build(self) -> EventFilter {
        self.filter
    }
}
