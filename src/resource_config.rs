//! Per-resource configuration read by the move listener.
//!
//! A [`ConfigResolver`] maps a resolved resource to a [`ResourceConfiguration`].
//! Two implementations ship with the crate: one reading a JSON document embedded
//! in a resource property, and one keyed by path prefix.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::RepositoryError;
use crate::repository::Resource;

/// Property holding the embedded configuration document.
pub const CONFIG_PROPERTY: &str = "moveref:config";

/// Settings controlling reaction to moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveSettings {
    /// Whether a move should trigger a reference-update job.
    pub update_references_on_move: bool,
}

/// Configuration attached to a resource.
///
/// `settings == None` means a configuration exists but carries no usable move
/// settings (no `moveSettings` block, or one without the flag), which is as
/// undecidable as having no configuration at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawConfiguration")]
pub struct ResourceConfiguration {
    #[allow(missing_docs)]
    #[serde(rename = "moveSettings")]
    pub settings: Option<MoveSettings>,
}

impl ResourceConfiguration {
    /// Configuration with the flag set to `update`.
    #[must_use]
    pub const fn with_update(update: bool) -> Self {
        Self {
            settings: Some(MoveSettings {
                update_references_on_move: update,
            }),
        }
    }
}

/// Configuration document as stored; every level may be missing.
#[derive(Deserialize)]
struct RawConfiguration {
    #[serde(default, rename = "moveSettings")]
    settings: Option<RawMoveSettings>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMoveSettings {
    #[serde(
        default,
        alias = "updateResourceUrlOnAssetPageMove",
        deserialize_with = "flag"
    )]
    update_references_on_move: Option<bool>,
}

impl From<RawConfiguration> for ResourceConfiguration {
    fn from(raw: RawConfiguration) -> Self {
        let settings = raw
            .settings
            .and_then(|s| s.update_references_on_move)
            .map(|update| MoveSettings {
                update_references_on_move: update,
            });
        Self { settings }
    }
}

/// A bool, or a string that enables the flag only when it is exactly `"true"`.
/// `null` counts as absent.
fn flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(b)),
        Value::String(s) => Ok(Some(s == "true")),
        other => Err(serde::de::Error::custom(format!(
            "expected bool or string, got {other}"
        ))),
    }
}

/// Reads configuration for a resource.
pub trait ConfigResolver: Send + Sync {
    /// `Ok(None)` means no configuration applies to this resource.
    ///
    /// # Errors
    /// Backend failures while reading configuration content.
    fn read_config(&self, resource: &Resource) -> Result<Option<ResourceConfiguration>, RepositoryError>;
}

/// Reads the JSON document stored in the resource's [`CONFIG_PROPERTY`].
///
/// The property may hold either a JSON object or a string containing one.
#[derive(Debug, Clone, Default)]
pub struct PropertyConfigResolver;

impl ConfigResolver for PropertyConfigResolver {
    fn read_config(&self, resource: &Resource) -> Result<Option<ResourceConfiguration>, RepositoryError> {
        let Some(raw) = resource.property(CONFIG_PROPERTY) else {
            return Ok(None);
        };

        let parsed = match raw {
            Value::String(text) => serde_json::from_str::<ResourceConfiguration>(text),
            other => serde_json::from_value::<ResourceConfiguration>(other.clone()),
        };

        parsed.map(Some).map_err(|e| {
            RepositoryError::backend(format!(
                "malformed {CONFIG_PROPERTY} on {}: {e}",
                resource.path
            ))
        })
    }
}

/// Maps path prefixes to configurations; the longest matching prefix wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathPrefixConfigResolver {
    entries: BTreeMap<String, ResourceConfiguration>,
}

impl PathPrefixConfigResolver {
    /// Empty resolver; every lookup misses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, prefix: impl Into<String>, config: ResourceConfiguration) -> Self {
        self.insert(prefix, config);
        self
    }

    /// Attach `config` to every path at or below `prefix`.
    pub fn insert(&mut self, prefix: impl Into<String>, config: ResourceConfiguration) {
        let prefix = prefix.into();
        let key = if prefix.len() > 1 {
            prefix.trim_end_matches('/').to_string()
        } else {
            prefix
        };
        self.entries.insert(key, config);
    }

    fn lookup(&self, path: &str) -> Option<ResourceConfiguration> {
        self.entries
            .iter()
            .filter(|(prefix, _)| {
                prefix.as_str() == "/"
                    || path == prefix.as_str()
                    || path
                        .strip_prefix(prefix.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, config)| *config)
    }
}

impl ConfigResolver for PathPrefixConfigResolver {
    fn read_config(&self, resource: &Resource) -> Result<Option<ResourceConfiguration>, RepositoryError> {
        Ok(self.lookup(&resource.path))
    }
}
