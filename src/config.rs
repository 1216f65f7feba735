//! Listener configuration.
//!
//! `ListenerConfig` is deserialized from JSON with every field optional. Only
//! the service identity and the job topic are configurable; the registered
//! filter is always [`crate::filter::EventFilter::move_watch`].

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Service identity used for both the subscription session and batch resolvers.
pub const DEFAULT_SERVICE_IDENTITY: &str = "moveref-service";

/// Topic of reference-update jobs queued after an asset or page move.
pub const MOVE_JOB_TOPIC: &str = "com/sample/moveref/job/asset-page-move";

#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ListenerConfig {
    pub service_identity: String,
    pub job_topic: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            service_identity: DEFAULT_SERVICE_IDENTITY.to_string(),
            job_topic: MOVE_JOB_TOPIC.to_string(),
        }
    }
}

impl ListenerConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(json)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Check field invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_identity.trim().is_empty() {
            return Err(invalid("service_identity", "must not be empty"));
        }
        if self.job_topic.trim().is_empty() {
            return Err(invalid("job_topic", "must not be empty"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
