//! Confinement configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::confinement_event::{EventContext, FE_CONF_INVALID_CONFIG};

/// What the gate records about a host fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultDiagnostics {
    /// Record only that a fault happened and which capability it hit.
    #[default]
    Silent,
    /// Also record the host fault kind and detail in the event log. The
    /// detail never reaches guest code either way.
    Record,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfinementConfig {
    pub trace_id: String,
    pub decision_id: String,
    pub policy_id: String,
    pub fault_diagnostics: FaultDiagnostics,
    /// Pre-bind stable globals as `const` locals. When off, every guest read
    /// goes through the scope chain.
    pub optimize_constants: bool,
}

impl Default for ConfinementConfig {
    fn default() -> Self {
        Self {
            trace_id: "confinement".to_string(),
            decision_id: "confinement-default".to_string(),
            policy_id: "confinement-policy-v1".to_string(),
            fault_diagnostics: FaultDiagnostics::Silent,
            optimize_constants: true,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid confinement config: {0}")]
    Parse(String),
    #[error("serialization failure: {0}")]
    Serialization(String),
}

impl ConfigError {
    pub fn stable_code(&self) -> &'static str {
        FE_CONF_INVALID_CONFIG
    }
}

impl ConfinementConfig {
    /// Parse from JSON. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|error| ConfigError::Parse(error.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self)
            .map_err(|error| ConfigError::Serialization(error.to_string()))
    }

    pub fn event_context(&self) -> EventContext {
        EventContext::new(&self.trace_id, &self.decision_id, &self.policy_id)
    }
}
