//! Structured confinement events and stable error codes.
//!
//! Every classification, prelude build and gate decision emits a
//! [`ConfinementEvent`] with stable observability keys
//! (`trace_id`/`decision_id`/`policy_id`/`component`/`event`/`outcome`/
//! `error_code`). Events are accumulated in an owned log and drained by the
//! embedder; nothing is written to a global sink.

use serde::{Deserialize, Serialize};

pub const CLASSIFIER_COMPONENT: &str = "binding_classifier";
pub const PRELUDE_COMPONENT: &str = "scope_prelude";
pub const GATE_COMPONENT: &str = "revocation_gate";
pub const CONFINEMENT_COMPONENT: &str = "confinement";

/// Attempted use of a revoked capability.
pub const FE_CONF_CAPABILITY_REVOKED: &str = "FE-CONF-0001";
/// Host compiler fault converted into revocation.
pub const FE_CONF_HOST_FAULT: &str = "FE-CONF-0002";
/// Guest code threw after successful compilation.
pub const FE_CONF_GUEST_THROW: &str = "FE-CONF-0003";
/// Explicit operator revocation.
pub const FE_CONF_OPERATOR_REVOKED: &str = "FE-CONF-0004";
/// Configuration could not be parsed or serialized.
pub const FE_CONF_INVALID_CONFIG: &str = "FE-CONF-0005";

/// Correlation keys shared by every event of one confinement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    pub trace_id: String,
    pub decision_id: String,
    pub policy_id: String,
}

impl EventContext {
    pub fn new(
        trace_id: impl Into<String>,
        decision_id: impl Into<String>,
        policy_id: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: trace_id.into(),
            decision_id: decision_id.into(),
            policy_id: policy_id.into(),
        }
    }
}

/// One structured event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfinementEvent {
    pub trace_id: String,
    pub decision_id: String,
    pub policy_id: String,
    pub component: String,
    pub event: String,
    pub outcome: String,
    pub error_code: Option<String>,
    /// Gate call depth, for gate events.
    pub call_depth: Option<u32>,
    pub detail: Option<String>,
}

impl ConfinementEvent {
    pub fn new(
        ctx: &EventContext,
        component: &str,
        event: impl Into<String>,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            trace_id: ctx.trace_id.clone(),
            decision_id: ctx.decision_id.clone(),
            policy_id: ctx.policy_id.clone(),
            component: component.to_string(),
            event: event.into(),
            outcome: outcome.into(),
            error_code: None,
            call_depth: None,
            detail: None,
        }
    }

    pub fn with_error_code(mut self, code: &str) -> Self {
        self.error_code = Some(code.to_string());
        self
    }

    pub fn with_call_depth(mut self, depth: u32) -> Self {
        self.call_depth = Some(depth);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_carries_context_keys() {
        let ctx = EventContext::new("t-1", "d-1", "p-1");
        let event = ConfinementEvent::new(&ctx, GATE_COMPONENT, "host_fault", "revoked")
            .with_error_code(FE_CONF_HOST_FAULT)
            .with_call_depth(3);
        assert_eq!(event.trace_id, "t-1");
        assert_eq!(event.decision_id, "d-1");
        assert_eq!(event.policy_id, "p-1");
        assert_eq!(event.component, "revocation_gate");
        assert_eq!(event.error_code.as_deref(), Some("FE-CONF-0002"));
        assert_eq!(event.call_depth, Some(3));
        assert!(event.detail.is_none());
    }

    #[test]
    fn error_codes_are_distinct() {
        let codes = [
            FE_CONF_CAPABILITY_REVOKED,
            FE_CONF_HOST_FAULT,
            FE_CONF_GUEST_THROW,
            FE_CONF_OPERATOR_REVOKED,
            FE_CONF_INVALID_CONFIG,
        ];
        let unique: std::collections::BTreeSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn event_serde_roundtrip() {
        let ctx = EventContext::new("t", "d", "p");
        let event = ConfinementEvent::new(&ctx, CLASSIFIER_COMPONENT, "classified", "pass")
            .with_detail("constants=3");
        let json = serde_json::to_string(&event).unwrap();
        let back: ConfinementEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
