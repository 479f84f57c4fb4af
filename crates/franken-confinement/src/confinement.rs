//! One confinement instance: primordials, global bindings and the gate.
//!
//! Construction order matters. [`Confinement::new`] captures primordials
//! from the realm's intrinsics before it returns, i.e. before any guest code
//! can have run in the realm, and creates a fresh, armed revocation cell
//! that no other confinement shares.
//!
//! `evaluate_script` is the per-unit pipeline:
//!
//! 1. classify the confined global against the endowments
//! 2. build the scope prelude and splice it in front of the guest source
//! 3. evaluate the unit through the revocation gate

use crate::binding_classifier::{
    ClassificationReport, ClassifiedConstants, Exclusions, classify_with_report,
};
use crate::config::ConfinementConfig;
use crate::confinement_event::{CONFINEMENT_COMPONENT, ConfinementEvent};
use crate::object_model::{BindingSource, JsValue};
use crate::primordials::{Intrinsics, Primordials};
use crate::revocation_gate::{
    CapabilityHandle, ConfinementError, HostEvaluator, RevocationCell, RevocationGate,
    RevocationState,
};
use crate::scope_prelude::{PreludeFragment, build_prelude};

#[derive(Debug)]
pub struct Confinement {
    config: ConfinementConfig,
    primordials: Primordials,
    global: BindingSource,
    gate: RevocationGate,
}

impl Confinement {
    pub fn new(
        intrinsics: &Intrinsics,
        global: BindingSource,
        host: Box<dyn HostEvaluator>,
        config: ConfinementConfig,
    ) -> Self {
        let primordials = Primordials::capture(intrinsics);
        let gate = RevocationGate::new(host, RevocationCell::new(), &config);
        Self {
            config,
            primordials,
            global,
            gate,
        }
    }

    pub fn config(&self) -> &ConfinementConfig {
        &self.config
    }

    pub fn primordials(&self) -> &Primordials {
        &self.primordials
    }

    pub fn global(&self) -> &BindingSource {
        &self.global
    }

    /// Realm-side access for installing or redefining globals.
    pub fn global_mut(&mut self) -> &mut BindingSource {
        &mut self.global
    }

    pub fn gate(&self) -> &RevocationGate {
        &self.gate
    }

    pub fn revocation_state(&self) -> RevocationState {
        self.gate.state()
    }

    /// The value of `globalThis.eval` inside this confinement.
    pub fn global_eval(&self) -> CapabilityHandle {
        self.gate.confined_eval()
    }

    /// Constants that would be pre-bound for a unit run with `endowments`.
    pub fn constants_for<E: Exclusions + ?Sized>(&self, endowments: &E) -> ClassifiedConstants {
        if !self.config.optimize_constants {
            return ClassifiedConstants::empty();
        }
        self.classify(endowments).constants
    }

    /// Prelude for a unit run with `endowments`.
    pub fn prelude_for<E: Exclusions + ?Sized>(&self, endowments: &E) -> PreludeFragment {
        build_prelude(&self.constants_for(endowments), &self.primordials)
    }

    /// Classify the global, splice the prelude, evaluate through the gate.
    pub fn evaluate_script<E: Exclusions + ?Sized>(
        &self,
        source: &str,
        endowments: &E,
    ) -> Result<JsValue, ConfinementError> {
        let prelude = if self.config.optimize_constants {
            let report = self.classify(endowments);
            self.gate.record(report.to_event(self.gate.context()));
            build_prelude(&report.constants, &self.primordials)
        } else {
            PreludeFragment::empty()
        };
        self.gate.record(prelude.to_event(self.gate.context()));

        let unit = prelude.splice(source);
        let result = self.gate.evaluate(&unit);

        let outcome = match &result {
            Ok(_) => "completed",
            Err(ConfinementError::GuestThrow(_)) => "guest_throw",
            Err(ConfinementError::CapabilityRevoked { .. }) => "denied",
        };
        let mut event = ConfinementEvent::new(
            self.gate.context(),
            CONFINEMENT_COMPONENT,
            "script_evaluated",
            outcome,
        )
        .with_detail(format!("state={}", self.gate.state()));
        if let Err(error) = &result {
            event = event.with_error_code(error.stable_code());
        }
        self.gate.record(event);
        result
    }

    /// Drain every event recorded by this confinement, in order.
    pub fn drain_events(&self) -> Vec<ConfinementEvent> {
        self.gate.drain_events()
    }

    fn classify<E: Exclusions + ?Sized>(&self, endowments: &E) -> ClassificationReport {
        classify_with_report(&self.global, endowments, &self.primordials)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    use super::*;
    use crate::binding_classifier::NoExclusions;
    use crate::object_model::PropertyDescriptor;
    use crate::revocation_gate::{EvalIdentity, FnHost, GuestError};

    fn global() -> BindingSource {
        BindingSource::from_descriptors([
            ("Infinity", PropertyDescriptor::data_frozen(JsValue::Int(i64::MAX))),
            ("undefined", PropertyDescriptor::data_frozen(JsValue::Undefined)),
            ("eval", PropertyDescriptor::data_frozen(JsValue::Undefined)),
            ("counter", PropertyDescriptor::data(JsValue::Int(0))),
        ])
    }

    fn echo_confinement(config: ConfinementConfig) -> (Confinement, Rc<RefCell<Vec<String>>>) {
        let units: Rc<RefCell<Vec<String>>> = Rc::default();
        let log = Rc::clone(&units);
        let host = FnHost::new(move |source, _| {
            log.borrow_mut().push(source.to_string());
            Ok(JsValue::Undefined)
        });
        let confinement = Confinement::new(&Intrinsics::pristine(), global(), Box::new(host), config);
        (confinement, units)
    }

    #[test]
    fn script_runs_with_prelude() {
        let (confinement, units) = echo_confinement(ConfinementConfig::default());
        confinement.evaluate_script("Infinity", &NoExclusions).unwrap();
        assert_eq!(
            units.borrow()[0],
            "const {Infinity,undefined} = this;\nInfinity"
        );
    }

    #[test]
    fn endowments_remove_names_from_prelude() {
        let (confinement, units) = echo_confinement(ConfinementConfig::default());
        let mut endowments = BTreeMap::new();
        endowments.insert("Infinity".to_string(), JsValue::Int(0));
        confinement.evaluate_script("x", &endowments).unwrap();
        assert_eq!(units.borrow()[0], "const {undefined} = this;\nx");
        assert_eq!(
            confinement.constants_for(&endowments).into_names(),
            vec!["undefined".to_string()]
        );
    }

    #[test]
    fn unoptimized_confinement_sends_source_verbatim() {
        let config = ConfinementConfig {
            optimize_constants: false,
            ..ConfinementConfig::default()
        };
        let (confinement, units) = echo_confinement(config);
        confinement.evaluate_script("1 + 1", &NoExclusions).unwrap();
        assert_eq!(units.borrow()[0], "1 + 1");
        assert!(confinement.prelude_for(&NoExclusions).is_empty());
    }

    #[test]
    fn redefined_global_changes_next_prelude() {
        let (mut confinement, units) = echo_confinement(ConfinementConfig::default());
        confinement
            .global_mut()
            .define_own_property("counter", PropertyDescriptor::data_frozen(JsValue::Int(0)));
        confinement.evaluate_script("counter", &NoExclusions).unwrap();
        assert_eq!(
            units.borrow()[0],
            "const {Infinity,undefined,counter} = this;\ncounter"
        );
    }

    #[test]
    fn guest_throw_is_returned_and_logged() {
        let host = FnHost::new(|_, _| Err(GuestError::new("RangeError", "bad").into()));
        let confinement = Confinement::new(
            &Intrinsics::pristine(),
            global(),
            Box::new(host),
            ConfinementConfig::default(),
        );
        let err = confinement.evaluate_script("f()", &NoExclusions).unwrap_err();
        assert_eq!(err, ConfinementError::GuestThrow(GuestError::new("RangeError", "bad")));
        assert_eq!(confinement.revocation_state(), RevocationState::Armed);

        let events = confinement.drain_events();
        let last = events.last().unwrap();
        assert_eq!(last.component, CONFINEMENT_COMPONENT);
        assert_eq!(last.outcome, "guest_throw");
        assert_eq!(last.error_code.as_deref(), Some(err.stable_code()));
    }

    #[test]
    fn event_log_follows_pipeline_order() {
        let (confinement, _) = echo_confinement(ConfinementConfig::default());
        confinement.evaluate_script("1", &NoExclusions).unwrap();
        let events: Vec<String> = confinement
            .drain_events()
            .into_iter()
            .map(|e| e.event)
            .collect();
        assert_eq!(
            events,
            vec![
                "bindings_classified",
                "prelude_built",
                "capability_invoked",
                "script_evaluated"
            ]
        );
    }

    #[test]
    fn global_eval_is_always_confined() {
        let (confinement, _) = echo_confinement(ConfinementConfig::default());
        assert_eq!(confinement.global_eval().identity(), EvalIdentity::Confined);
    }
}
