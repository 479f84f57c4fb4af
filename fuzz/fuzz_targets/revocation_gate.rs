#![no_main]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use frankenengine_confinement::config::ConfinementConfig;
use frankenengine_confinement::confinement_event::ConfinementEvent;
use frankenengine_confinement::object_model::JsValue;
use frankenengine_confinement::revocation_gate::{
    CapabilityHandle, ConfinementError, FnHost, GuestError, GuestScope, HostEvalError, HostFault,
    HostFaultKind, RevocationCell, RevocationGate, RevocationState,
};
use libfuzzer_sys::fuzz_target;

const MAX_STEPS: usize = 64;
const MAX_DEPTH: u32 = 24;

/// Host whose behavior at every call is read from the fuzz input.
struct Script {
    data: Vec<u8>,
    cursor: Cell<usize>,
    handles: RefCell<Vec<CapabilityHandle>>,
}

impl Script {
    fn next(&self) -> u8 {
        let at = self.cursor.get();
        self.cursor.set(at + 1);
        byte(&self.data, at)
    }

    fn run(&self, scope: &GuestScope<'_>) -> Result<JsValue, HostEvalError> {
        match self.next() % 6 {
            0 => Err(HostFault::new(HostFaultKind::InternalInvariant, "fuzz").into()),
            1 => Err(GuestError::new("Error", "fuzz").into()),
            2 if scope.depth() < MAX_DEPTH => {
                let before = scope.state();
                let nested = scope.evaluate("nested");
                check_nested(before, scope.state(), &nested);
                Ok(JsValue::Int(i64::from(scope.depth())))
            }
            3 if scope.depth() < MAX_DEPTH => {
                let before = scope.state();
                let nested = scope.construct_function(&[], "nested");
                check_nested(before, scope.state(), &nested);
                Ok(JsValue::Undefined)
            }
            4 => {
                let guest = scope.lookup_eval();
                assert!(guest.is_confined());
                if scope.state() == RevocationState::Revoked {
                    assert!(scope.host_eval().is_confined());
                }
                self.handles.borrow_mut().push(guest);
                self.handles.borrow_mut().push(scope.host_eval().clone());
                Ok(JsValue::Undefined)
            }
            _ => Ok(JsValue::Null),
        }
    }
}

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let script = Rc::new(Script {
        data: data.to_vec(),
        cursor: Cell::new(0),
        handles: RefCell::new(Vec::new()),
    });
    let eval_script = Rc::clone(&script);
    let fn_script = Rc::clone(&script);
    let host = FnHost::new(move |_, scope| eval_script.run(scope))
        .with_function_constructor(move |_, _, scope| fn_script.run(scope));
    let gate = RevocationGate::new(
        Box::new(host),
        RevocationCell::new(),
        &ConfinementConfig::default(),
    );

    let mut was_revoked = false;
    for step in 0..MAX_STEPS {
        let op = byte(data, step.wrapping_mul(7));
        let result = match op % 4 {
            0 => gate.evaluate("step"),
            1 => gate.construct_function(&["a".to_string()], "step"),
            2 => {
                gate.revoke("fuzz");
                Ok(JsValue::Undefined)
            }
            _ => {
                script.handles.borrow_mut().push(gate.lookup_eval());
                Ok(JsValue::Undefined)
            }
        };
        if was_revoked {
            assert_eq!(gate.state(), RevocationState::Revoked);
            if op % 4 < 2 {
                assert!(matches!(result, Err(ConfinementError::CapabilityRevoked { .. })));
            }
        }
        was_revoked = gate.is_revoked();
    }

    // Guest resolution of `eval` never yields the host primitive.
    assert!(gate.lookup_eval().is_confined());
    if gate.is_revoked() {
        for handle in script.handles.borrow().iter() {
            assert!(handle.is_confined());
        }
    }

    for event in gate.drain_events() {
        if let Ok(json) = serde_json::to_string(&event) {
            let decoded: ConfinementEvent =
                serde_json::from_str(&json).expect("event round-trips");
            assert_eq!(decoded, event);
        }
    }
});

fn check_nested(
    before: RevocationState,
    after: RevocationState,
    nested: &Result<JsValue, ConfinementError>,
) {
    if before == RevocationState::Revoked {
        assert_eq!(after, RevocationState::Revoked);
        assert!(matches!(nested, Err(ConfinementError::CapabilityRevoked { .. })));
    }
    if matches!(nested, Err(ConfinementError::CapabilityRevoked { .. })) {
        assert_eq!(after, RevocationState::Revoked);
    }
}

fn byte(data: &[u8], index: usize) -> u8 {
    if data.is_empty() {
        return 0;
    }
    data[index % data.len()]
}
