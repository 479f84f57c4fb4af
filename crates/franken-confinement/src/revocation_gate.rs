//! Capability revocation gate for dynamic code execution.
//!
//! Guest code never holds the host's `eval`/`Function` primitive. Every
//! evaluation goes through a [`RevocationGate`], which forwards to the
//! [`HostEvaluator`] while the confinement is `Armed` and permanently flips
//! to `Revoked` the first time the host *compiler itself* faults, at any
//! call depth.
//!
//! Invariants:
//!
//! - One [`RevocationCell`] per confinement, shared by the gate and every
//!   [`CapabilityHandle`] it issues. It is read fresh on every call and on
//!   every identity check; nothing caches "still safe" per frame.
//! - `Armed → Revoked` happens at most once (compare-and-swap) and is never
//!   undone. Frames already on the stack above the faulting one see it on
//!   their next gate call or identity check.
//! - Guest code resolving `eval` always gets the realm's confined evaluator,
//!   armed or revoked. The host primitive is bound only for the gate's own
//!   scoped-evaluator wrapper ([`GuestScope::host_eval`]), once per forwarded
//!   `eval` call and before guest code runs.
//! - A host evaluator that panics is treated as a compiler fault: the unwind
//!   revokes before it leaves the gate.
//! - A host fault is converted into [`ConfinementError::CapabilityRevoked`]
//!   at the gate boundary; its kind and detail never reach guest code. Guest
//!   errors from successfully compiled code pass through unchanged and do not
//!   revoke.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ConfinementConfig, FaultDiagnostics};
use crate::confinement_event::{
    ConfinementEvent, EventContext, FE_CONF_CAPABILITY_REVOKED, FE_CONF_GUEST_THROW,
    FE_CONF_HOST_FAULT, FE_CONF_OPERATOR_REVOKED, GATE_COMPONENT,
};
use crate::object_model::JsValue;

// ---------------------------------------------------------------------------
// RevocationState / RevocationCell
// ---------------------------------------------------------------------------

const ARMED: u8 = 0;
const REVOKED: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationState {
    Armed,
    Revoked,
}

impl fmt::Display for RevocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Armed => write!(f, "armed"),
            Self::Revoked => write!(f, "revoked"),
        }
    }
}

/// Shared revocation flag of one confinement. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct RevocationCell {
    state: Arc<AtomicU8>,
}

impl RevocationCell {
    /// A new, armed cell.
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(ARMED)),
        }
    }

    pub fn state(&self) -> RevocationState {
        match self.state.load(Ordering::Acquire) {
            ARMED => RevocationState::Armed,
            _ => RevocationState::Revoked,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.state() == RevocationState::Revoked
    }

    /// Transition to `Revoked`. Returns `true` only for the call that
    /// performed the transition.
    pub fn revoke(&self) -> bool {
        self.state
            .compare_exchange(ARMED, REVOKED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether both handles refer to the same confinement's cell.
    pub fn same_cell(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Default for RevocationCell {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Capabilities, identities, handles
// ---------------------------------------------------------------------------

/// The two guest-visible entry points to dynamic compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Eval,
    FunctionConstructor,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eval => write!(f, "eval"),
            Self::FunctionConstructor => write!(f, "Function"),
        }
    }
}

/// What an `eval` reference currently denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalIdentity {
    /// The genuine host primitive. Only the wrapper binding ever carries it.
    HostPrimitive,
    /// The confinement's own evaluator.
    Confined,
}

/// A reference to `eval`, e.g. `const e = eval;` in guest code.
///
/// The identity is re-derived from the shared cell on each query, so a
/// wrapper binding issued as [`EvalIdentity::HostPrimitive`] reports
/// [`EvalIdentity::Confined`] once the confinement is revoked.
#[derive(Debug, Clone)]
pub struct CapabilityHandle {
    issued: EvalIdentity,
    cell: RevocationCell,
}

impl CapabilityHandle {
    pub fn identity(&self) -> EvalIdentity {
        if self.cell.is_revoked() {
            EvalIdentity::Confined
        } else {
            self.issued
        }
    }

    pub fn is_confined(&self) -> bool {
        self.identity() == EvalIdentity::Confined
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Narrow fault signature: raised only by the host primitive's own
/// compilation machinery, never by guest code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostFaultKind {
    /// The compiler entry point is missing or has been replaced.
    CompilerUnavailable,
    /// The compiler hit an internal invariant violation.
    InternalInvariant,
    /// The compiler ran out of a host resource (stack, memory).
    ResourceExhausted,
}

impl fmt::Display for HostFaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CompilerUnavailable => write!(f, "compiler_unavailable"),
            Self::InternalInvariant => write!(f, "internal_invariant"),
            Self::ResourceExhausted => write!(f, "resource_exhausted"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("host fault ({kind}): {detail}")]
pub struct HostFault {
    pub kind: HostFaultKind,
    pub detail: String,
}

impl HostFault {
    pub fn new(kind: HostFaultKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

/// An exception thrown by successfully compiled guest code.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{name}: {message}")]
pub struct GuestError {
    pub name: String,
    pub message: String,
}

impl GuestError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
        }
    }
}

/// Failure reported by a [`HostEvaluator`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HostEvalError {
    #[error(transparent)]
    Fault(#[from] HostFault),
    #[error(transparent)]
    Guest(#[from] GuestError),
}

/// What the gate surfaces to callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfinementError {
    #[error("EvalError: {capability} is not available in this confinement")]
    CapabilityRevoked { capability: Capability },
    #[error(transparent)]
    GuestThrow(GuestError),
}

impl ConfinementError {
    pub fn stable_code(&self) -> &'static str {
        match self {
            Self::CapabilityRevoked { .. } => FE_CONF_CAPABILITY_REVOKED,
            Self::GuestThrow(_) => FE_CONF_GUEST_THROW,
        }
    }
}

// ---------------------------------------------------------------------------
// HostEvaluator
// ---------------------------------------------------------------------------

/// The genuine host dynamic-code-execution primitive.
///
/// Implementations compile and run `source`. Nested guest `eval`/`Function`
/// calls must go back through `scope`, never straight to the host.
pub trait HostEvaluator {
    fn evaluate(&self, source: &str, scope: &GuestScope<'_>) -> Result<JsValue, HostEvalError>;

    fn construct_function(
        &self,
        params: &[String],
        body: &str,
        scope: &GuestScope<'_>,
    ) -> Result<JsValue, HostEvalError>;
}

/// Source text the `Function` constructor compiles for `params`/`body`.
pub fn function_source(params: &[String], body: &str) -> String {
    format!("(function anonymous({}\n) {{\n{}\n}})", params.join(","), body)
}

type EvalHook = Box<dyn Fn(&str, &GuestScope<'_>) -> Result<JsValue, HostEvalError>>;
type FunctionHook = Box<dyn Fn(&[String], &str, &GuestScope<'_>) -> Result<JsValue, HostEvalError>>;

/// A [`HostEvaluator`] backed by closures.
///
/// Without an explicit `Function` hook, `construct_function` evaluates
/// [`function_source`] through the eval hook.
pub struct FnHost {
    eval: EvalHook,
    function: Option<FunctionHook>,
}

impl FnHost {
    pub fn new(
        eval: impl Fn(&str, &GuestScope<'_>) -> Result<JsValue, HostEvalError> + 'static,
    ) -> Self {
        Self {
            eval: Box::new(eval),
            function: None,
        }
    }

    pub fn with_function_constructor(
        mut self,
        function: impl Fn(&[String], &str, &GuestScope<'_>) -> Result<JsValue, HostEvalError>
        + 'static,
    ) -> Self {
        self.function = Some(Box::new(function));
        self
    }
}

impl HostEvaluator for FnHost {
    fn evaluate(&self, source: &str, scope: &GuestScope<'_>) -> Result<JsValue, HostEvalError> {
        (self.eval)(source, scope)
    }

    fn construct_function(
        &self,
        params: &[String],
        body: &str,
        scope: &GuestScope<'_>,
    ) -> Result<JsValue, HostEvalError> {
        match &self.function {
            Some(function) => function(params, body, scope),
            None => (self.eval)(&function_source(params, body), scope),
        }
    }
}

impl fmt::Debug for FnHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHost")
            .field("function_hook", &self.function.is_some())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// GuestScope
// ---------------------------------------------------------------------------

/// The view a running guest unit has of the gate.
#[derive(Debug)]
pub struct GuestScope<'g> {
    gate: &'g RevocationGate,
    depth: u32,
    host_eval: CapabilityHandle,
}

impl GuestScope<'_> {
    /// Depth of the gate call that is running this unit (0 = outermost).
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// The binding the gate's scoped-evaluator wrapper resolved for this
    /// unit, for the host to perform direct eval with. The host primitive
    /// for an armed `eval` call, confined for `Function` or once revoked.
    /// Never hand it to guest code.
    pub fn host_eval(&self) -> &CapabilityHandle {
        &self.host_eval
    }

    /// Guest `eval(source)` from inside the running unit.
    pub fn evaluate(&self, source: &str) -> Result<JsValue, ConfinementError> {
        self.gate.invoke(Capability::Eval, self.depth + 1, |host, scope| {
            host.evaluate(source, scope)
        })
    }

    /// Guest `Function(...params, body)` from inside the running unit.
    pub fn construct_function(
        &self,
        params: &[String],
        body: &str,
    ) -> Result<JsValue, ConfinementError> {
        self.gate
            .invoke(Capability::FunctionConstructor, self.depth + 1, |host, scope| {
                host.construct_function(params, body, scope)
            })
    }

    /// Resolve the identifier `eval` in the running guest unit.
    pub fn lookup_eval(&self) -> CapabilityHandle {
        self.gate.lookup_eval()
    }

    pub fn state(&self) -> RevocationState {
        self.gate.state()
    }
}

// ---------------------------------------------------------------------------
// RevocationGate
// ---------------------------------------------------------------------------

/// Per-gate counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateStats {
    pub invocations: u64,
    pub forwarded: u64,
    pub denied: u64,
    pub guest_errors: u64,
    pub host_faults: u64,
    pub deepest_call: u32,
    /// Forwarded `eval` calls whose wrapper was bound to the host primitive.
    pub host_eval_bindings: u64,
    /// Depth of the call whose fault revoked the gate.
    pub revoked_at_depth: Option<u32>,
}

/// Revokes if the forwarded call unwinds instead of returning.
struct UnwindRevocation<'a> {
    gate: &'a RevocationGate,
    capability: Capability,
    depth: u32,
}

impl Drop for UnwindRevocation<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.gate.revoke_on_unwind(self.capability, self.depth);
        }
    }
}

pub struct RevocationGate {
    host: Box<dyn HostEvaluator>,
    cell: RevocationCell,
    diagnostics: FaultDiagnostics,
    context: EventContext,
    events: RefCell<Vec<ConfinementEvent>>,
    stats: RefCell<GateStats>,
}

impl RevocationGate {
    pub fn new(
        host: Box<dyn HostEvaluator>,
        cell: RevocationCell,
        config: &ConfinementConfig,
    ) -> Self {
        Self {
            host,
            cell,
            diagnostics: config.fault_diagnostics,
            context: config.event_context(),
            events: RefCell::new(Vec::new()),
            stats: RefCell::new(GateStats::default()),
        }
    }

    pub fn state(&self) -> RevocationState {
        self.cell.state()
    }

    pub fn is_revoked(&self) -> bool {
        self.cell.is_revoked()
    }

    pub fn cell(&self) -> &RevocationCell {
        &self.cell
    }

    /// Indirect `eval(source)` from the outermost guest frame.
    pub fn evaluate(&self, source: &str) -> Result<JsValue, ConfinementError> {
        self.invoke(Capability::Eval, 0, |host, scope| host.evaluate(source, scope))
    }

    /// `Function(...params, body)` from the outermost guest frame.
    pub fn construct_function(
        &self,
        params: &[String],
        body: &str,
    ) -> Result<JsValue, ConfinementError> {
        self.invoke(Capability::FunctionConstructor, 0, |host, scope| {
            host.construct_function(params, body, scope)
        })
    }

    /// Resolve the identifier `eval` from guest code: the realm's confined
    /// evaluator in every state.
    pub fn lookup_eval(&self) -> CapabilityHandle {
        self.confined_eval()
    }

    /// The realm's own `eval`, as installed on the confined global.
    pub fn confined_eval(&self) -> CapabilityHandle {
        CapabilityHandle {
            issued: EvalIdentity::Confined,
            cell: self.cell.clone(),
        }
    }

    /// Operator-initiated revocation. Returns `true` if this call revoked.
    pub fn revoke(&self, reason: &str) -> bool {
        let transitioned = self.cell.revoke();
        let outcome = if transitioned { "revoked" } else { "already_revoked" };
        self.record(
            ConfinementEvent::new(&self.context, GATE_COMPONENT, "operator_revocation", outcome)
                .with_error_code(FE_CONF_OPERATOR_REVOKED)
                .with_detail(reason),
        );
        transitioned
    }

    pub fn stats(&self) -> GateStats {
        self.stats.borrow().clone()
    }

    pub fn drain_events(&self) -> Vec<ConfinementEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    pub(crate) fn record(&self, event: ConfinementEvent) {
        self.events.borrow_mut().push(event);
    }

    pub(crate) fn context(&self) -> &EventContext {
        &self.context
    }

    fn invoke<F>(
        &self,
        capability: Capability,
        depth: u32,
        forward: F,
    ) -> Result<JsValue, ConfinementError>
    where
        F: FnOnce(&dyn HostEvaluator, &GuestScope<'_>) -> Result<JsValue, HostEvalError>,
    {
        {
            let mut stats = self.stats.borrow_mut();
            stats.invocations += 1;
            stats.deepest_call = stats.deepest_call.max(depth);
        }

        if self.cell.is_revoked() {
            self.stats.borrow_mut().denied += 1;
            self.record(
                self.gate_event("capability_denied", "deny", depth)
                    .with_error_code(FE_CONF_CAPABILITY_REVOKED)
                    .with_detail(capability.to_string()),
            );
            return Err(ConfinementError::CapabilityRevoked { capability });
        }

        let scope = GuestScope {
            gate: self,
            depth,
            host_eval: self.bind_host_eval(capability),
        };
        let outcome = {
            let _unwind = UnwindRevocation {
                gate: self,
                capability,
                depth,
            };
            forward(self.host.as_ref(), &scope)
        };

        match outcome {
            Ok(value) => {
                self.stats.borrow_mut().forwarded += 1;
                self.record(
                    self.gate_event("capability_invoked", "forwarded", depth)
                        .with_detail(capability.to_string()),
                );
                Ok(value)
            }
            Err(HostEvalError::Guest(error)) => {
                self.stats.borrow_mut().guest_errors += 1;
                self.record(
                    self.gate_event("guest_throw", "propagated", depth)
                        .with_error_code(FE_CONF_GUEST_THROW)
                        .with_detail(error.name.clone()),
                );
                Err(ConfinementError::GuestThrow(error))
            }
            Err(HostEvalError::Fault(fault)) => {
                self.revoke_on_fault(capability, depth, &fault);
                Err(ConfinementError::CapabilityRevoked { capability })
            }
        }
    }

    /// The wrapper's own one-shot `eval` lookup, made before guest code runs.
    fn bind_host_eval(&self, capability: Capability) -> CapabilityHandle {
        if capability != Capability::Eval || self.cell.is_revoked() {
            return self.confined_eval();
        }
        self.stats.borrow_mut().host_eval_bindings += 1;
        CapabilityHandle {
            issued: EvalIdentity::HostPrimitive,
            cell: self.cell.clone(),
        }
    }

    fn revoke_on_fault(&self, capability: Capability, depth: u32, fault: &HostFault) {
        let transitioned = self.cell.revoke();
        {
            let mut stats = self.stats.borrow_mut();
            stats.host_faults += 1;
            if transitioned {
                stats.revoked_at_depth = Some(depth);
            }
        }
        let detail = match self.diagnostics {
            FaultDiagnostics::Silent => capability.to_string(),
            FaultDiagnostics::Record => format!("{capability}: {fault}"),
        };
        let outcome = if transitioned { "revoked" } else { "already_revoked" };
        self.record(
            self.gate_event("host_fault", outcome, depth)
                .with_error_code(FE_CONF_HOST_FAULT)
                .with_detail(detail),
        );
    }

    /// Runs during unwinding: revoke first, then log only if the log is not
    /// already borrowed by the frame that panicked.
    fn revoke_on_unwind(&self, capability: Capability, depth: u32) {
        let transitioned = self.cell.revoke();
        if let Ok(mut stats) = self.stats.try_borrow_mut() {
            stats.host_faults += 1;
            if transitioned {
                stats.revoked_at_depth = Some(depth);
            }
        }
        let outcome = if transitioned { "revoked" } else { "already_revoked" };
        let event = self
            .gate_event("host_panic", outcome, depth)
            .with_error_code(FE_CONF_HOST_FAULT)
            .with_detail(capability.to_string());
        if let Ok(mut events) = self.events.try_borrow_mut() {
            events.push(event);
        }
    }

    fn gate_event(&self, event: &str, outcome: &str, depth: u32) -> ConfinementEvent {
        ConfinementEvent::new(&self.context, GATE_COMPONENT, event, outcome).with_call_depth(depth)
    }
}

impl fmt::Debug for RevocationGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RevocationGate")
            .field("state", &self.state())
            .field("diagnostics", &self.diagnostics)
            .field("stats", &self.stats.borrow())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
