//! Scope prelude: pre-binds classified constants as `const` locals.
//!
//! The prelude is the first statement of a compiled guest unit, evaluated
//! with the confined global as `this`:
//!
//! ```text
//! const {Array,Infinity,Math} = this;
//! ```
//!
//! After it runs, reads of those names hit the local binding instead of the
//! scope proxy. The classifier already proved the properties are
//! non-writable and non-configurable, so the substitution is unobservable.
//! Zero constants produce an empty prelude: `const {} = this;` still throws
//! when `this` is nullish, so nothing is emitted at all.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::binding_classifier::ClassifiedConstants;
use crate::confinement_event::{ConfinementEvent, EventContext, PRELUDE_COMPONENT};
use crate::primordials::Primordials;

/// Prelude text for one compilation unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreludeFragment {
    text: String,
    bound_names: usize,
}

impl PreludeFragment {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Number of names the prelude binds.
    pub fn bound_names(&self) -> usize {
        self.bound_names
    }

    /// Compilation unit text: prelude, then guest source. An empty prelude
    /// returns the source unchanged.
    pub fn splice(&self, source: &str) -> String {
        if self.is_empty() {
            return source.to_string();
        }
        let mut unit = String::with_capacity(self.text.len() + 1 + source.len());
        unit.push_str(&self.text);
        unit.push('\n');
        unit.push_str(source);
        unit
    }

    /// Hex SHA-256 of the prelude text.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    pub fn to_event(&self, ctx: &EventContext) -> ConfinementEvent {
        let outcome = if self.is_empty() { "empty" } else { "built" };
        ConfinementEvent::new(ctx, PRELUDE_COMPONENT, "prelude_built", outcome).with_detail(
            format!("bound_names={} digest={}", self.bound_names, self.digest()),
        )
    }
}

/// Build the prelude for `constants`. Does not read any binding source.
pub fn build_prelude(constants: &ClassifiedConstants, primordials: &Primordials) -> PreludeFragment {
    if constants.is_empty() {
        return PreludeFragment::empty();
    }
    let list = primordials.join(constants.names(), ",");
    PreludeFragment {
        text: format!("const {{{list}}} = this;"),
        bound_names: constants.len(),
    }
}
