//! Trust boundary of a confined JavaScript realm.
//!
//! - [`binding_classifier`] decides which globals guest code may see as
//!   permanently fixed, using operations captured in [`primordials`] before
//!   guest code ran.
//! - [`scope_prelude`] turns that decision into a `const` prelude for each
//!   compiled guest unit.
//! - [`revocation_gate`] mediates `eval`/`Function` and revokes them for good
//!   on the first host compiler fault.
//! - [`confinement`] wires the three together for one realm.

#![forbid(unsafe_code)]

pub mod binding_classifier;
pub mod config;
pub mod confinement;
pub mod confinement_event;
pub mod identifier;
pub mod object_model;
pub mod primordials;
pub mod revocation_gate;
pub mod scope_prelude;
