//! Descriptor inspection through captured primordials.
//!
//! A realm exposes its reflection operations as [`Intrinsics`]: plain function
//! slots that guest code can overwrite (the moral equivalent of reassigning
//! `RegExp.prototype.test` or `Object.getOwnPropertyDescriptor`). The
//! confinement never calls those slots directly. At construction, before any
//! guest code runs, it copies them into a [`Primordials`] table; everything
//! that classifies bindings goes through that table afterwards.
//!
//! The shared [`ObjectPrototype`] is not frozen by capture:
//! descriptor records keep inheriting from the live prototype, which is why
//! callers test own fields with [`Primordials::has_own`] instead of trusting
//! reads.

use std::fmt;

use crate::identifier;
use crate::object_model::{
    BindingSource, DescriptorField, DescriptorRecord, ObjectPrototype, PropertyKey,
};

/// `Object.getOwnPropertyNames`.
pub type OwnNamesFn = fn(&BindingSource) -> Vec<String>;
/// `Object.getOwnPropertyDescriptor`.
pub type OwnDescriptorFn = fn(&BindingSource, &str, &ObjectPrototype) -> Option<DescriptorRecord>;
/// `Object.prototype.hasOwnProperty`.
pub type HasOwnFn = fn(&DescriptorRecord, DescriptorField) -> bool;
/// `RegExp.prototype.test` bound to the identifier pattern.
pub type PatternTestFn = fn(&str) -> bool;
/// `Array.prototype.join`.
pub type JoinFn = fn(&[String], &str) -> String;

fn reflect_own_names(source: &BindingSource) -> Vec<String> {
    source.own_property_names()
}

fn reflect_own_descriptor(
    source: &BindingSource,
    name: &str,
    prototype: &ObjectPrototype,
) -> Option<DescriptorRecord> {
    source
        .get_own_property(&PropertyKey::from(name))
        .map(|desc| DescriptorRecord::from_descriptor(desc, prototype.clone()))
}

fn record_has_own(record: &DescriptorRecord, field: DescriptorField) -> bool {
    record.has_own(field)
}

fn join_names(names: &[String], separator: &str) -> String {
    names.join(separator)
}

// ---------------------------------------------------------------------------
// Intrinsics
// ---------------------------------------------------------------------------

/// Guest-reachable reflection operations of one realm.
#[derive(Clone)]
pub struct Intrinsics {
    pub own_property_names: OwnNamesFn,
    pub own_property_descriptor: OwnDescriptorFn,
    pub has_own_property: HasOwnFn,
    pub identifier_test: PatternTestFn,
    pub join: JoinFn,
    /// `Object.prototype`, inherited by every reflected descriptor.
    pub object_prototype: ObjectPrototype,
}

impl Intrinsics {
    /// Freshly constructed realm: every slot holds its genuine operation and
    /// the object prototype is clean.
    pub fn pristine() -> Self {
        Self {
            own_property_names: reflect_own_names,
            own_property_descriptor: reflect_own_descriptor,
            has_own_property: record_has_own,
            identifier_test: identifier::matches_identifier_grammar,
            join: join_names,
            object_prototype: ObjectPrototype::new(),
        }
    }
}

impl Default for Intrinsics {
    fn default() -> Self {
        Self::pristine()
    }
}

impl fmt::Debug for Intrinsics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Intrinsics")
            .field("object_prototype", &self.object_prototype)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Primordials
// ---------------------------------------------------------------------------

/// Operations captured from a realm's [`Intrinsics`] before guest code ran.
///
/// Fields are private; there is no way to swap an operation after capture.
#[derive(Clone)]
pub struct Primordials {
    own_property_names: OwnNamesFn,
    own_property_descriptor: OwnDescriptorFn,
    has_own_property: HasOwnFn,
    identifier_test: PatternTestFn,
    join: JoinFn,
    object_prototype: ObjectPrototype,
}

impl Primordials {
    /// Capture every operation the confinement will need.
    pub fn capture(intrinsics: &Intrinsics) -> Self {
        Self {
            own_property_names: intrinsics.own_property_names,
            own_property_descriptor: intrinsics.own_property_descriptor,
            has_own_property: intrinsics.has_own_property,
            identifier_test: intrinsics.identifier_test,
            join: intrinsics.join,
            object_prototype: intrinsics.object_prototype.clone(),
        }
    }

    /// Own string-keyed property names, in enumeration order.
    pub fn own_property_names(&self, source: &BindingSource) -> Vec<String> {
        (self.own_property_names)(source)
    }

    /// Own descriptor for `name` exactly as stored; `None` when absent.
    pub fn own_property_descriptor(
        &self,
        source: &BindingSource,
        name: &str,
    ) -> Option<DescriptorRecord> {
        (self.own_property_descriptor)(source, name, &self.object_prototype)
    }

    /// Own-field test on a reflected descriptor.
    pub fn has_own(&self, record: &DescriptorRecord, field: DescriptorField) -> bool {
        (self.has_own_property)(record, field)
    }

    /// Identifier grammar test.
    pub fn is_identifier(&self, name: &str) -> bool {
        (self.identifier_test)(name)
    }

    /// Join names with `separator`, for prelude text.
    pub fn join(&self, names: &[String], separator: &str) -> String {
        (self.join)(names, separator)
    }
}

impl fmt::Debug for Primordials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Primordials")
            .field("object_prototype", &self.object_prototype)
            .finish_non_exhaustive()
    }
}
