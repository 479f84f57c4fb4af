//! Binding classifier: which globals may be pre-bound as immutable constants.
//!
//! A global property may be aliased by a `const` local only if doing so can
//! never be observed. That holds exactly for own, string-keyed,
//! non-configurable, non-writable *data* properties whose name is a bindable
//! identifier, is not `eval`, and is not shadowed by an enclosing scope
//! (the endowments).
//!
//! Classification is a predicate-and-filter over the source's own names.
//! Rejection is never an error: a binding that fails a check is simply left
//! to resolve through the scope chain, and the reason is reported as data.
//!
//! Every structural test goes through the captured [`Primordials`] so a
//! guest that poisoned the realm's intrinsics or `Object.prototype` cannot
//! talk the classifier into freezing an unstable binding.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::hash::BuildHasher;

use serde::{Deserialize, Serialize};

use crate::confinement_event::{CLASSIFIER_COMPONENT, ConfinementEvent, EventContext};
use crate::identifier::{EVAL_BINDING, is_reserved_word};
use crate::object_model::{BindingSource, DescriptorField, PropertyKey};
use crate::primordials::Primordials;

// ---------------------------------------------------------------------------
// Exclusions
// ---------------------------------------------------------------------------

/// Presence test for names that an enclosing scope already binds.
pub trait Exclusions {
    fn excludes(&self, name: &str) -> bool;
}

/// No enclosing scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoExclusions;

impl Exclusions for NoExclusions {
    fn excludes(&self, _name: &str) -> bool {
        false
    }
}

impl<V> Exclusions for BTreeMap<String, V> {
    fn excludes(&self, name: &str) -> bool {
        self.contains_key(name)
    }
}

impl<V, S: BuildHasher> Exclusions for HashMap<String, V, S> {
    fn excludes(&self, name: &str) -> bool {
        self.contains_key(name)
    }
}

impl Exclusions for BTreeSet<String> {
    fn excludes(&self, name: &str) -> bool {
        self.contains(name)
    }
}

impl<S: BuildHasher> Exclusions for HashSet<String, S> {
    fn excludes(&self, name: &str) -> bool {
        self.contains(name)
    }
}

/// An endowments object: only its own string keys shadow.
impl Exclusions for BindingSource {
    fn excludes(&self, name: &str) -> bool {
        self.has_own_property(&PropertyKey::from(name))
    }
}

impl<E: Exclusions + ?Sized> Exclusions for &E {
    fn excludes(&self, name: &str) -> bool {
        (**self).excludes(name)
    }
}

// ---------------------------------------------------------------------------
// RejectionReason
// ---------------------------------------------------------------------------

/// Why a binding was not classified as constant, in check order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// An enclosing scope binds the same name.
    Shadowed,
    /// `eval` is mediated by the revocation gate.
    EvalReserved,
    ReservedWord,
    InvalidIdentifier,
    MissingDescriptor,
    /// `configurable` is not strictly `false`.
    Configurable,
    /// `writable` is not strictly `false`.
    Writable,
    /// No own `value` field: a getter/setter pair.
    Accessor,
}

impl RejectionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shadowed => "shadowed",
            Self::EvalReserved => "eval_reserved",
            Self::ReservedWord => "reserved_word",
            Self::InvalidIdentifier => "invalid_identifier",
            Self::MissingDescriptor => "missing_descriptor",
            Self::Configurable => "configurable",
            Self::Writable => "writable",
            Self::Accessor => "accessor",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ClassifiedConstants
// ---------------------------------------------------------------------------

/// Names safe to pre-bind, in the binding source's enumeration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedConstants(Vec<String>);

impl ClassifiedConstants {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|n| n == name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_names(self) -> Vec<String> {
        self.0
    }
}

impl<'a> IntoIterator for &'a ClassifiedConstants {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Per-name outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingVerdict {
    pub name: String,
    /// `None` when the binding was classified constant.
    pub rejection: Option<RejectionReason>,
}

/// Accepted constants plus one verdict per own string key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub constants: ClassifiedConstants,
    pub verdicts: Vec<BindingVerdict>,
}

impl ClassificationReport {
    /// Count of rejections per reason.
    pub fn rejection_counts(&self) -> BTreeMap<RejectionReason, usize> {
        let mut counts = BTreeMap::new();
        for reason in self.verdicts.iter().filter_map(|v| v.rejection) {
            *counts.entry(reason).or_insert(0) += 1;
        }
        counts
    }

    pub fn rejection_for(&self, name: &str) -> Option<RejectionReason> {
        self.verdicts
            .iter()
            .find(|v| v.name == name)
            .and_then(|v| v.rejection)
    }

    /// Summary event for the log.
    pub fn to_event(&self, ctx: &EventContext) -> ConfinementEvent {
        let rejected = self.verdicts.len() - self.constants.len();
        ConfinementEvent::new(ctx, CLASSIFIER_COMPONENT, "bindings_classified", "pass")
            .with_detail(format!(
                "candidates={} constants={} rejected={}",
                self.verdicts.len(),
                self.constants.len(),
                rejected
            ))
    }
}

/// Names of `source` that are provably safe to freeze as constants.
pub fn classify<E: Exclusions + ?Sized>(
    source: &BindingSource,
    exclusions: &E,
    primordials: &Primordials,
) -> ClassifiedConstants {
    let names = primordials
        .own_property_names(source)
        .into_iter()
        .filter(|name| rejection_for(source, name, exclusions, primordials).is_none())
        .collect();
    ClassifiedConstants(names)
}

/// Like [`classify`], keeping the reason for every rejected name.
pub fn classify_with_report<E: Exclusions + ?Sized>(
    source: &BindingSource,
    exclusions: &E,
    primordials: &Primordials,
) -> ClassificationReport {
    let verdicts: Vec<BindingVerdict> = primordials
        .own_property_names(source)
        .into_iter()
        .map(|name| {
            let rejection = rejection_for(source, &name, exclusions, primordials);
            BindingVerdict { name, rejection }
        })
        .collect();
    let constants = ClassifiedConstants(
        verdicts
            .iter()
            .filter(|v| v.rejection.is_none())
            .map(|v| v.name.clone())
            .collect(),
    );
    ClassificationReport {
        constants,
        verdicts,
    }
}

fn rejection_for<E: Exclusions + ?Sized>(
    source: &BindingSource,
    name: &str,
    exclusions: &E,
    primordials: &Primordials,
) -> Option<RejectionReason> {
    if exclusions.excludes(name) {
        return Some(RejectionReason::Shadowed);
    }
    if name == EVAL_BINDING {
        return Some(RejectionReason::EvalReserved);
    }
    if is_reserved_word(name) {
        return Some(RejectionReason::ReservedWord);
    }
    if !primordials.is_identifier(name) {
        return Some(RejectionReason::InvalidIdentifier);
    }

    let Some(record) = primordials.own_property_descriptor(source, name) else {
        return Some(RejectionReason::MissingDescriptor);
    };
    // Accessor records have no own `writable`, so a read may come from a
    // poisoned prototype; only strict `false` counts, and the own `value`
    // check below is what actually rules accessors out.
    if !record.get(DescriptorField::Configurable).is_strictly_false() {
        return Some(RejectionReason::Configurable);
    }
    if !record.get(DescriptorField::Writable).is_strictly_false() {
        return Some(RejectionReason::Writable);
    }
    if !primordials.has_own(&record, DescriptorField::Value) {
        return Some(RejectionReason::Accessor);
    }
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_model::{JsValue, ObjectHandle, PropertyDescriptor, SymbolId};
    use crate::primordials::Intrinsics;

    fn primordials() -> Primordials {
        Primordials::capture(&Intrinsics::pristine())
    }

    fn frozen() -> PropertyDescriptor {
        PropertyDescriptor::data_frozen(JsValue::Bool(true))
    }

    fn names(constants: &ClassifiedConstants) -> Vec<&str> {
        constants.names().iter().map(String::as_str).collect()
    }

    fn classify_one(name: &str, desc: PropertyDescriptor) -> Vec<String> {
        let source = BindingSource::from_descriptors([(name, desc)]);
        classify(&source, &NoExclusions, &primordials()).into_names()
    }

    #[test]
    fn empty_source_yields_nothing() {
        let constants = classify(&BindingSource::new(), &NoExclusions, &primordials());
        assert!(constants.is_empty());
    }

    #[test]
    fn rejects_configurable_and_writable() {
        assert!(classify_one("foo", PropertyDescriptor::data(JsValue::Bool(true))).is_empty());
    }

    #[test]
    fn accepts_non_configurable_non_writable() {
        assert_eq!(classify_one("foo", frozen()), vec!["foo"]);
    }

    #[test]
    fn rejects_configurable_only() {
        let desc = PropertyDescriptor::data_with(JsValue::Bool(true), false, true);
        assert!(classify_one("foo", desc).is_empty());
    }

    #[test]
    fn rejects_writable_only() {
        let desc = PropertyDescriptor::data_with(JsValue::Bool(true), true, false);
        assert!(classify_one("foo", desc).is_empty());
    }

    #[test]
    fn rejects_getter_and_setter() {
        let getter = PropertyDescriptor::accessor(Some(ObjectHandle(1)), None);
        let setter = PropertyDescriptor::accessor(None, Some(ObjectHandle(2)));
        assert!(classify_one("foo", getter).is_empty());
        assert!(classify_one("foo", setter).is_empty());
    }

    #[test]
    fn rejects_eval_even_when_frozen() {
        assert!(classify_one("eval", frozen()).is_empty());
    }

    #[test]
    fn rejects_reserved_words_and_literals() {
        for name in ["const", "null", "true", "false", "this", "arguments", "let"] {
            assert!(classify_one(name, frozen()).is_empty(), "{name}");
        }
    }

    #[test]
    fn rejects_symbols() {
        let source = BindingSource::from_descriptors([(SymbolId(1), frozen())]);
        assert!(classify(&source, &NoExclusions, &primordials()).is_empty());
    }

    #[test]
    fn grammar_edge_cases() {
        assert!(classify_one("123", frozen()).is_empty());
        assert!(classify_one("-123", frozen()).is_empty());
        assert_eq!(classify_one("_123", frozen()), vec!["_123"]);
        assert_eq!(classify_one("$123", frozen()), vec!["$123"]);
        assert_eq!(classify_one("a123", frozen()), vec!["a123"]);
        assert_eq!(classify_one("A123", frozen()), vec!["A123"]);
    }

    #[test]
    fn preserves_enumeration_order() {
        let source = BindingSource::from_descriptors([
            ("foo", frozen()),
            ("bar", frozen()),
            ("baz", PropertyDescriptor::data_with(JsValue::Null, false, true)),
            ("qux", frozen()),
        ]);
        let constants = classify(&source, &NoExclusions, &primordials());
        assert_eq!(names(&constants), vec!["foo", "bar", "qux"]);
    }

    #[test]
    fn exclusions_shadow_candidates() {
        let source = BindingSource::from_descriptors([("foo", frozen()), ("bar", frozen())]);
        let mut endowments = BTreeMap::new();
        endowments.insert("foo".to_string(), JsValue::Undefined);
        let constants = classify(&source, &endowments, &primordials());
        assert_eq!(names(&constants), vec!["bar"]);

        let endowment_object = BindingSource::from_descriptors([(
            "bar",
            PropertyDescriptor::data(JsValue::Int(1)),
        )]);
        let constants = classify(&source, &endowment_object, &primordials());
        assert_eq!(names(&constants), vec!["foo"]);
    }

    #[test]
    fn report_records_first_failing_check() {
        let source = BindingSource::from_descriptors([
            ("shadow", frozen()),
            ("eval", frozen()),
            ("const", frozen()),
            ("1x", frozen()),
            ("conf", PropertyDescriptor::data(JsValue::Null)),
            ("writ", PropertyDescriptor::data_with(JsValue::Null, true, false)),
            ("acc", PropertyDescriptor::accessor(None, None)),
            ("ok", frozen()),
        ]);
        let exclusions: BTreeSet<String> = ["shadow".to_string()].into_iter().collect();
        let report = classify_with_report(&source, &exclusions, &primordials());

        assert_eq!(names(&report.constants), vec!["ok"]);
        assert_eq!(report.rejection_for("shadow"), Some(RejectionReason::Shadowed));
        assert_eq!(report.rejection_for("eval"), Some(RejectionReason::EvalReserved));
        assert_eq!(report.rejection_for("const"), Some(RejectionReason::ReservedWord));
        assert_eq!(report.rejection_for("1x"), Some(RejectionReason::InvalidIdentifier));
        assert_eq!(report.rejection_for("conf"), Some(RejectionReason::Configurable));
        assert_eq!(report.rejection_for("writ"), Some(RejectionReason::Writable));
        // Accessors have no own `writable`; `undefined` is not `false`.
        assert_eq!(report.rejection_for("acc"), Some(RejectionReason::Writable));
        assert_eq!(report.rejection_for("ok"), None);
        assert_eq!(report.rejection_counts().values().sum::<usize>(), 7);
    }

    #[test]
    fn report_and_plain_classification_agree() {
        let source = BindingSource::from_descriptors([
            ("a", frozen()),
            ("b", PropertyDescriptor::data(JsValue::Null)),
            ("c", frozen()),
        ]);
        let p = primordials();
        let report = classify_with_report(&source, &NoExclusions, &p);
        assert_eq!(report.constants, classify(&source, &NoExclusions, &p));
    }

    #[test]
    fn poisoned_prototype_cannot_promote_accessor() {
        let intrinsics = Intrinsics::pristine();
        let p = Primordials::capture(&intrinsics);
        intrinsics
            .object_prototype
            .define(DescriptorField::Writable, JsValue::Bool(false));
        intrinsics
            .object_prototype
            .define(DescriptorField::Value, JsValue::Bool(true));

        let source = BindingSource::from_descriptors([(
            "acc",
            PropertyDescriptor::accessor(Some(ObjectHandle(9)), None),
        )]);
        let report = classify_with_report(&source, &NoExclusions, &p);
        assert!(report.constants.is_empty());
        assert_eq!(report.rejection_for("acc"), Some(RejectionReason::Accessor));
    }

    #[test]
    fn poisoned_prototype_cannot_override_own_attributes() {
        let intrinsics = Intrinsics::pristine();
        let p = Primordials::capture(&intrinsics);
        intrinsics
            .object_prototype
            .define(DescriptorField::Configurable, JsValue::Bool(false));
        intrinsics
            .object_prototype
            .define(DescriptorField::Writable, JsValue::Bool(false));

        let source = BindingSource::from_descriptors([(
            "foo",
            PropertyDescriptor::data(JsValue::Int(1)),
        )]);
        assert!(classify(&source, &NoExclusions, &p).is_empty());
    }

    #[test]
    fn summary_event_counts_candidates() {
        let source = BindingSource::from_descriptors([
            ("a", frozen()),
            ("b", PropertyDescriptor::data(JsValue::Null)),
        ]);
        let report = classify_with_report(&source, &NoExclusions, &primordials());
        let event = report.to_event(&EventContext::new("t", "d", "p"));
        assert_eq!(event.component, CLASSIFIER_COMPONENT);
        assert_eq!(event.detail.as_deref(), Some("candidates=2 constants=1 rejected=1"));
    }
}
