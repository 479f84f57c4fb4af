//! Minimal ES object model for confined binding sources.
//!
//! Only what the confinement boundary needs to reason about global bindings:
//!
//! - **Property keys**: strings or symbols
//! - **Property descriptors**: data vs accessor, configurable/enumerable/writable
//! - **Binding sources**: ordered own properties with ES `[[OwnPropertyKeys]]`
//!   ordering and `[[DefineOwnProperty]]` compatibility checks
//! - **Descriptor records**: the object-shaped view of a descriptor that
//!   reflection hands out; its prototype is the shared, guest-poisonable
//!   `Object.prototype` stand-in, so inherited fields are never trusted

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PropertyKey
// ---------------------------------------------------------------------------

/// Unique symbol identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SymbolId(pub u32);

/// A property key: either a string or a symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PropertyKey {
    /// String key.
    String(String),
    /// Symbol key.
    Symbol(SymbolId),
}

impl PropertyKey {
    /// The string form of a string key; `None` for symbols.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            Self::Symbol(_) => None,
        }
    }

    /// Array index per ES2020 §6.1.7: canonical numeric string below 2^32 - 1.
    fn array_index(&self) -> Option<u32> {
        let Self::String(s) = self else {
            return None;
        };
        if s.is_empty() || (s.len() > 1 && s.starts_with('0')) {
            return None;
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        s.parse::<u32>().ok().filter(|n| *n != u32::MAX)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Symbol(id) => write!(f, "Symbol({})", id.0),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<SymbolId> for PropertyKey {
    fn from(id: SymbolId) -> Self {
        Self::Symbol(id)
    }
}

// ---------------------------------------------------------------------------
// JsValue
// ---------------------------------------------------------------------------

/// Opaque handle referencing an object owned by the surrounding realm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectHandle(pub u32);

/// Runtime value as seen across the confinement boundary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    Symbol(SymbolId),
    Object(ObjectHandle),
    Function(ObjectHandle),
}

impl JsValue {
    /// `x === false`, with no coercion of `undefined` or other falsy values.
    pub fn is_strictly_false(&self) -> bool {
        matches!(self, Self::Bool(false))
    }
}

impl fmt::Display for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Symbol(id) => write!(f, "Symbol({})", id.0),
            Self::Object(h) => write!(f, "[object#{}]", h.0),
            Self::Function(h) => write!(f, "[function#{}]", h.0),
        }
    }
}

// ---------------------------------------------------------------------------
// PropertyDescriptor
// ---------------------------------------------------------------------------

/// Stored attributes of one own property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyDescriptor {
    Data {
        value: JsValue,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    /// Getter/setter pair; either side may be absent.
    Accessor {
        get: Option<ObjectHandle>,
        set: Option<ObjectHandle>,
        enumerable: bool,
        configurable: bool,
    },
}

impl PropertyDescriptor {
    /// Default data descriptor, as produced by plain assignment
    /// (writable, enumerable, configurable).
    pub fn data(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Data descriptor with every attribute defaulted to `false`, as produced
    /// by `Object.defineProperty(o, k, { value })`.
    pub fn data_frozen(value: JsValue) -> Self {
        Self::Data {
            value,
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }

    /// Data descriptor with explicit `writable`/`configurable`; not enumerable.
    pub fn data_with(value: JsValue, writable: bool, configurable: bool) -> Self {
        Self::Data {
            value,
            writable,
            enumerable: false,
            configurable,
        }
    }

    /// Non-configurable, non-enumerable accessor.
    pub fn accessor(get: Option<ObjectHandle>, set: Option<ObjectHandle>) -> Self {
        Self::Accessor {
            get,
            set,
            enumerable: false,
            configurable: false,
        }
    }

    pub fn is_configurable(&self) -> bool {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => *configurable,
        }
    }

    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }

    fn set_non_configurable(&mut self) {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => {
                *configurable = false;
            }
        }
    }

    fn set_non_writable(&mut self) {
        if let Self::Data { writable, .. } = self {
            *writable = false;
        }
    }
}

// ---------------------------------------------------------------------------
// BindingSource
// ---------------------------------------------------------------------------

/// Ordered own properties of a guest-visible global object.
///
/// Owned by the realm collaborator; the confinement core only reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingSource {
    properties: Vec<(PropertyKey, PropertyDescriptor)>,
    extensible: bool,
}

impl Default for BindingSource {
    fn default() -> Self {
        Self {
            properties: Vec::new(),
            extensible: true,
        }
    }
}

impl BindingSource {
    /// Empty, extensible source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a source from `(key, descriptor)` pairs, in definition order.
    /// Later definitions of an existing key go through the usual
    /// compatibility checks.
    pub fn from_descriptors<K, I>(entries: I) -> Self
    where
        K: Into<PropertyKey>,
        I: IntoIterator<Item = (K, PropertyDescriptor)>,
    {
        let mut source = Self::new();
        for (key, desc) in entries {
            source.define_own_property(key, desc);
        }
        source
    }

    fn position(&self, key: &PropertyKey) -> Option<usize> {
        self.properties.iter().position(|(k, _)| k == key)
    }

    /// `[[GetOwnProperty]](P)`.
    pub fn get_own_property(&self, key: &PropertyKey) -> Option<&PropertyDescriptor> {
        self.position(key).map(|idx| &self.properties[idx].1)
    }

    pub fn has_own_property(&self, key: &PropertyKey) -> bool {
        self.position(key).is_some()
    }

    /// `[[DefineOwnProperty]](P, Desc)`: returns `false` when the change is
    /// rejected (non-configurable conflict or non-extensible object).
    pub fn define_own_property(
        &mut self,
        key: impl Into<PropertyKey>,
        desc: PropertyDescriptor,
    ) -> bool {
        let key = key.into();
        let Some(idx) = self.position(&key) else {
            if !self.extensible {
                return false;
            }
            self.properties.push((key, desc));
            return true;
        };

        let current = &self.properties[idx].1;
        if !current.is_configurable() {
            if desc.is_configurable()
                || desc.is_enumerable() != current.is_enumerable()
                || std::mem::discriminant(current) != std::mem::discriminant(&desc)
            {
                return false;
            }
            match (current, &desc) {
                (
                    PropertyDescriptor::Data {
                        writable: false,
                        value: current_v,
                        ..
                    },
                    PropertyDescriptor::Data {
                        writable: new_w,
                        value: new_v,
                        ..
                    },
                ) if *new_w || current_v != new_v => return false,
                (
                    PropertyDescriptor::Accessor {
                        get: cur_get,
                        set: cur_set,
                        ..
                    },
                    PropertyDescriptor::Accessor {
                        get: new_get,
                        set: new_set,
                        ..
                    },
                ) if cur_get != new_get || cur_set != new_set => return false,
                _ => {}
            }
        }
        self.properties[idx].1 = desc;
        true
    }

    /// `[[OwnPropertyKeys]]()`: array indices ascending, then remaining string
    /// keys in insertion order, then symbols in insertion order.
    pub fn own_property_keys(&self) -> Vec<PropertyKey> {
        let mut index_keys: Vec<(u32, &PropertyKey)> = Vec::new();
        let mut string_keys: Vec<&PropertyKey> = Vec::new();
        let mut symbol_keys: Vec<&PropertyKey> = Vec::new();

        for (key, _) in &self.properties {
            match key {
                PropertyKey::String(_) => match key.array_index() {
                    Some(n) => index_keys.push((n, key)),
                    None => string_keys.push(key),
                },
                PropertyKey::Symbol(_) => symbol_keys.push(key),
            }
        }

        index_keys.sort_by_key(|(n, _)| *n);
        index_keys
            .into_iter()
            .map(|(_, k)| k)
            .chain(string_keys)
            .chain(symbol_keys)
            .cloned()
            .collect()
    }

    /// `Object.getOwnPropertyNames`: string keys only, in `[[OwnPropertyKeys]]`
    /// order.
    pub fn own_property_names(&self) -> Vec<String> {
        self.own_property_keys()
            .into_iter()
            .filter_map(|key| match key {
                PropertyKey::String(s) => Some(s),
                PropertyKey::Symbol(_) => None,
            })
            .collect()
    }

    /// `Object.freeze` semantics.
    pub fn freeze(&mut self) {
        self.extensible = false;
        for (_, desc) in &mut self.properties {
            desc.set_non_configurable();
            desc.set_non_writable();
        }
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

// ---------------------------------------------------------------------------
// DescriptorRecord
// ---------------------------------------------------------------------------

/// Field names a descriptor object can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DescriptorField {
    Value,
    Writable,
    Get,
    Set,
    Enumerable,
    Configurable,
}

impl DescriptorField {
    pub const ALL: [Self; 6] = [
        Self::Value,
        Self::Writable,
        Self::Get,
        Self::Set,
        Self::Enumerable,
        Self::Configurable,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Writable => "writable",
            Self::Get => "get",
            Self::Set => "set",
            Self::Enumerable => "enumerable",
            Self::Configurable => "configurable",
        }
    }
}

impl fmt::Display for DescriptorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared `Object.prototype` stand-in. Cloning shares the underlying slots,
/// so a field defined by guest code is visible through every descriptor
/// record created before or after the poisoning.
#[derive(Debug, Clone, Default)]
pub struct ObjectPrototype {
    fields: Arc<RwLock<BTreeMap<DescriptorField, JsValue>>>,
}

impl ObjectPrototype {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or overwrite) an inherited field, e.g.
    /// `Object.prototype.writable = false`.
    pub fn define(&self, field: DescriptorField, value: JsValue) {
        self.fields
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(field, value);
    }

    pub fn remove(&self, field: DescriptorField) {
        self.fields
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&field);
    }

    pub fn lookup(&self, field: DescriptorField) -> Option<JsValue> {
        self.fields
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&field)
            .cloned()
    }

    /// Whether two handles refer to the same prototype object.
    pub fn same_object(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.fields, &other.fields)
    }
}

/// Object-shaped descriptor, as returned by
/// `Object.getOwnPropertyDescriptor`.
///
/// Own fields exist only for the descriptor's kind: data descriptors carry
/// `value`/`writable`, accessors carry `get`/`set`. Reads through
/// [`DescriptorRecord::get`] fall through to the prototype, exactly like a
/// property read in guest code would.
#[derive(Debug, Clone)]
pub struct DescriptorRecord {
    own: BTreeMap<DescriptorField, JsValue>,
    prototype: ObjectPrototype,
}

impl DescriptorRecord {
    /// Reflect `desc` into a fresh record inheriting from `prototype`.
    pub fn from_descriptor(desc: &PropertyDescriptor, prototype: ObjectPrototype) -> Self {
        let mut own = BTreeMap::new();
        match desc {
            PropertyDescriptor::Data {
                value,
                writable,
                enumerable,
                configurable,
            } => {
                own.insert(DescriptorField::Value, value.clone());
                own.insert(DescriptorField::Writable, JsValue::Bool(*writable));
                own.insert(DescriptorField::Enumerable, JsValue::Bool(*enumerable));
                own.insert(DescriptorField::Configurable, JsValue::Bool(*configurable));
            }
            PropertyDescriptor::Accessor {
                get,
                set,
                enumerable,
                configurable,
            } => {
                let as_value =
                    |h: Option<ObjectHandle>| h.map_or(JsValue::Undefined, JsValue::Function);
                own.insert(DescriptorField::Get, as_value(*get));
                own.insert(DescriptorField::Set, as_value(*set));
                own.insert(DescriptorField::Enumerable, JsValue::Bool(*enumerable));
                own.insert(DescriptorField::Configurable, JsValue::Bool(*configurable));
            }
        }
        Self { own, prototype }
    }

    /// Ordinary `[[Get]]`: own field, else inherited field, else `undefined`.
    pub fn get(&self, field: DescriptorField) -> JsValue {
        self.own
            .get(&field)
            .cloned()
            .or_else(|| self.prototype.lookup(field))
            .unwrap_or(JsValue::Undefined)
    }

    /// `hasOwnProperty` on the record itself, ignoring the prototype.
    pub fn has_own(&self, field: DescriptorField) -> bool {
        self.own.contains_key(&field)
    }

    pub fn prototype(&self) -> &ObjectPrototype {
        &self.prototype
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_property_keys_follow_es_order() {
        let mut source = BindingSource::new();
        source.define_own_property("b", PropertyDescriptor::data(JsValue::Int(1)));
        source.define_own_property(SymbolId(7), PropertyDescriptor::data(JsValue::Null));
        source.define_own_property("10", PropertyDescriptor::data(JsValue::Int(2)));
        source.define_own_property("a", PropertyDescriptor::data(JsValue::Int(3)));
        source.define_own_property("2", PropertyDescriptor::data(JsValue::Int(4)));

        let keys: Vec<String> = source
            .own_property_keys()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(keys, vec!["2", "10", "b", "a", "Symbol(7)"]);
    }

    #[test]
    fn own_property_names_skip_symbols() {
        let mut source = BindingSource::new();
        source.define_own_property(SymbolId(1), PropertyDescriptor::data(JsValue::Null));
        source.define_own_property("x", PropertyDescriptor::data(JsValue::Null));
        assert_eq!(source.own_property_names(), vec!["x".to_string()]);
    }

    #[test]
    fn leading_zero_and_negative_keys_are_not_indices() {
        let mut source = BindingSource::new();
        source.define_own_property("-1", PropertyDescriptor::data(JsValue::Null));
        source.define_own_property("01", PropertyDescriptor::data(JsValue::Null));
        source.define_own_property("0", PropertyDescriptor::data(JsValue::Null));
        assert_eq!(source.own_property_names(), vec!["0", "-1", "01"]);
    }

    #[test]
    fn non_configurable_non_writable_cannot_change() {
        let mut source = BindingSource::new();
        assert!(source.define_own_property("k", PropertyDescriptor::data_frozen(JsValue::Int(1))));
        assert!(!source.define_own_property("k", PropertyDescriptor::data_frozen(JsValue::Int(2))));
        assert!(!source.define_own_property(
            "k",
            PropertyDescriptor::data_with(JsValue::Int(1), true, false)
        ));
        assert_eq!(
            source.get_own_property(&PropertyKey::from("k")),
            Some(&PropertyDescriptor::data_frozen(JsValue::Int(1)))
        );
    }

    #[test]
    fn configurable_property_can_be_redefined_in_place() {
        let mut source = BindingSource::new();
        source.define_own_property("a", PropertyDescriptor::data(JsValue::Int(1)));
        source.define_own_property("b", PropertyDescriptor::data(JsValue::Int(2)));
        assert!(source.define_own_property("a", PropertyDescriptor::accessor(None, None)));
        assert_eq!(source.own_property_names(), vec!["a", "b"]);
        assert!(matches!(
            source.get_own_property(&PropertyKey::from("a")),
            Some(PropertyDescriptor::Accessor { .. })
        ));
    }

    #[test]
    fn non_extensible_source_rejects_new_keys() {
        let mut source = BindingSource::new();
        source.define_own_property("a", PropertyDescriptor::data(JsValue::Int(1)));
        source.freeze();
        assert!(!source.define_own_property("b", PropertyDescriptor::data(JsValue::Int(1))));
        assert_eq!(
            source.get_own_property(&PropertyKey::from("a")),
            Some(&PropertyDescriptor::Data {
                value: JsValue::Int(1),
                writable: false,
                enumerable: true,
                configurable: false,
            })
        );
    }

    #[test]
    fn descriptor_record_own_fields_match_kind() {
        let proto = ObjectPrototype::new();
        let data = DescriptorRecord::from_descriptor(
            &PropertyDescriptor::data_frozen(JsValue::Undefined),
            proto.clone(),
        );
        assert!(data.has_own(DescriptorField::Value));
        assert!(data.has_own(DescriptorField::Writable));
        assert!(!data.has_own(DescriptorField::Get));

        let accessor = DescriptorRecord::from_descriptor(
            &PropertyDescriptor::accessor(Some(ObjectHandle(3)), None),
            proto,
        );
        assert!(!accessor.has_own(DescriptorField::Value));
        assert!(!accessor.has_own(DescriptorField::Writable));
        assert_eq!(accessor.get(DescriptorField::Get), JsValue::Function(ObjectHandle(3)));
        assert_eq!(accessor.get(DescriptorField::Set), JsValue::Undefined);
    }

    #[test]
    fn poisoned_prototype_is_visible_through_get_but_not_has_own() {
        let proto = ObjectPrototype::new();
        let accessor = DescriptorRecord::from_descriptor(
            &PropertyDescriptor::accessor(None, None),
            proto.clone(),
        );
        assert_eq!(accessor.get(DescriptorField::Writable), JsValue::Undefined);

        proto.define(DescriptorField::Writable, JsValue::Bool(false));
        proto.define(DescriptorField::Value, JsValue::Int(42));
        assert_eq!(accessor.get(DescriptorField::Writable), JsValue::Bool(false));
        assert_eq!(accessor.get(DescriptorField::Value), JsValue::Int(42));
        assert!(!accessor.has_own(DescriptorField::Value));

        proto.remove(DescriptorField::Value);
        assert_eq!(accessor.get(DescriptorField::Value), JsValue::Undefined);
    }

    #[test]
    fn strictly_false_does_not_coerce() {
        assert!(JsValue::Bool(false).is_strictly_false());
        assert!(!JsValue::Undefined.is_strictly_false());
        assert!(!JsValue::Null.is_strictly_false());
        assert!(!JsValue::Int(0).is_strictly_false());
        assert!(!JsValue::Str(String::new()).is_strictly_false());
    }

    #[test]
    fn binding_source_serde_roundtrip() {
        let source = BindingSource::from_descriptors([
            ("Infinity", PropertyDescriptor::data_frozen(JsValue::Int(i64::MAX))),
            ("globalThis", PropertyDescriptor::data(JsValue::Object(ObjectHandle(1)))),
        ]);
        let json = serde_json::to_string(&source).unwrap();
        let back: BindingSource = serde_json::from_str(&json).unwrap();
        assert_eq!(back, source);
    }
}
