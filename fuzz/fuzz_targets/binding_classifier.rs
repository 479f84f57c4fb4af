#![no_main]

use std::collections::BTreeSet;

use frankenengine_confinement::binding_classifier::{classify, classify_with_report};
use frankenengine_confinement::identifier::{EVAL_BINDING, is_bindable_identifier};
use frankenengine_confinement::object_model::{
    BindingSource, DescriptorField, JsValue, ObjectHandle, PropertyDescriptor, SymbolId,
};
use frankenengine_confinement::primordials::{Intrinsics, Primordials};
use frankenengine_confinement::scope_prelude::build_prelude;
use libfuzzer_sys::fuzz_target;

const MAX_BINDINGS: usize = 32;
const NAME_ALPHABET: &[u8] = b"abeltvx_$09-";

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let intrinsics = Intrinsics::pristine();
    let primordials = Primordials::capture(&intrinsics);
    poison_prototype(&intrinsics, byte(data, 0));

    let (source, exclusions) = build_source(data);
    let report = classify_with_report(&source, &exclusions, &primordials);
    let constants = classify(&source, &exclusions, &primordials);
    assert_eq!(report.constants, constants);

    let mut seen = BTreeSet::new();
    for name in constants.names() {
        assert!(seen.insert(name.as_str()), "duplicate constant {name}");
        assert_ne!(name, EVAL_BINDING);
        assert!(!exclusions.contains(name));
        assert!(is_bindable_identifier(name));
        let desc = source.get_own_property(&name.as_str().into());
        assert!(
            matches!(
                desc,
                Some(PropertyDescriptor::Data {
                    writable: false,
                    configurable: false,
                    ..
                })
            ),
            "{name}: {desc:?}"
        );
    }

    let prelude = build_prelude(&constants, &primordials);
    assert_eq!(prelude.is_empty(), constants.is_empty());
    assert_eq!(prelude.bound_names(), constants.len());

    if let Ok(json) = serde_json::to_string(&report.constants) {
        let _ = serde_json::from_str::<serde_json::Value>(&json);
    }
});

fn poison_prototype(intrinsics: &Intrinsics, mask: u8) {
    let prototype = &intrinsics.object_prototype;
    for (bit, field) in DescriptorField::ALL.into_iter().enumerate() {
        if mask & (1 << bit) == 0 {
            continue;
        }
        let value = match field {
            DescriptorField::Writable | DescriptorField::Configurable => JsValue::Bool(false),
            DescriptorField::Value => JsValue::Int(i64::from(mask)),
            _ => JsValue::Function(ObjectHandle(u32::from(mask))),
        };
        prototype.define(field, value);
    }
}

fn build_source(data: &[u8]) -> (BindingSource, BTreeSet<String>) {
    let mut source = BindingSource::new();
    let mut exclusions = BTreeSet::new();
    for (index, value) in data.iter().copied().skip(1).take(MAX_BINDINGS).enumerate() {
        let name = name_for(data, index, value);
        let desc = descriptor_for(value);
        if value & 0x80 != 0 {
            exclusions.insert(name.clone());
        }
        if value % 11 == 0 {
            source.define_own_property(SymbolId(u32::from(value)), desc);
        } else {
            source.define_own_property(name, desc);
        }
    }
    if byte(data, 1) & 1 == 1 {
        source.freeze();
    }
    (source, exclusions)
}

fn name_for(data: &[u8], index: usize, value: u8) -> String {
    match value % 7 {
        0 => EVAL_BINDING.to_string(),
        1 => ["const", "this", "null", "let", "arguments"][usize::from(value) % 5].to_string(),
        _ => {
            let len = 1 + usize::from(value % 6);
            (0..len)
                .map(|i| {
                    let pick = byte(data, index + i);
                    char::from(NAME_ALPHABET[usize::from(pick) % NAME_ALPHABET.len()])
                })
                .collect()
        }
    }
}

fn descriptor_for(value: u8) -> PropertyDescriptor {
    match (value >> 2) % 6 {
        0 => PropertyDescriptor::data_frozen(JsValue::Int(i64::from(value))),
        1 => PropertyDescriptor::data(JsValue::Null),
        2 => PropertyDescriptor::data_with(JsValue::Undefined, true, false),
        3 => PropertyDescriptor::data_with(JsValue::Bool(false), false, true),
        4 => PropertyDescriptor::accessor(Some(ObjectHandle(u32::from(value))), None),
        _ => PropertyDescriptor::accessor(None, Some(ObjectHandle(u32::from(value)))),
    }
}

fn byte(data: &[u8], index: usize) -> u8 {
    if data.is_empty() {
        return 0;
    }
    data[index % data.len()]
}
