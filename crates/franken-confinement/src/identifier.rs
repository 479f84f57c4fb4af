//! Identifier grammar and reserved words for pre-bound constants.
//!
//! Names are restricted to the ASCII subset `^[A-Za-z_$][A-Za-z0-9_$]*$`.
//! Unicode identifiers are legal ES but are simply never pre-bound; they keep
//! resolving through the scope chain, which is always correct.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

/// The one name that is never pre-bound, regardless of its descriptor.
/// Direct eval is mediated by the revocation gate instead.
pub const EVAL_BINDING: &str = "eval";

/// Words that cannot be used as binding names (ES2020 §11.6.2).
pub const RESERVED_WORDS: &[&str] = &[
    // Keywords
    "await",
    "break",
    "case",
    "catch",
    "class",
    "const",
    "continue",
    "debugger",
    "default",
    "delete",
    "do",
    "else",
    "export",
    "extends",
    "finally",
    "for",
    "function",
    "if",
    "import",
    "in",
    "instanceof",
    "new",
    "return",
    "super",
    "switch",
    "this",
    "throw",
    "try",
    "typeof",
    "var",
    "void",
    "while",
    "with",
    "yield",
    // Reserved in strict mode code
    "let",
    "static",
    "implements",
    "package",
    "protected",
    "interface",
    "private",
    "public",
    // Future reserved
    "enum",
    // Literals
    "null",
    "true",
    "false",
    // Not reserved, but never bindable in a strict function body
    "arguments",
];

static RESERVED: LazyLock<BTreeSet<&'static str>> =
    LazyLock::new(|| RESERVED_WORDS.iter().copied().collect());

static IDENTIFIER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("identifier pattern is a valid regex")
});

/// Whether `name` is in the fixed reserved-word set.
pub fn is_reserved_word(name: &str) -> bool {
    RESERVED.contains(name)
}

/// Whether `name` matches the ASCII identifier grammar. Says nothing about
/// reserved words.
pub fn matches_identifier_grammar(name: &str) -> bool {
    IDENTIFIER_PATTERN.is_match(name)
}

/// Grammar match and not reserved.
pub fn is_bindable_identifier(name: &str) -> bool {
    matches_identifier_grammar(name) && !is_reserved_word(name)
}
