//! Name legalization, mangling and scoped disambiguation.
//!
//! Two distinct schemes exist on purpose. `legalize_name` is lossy and used
//! for internal identifiers; uniqueness comes from `define_name` suffixing
//! within a scope. `mangle_name` is a reversible byte escape used for
//! host-visible import/export strings, so two modules agree on the wire name
//! without ever seeing each other's symbol tables.

use crate::ir::ValueType;
use std::collections::{BTreeMap, BTreeSet};

pub type SymbolSet = BTreeSet<String>;
pub type SymbolMap = BTreeMap<String, String>;

/// Sigil prepended to every legalized identifier. It keeps generated names
/// clear of Kotlin hard keywords and of the runtime package name.
const LEGAL_PREFIX: &str = "w2k_";

/// Escape prefix letter for mangled names.
const MANGLE_PREFIX: char = 'Z';

/// One-character type tags used in mangled signatures and stack-variable
/// names.
pub fn mangle_type(ty: ValueType) -> char {
    match ty {
        ValueType::I32 => 'i',
        ValueType::I64 => 'j',
        ValueType::F32 => 'f',
        ValueType::F64 => 'd',
    }
}

/// Signature string for a type vector; the empty vector reads `v`.
pub fn mangle_types(types: &[ValueType]) -> String {
    if types.is_empty() {
        return "v".to_string();
    }
    types.iter().map(|t| mangle_type(*t)).collect()
}

/// Reversible mangling for host-visible names: `Z_` then each byte verbatim
/// when alphanumeric (excluding the prefix letter) or `_`, else `Z` followed
/// by the uppercase-hex byte value.
pub fn mangle_name(name: &str) -> String {
    let mut result = String::from("Z_");
    for c in name.bytes() {
        let ch = c as char;
        if (ch.is_ascii_alphanumeric() && ch != MANGLE_PREFIX) || ch == '_' {
            result.push(ch);
        } else {
            result.push(MANGLE_PREFIX);
            result.push_str(&format!("{c:02X}"));
        }
    }
    result
}

/// Mangled name of a function export: name, then the result types followed by
/// the param types, each mangled separately.
pub fn mangle_func_name(name: &str, params: &[ValueType], results: &[ValueType]) -> String {
    let sig = mangle_types(results) + &mangle_types(params);
    mangle_name(name) + &mangle_name(&sig)
}

/// Mangled name of a global export: name plus its one-char type.
pub fn mangle_global_name(name: &str, ty: ValueType) -> String {
    mangle_name(name) + &mangle_name(&mangle_type(ty).to_string())
}

/// Irreversible sanitization for internal identifiers: first char must be a
/// letter, the rest alphanumeric, everything else becomes `_`; the result is
/// prefixed so it cannot collide with Kotlin reserved words.
pub fn legalize_name(name: &str) -> String {
    if name.is_empty() {
        return LEGAL_PREFIX.to_string();
    }

    let mut result = String::new();
    let mut bytes = name.bytes();
    let first = bytes.next().expect("name is non-empty") as char;
    result.push(if first.is_ascii_alphabetic() { first } else { '_' });
    for c in bytes {
        let ch = c as char;
        result.push(if ch.is_ascii_alphanumeric() { ch } else { '_' });
    }

    format!("{LEGAL_PREFIX}{result}")
}

/// Legalize `name` and make it unique within `set` by appending `_0`, `_1`,
/// ... on collision. The winning name is inserted into the set.
pub fn define_name(set: &mut SymbolSet, name: &str) -> String {
    let mut legal = legalize_name(name);
    if set.contains(&legal) {
        let base = format!("{legal}_");
        let mut count = 0usize;
        loop {
            legal = format!("{base}{count}");
            count += 1;
            if !set.contains(&legal) {
                break;
            }
        }
    }
    set.insert(legal.clone());
    legal
}
