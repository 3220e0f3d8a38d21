//! Name presentation helpers.
//!
//! Only the simple `_TtC` class-name mangling is decoded here. Full Swift
//! symbol demangling is delegated to a [`Demangler`] supplied by the caller.

/// Demangles Swift symbols for presentation.
pub trait Demangler: Send + Sync {
    /// Returns the demangled form of `symbol`, or `None` if it cannot be demangled.
    fn demangle_swift(&self, symbol: &str) -> Option<String>;
}

/// A demangler that never demangles.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDemangler;

impl Demangler for NoDemangler {
    fn demangle_swift(&self, _symbol: &str) -> Option<String> {
        None
    }
}

/// A demangler that only understands `_TtC` class names.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassNameDemangler;

impl Demangler for ClassNameDemangler {
    fn demangle_swift(&self, symbol: &str) -> Option<String> {
        let demangled = demangle_classname(symbol);
        (demangled != symbol).then_some(demangled)
    }
}

/// Splits a leading decimal number off `s`.
///
/// Returns the number (0 if there are no digits) and the rest of the string.
fn take_number(s: &str) -> (usize, &str) {
    let digits = s.bytes().take_while(u8::is_ascii_digit).count();
    let value = s[..digits].parse().unwrap_or(0);
    (value, &s[digits..])
}

/// Reads one length-prefixed identifier, requiring it to be shorter than
/// the remaining input.
fn take_identifier(s: &str) -> Option<(&str, &str)> {
    let (len, rest) = take_number(s);
    if len == 0 || len >= s.len() {
        return None;
    }
    let ident = rest.get(..len)?;
    Some((ident, &rest[len..]))
}

/// Renders a `_TtC<len>Module<len>Class` name as `Module.Class`.
///
/// An optional `P<len><discriminator>` private-name prefix before the class
/// identifier is skipped. Names without the prefix, or with lengths that do
/// not fit, are returned unchanged.
pub fn demangle_classname(name: &str) -> String {
    let Some(mangled) = name.strip_prefix("_TtC") else {
        return name.to_string();
    };
    let start = mangled
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(mangled.len());
    let Some((module, rest)) = take_identifier(&mangled[start..]) else {
        return name.to_string();
    };
    let rest = match rest.strip_prefix('P') {
        Some(private) => {
            let (len, tail) = take_number(private);
            match tail.get(len..) {
                Some(tail) => tail,
                None => return name.to_string(),
            }
        }
        None => rest,
    };
    match take_identifier(rest) {
        Some((class, _)) => format!("{}.{}", module, class),
        None => name.to_string(),
    }
}

/// Replaces characters that are not valid in a flat symbol name with `_`.
pub fn filter_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '$' | '<' | '>') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
