//! Symbol demangling utilities.
//!
//! ## Language Detection
//!
//! The language of a symbol is guessed from its mangling:
//!
//! - Rust symbols: start with `_R`, or are legacy `_ZN...17h<hash>E` names
//! - C++ symbols: start with `_Z` (Itanium mangling)
//! - C symbols: everything else

use rustc_demangle::try_demangle;

use crate::types::{SymbolLanguage, SymbolName};

/// Build a [`SymbolName`] from a raw linkage name.
pub(crate) fn make_symbol_name(raw: impl Into<String>) -> SymbolName
{
    let raw = raw.into();
    let demangled = try_demangle(&raw).ok().map(|d| format!("{d:#}"));
    let language = if raw.starts_with("_R") || (raw.starts_with("_ZN") && demangled.is_some()) {
        SymbolLanguage::Rust
    } else if raw.starts_with("_Z") {
        SymbolLanguage::Cpp
    } else if raw.is_empty() {
        SymbolLanguage::Unknown
    } else {
        SymbolLanguage::C
    };

    SymbolName::new(raw, demangled, language)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn c_names_are_left_alone()
    {
        let name = make_symbol_name("main");
        assert_eq!(name.language(), SymbolLanguage::C);
        assert_eq!(name.display_name(), "main");
        assert!(name.demangled().is_none());
    }

    #[test]
    fn legacy_rust_names_lose_their_hash()
    {
        let name = make_symbol_name("_ZN4core3fmt5write17h0123456789abcdefE");
        assert_eq!(name.language(), SymbolLanguage::Rust);
        assert_eq!(name.display_name(), "core::fmt::write");
        assert!(name.matches("core::fmt::write"));
    }
}
