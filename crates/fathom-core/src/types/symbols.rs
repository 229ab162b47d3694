//! Symbol and source location types.

use std::fmt;

use super::Address;
use crate::debuginfo::ModuleId;
use crate::typesys::TypeId;

/// Programming language associated with a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolLanguage
{
    /// Rust symbol (v0 or legacy mangling).
    Rust,
    /// C++ symbol (Itanium mangling).
    Cpp,
    /// C symbol or unmangled global.
    C,
    Unknown,
}

impl fmt::Display for SymbolLanguage
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let label = match self {
            SymbolLanguage::Rust => "rust",
            SymbolLanguage::Cpp => "c++",
            SymbolLanguage::C => "c",
            SymbolLanguage::Unknown => "unknown",
        };
        write!(f, "{label}")
    }
}

/// A linkage name with demangling metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolName
{
    raw: String,
    demangled: Option<String>,
    language: SymbolLanguage,
}

impl SymbolName
{
    pub fn new(raw: String, demangled: Option<String>, language: SymbolLanguage) -> Self
    {
        Self {
            raw,
            demangled,
            language,
        }
    }

    /// Raw (mangled) name as emitted in the symbol table.
    pub fn raw(&self) -> &str
    {
        &self.raw
    }

    pub fn demangled(&self) -> Option<&str>
    {
        self.demangled.as_deref()
    }

    /// Preferred presentation (demangled, falling back to raw).
    pub fn display_name(&self) -> &str
    {
        self.demangled.as_deref().unwrap_or(&self.raw)
    }

    pub fn language(&self) -> SymbolLanguage
    {
        self.language
    }

    /// Returns `true` if either spelling equals `name`.
    pub fn matches(&self, name: &str) -> bool
    {
        self.raw == name || self.demangled.as_deref() == Some(name)
    }
}

impl fmt::Display for SymbolName
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.display_name())
    }
}

/// Linkage visibility of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolBinding
{
    Local,
    Global,
    Weak,
    Unique,
    Unknown,
}

/// What a symbol names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind
{
    Function,
    Object,
    Section,
    Tls,
    Unknown,
}

/// A resolved symbol at its runtime address
///
/// `address` already includes the owning module's load bias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol
{
    pub name: SymbolName,
    pub address: Address,
    pub size: u64,
    pub binding: SymbolBinding,
    pub kind: SymbolKind,
    /// Module the symbol was loaded from.
    pub module: ModuleId,
    /// Type of the named entity, when debug information describes it.
    pub type_id: Option<TypeId>,
}

impl Symbol
{
    /// Half-open runtime address range `[address, address + size)`.
    pub fn range(&self) -> std::ops::Range<u64>
    {
        self.address.value()..self.address.value().saturating_add(self.size)
    }

    pub fn contains(&self, address: Address) -> bool
    {
        let range = self.range();
        if range.is_empty() {
            return address == self.address;
        }
        range.contains(&address.value())
    }
}

/// Source code location for a frame or function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation
{
    pub file: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl SourceLocation
{
    /// Helper to build a location when only a file is known.
    pub fn from_file(file: impl Into<String>) -> Self
    {
        Self {
            file: file.into(),
            line: None,
            column: None,
        }
    }
}

impl fmt::Display for SourceLocation
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match (self.line, self.column) {
            (Some(line), Some(column)) => write!(f, "{}:{line}:{column}", self.file),
            (Some(line), None) => write!(f, "{}:{line}", self.file),
            _ => write!(f, "{}", self.file),
        }
    }
}
