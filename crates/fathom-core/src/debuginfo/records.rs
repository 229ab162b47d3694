//! Structured debug-information records.
//!
//! These are the decoded, container-independent descriptions of one module:
//! its symbol table, type descriptions, variables, functions with their
//! scopes, call-frame information and line table. The DWARF loader in
//! [`super::dwarf`] produces them; tests and embedders can also build them by
//! hand to describe synthetic modules.
//!
//! All addresses in records are *file* addresses. The index adds the
//! module's load bias when answering runtime queries.

use std::ops::Range;
use std::path::PathBuf;

use bitflags::bitflags;

use crate::platform::Architecture;
use crate::types::{SymbolBinding, SymbolKind};

/// Identity of a record within its module (a `.debug_info` offset for DWARF).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub u64);

/// Everything decoded from one binary.
#[derive(Debug, Clone, Default)]
pub struct ModuleRecords
{
    pub name: String,
    pub path: Option<PathBuf>,
    pub architecture: Option<Architecture>,
    /// File-address range of the loadable contents, if known.
    pub address_range: Option<Range<u64>>,
    pub symbols: Vec<SymbolRecord>,
    pub types: Vec<TypeRecord>,
    /// Global and static variables.
    pub variables: Vec<VariableRecord>,
    pub functions: Vec<FunctionRecord>,
    pub cfi: Vec<CfiRecord>,
    pub lines: Vec<LineRecord>,
}

impl ModuleRecords
{
    pub fn new(name: impl Into<String>) -> Self
    {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// One symbol-table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRecord
{
    pub name: String,
    pub address: u64,
    pub size: u64,
    pub binding: SymbolBinding,
    pub kind: SymbolKind,
    /// Type of the named variable or function, when debug info describes it.
    pub type_id: Option<RecordId>,
}

/// Encoding of a base type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseEncoding
{
    Signed,
    Unsigned,
    Bool,
    Float,
}

/// struct, union or class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompoundKind
{
    Struct,
    Union,
    Class,
}

impl CompoundKind
{
    pub fn keyword(self) -> &'static str
    {
        match self {
            CompoundKind::Struct => "struct",
            CompoundKind::Union => "union",
            CompoundKind::Class => "class",
        }
    }
}

bitflags! {
    /// Type qualifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Qualifiers: u8 {
        const CONST = 1 << 0;
        const VOLATILE = 1 << 1;
        const RESTRICT = 1 << 2;
        const ATOMIC = 1 << 3;
    }
}

/// A member of a struct, union or class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRecord
{
    /// `None` for anonymous struct/union members.
    pub name: Option<String>,
    pub type_id: RecordId,
    /// Offset from the start of the containing object, in bits.
    pub bit_offset: u64,
    /// Width for bit-field members.
    pub bit_field_size: Option<u64>,
}

/// A named enumeration constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumeratorRecord
{
    pub name: String,
    pub value: i64,
}

/// One type description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeRecord
{
    pub id: RecordId,
    pub kind: TypeRecordKind,
}

/// Shape of a type description
///
/// Type references are `Option<RecordId>` where `None` means `void`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRecordKind
{
    Void,
    Base
    {
        name: String,
        encoding: BaseEncoding,
        byte_size: u64,
    },
    Pointer
    {
        pointee: Option<RecordId>,
        /// Defaults to the platform word size.
        byte_size: Option<u64>,
    },
    Array
    {
        element: RecordId,
        /// `None` for flexible or unknown-length arrays.
        length: Option<u64>,
    },
    Compound
    {
        kind: CompoundKind,
        name: Option<String>,
        byte_size: Option<u64>,
        members: Vec<MemberRecord>,
        /// Forward declaration with no definition in this record.
        declaration: bool,
    },
    Enum
    {
        name: Option<String>,
        underlying: Option<RecordId>,
        byte_size: Option<u64>,
        enumerators: Vec<EnumeratorRecord>,
        declaration: bool,
    },
    Function
    {
        return_type: Option<RecordId>,
        parameters: Vec<Option<RecordId>>,
        variadic: bool,
    },
    Typedef
    {
        name: String,
        target: Option<RecordId>,
    },
    Qualified
    {
        qualifiers: Qualifiers,
        target: Option<RecordId>,
    },
}

impl TypeRecordKind
{
    /// Name this record is registered under, with its namespace.
    pub fn indexed_name(&self) -> Option<(TypeNamespace, &str)>
    {
        match self {
            TypeRecordKind::Base { name, .. } | TypeRecordKind::Typedef { name, .. } => {
                Some((TypeNamespace::Ordinary, name.as_str()))
            }
            TypeRecordKind::Compound {
                kind,
                name: Some(name),
                ..
            } => Some((TypeNamespace::from(*kind), name.as_str())),
            TypeRecordKind::Enum { name: Some(name), .. } => Some((TypeNamespace::Enum, name.as_str())),
            _ => None,
        }
    }

    pub fn is_declaration(&self) -> bool
    {
        matches!(
            self,
            TypeRecordKind::Compound { declaration: true, .. } | TypeRecordKind::Enum { declaration: true, .. }
        )
    }
}

/// C name spaces for types: tags live apart from ordinary identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeNamespace
{
    /// Base types and typedefs.
    Ordinary,
    Struct,
    Union,
    Class,
    Enum,
}

impl From<CompoundKind> for TypeNamespace
{
    fn from(kind: CompoundKind) -> Self
    {
        match kind {
            CompoundKind::Struct => TypeNamespace::Struct,
            CompoundKind::Union => TypeNamespace::Union,
            CompoundKind::Class => TypeNamespace::Class,
        }
    }
}

/// A compile-time constant value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConstValue
{
    Signed(i64),
    Unsigned(u64),
    Bytes(Vec<u8>),
}

/// Where a variable lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationRecord
{
    /// Static storage at a file address.
    Address(u64),
    /// The value is held in a register.
    Register(u16),
    /// In memory at the function's frame base plus an offset.
    FrameBaseOffset(i64),
    /// In memory at a register's value plus an offset.
    RegisterOffset
    {
        register: u16,
        offset: i64,
    },
    /// No storage; the value is known at compile time.
    Constant(ConstValue),
    OptimizedOut,
    /// A location expression the engine cannot evaluate.
    Unsupported(String),
}

/// A location valid over a PC range (`None` = everywhere).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationEntry
{
    pub range: Option<Range<u64>>,
    pub location: LocationRecord,
}

/// A global, static, local variable or parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableRecord
{
    pub name: String,
    pub linkage_name: Option<String>,
    pub type_id: Option<RecordId>,
    pub locations: Vec<LocationEntry>,
    /// Externally visible (not `static`).
    pub external: bool,
}

impl VariableRecord
{
    /// Variable with a single location valid everywhere.
    pub fn new(name: impl Into<String>, type_id: Option<RecordId>, location: LocationRecord) -> Self
    {
        Self {
            name: name.into(),
            linkage_name: None,
            type_id,
            locations: vec![LocationEntry { range: None, location }],
            external: true,
        }
    }

    /// Location of the variable when the (file-address) PC is `pc`.
    ///
    /// A variable with no entry covering `pc` is optimized out there.
    pub fn location_at(&self, pc: Option<u64>) -> &LocationRecord
    {
        static OPTIMIZED_OUT: LocationRecord = LocationRecord::OptimizedOut;
        self.locations
            .iter()
            .find(|entry| match (&entry.range, pc) {
                (None, _) => true,
                (Some(range), Some(pc)) => range.contains(&pc),
                (Some(_), None) => false,
            })
            .map_or(&OPTIMIZED_OUT, |entry| &entry.location)
    }
}

/// How a function's frame base is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameBaseRecord
{
    /// `DW_OP_call_frame_cfa`
    Cfa,
    Register(u16),
    RegisterOffset
    {
        register: u16,
        offset: i64,
    },
    #[default]
    Unknown,
}

/// A local variable or parameter inside a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRecord
{
    pub variable: VariableRecord,
    pub parameter: bool,
    /// PC ranges of the enclosing lexical block; empty = the whole function.
    pub scope: Vec<Range<u64>>,
    /// Lexical nesting depth, 0 for function-level declarations.
    pub depth: u32,
}

impl LocalRecord
{
    pub fn in_scope(&self, pc: u64) -> bool
    {
        self.scope.is_empty() || self.scope.iter().any(|range| range.contains(&pc))
    }
}

/// A concrete function with code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRecord
{
    pub name: String,
    pub linkage_name: Option<String>,
    pub low_pc: u64,
    /// Exclusive.
    pub high_pc: u64,
    pub type_id: Option<RecordId>,
    pub frame_base: FrameBaseRecord,
    pub locals: Vec<LocalRecord>,
    /// Externally visible (not `static`).
    pub external: bool,
}

impl FunctionRecord
{
    pub fn contains(&self, pc: u64) -> bool
    {
        (self.low_pc..self.high_pc).contains(&pc)
    }
}

/// Canonical frame address rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfaRuleRecord
{
    RegisterOffset
    {
        register: u16,
        offset: i64,
    },
    Unsupported(String),
}

/// How to recover one register of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterRuleRecord
{
    Undefined,
    SameValue,
    /// Saved at `CFA + n`.
    Offset(i64),
    /// The value is `CFA + n`.
    ValOffset(i64),
    /// Saved in another register.
    Register(u16),
    Unsupported(String),
}

/// One row of an unwind table, covering `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfiRow
{
    pub start: u64,
    pub end: u64,
    pub cfa: CfaRuleRecord,
    pub registers: Vec<(u16, RegisterRuleRecord)>,
}

impl CfiRow
{
    pub fn rule_for(&self, register: u16) -> Option<&RegisterRuleRecord>
    {
        self.registers.iter().find(|(n, _)| *n == register).map(|(_, rule)| rule)
    }
}

/// Unwind program of one function (a DWARF FDE), already executed into rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CfiRecord
{
    pub start: u64,
    pub end: u64,
    pub return_address_register: u16,
    pub rows: Vec<CfiRow>,
    /// Set when the decoder could delimit the FDE but not execute it.
    pub corrupt: Option<String>,
}

/// A line-table range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRecord
{
    pub start: u64,
    pub end: u64,
    pub file: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
}
