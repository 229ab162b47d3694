//! Type nodes stored in the arena.

use std::fmt;

use once_cell::sync::OnceCell;

use super::TypeSystem;
use crate::debuginfo::{BaseEncoding, CompoundKind, DebugInfoIndex, ModuleId, Qualifiers, RecordId};
use crate::error::FathomResult;

/// Handle of a node in the type arena
///
/// Handles are stable for the lifetime of the owning program. Equal handles
/// mean the same shared node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub(crate) u32);

impl TypeId
{
    /// The `void` type, always present.
    pub const VOID: TypeId = TypeId(0);

    pub fn index(self) -> u32
    {
        self.0
    }
}

impl fmt::Display for TypeId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "type#{}", self.0)
    }
}

/// A type reference resolved on first use
///
/// Members, parameters and return types point at other records through
/// `LazyType` so building a node never recurses into the nodes it refers to.
/// That is what keeps self-referential structures finite.
#[derive(Debug, Clone)]
pub struct LazyType
{
    reference: Option<(ModuleId, RecordId)>,
    cell: OnceCell<TypeId>,
}

impl LazyType
{
    pub(crate) fn unresolved(module: ModuleId, record: Option<RecordId>) -> Self
    {
        let cell = OnceCell::new();
        if record.is_none() {
            let _ = cell.set(TypeId::VOID);
        }
        Self {
            reference: record.map(|r| (module, r)),
            cell,
        }
    }

    pub fn resolved(id: TypeId) -> Self
    {
        Self {
            reference: None,
            cell: OnceCell::with_value(id),
        }
    }

    /// Resolve (building the node if needed) and return the handle.
    pub fn get(&self, types: &TypeSystem, index: &DebugInfoIndex) -> FathomResult<TypeId>
    {
        self.cell
            .get_or_try_init(|| match self.reference {
                Some((module, record)) => types.from_record(index, module, record),
                None => Ok(TypeId::VOID),
            })
            .copied()
    }

    /// Handle if already resolved.
    pub fn peek(&self) -> Option<TypeId>
    {
        self.cell.get().copied()
    }
}

/// A struct, union or class member.
#[derive(Debug, Clone)]
pub struct Member
{
    pub name: Option<String>,
    pub ty: LazyType,
    pub bit_offset: u64,
    pub bit_field_size: Option<u64>,
}

impl Member
{
    /// Byte offset of the member's first storage byte.
    pub fn byte_offset(&self) -> u64
    {
        self.bit_offset / 8
    }

    pub fn is_bit_field(&self) -> bool
    {
        self.bit_field_size.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct CompoundType
{
    pub kind: CompoundKind,
    pub size: Option<u64>,
    pub members: Vec<Member>,
    /// `false` for a declaration with no definition anywhere.
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumerator
{
    pub name: String,
    pub value: i64,
}

#[derive(Debug, Clone)]
pub struct EnumType
{
    pub underlying: Option<TypeId>,
    pub size: Option<u64>,
    pub enumerators: Vec<Enumerator>,
    pub complete: bool,
}

#[derive(Debug, Clone)]
pub struct FunctionType
{
    pub return_type: LazyType,
    pub parameters: Vec<LazyType>,
    pub variadic: bool,
}

/// Kind-specific payload of a type node.
#[derive(Debug, Clone)]
pub enum TypeKind
{
    Void,
    Primitive
    {
        encoding: BaseEncoding,
        size: u64,
    },
    Pointer
    {
        pointee: TypeId,
        size: u64,
    },
    Array
    {
        element: TypeId,
        length: Option<u64>,
    },
    Compound(CompoundType),
    Enum(EnumType),
    Function(FunctionType),
    Typedef
    {
        target: TypeId,
    },
    Qualified
    {
        qualifiers: Qualifiers,
        target: TypeId,
    },
}

/// One node of the type graph.
#[derive(Debug, Clone)]
pub struct Type
{
    pub(crate) name: Option<String>,
    pub(crate) kind: TypeKind,
    pub(crate) origin: Option<(ModuleId, RecordId)>,
}

impl Type
{
    pub fn name(&self) -> Option<&str>
    {
        self.name.as_deref()
    }

    pub fn kind(&self) -> &TypeKind
    {
        &self.kind
    }

    /// Module and record this node was built from; `None` for synthesized types.
    pub fn origin(&self) -> Option<(ModuleId, RecordId)>
    {
        self.origin
    }

    pub fn is_alias(&self) -> bool
    {
        matches!(self.kind, TypeKind::Typedef { .. } | TypeKind::Qualified { .. })
    }

    /// Integer, boolean, floating point, pointer or enum.
    pub fn is_scalar(&self) -> bool
    {
        matches!(
            self.kind,
            TypeKind::Primitive { .. } | TypeKind::Pointer { .. } | TypeKind::Enum(_)
        )
    }

    pub fn is_pointer(&self) -> bool
    {
        matches!(self.kind, TypeKind::Pointer { .. })
    }

    pub fn as_compound(&self) -> Option<&CompoundType>
    {
        match &self.kind {
            TypeKind::Compound(compound) => Some(compound),
            _ => None,
        }
    }

    pub fn as_enum(&self) -> Option<&EnumType>
    {
        match &self.kind {
            TypeKind::Enum(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionType>
    {
        match &self.kind {
            TypeKind::Function(function) => Some(function),
            _ => None,
        }
    }
}
