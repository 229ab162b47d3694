//! # Type System
//!
//! An arena of type nodes addressed by [`TypeId`] handles.
//!
//! ## Construction
//!
//! Nodes are built lazily from the debug-info records the first time they are
//! referenced and memoized by `(module, record)`, so asking twice for the same
//! record yields the same handle. Types the engine makes up itself (C
//! primitives for arithmetic results, `T *` for address-of, arrays and
//! qualified types named by [`TypeSystem::find_type`]) are memoized by their
//! structure instead.
//!
//! Members are [`LazyType`]s: a struct node never builds its member types,
//! which is what lets `struct list { struct list *next; }` exist without
//! infinite recursion. Pointer, array, typedef, qualifier and function
//! signature targets are resolved eagerly; only corrupt data can make those
//! chains cyclic, and a depth limit turns that into
//! [`FathomError::CorruptDebugInfo`].
//!
//! ## Declarations
//!
//! A forward-declared `struct foo` is completed from any module that defines
//! it, preferring the module that made the reference and then following the
//! configured [`SymbolPrecedence`] across modules. Names looked up through
//! [`TypeSystem::find_type`] follow the same module order. When no definition
//! exists the node stays incomplete and [`TypeSystem::size_of`] reports
//! [`FathomError::IncompleteType`].
//!
//! ## Concurrency
//!
//! The arena and both memo tables sit behind `RwLock`s. Lazy handles carry
//! their own `OnceCell`, so readers resolving different members never wait on
//! each other.

pub mod names;
mod ty;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

pub use names::CPrimitive;
use names::{BaseName, Declarator, parse_type_name};
use tracing::trace;
pub use ty::*;

use crate::config::SymbolPrecedence;
use crate::debuginfo::{
    BaseEncoding, CompoundKind, DebugInfoIndex, ModuleId, Qualifiers, RecordId, TypeNamespace, TypeRecordKind,
    TypeRef,
};
use crate::error::{FathomError, FathomResult, LookupKind};
use crate::platform::Platform;
use crate::types::SymbolBinding;

/// Pointer/array/typedef/qualifier chains deeper than this are treated as cyclic.
const MAX_RESOLVE_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum StructuralKey
{
    Primitive(CPrimitive),
    Pointer(TypeId, u64),
    Array(TypeId, Option<u64>),
    Typedef(String, TypeId),
    Qualified(TypeId, Qualifiers),
}

/// Where a member sits inside its (outermost) containing compound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberLookup
{
    pub ty: TypeId,
    pub bit_offset: u64,
    pub bit_field_size: Option<u64>,
}

/// The arena of type nodes for one program.
pub struct TypeSystem
{
    platform: Platform,
    arena: RwLock<Vec<Arc<Type>>>,
    by_record: RwLock<HashMap<(ModuleId, RecordId), TypeId>>,
    by_structure: RwLock<HashMap<StructuralKey, TypeId>>,
    precedence: SymbolPrecedence,
}

impl TypeSystem
{
    pub fn new(platform: Platform) -> Self
    {
        let void = Arc::new(Type {
            name: Some("void".to_string()),
            kind: TypeKind::Void,
            origin: None,
        });
        Self {
            platform,
            arena: RwLock::new(vec![void]),
            by_record: RwLock::new(HashMap::new()),
            by_structure: RwLock::new(HashMap::new()),
            precedence: SymbolPrecedence::default(),
        }
    }

    /// Order in which modules defining the same type name are tried.
    pub fn with_precedence(mut self, precedence: SymbolPrecedence) -> Self
    {
        self.precedence = precedence;
        self
    }

    pub fn platform(&self) -> &Platform
    {
        &self.platform
    }

    /// Node behind a handle.
    pub fn get(&self, id: TypeId) -> FathomResult<Arc<Type>>
    {
        self.arena
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id.0 as usize)
            .cloned()
            .ok_or_else(|| FathomError::InvalidArgument(format!("{id} does not belong to this program")))
    }

    /// Number of nodes built so far.
    pub fn len(&self) -> usize
    {
        self.arena.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool
    {
        // void is always present
        false
    }

    fn push(&self, ty: Type) -> TypeId
    {
        let mut arena = self.arena.write().unwrap_or_else(PoisonError::into_inner);
        let id = TypeId(arena.len() as u32);
        arena.push(Arc::new(ty));
        id
    }

    fn intern(&self, key: StructuralKey, build: impl FnOnce() -> Type) -> TypeId
    {
        if let Some(id) = self
            .by_structure
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return *id;
        }
        let mut table = self.by_structure.write().unwrap_or_else(PoisonError::into_inner);
        *table.entry(key).or_insert_with(|| self.push(build()))
    }

    /// Handle for a debug-info type record, building it on first use.
    pub(crate) fn from_record(&self, index: &DebugInfoIndex, module: ModuleId, record: RecordId)
        -> FathomResult<TypeId>
    {
        self.from_record_at(index, module, record, 0)
    }

    fn memoized(&self, module: ModuleId, record: RecordId) -> Option<TypeId>
    {
        self.by_record
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(module, record))
            .copied()
    }

    /// Record the handle for `(module, record)`, keeping an earlier winner.
    fn remember(&self, module: ModuleId, record: RecordId, id: TypeId) -> TypeId
    {
        let mut table = self.by_record.write().unwrap_or_else(PoisonError::into_inner);
        *table.entry((module, record)).or_insert(id)
    }

    fn optional_record(
        &self,
        index: &DebugInfoIndex,
        module: ModuleId,
        record: Option<RecordId>,
        depth: usize,
    ) -> FathomResult<TypeId>
    {
        match record {
            Some(record) => self.from_record_at(index, module, record, depth),
            None => Ok(TypeId::VOID),
        }
    }

    fn from_record_at(&self, index: &DebugInfoIndex, module: ModuleId, record: RecordId, depth: usize)
        -> FathomResult<TypeId>
    {
        if let Some(id) = self.memoized(module, record) {
            return Ok(id);
        }
        if depth > MAX_RESOLVE_DEPTH {
            return Err(FathomError::CorruptDebugInfo(format!(
                "type record 0x{:x} in {module} nests too deeply",
                record.0
            )));
        }
        let type_ref = index.type_record(module, record)?;
        let origin = Some((module, record));
        let next = depth + 1;

        let id = match &type_ref.record.kind {
            TypeRecordKind::Void => TypeId::VOID,
            TypeRecordKind::Base {
                name,
                encoding,
                byte_size,
            } => {
                let node = Type {
                    name: Some(name.clone()),
                    kind: TypeKind::Primitive {
                        encoding: *encoding,
                        size: *byte_size,
                    },
                    origin,
                };
                return Ok(self.insert_record_node(module, record, node));
            }
            TypeRecordKind::Pointer { pointee, byte_size } => {
                let pointee = self.optional_record(index, module, *pointee, next)?;
                self.pointer_sized(pointee, byte_size.unwrap_or(self.platform.word_size() as u64))
            }
            TypeRecordKind::Array { element, length } => {
                let element = self.from_record_at(index, module, *element, next)?;
                self.array_of(element, *length)
            }
            TypeRecordKind::Typedef { name, target } => {
                let target = self.optional_record(index, module, *target, next)?;
                self.typedef(name, target)
            }
            TypeRecordKind::Qualified { qualifiers, target } => {
                let target = self.optional_record(index, module, *target, next)?;
                self.qualified(target, *qualifiers)
            }
            TypeRecordKind::Compound {
                kind,
                name,
                byte_size,
                members,
                declaration,
            } => {
                if *declaration {
                    if let Some(complete) = self.complete_definition(index, module, TypeNamespace::from(*kind), name)
                    {
                        let id = self.from_record_at(index, complete.0, complete.1, next)?;
                        return Ok(self.remember(module, record, id));
                    }
                }
                let node = Type {
                    name: name.clone(),
                    kind: TypeKind::Compound(CompoundType {
                        kind: *kind,
                        size: *byte_size,
                        members: members
                            .iter()
                            .map(|m| Member {
                                name: m.name.clone(),
                                ty: LazyType::unresolved(module, Some(m.type_id)),
                                bit_offset: m.bit_offset,
                                bit_field_size: m.bit_field_size,
                            })
                            .collect(),
                        complete: !*declaration,
                    }),
                    origin,
                };
                return Ok(self.insert_record_node(module, record, node));
            }
            TypeRecordKind::Enum {
                name,
                underlying,
                byte_size,
                enumerators,
                declaration,
            } => {
                if *declaration {
                    if let Some(complete) = self.complete_definition(index, module, TypeNamespace::Enum, name) {
                        let id = self.from_record_at(index, complete.0, complete.1, next)?;
                        return Ok(self.remember(module, record, id));
                    }
                }
                let underlying = match underlying {
                    Some(u) => Some(self.from_record_at(index, module, *u, next)?),
                    None => None,
                };
                let node = Type {
                    name: name.clone(),
                    kind: TypeKind::Enum(EnumType {
                        underlying,
                        size: *byte_size,
                        enumerators: enumerators
                            .iter()
                            .map(|e| Enumerator {
                                name: e.name.clone(),
                                value: e.value,
                            })
                            .collect(),
                        complete: !*declaration,
                    }),
                    origin,
                };
                return Ok(self.insert_record_node(module, record, node));
            }
            TypeRecordKind::Function {
                return_type,
                parameters,
                variadic,
            } => {
                // type_name has no index to resolve lazy references with
                let return_type = self.optional_record(index, module, *return_type, next)?;
                let parameters = parameters
                    .iter()
                    .map(|p| self.optional_record(index, module, *p, next).map(LazyType::resolved))
                    .collect::<FathomResult<Vec<_>>>()?;
                let node = Type {
                    name: None,
                    kind: TypeKind::Function(FunctionType {
                        return_type: LazyType::resolved(return_type),
                        parameters,
                        variadic: *variadic,
                    }),
                    origin,
                };
                return Ok(self.insert_record_node(module, record, node));
            }
        };
        Ok(self.remember(module, record, id))
    }

    fn complete_definition(
        &self,
        index: &DebugInfoIndex,
        module: ModuleId,
        namespace: TypeNamespace,
        name: &Option<String>,
    ) -> Option<(ModuleId, RecordId)>
    {
        let name = name.as_deref()?;
        let found = index
            .find_complete_type(namespace, name, Some(module))
            .filter(|found| found.module.id() == module)
            .or_else(|| {
                let candidates = index.find_types(namespace, name).ok()?;
                self.by_precedence(candidates)
                    .into_iter()
                    .find(|c| !c.record.kind.is_declaration())
            })?;
        trace!(name, from = %module, to = %found.module.id(), "completed declaration");
        Some((found.module.id(), found.record.id))
    }

    /// Insert a record-backed node unless another thread got there first.
    fn insert_record_node(&self, module: ModuleId, record: RecordId, node: Type) -> TypeId
    {
        let mut table = self.by_record.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(id) = table.get(&(module, record)) {
            return *id;
        }
        trace!(%module, record = format_args!("0x{:x}", record.0), name = ?node.name, "built type");
        let id = self.push(node);
        table.insert((module, record), id);
        id
    }

    /// A synthesized C primitive.
    pub fn primitive(&self, primitive: CPrimitive) -> TypeId
    {
        self.intern(StructuralKey::Primitive(primitive), || Type {
            name: Some(primitive.name().to_string()),
            kind: TypeKind::Primitive {
                encoding: primitive.encoding(&self.platform),
                size: primitive.size(&self.platform),
            },
            origin: None,
        })
    }

    /// `T *` at the platform word size.
    pub fn pointer_to(&self, pointee: TypeId) -> TypeId
    {
        self.pointer_sized(pointee, self.platform.word_size() as u64)
    }

    fn pointer_sized(&self, pointee: TypeId, size: u64) -> TypeId
    {
        self.intern(StructuralKey::Pointer(pointee, size), || Type {
            name: None,
            kind: TypeKind::Pointer { pointee, size },
            origin: None,
        })
    }

    pub fn array_of(&self, element: TypeId, length: Option<u64>) -> TypeId
    {
        self.intern(StructuralKey::Array(element, length), || Type {
            name: None,
            kind: TypeKind::Array { element, length },
            origin: None,
        })
    }

    pub fn typedef(&self, name: &str, target: TypeId) -> TypeId
    {
        self.intern(StructuralKey::Typedef(name.to_string(), target), || Type {
            name: Some(name.to_string()),
            kind: TypeKind::Typedef { target },
            origin: None,
        })
    }

    /// `target` with extra qualifiers; merges with qualifiers already present.
    pub fn qualified(&self, target: TypeId, qualifiers: Qualifiers) -> TypeId
    {
        if qualifiers.is_empty() {
            return target;
        }
        let (target, qualifiers) = match self.get(target).map(|t| t.kind.clone()) {
            Ok(TypeKind::Qualified {
                qualifiers: inner,
                target: inner_target,
            }) => (inner_target, qualifiers | inner),
            _ => (target, qualifiers),
        };
        self.intern(StructuralKey::Qualified(target, qualifiers), || Type {
            name: None,
            kind: TypeKind::Qualified { qualifiers, target },
            origin: None,
        })
    }

    /// Follow typedefs and qualifiers down to the underlying type.
    pub fn strip_aliases(&self, mut id: TypeId) -> FathomResult<TypeId>
    {
        for _ in 0..=MAX_RESOLVE_DEPTH {
            match self.get(id)?.kind {
                TypeKind::Typedef { target } | TypeKind::Qualified { target, .. } => id = target,
                _ => return Ok(id),
            }
        }
        Err(FathomError::CorruptDebugInfo(format!("alias chain of {id} does not terminate")))
    }

    /// Qualifiers visible on `id` before reaching a non-alias type.
    pub fn qualifiers_of(&self, mut id: TypeId) -> FathomResult<Qualifiers>
    {
        let mut found = Qualifiers::empty();
        for _ in 0..=MAX_RESOLVE_DEPTH {
            match self.get(id)?.kind {
                TypeKind::Typedef { target } => id = target,
                TypeKind::Qualified { qualifiers, target } => {
                    found |= qualifiers;
                    id = target;
                }
                _ => break,
            }
        }
        Ok(found)
    }

    /// Storage size in bytes.
    pub fn size_of(&self, id: TypeId) -> FathomResult<u64>
    {
        self.size_of_at(id, 0)
    }

    fn size_of_at(&self, id: TypeId, depth: usize) -> FathomResult<u64>
    {
        if depth > MAX_RESOLVE_DEPTH {
            return Err(FathomError::CorruptDebugInfo(format!("size of {id} does not terminate")));
        }
        let ty = self.get(id)?;
        let incomplete = || FathomError::IncompleteType(self.type_name(id).unwrap_or_else(|_| id.to_string()));
        match &ty.kind {
            TypeKind::Void | TypeKind::Function(_) => Err(incomplete()),
            TypeKind::Primitive { size, .. } | TypeKind::Pointer { size, .. } => Ok(*size),
            TypeKind::Array { element, length } => {
                let length = length.ok_or_else(incomplete)?;
                let element = self.size_of_at(*element, depth + 1)?;
                element
                    .checked_mul(length)
                    .ok_or_else(|| FathomError::CorruptDebugInfo(format!("size of {id} overflows")))
            }
            TypeKind::Compound(compound) => match (compound.complete, compound.size) {
                (true, Some(size)) => Ok(size),
                _ => Err(incomplete()),
            },
            TypeKind::Enum(e) => match (e.complete, e.size, e.underlying) {
                (true, Some(size), _) => Ok(size),
                (true, None, Some(underlying)) => self.size_of_at(underlying, depth + 1),
                _ => Err(incomplete()),
            },
            TypeKind::Typedef { target } | TypeKind::Qualified { target, .. } => self.size_of_at(*target, depth + 1),
        }
    }

    /// Whether two types have the same structure once aliases are removed.
    pub fn types_equivalent(&self, index: &DebugInfoIndex, a: TypeId, b: TypeId) -> FathomResult<bool>
    {
        let mut assumed = HashSet::new();
        self.equivalent(index, a, b, &mut assumed)
    }

    fn equivalent(
        &self,
        index: &DebugInfoIndex,
        a: TypeId,
        b: TypeId,
        assumed: &mut HashSet<(TypeId, TypeId)>,
    ) -> FathomResult<bool>
    {
        let a = self.strip_aliases(a)?;
        let b = self.strip_aliases(b)?;
        if a == b || !assumed.insert((a, b)) {
            return Ok(true);
        }
        let (ta, tb) = (self.get(a)?, self.get(b)?);
        let same = match (&ta.kind, &tb.kind) {
            (TypeKind::Void, TypeKind::Void) => true,
            (
                TypeKind::Primitive {
                    encoding: ea,
                    size: sa,
                },
                TypeKind::Primitive {
                    encoding: eb,
                    size: sb,
                },
            ) => ea == eb && sa == sb && primitive_key(&ta) == primitive_key(&tb),
            (
                TypeKind::Pointer {
                    pointee: pa,
                    size: sa,
                },
                TypeKind::Pointer {
                    pointee: pb,
                    size: sb,
                },
            ) => sa == sb && self.equivalent(index, *pa, *pb, assumed)?,
            (
                TypeKind::Array {
                    element: ea,
                    length: la,
                },
                TypeKind::Array {
                    element: eb,
                    length: lb,
                },
            ) => la == lb && self.equivalent(index, *ea, *eb, assumed)?,
            (TypeKind::Compound(ca), TypeKind::Compound(cb)) => {
                if ca.kind != cb.kind
                    || ta.name != tb.name
                    || ca.size != cb.size
                    || ca.complete != cb.complete
                    || ca.members.len() != cb.members.len()
                {
                    return Ok(false);
                }
                for (ma, mb) in ca.members.iter().zip(&cb.members) {
                    if ma.name != mb.name || ma.bit_offset != mb.bit_offset || ma.bit_field_size != mb.bit_field_size {
                        return Ok(false);
                    }
                    let (ma, mb) = (ma.ty.get(self, index)?, mb.ty.get(self, index)?);
                    if !self.equivalent(index, ma, mb, assumed)? {
                        return Ok(false);
                    }
                }
                true
            }
            (TypeKind::Enum(ea), TypeKind::Enum(eb)) => {
                ta.name == tb.name && ea.size == eb.size && ea.enumerators == eb.enumerators
            }
            (TypeKind::Function(fa), TypeKind::Function(fb)) => {
                if fa.variadic != fb.variadic || fa.parameters.len() != fb.parameters.len() {
                    return Ok(false);
                }
                let (ra, rb) = (fa.return_type.get(self, index)?, fb.return_type.get(self, index)?);
                if !self.equivalent(index, ra, rb, assumed)? {
                    return Ok(false);
                }
                for (pa, pb) in fa.parameters.iter().zip(&fb.parameters) {
                    let (pa, pb) = (pa.get(self, index)?, pb.get(self, index)?);
                    if !self.equivalent(index, pa, pb, assumed)? {
                        return Ok(false);
                    }
                }
                true
            }
            _ => false,
        };
        Ok(same)
    }

    /// C spelling of a type, e.g. `struct task *`, `char **`, `int [4]`.
    pub fn type_name(&self, id: TypeId) -> FathomResult<String>
    {
        self.render(id, String::new(), 0)
    }

    fn render(&self, id: TypeId, declarator: String, depth: usize) -> FathomResult<String>
    {
        if depth > MAX_RESOLVE_DEPTH {
            return Err(FathomError::CorruptDebugInfo(format!("name of {id} does not terminate")));
        }
        let ty = self.get(id)?;
        let with_base = |base: String| {
            if declarator.is_empty() { base } else { format!("{base} {declarator}") }
        };
        match &ty.kind {
            TypeKind::Void => Ok(with_base("void".to_string())),
            TypeKind::Primitive { .. } | TypeKind::Typedef { .. } => {
                Ok(with_base(ty.name.clone().unwrap_or_else(|| "<unnamed>".to_string())))
            }
            TypeKind::Compound(compound) => Ok(with_base(format!(
                "{} {}",
                compound.kind.keyword(),
                ty.name.as_deref().unwrap_or("<anonymous>")
            ))),
            TypeKind::Enum(_) => Ok(with_base(format!("enum {}", ty.name.as_deref().unwrap_or("<anonymous>")))),
            TypeKind::Pointer { pointee, .. } => {
                let pointee_kind = &self.get(*pointee)?.kind;
                let declarator = if matches!(pointee_kind, TypeKind::Array { .. } | TypeKind::Function(_)) {
                    format!("(*{declarator})")
                } else {
                    format!("*{declarator}")
                };
                self.render(*pointee, declarator, depth + 1)
            }
            TypeKind::Array { element, length } => {
                let suffix = match length {
                    Some(n) => format!("[{n}]"),
                    None => "[]".to_string(),
                };
                self.render(*element, format!("{declarator}{suffix}"), depth + 1)
            }
            TypeKind::Function(function) => {
                let parameters: Vec<String> = function
                    .parameters
                    .iter()
                    .map(|p| match p.peek() {
                        Some(p) => self.render(p, String::new(), depth + 1),
                        None => Ok("?".to_string()),
                    })
                    .collect::<FathomResult<_>>()?;
                let mut parameters = parameters.join(", ");
                if function.variadic {
                    parameters.push_str(if parameters.is_empty() { "..." } else { ", ..." });
                } else if parameters.is_empty() {
                    parameters.push_str("void");
                }
                let return_type = function.return_type.peek().unwrap_or(TypeId::VOID);
                self.render(return_type, format!("{declarator}({parameters})"), depth + 1)
            }
            TypeKind::Qualified { qualifiers, target } => {
                let words = qualifier_words(*qualifiers);
                if let TypeKind::Pointer { pointee, .. } = self.get(*target)?.kind {
                    // `T * const` binds the qualifier to the pointer
                    let declarator = if declarator.is_empty() {
                        format!("* {words}")
                    } else {
                        format!("* {words} {declarator}")
                    };
                    return self.render(pointee, declarator, depth + 1);
                }
                Ok(format!("{words} {}", self.render(*target, declarator, depth + 1)?))
            }
        }
    }

    /// Locate a member by name, descending into anonymous struct/union members.
    pub fn find_member(&self, index: &DebugInfoIndex, id: TypeId, name: &str) -> FathomResult<MemberLookup>
    {
        let stripped = self.strip_aliases(id)?;
        let ty = self.get(stripped)?;
        let Some(compound) = ty.as_compound() else {
            return Err(FathomError::Type(format!(
                "'{}' is not a structure, union or class",
                self.type_name(id)?
            )));
        };
        if !compound.complete {
            return Err(FathomError::IncompleteType(self.type_name(id)?));
        }
        self.search_members(index, compound, name, 0, 0)?
            .ok_or_else(|| FathomError::not_found(LookupKind::Member, name))
    }

    fn search_members(
        &self,
        index: &DebugInfoIndex,
        compound: &CompoundType,
        name: &str,
        base_offset: u64,
        depth: usize,
    ) -> FathomResult<Option<MemberLookup>>
    {
        if depth > MAX_RESOLVE_DEPTH {
            return Ok(None);
        }
        for member in &compound.members {
            match &member.name {
                Some(member_name) if member_name == name => {
                    return Ok(Some(MemberLookup {
                        ty: member.ty.get(self, index)?,
                        bit_offset: base_offset + member.bit_offset,
                        bit_field_size: member.bit_field_size,
                    }));
                }
                None => {
                    let inner = self.strip_aliases(member.ty.get(self, index)?)?;
                    let inner = self.get(inner)?;
                    if let Some(inner) = inner.as_compound() {
                        let found =
                            self.search_members(index, inner, name, base_offset + member.bit_offset, depth + 1)?;
                        if found.is_some() {
                            return Ok(found);
                        }
                    }
                }
                Some(_) => {}
            }
        }
        Ok(None)
    }

    /// Resolve a C type name such as `unsigned long`, `struct task *` or `int [4]`.
    pub fn find_type(&self, index: &DebugInfoIndex, name: &str) -> FathomResult<TypeId>
    {
        let parsed = parse_type_name(name)?;
        let mut id = match &parsed.base {
            BaseName::Void => TypeId::VOID,
            BaseName::Primitive(primitive) => self.primitive_type(index, *primitive)?,
            BaseName::Tagged(namespace, tag) => {
                let candidates = self.by_precedence(index.find_types(*namespace, tag)?);
                let chosen = candidates
                    .iter()
                    .find(|c| !c.record.kind.is_declaration())
                    .unwrap_or(&candidates[0]);
                self.from_record(index, chosen.module.id(), chosen.record.id)?
            }
            BaseName::Identifier(identifier) => {
                let candidates = self.by_precedence(index.find_types(TypeNamespace::Ordinary, identifier)?);
                let first = &candidates[0];
                self.from_record(index, first.module.id(), first.record.id)?
            }
        };
        id = self.qualified(id, parsed.qualifiers);

        let mut arrays = Vec::new();
        for declarator in &parsed.declarators {
            match declarator {
                Declarator::Pointer(qualifiers) => id = self.qualified(self.pointer_to(id), *qualifiers),
                Declarator::Array(length) => arrays.push(*length),
            }
        }
        for length in arrays.into_iter().rev() {
            id = self.array_of(id, length);
        }
        Ok(id)
    }

    /// A primitive as the debug info spells it, or a synthesized one.
    pub fn primitive_type(&self, index: &DebugInfoIndex, primitive: CPrimitive) -> FathomResult<TypeId>
    {
        for spelling in primitive.spellings() {
            let Ok(candidates) = index.find_types(TypeNamespace::Ordinary, spelling) else {
                continue;
            };
            let candidates = self.by_precedence(candidates);
            let base = candidates.iter().find(|c| {
                matches!(
                    c.record.kind,
                    TypeRecordKind::Base { encoding, .. } if encoding == primitive.encoding(&self.platform)
                )
            });
            if let Some(base) = base {
                return self.from_record(index, base.module.id(), base.record.id);
            }
        }
        Ok(self.primitive(primitive))
    }

    /// Candidates from several modules, in the configured module precedence.
    fn by_precedence<'i>(&self, mut candidates: Vec<TypeRef<'i>>) -> Vec<TypeRef<'i>>
    {
        candidates.sort_by_key(|c| self.precedence.rank(c.module.id().0, SymbolBinding::Global));
        candidates
    }

    /// The C primitive a (stripped) arithmetic type corresponds to.
    pub fn classify_primitive(&self, id: TypeId) -> FathomResult<Option<CPrimitive>>
    {
        let stripped = self.strip_aliases(id)?;
        let ty = self.get(stripped)?;
        let (encoding, size) = match &ty.kind {
            TypeKind::Primitive { encoding, size } => (*encoding, *size),
            TypeKind::Enum(e) => match e.underlying {
                Some(underlying) => return self.classify_primitive(underlying),
                None => (BaseEncoding::Unsigned, e.size.unwrap_or(4)),
            },
            _ => return Ok(None),
        };
        if let Some(primitive) = ty.name.as_deref().and_then(CPrimitive::from_spelling) {
            if primitive.encoding(&self.platform) == encoding && primitive.size(&self.platform) == size {
                return Ok(Some(primitive));
            }
        }
        Ok(primitive_by_shape(&self.platform, encoding, size))
    }
}

fn primitive_key(ty: &Type) -> Option<CPrimitive>
{
    ty.name.as_deref().and_then(CPrimitive::from_spelling)
}

/// Best C primitive for an encoding and width (e.g. Rust's `u32`).
fn primitive_by_shape(platform: &Platform, encoding: BaseEncoding, size: u64) -> Option<CPrimitive>
{
    let candidates: &[CPrimitive] = match encoding {
        BaseEncoding::Bool => &[CPrimitive::Bool],
        BaseEncoding::Signed => &[
            CPrimitive::SignedChar,
            CPrimitive::Short,
            CPrimitive::Int,
            CPrimitive::Long,
            CPrimitive::LongLong,
        ],
        BaseEncoding::Unsigned => &[
            CPrimitive::UnsignedChar,
            CPrimitive::UnsignedShort,
            CPrimitive::UnsignedInt,
            CPrimitive::UnsignedLong,
            CPrimitive::UnsignedLongLong,
        ],
        BaseEncoding::Float => &[CPrimitive::Float, CPrimitive::Double, CPrimitive::LongDouble],
    };
    candidates.iter().copied().find(|p| p.size(platform) == size)
}

fn qualifier_words(qualifiers: Qualifiers) -> String
{
    let mut words = Vec::new();
    if qualifiers.contains(Qualifiers::CONST) {
        words.push("const");
    }
    if qualifiers.contains(Qualifiers::VOLATILE) {
        words.push("volatile");
    }
    if qualifiers.contains(Qualifiers::RESTRICT) {
        words.push("restrict");
    }
    if qualifiers.contains(Qualifiers::ATOMIC) {
        words.push("_Atomic");
    }
    words.join(" ")
}

impl std::fmt::Debug for TypeSystem
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("TypeSystem")
            .field("platform", &self.platform)
            .field("nodes", &self.len())
            .finish()
    }
}
