//! # Object Model
//!
//! An [`Object`] is a typed value with a location: absent (optimized out),
//! an encoded value, a place in memory (possibly a bit field) or a register
//! of a particular frame.
//!
//! Objects are immutable. Taking a member, subscripting, dereferencing or
//! casting builds a new object; nothing is read until [`Object::read_bytes`],
//! [`Object::read`] or [`Object::value`] is called, and reads are never
//! cached, so values from a live process are always current.
//!
//! ## Example
//!
//! ```rust,no_run
//! use fathom_core::Program;
//!
//! # fn demo(program: &Program) -> fathom_core::FathomResult<()> {
//! let task = program.find_object("init_task")?;
//! let pid = task.member(program, "pid")?.value(program)?;
//! println!("pid = {pid}");
//! # Ok(())
//! # }
//! ```

mod arith;
mod value;

use std::sync::Arc;

pub use arith::{BinaryOp, UnaryOp};
pub use value::Value;
use value::{Shape, decode, extract_bits, sign_extend};

use crate::debuginfo::BaseEncoding;
use crate::error::{FathomError, FathomResult};
use crate::platform::ByteOrder;
use crate::program::Program;
use crate::types::{Address, FrameId, RegisterSnapshot};
use crate::typesys::{CPrimitive, TypeId, TypeKind, TypeSystem};

/// Where an object's bytes live.
#[derive(Debug, Clone)]
pub enum Location
{
    /// No storage, e.g. an optimized-out variable.
    Absent,
    /// An already known value.
    Value(Value),
    /// In memory; bit fields start `bit_offset` bits into the byte at `address`.
    Address
    {
        address: Address,
        bit_offset: u8,
        bit_field_size: Option<u64>,
    },
    /// In a register of a frame's snapshot.
    Register
    {
        register: u16,
        frame: Option<FrameId>,
        registers: Arc<RegisterSnapshot>,
    },
}

/// A typed value in the inspected program.
#[derive(Debug, Clone)]
pub struct Object
{
    ty: TypeId,
    byte_order: ByteOrder,
    location: Location,
}

impl Object
{
    pub fn new(ty: TypeId, byte_order: ByteOrder, location: Location) -> Self
    {
        Self {
            ty,
            byte_order,
            location,
        }
    }

    pub fn absent(program: &Program, ty: TypeId) -> Self
    {
        Self::new(ty, program.platform().byte_order(), Location::Absent)
    }

    pub fn at_address(program: &Program, ty: TypeId, address: impl Into<Address>) -> Self
    {
        Self::new(
            ty,
            program.platform().byte_order(),
            Location::Address {
                address: address.into(),
                bit_offset: 0,
                bit_field_size: None,
            },
        )
    }

    pub fn from_value(program: &Program, ty: TypeId, value: Value) -> Self
    {
        Self::new(ty, program.platform().byte_order(), Location::Value(value))
    }

    pub fn in_register(
        program: &Program,
        ty: TypeId,
        register: u16,
        frame: Option<FrameId>,
        registers: Arc<RegisterSnapshot>,
    ) -> Self
    {
        Self::new(
            ty,
            program.platform().byte_order(),
            Location::Register {
                register,
                frame,
                registers,
            },
        )
    }

    pub fn ty(&self) -> TypeId
    {
        self.ty
    }

    pub fn byte_order(&self) -> ByteOrder
    {
        self.byte_order
    }

    pub fn location(&self) -> &Location
    {
        &self.location
    }

    pub fn is_absent(&self) -> bool
    {
        matches!(self.location, Location::Absent)
    }

    /// Memory address of the object, when it lives at a byte boundary in memory.
    pub fn address(&self) -> Option<Address>
    {
        match self.location {
            Location::Address {
                address,
                bit_offset: 0,
                bit_field_size: None,
            } => Some(address),
            _ => None,
        }
    }

    fn with_location(&self, ty: TypeId, location: Location) -> Self
    {
        Self::new(ty, self.byte_order, location)
    }

    /// The object's bytes in target byte order, exactly `size_of(type)` long.
    pub fn read_bytes(&self, program: &Program) -> FathomResult<Vec<u8>>
    {
        let types = program.types();
        match &self.location {
            Location::Absent => Err(FathomError::ValueUnavailable(format!(
                "object of type '{}' is absent",
                types.type_name(self.ty)?
            ))),
            Location::Value(value) => value.encode(types.size_of(self.ty)? as usize, self.byte_order),
            Location::Address {
                address,
                bit_offset,
                bit_field_size,
            } => {
                let size = types.size_of(self.ty)? as usize;
                let width = match (bit_field_size, bit_offset) {
                    (Some(width), _) => *width,
                    (None, 0) => return program.memory().read(address.value(), size),
                    (None, _) => size as u64 * 8,
                };
                let span = (u64::from(*bit_offset) + width).div_ceil(8) as usize;
                let raw = program.memory().read(address.value(), span)?;
                let bits = extract_bits(&raw, u64::from(*bit_offset), width, self.byte_order)?;
                let value = match shape_of(types, self.ty)? {
                    Shape::Signed => Value::Signed(sign_extend(bits, width as u32)),
                    _ => Value::Unsigned(bits),
                };
                value.encode(size, self.byte_order)
            }
            Location::Register {
                register,
                registers,
                ..
            } => {
                let size = types.size_of(self.ty)? as usize;
                if size > 8 {
                    return Err(FathomError::Unsupported(format!(
                        "{size}-byte object held in register {register}"
                    )));
                }
                let value = registers.get(*register).ok_or_else(|| {
                    FathomError::ValueUnavailable(format!("register {register} was not recovered for this frame"))
                })?;
                Ok(self.byte_order.write_uint(value, size))
            }
        }
    }

    /// Copy of the object whose location is its current value.
    pub fn read(&self, program: &Program) -> FathomResult<Object>
    {
        let value = self.value(program)?;
        Ok(self.with_location(self.ty, Location::Value(value)))
    }

    /// Decode the object as a [`Value`]; aggregates come back as bytes.
    pub fn value(&self, program: &Program) -> FathomResult<Value>
    {
        let shape = shape_of(program.types(), self.ty)?;
        let bytes = self.read_bytes(program)?;
        Ok(decode(&bytes, shape, self.byte_order))
    }

    /// Member of a struct, union or class (or of the one a pointer points to).
    pub fn member(&self, program: &Program, name: &str) -> FathomResult<Object>
    {
        let types = program.types();
        let stripped = types.strip_aliases(self.ty)?;
        if types.get(stripped)?.is_pointer() {
            return self.deref(program)?.member(program, name);
        }
        let found = types.find_member(program.index(), self.ty, name)?;
        let location = match &self.location {
            Location::Absent => Location::Absent,
            Location::Address {
                address,
                bit_offset,
                ..
            } => {
                let total = u64::from(*bit_offset) + found.bit_offset;
                Location::Address {
                    address: address.offset((total / 8) as i64),
                    bit_offset: (total % 8) as u8,
                    bit_field_size: found.bit_field_size,
                }
            }
            Location::Value(_) => {
                let bytes = self.read_bytes(program)?;
                Location::Value(slice_member(types, &bytes, found.ty, found.bit_offset, found.bit_field_size, self)?)
            }
            Location::Register { .. } => {
                return Err(FathomError::Type(format!(
                    "cannot access member '{name}' of '{}' held in a register",
                    types.type_name(self.ty)?
                )));
            }
        };
        Ok(self.with_location(found.ty, location))
    }

    /// Element `index` of an array, or `pointer[index]`.
    pub fn subscript(&self, program: &Program, index: i64) -> FathomResult<Object>
    {
        let types = program.types();
        let stripped = types.get(types.strip_aliases(self.ty)?)?;
        match stripped.kind() {
            TypeKind::Array { element, .. } => {
                let element = *element;
                let offset = scaled(index, types.size_of(element)?)?;
                let location = match &self.location {
                    Location::Absent => Location::Absent,
                    Location::Address {
                        address,
                        bit_offset: 0,
                        bit_field_size: None,
                    } => Location::Address {
                        address: address.offset(offset),
                        bit_offset: 0,
                        bit_field_size: None,
                    },
                    Location::Value(_) => {
                        let bytes = self.read_bytes(program)?;
                        Location::Value(slice_member(types, &bytes, element, (offset as u64).wrapping_mul(8), None, self)?)
                    }
                    _ => {
                        return Err(FathomError::Type(format!(
                            "cannot subscript '{}' in this location",
                            types.type_name(self.ty)?
                        )));
                    }
                };
                Ok(self.with_location(element, location))
            }
            TypeKind::Pointer { pointee, .. } => {
                let pointee = *pointee;
                let base = self.pointer_value(program)?;
                let offset = scaled(index, types.size_of(pointee)?)?;
                Ok(self.with_location(pointee, address_location(Address::new(base).offset(offset))))
            }
            _ => Err(FathomError::Type(format!(
                "'{}' is not an array or pointer",
                types.type_name(self.ty)?
            ))),
        }
    }

    /// `*object`
    pub fn deref(&self, program: &Program) -> FathomResult<Object>
    {
        let types = program.types();
        let stripped = types.get(types.strip_aliases(self.ty)?)?;
        match stripped.kind() {
            TypeKind::Pointer { pointee, .. } => {
                let pointee = *pointee;
                if matches!(types.get(types.strip_aliases(pointee)?)?.kind(), TypeKind::Void) {
                    return Err(FathomError::Type("cannot dereference a void pointer".into()));
                }
                let address = self.pointer_value(program)?;
                Ok(self.with_location(pointee, address_location(Address::new(address))))
            }
            TypeKind::Array { .. } => self.subscript(program, 0),
            _ => Err(FathomError::Type(format!(
                "cannot dereference non-pointer type '{}'",
                types.type_name(self.ty)?
            ))),
        }
    }

    /// `&object`
    pub fn address_of(&self, program: &Program) -> FathomResult<Object>
    {
        let types = program.types();
        match &self.location {
            Location::Address {
                address,
                bit_offset: 0,
                bit_field_size: None,
            } => Ok(self.with_location(
                types.pointer_to(self.ty),
                Location::Value(Value::Unsigned(address.value())),
            )),
            Location::Address { .. } => Err(FathomError::Type("cannot take the address of a bit field".into())),
            _ => Err(FathomError::Type(format!(
                "cannot take the address of '{}' that is not in memory",
                types.type_name(self.ty)?
            ))),
        }
    }

    /// Reinterpret the same storage as another type.
    pub fn cast(&self, program: &Program, ty: TypeId) -> FathomResult<Object>
    {
        let types = program.types();
        let from = types.get(types.strip_aliases(self.ty)?)?;
        let to = types.get(types.strip_aliases(ty)?)?;
        if from.is_scalar() && to.is_scalar() {
            let (from_size, to_size) = (types.size_of(self.ty)?, types.size_of(ty)?);
            if from_size != to_size {
                return Err(FathomError::Type(format!(
                    "cannot reinterpret {from_size}-byte '{}' as {to_size}-byte '{}'",
                    types.type_name(self.ty)?,
                    types.type_name(ty)?
                )));
            }
        }
        Ok(self.with_location(ty, self.location.clone()))
    }

    /// Read a NUL-terminated string from a `char *` or an in-memory `char` array.
    pub fn read_c_string(&self, program: &Program, max_length: usize) -> FathomResult<Vec<u8>>
    {
        const PAGE: u64 = 4096;
        let types = program.types();
        let stripped = types.get(types.strip_aliases(self.ty)?)?;
        let start = match (stripped.kind(), self.address()) {
            (TypeKind::Pointer { .. }, _) => self.pointer_value(program)?,
            (TypeKind::Array { .. }, Some(address)) => address.value(),
            _ => {
                return Err(FathomError::Type(format!(
                    "'{}' is not a string",
                    types.type_name(self.ty)?
                )));
            }
        };

        let mut out = Vec::new();
        let mut address = start;
        while out.len() < max_length {
            // stay within one page so a string ending before unmapped memory still reads
            let chunk = (PAGE - address % PAGE).min((max_length - out.len()) as u64) as usize;
            let bytes = program.memory().read(address, chunk)?;
            if let Some(nul) = bytes.iter().position(|b| *b == 0) {
                out.extend_from_slice(&bytes[..nul]);
                return Ok(out);
            }
            out.extend_from_slice(&bytes);
            address = address.wrapping_add(chunk as u64);
        }
        Ok(out)
    }

    fn pointer_value(&self, program: &Program) -> FathomResult<u64>
    {
        self.value(program)?
            .as_u64()
            .ok_or_else(|| FathomError::Type("pointer value is not an integer".into()))
    }
}

fn address_location(address: Address) -> Location
{
    Location::Address {
        address,
        bit_offset: 0,
        bit_field_size: None,
    }
}

fn scaled(index: i64, size: u64) -> FathomResult<i64>
{
    i64::try_from(size)
        .ok()
        .and_then(|size| index.checked_mul(size))
        .ok_or_else(|| FathomError::InvalidArgument(format!("offset of element {index} overflows")))
}

/// A member or element cut out of an aggregate's bytes.
fn slice_member(
    types: &TypeSystem,
    bytes: &[u8],
    ty: TypeId,
    bit_offset: u64,
    bit_field_size: Option<u64>,
    parent: &Object,
) -> FathomResult<Value>
{
    let out_of_range = || FathomError::InvalidArgument(format!("offset {bit_offset} bits is outside the value"));
    let start = (bit_offset / 8) as usize;
    match bit_field_size {
        Some(width) => {
            let end = (bit_offset + width).div_ceil(8) as usize;
            let raw = bytes.get(start..end).ok_or_else(out_of_range)?;
            let bits = extract_bits(raw, bit_offset % 8, width, parent.byte_order)?;
            Ok(match shape_of(types, ty)? {
                Shape::Signed => Value::Signed(sign_extend(bits, width as u32)),
                _ => Value::Unsigned(bits),
            })
        }
        None => {
            let size = types.size_of(ty)? as usize;
            let end = start.checked_add(size).ok_or_else(out_of_range)?;
            let raw = bytes.get(start..end).ok_or_else(out_of_range)?;
            Ok(Value::Bytes(Arc::from(raw)))
        }
    }
}

/// How values of `ty` are decoded.
pub(crate) fn shape_of(types: &TypeSystem, ty: TypeId) -> FathomResult<Shape>
{
    let stripped = types.get(types.strip_aliases(ty)?)?;
    match stripped.kind() {
        TypeKind::Primitive { encoding, .. } => Ok(match encoding {
            BaseEncoding::Signed => Shape::Signed,
            BaseEncoding::Unsigned | BaseEncoding::Bool => Shape::Unsigned,
            BaseEncoding::Float => Shape::Float,
        }),
        TypeKind::Pointer { .. } => Ok(Shape::Unsigned),
        TypeKind::Enum(_) => match types.classify_primitive(ty)? {
            Some(primitive) if primitive.encoding(types.platform()) == BaseEncoding::Signed => Ok(Shape::Signed),
            _ => Ok(Shape::Unsigned),
        },
        TypeKind::Compound(_) | TypeKind::Array { .. } => Ok(Shape::Aggregate),
        TypeKind::Void | TypeKind::Function(_) | TypeKind::Typedef { .. } | TypeKind::Qualified { .. } => Err(
            FathomError::Type(format!("'{}' has no value", types.type_name(ty)?)),
        ),
    }
}

/// `int`, as the program's debug info spells it.
pub(crate) fn int_type(program: &Program) -> FathomResult<TypeId>
{
    program.types().primitive_type(program.index(), CPrimitive::Int)
}
