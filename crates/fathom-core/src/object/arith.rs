//! C operators and conversions over objects.
//!
//! Arithmetic is done in the inspected program's widths and signedness:
//! operands go through the integer promotions and the usual arithmetic
//! conversions, results wrap at the width of the result type, and pointer
//! arithmetic scales by the pointee size.

use std::cmp::Ordering;

use super::value::{sign_extend, truncate};
use super::{Object, Value, int_type};
use crate::debuginfo::BaseEncoding;
use crate::error::{FathomError, FathomResult};
use crate::platform::Platform;
use crate::program::Program;
use crate::typesys::{CPrimitive, TypeId, TypeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp
{
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp
{
    pub fn symbol(self) -> &'static str
    {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
        }
    }

    fn is_comparison(self) -> bool
    {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    fn compare(self, ordering: Option<Ordering>) -> bool
    {
        match (self, ordering) {
            (BinaryOp::Ne, None) => true,
            (_, None) => false,
            (BinaryOp::Eq, Some(o)) => o == Ordering::Equal,
            (BinaryOp::Ne, Some(o)) => o != Ordering::Equal,
            (BinaryOp::Lt, Some(o)) => o == Ordering::Less,
            (BinaryOp::Le, Some(o)) => o != Ordering::Greater,
            (BinaryOp::Gt, Some(o)) => o == Ordering::Greater,
            (BinaryOp::Ge, Some(o)) => o != Ordering::Less,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp
{
    Neg,
    Plus,
    BitNot,
    LogicalNot,
}

/// An operand after array decay, classified for arithmetic.
#[derive(Debug, Clone, Copy)]
enum Operand
{
    Int
    {
        primitive: CPrimitive,
        bits: u64,
    },
    Float
    {
        primitive: CPrimitive,
        value: f64,
    },
    Pointer
    {
        ty: TypeId,
        pointee: TypeId,
        address: u64,
    },
}

impl Operand
{
    fn truthy(self) -> bool
    {
        match self {
            Operand::Int { bits, .. } => bits != 0,
            Operand::Float { value, .. } => value != 0.0,
            Operand::Pointer { address, .. } => address != 0,
        }
    }
}

fn is_signed(primitive: CPrimitive, platform: &Platform) -> bool
{
    primitive.encoding(platform) == BaseEncoding::Signed
}

fn is_float(primitive: CPrimitive) -> bool
{
    matches!(primitive, CPrimitive::Float | CPrimitive::Double | CPrimitive::LongDouble)
}

fn bit_width(primitive: CPrimitive, platform: &Platform) -> u32
{
    primitive.size(platform) as u32 * 8
}

/// Integer promotions: everything narrower than `int` becomes `int`.
fn promote(primitive: CPrimitive) -> CPrimitive
{
    if primitive.rank() < CPrimitive::Int.rank() {
        CPrimitive::Int
    } else {
        primitive
    }
}

fn unsigned_counterpart(primitive: CPrimitive) -> CPrimitive
{
    match primitive {
        CPrimitive::Int => CPrimitive::UnsignedInt,
        CPrimitive::Long => CPrimitive::UnsignedLong,
        CPrimitive::LongLong => CPrimitive::UnsignedLongLong,
        other => other,
    }
}

/// The usual arithmetic conversions.
fn common_type(a: CPrimitive, b: CPrimitive, platform: &Platform) -> CPrimitive
{
    if is_float(a) || is_float(b) {
        let (a, b) = (if is_float(a) { a } else { b }, if is_float(b) { b } else { a });
        return if a.rank() >= b.rank() { a } else { b };
    }
    let (a, b) = (promote(a), promote(b));
    if a == b {
        return a;
    }
    if is_signed(a, platform) == is_signed(b, platform) {
        return if a.rank() >= b.rank() { a } else { b };
    }
    let (unsigned, signed) = if is_signed(a, platform) { (b, a) } else { (a, b) };
    if unsigned.rank() >= signed.rank() {
        unsigned
    } else if signed.size(platform) > unsigned.size(platform) {
        signed
    } else {
        unsigned_counterpart(signed)
    }
}

/// Integer value of `bits` read as `primitive`.
fn widen(bits: u64, primitive: CPrimitive, platform: &Platform) -> i128
{
    let width = bit_width(primitive, platform);
    if is_signed(primitive, platform) {
        i128::from(sign_extend(bits, width))
    } else {
        i128::from(truncate(bits, width))
    }
}

/// Wrap an exact result into `primitive`.
fn narrow(value: i128, primitive: CPrimitive, platform: &Platform) -> Value
{
    let width = bit_width(primitive, platform);
    let bits = truncate(value as u64, width);
    match primitive {
        CPrimitive::Bool => Value::Unsigned(u64::from(value != 0)),
        p if is_signed(p, platform) => Value::Signed(sign_extend(bits, width)),
        _ => Value::Unsigned(bits),
    }
}

fn round_float(value: f64, primitive: CPrimitive) -> f64
{
    if primitive == CPrimitive::Float { f64::from(value as f32) } else { value }
}

fn operand(program: &Program, object: &Object) -> FathomResult<Operand>
{
    let types = program.types();
    let stripped = types.get(types.strip_aliases(object.ty())?)?;
    match stripped.kind() {
        TypeKind::Pointer { pointee, .. } => Ok(Operand::Pointer {
            ty: object.ty(),
            pointee: *pointee,
            address: object.pointer_value(program)?,
        }),
        TypeKind::Array { element, .. } => {
            let address = object.address().ok_or_else(|| {
                FathomError::Type("array operand is not in memory and cannot decay to a pointer".into())
            })?;
            Ok(Operand::Pointer {
                ty: types.pointer_to(*element),
                pointee: *element,
                address: address.value(),
            })
        }
        TypeKind::Primitive { .. } | TypeKind::Enum(_) => {
            let primitive = types.classify_primitive(object.ty())?.ok_or_else(|| {
                FathomError::Unsupported(format!(
                    "arithmetic on '{}'",
                    types.type_name(object.ty()).unwrap_or_default()
                ))
            })?;
            let value = object.value(program)?;
            if is_float(primitive) {
                let value = value
                    .as_f64()
                    .ok_or_else(|| FathomError::Unsupported("arithmetic on long double".into()))?;
                Ok(Operand::Float { primitive, value })
            } else {
                let bits = value
                    .as_u64()
                    .ok_or_else(|| FathomError::Type("integer operand has no integer value".into()))?;
                Ok(Operand::Int { primitive, bits })
            }
        }
        _ => Err(FathomError::Type(format!(
            "invalid operand of type '{}'",
            types.type_name(object.ty())?
        ))),
    }
}

/// Type for an arithmetic result, reusing an operand's type when it is exactly that primitive.
fn result_type(program: &Program, primitive: CPrimitive, candidates: &[&Object]) -> FathomResult<TypeId>
{
    let types = program.types();
    for candidate in candidates {
        let stripped = types.get(types.strip_aliases(candidate.ty())?)?;
        if matches!(stripped.kind(), TypeKind::Primitive { .. })
            && types.classify_primitive(candidate.ty())? == Some(primitive)
        {
            return Ok(candidate.ty());
        }
    }
    types.primitive_type(program.index(), primitive)
}

fn boolean(program: &Program, value: bool) -> FathomResult<Object>
{
    Ok(Object::from_value(program, int_type(program)?, Value::Signed(i64::from(value))))
}

fn pointee_size(program: &Program, pointee: TypeId) -> FathomResult<u64>
{
    let types = program.types();
    // GNU C: arithmetic on `void *` steps by one byte
    if matches!(types.get(types.strip_aliases(pointee)?)?.kind(), TypeKind::Void) {
        return Ok(1);
    }
    types.size_of(pointee)
}

fn invalid_operands(op: BinaryOp) -> FathomError
{
    FathomError::Type(format!("invalid operands to binary {}", op.symbol()))
}

impl Object
{
    /// `self op rhs`
    pub fn binary_op(&self, program: &Program, op: BinaryOp, rhs: &Object) -> FathomResult<Object>
    {
        let platform = program.platform();
        let (left, right) = (operand(program, self)?, operand(program, rhs)?);

        match op {
            BinaryOp::LogicalAnd => return boolean(program, left.truthy() && right.truthy()),
            BinaryOp::LogicalOr => return boolean(program, left.truthy() || right.truthy()),
            _ => {}
        }

        match (left, right) {
            (
                Operand::Pointer {
                    pointee: lp,
                    address: la,
                    ..
                },
                Operand::Pointer {
                    pointee: rp,
                    address: ra,
                    ..
                },
            ) => {
                if op.is_comparison() {
                    return boolean(program, op.compare(Some(la.cmp(&ra))));
                }
                if op != BinaryOp::Sub {
                    return Err(invalid_operands(op));
                }
                if !program.types().types_equivalent(program.index(), lp, rp)? {
                    return Err(FathomError::Type("subtraction of pointers to different types".into()));
                }
                let size = pointee_size(program, lp)?.max(1) as i128;
                let difference = (widen(la, CPrimitive::Long, platform) - widen(ra, CPrimitive::Long, platform)) / size;
                let ty = program.types().primitive_type(program.index(), CPrimitive::Long)?;
                Ok(Object::from_value(program, ty, narrow(difference, CPrimitive::Long, platform)))
            }
            (
                Operand::Pointer {
                    ty,
                    pointee,
                    address,
                },
                Operand::Int { primitive, bits },
            ) => {
                if op.is_comparison() {
                    return boolean(program, op.compare(Some(address.cmp(&bits))));
                }
                let delta = widen(bits, primitive, platform) * pointee_size(program, pointee)? as i128;
                let result = match op {
                    BinaryOp::Add => i128::from(address) + delta,
                    BinaryOp::Sub => i128::from(address) - delta,
                    _ => return Err(invalid_operands(op)),
                };
                Ok(Object::from_value(program, ty, Value::Unsigned(pointer_bits(result, platform))))
            }
            (
                Operand::Int { primitive, bits },
                Operand::Pointer {
                    ty,
                    pointee,
                    address,
                },
            ) => {
                if op.is_comparison() {
                    return boolean(program, op.compare(Some(bits.cmp(&address))));
                }
                if op != BinaryOp::Add {
                    return Err(invalid_operands(op));
                }
                let delta = widen(bits, primitive, platform) * pointee_size(program, pointee)? as i128;
                Ok(Object::from_value(
                    program,
                    ty,
                    Value::Unsigned(pointer_bits(i128::from(address) + delta, platform)),
                ))
            }
            (Operand::Pointer { .. }, Operand::Float { .. }) | (Operand::Float { .. }, Operand::Pointer { .. }) => {
                Err(invalid_operands(op))
            }
            (left, right) => self.arithmetic(program, op, left, right, rhs),
        }
    }

    fn arithmetic(&self, program: &Program, op: BinaryOp, left: Operand, right: Operand, rhs: &Object)
        -> FathomResult<Object>
    {
        let platform = program.platform();
        let (lp, rp) = (primitive_of(left), primitive_of(right));

        if matches!(op, BinaryOp::Shl | BinaryOp::Shr) {
            let (Operand::Int { bits: lb, .. }, Operand::Int { bits: rb, .. }) = (left, right) else {
                return Err(invalid_operands(op));
            };
            let result = promote(lp);
            let width = bit_width(result, platform);
            let count = widen(rb, rp, platform);
            if count < 0 || count >= i128::from(width) {
                return Err(FathomError::InvalidArgument(format!(
                    "shift count {count} is out of range for a {width}-bit value"
                )));
            }
            let value = widen(lb, lp, platform);
            let shifted = if op == BinaryOp::Shl { value << count } else { value >> count };
            let ty = result_type(program, result, &[self])?;
            return Ok(Object::from_value(program, ty, narrow(shifted, result, platform)));
        }

        let common = common_type(lp, rp, platform);
        if is_float(common) {
            let (a, b) = (float_of(left, platform), float_of(right, platform));
            if op.is_comparison() {
                return boolean(program, op.compare(a.partial_cmp(&b)));
            }
            let value = match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                _ => return Err(invalid_operands(op)),
            };
            let ty = result_type(program, common, &[self, rhs])?;
            return Ok(Object::from_value(program, ty, Value::Float(round_float(value, common))));
        }

        let (Operand::Int { bits: lb, .. }, Operand::Int { bits: rb, .. }) = (left, right) else {
            return Err(invalid_operands(op));
        };
        // convert each operand to the common type first
        let a = widen(truncate_to(lb, lp, common, platform), common, platform);
        let b = widen(truncate_to(rb, rp, common, platform), common, platform);
        if op.is_comparison() {
            return boolean(program, op.compare(Some(a.cmp(&b))));
        }
        let value = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div | BinaryOp::Rem if b == 0 => {
                return Err(FathomError::InvalidArgument("division by zero".into()));
            }
            BinaryOp::Div => a / b,
            BinaryOp::Rem => a % b,
            BinaryOp::BitAnd => a & b,
            BinaryOp::BitOr => a | b,
            BinaryOp::BitXor => a ^ b,
            _ => return Err(invalid_operands(op)),
        };
        let ty = result_type(program, common, &[self, rhs])?;
        Ok(Object::from_value(program, ty, narrow(value, common, platform)))
    }

    /// `op self`
    pub fn unary_op(&self, program: &Program, op: UnaryOp) -> FathomResult<Object>
    {
        let platform = program.platform();
        let operand = operand(program, self)?;
        if op == UnaryOp::LogicalNot {
            return boolean(program, !operand.truthy());
        }
        match operand {
            Operand::Int { primitive, bits } => {
                let result = promote(primitive);
                let value = widen(bits, primitive, platform);
                let value = match op {
                    UnaryOp::Neg => -value,
                    UnaryOp::BitNot => !value,
                    UnaryOp::Plus | UnaryOp::LogicalNot => value,
                };
                let ty = result_type(program, result, &[self])?;
                Ok(Object::from_value(program, ty, narrow(value, result, platform)))
            }
            Operand::Float { primitive, value } => {
                let value = match op {
                    UnaryOp::Neg => -value,
                    UnaryOp::Plus => value,
                    _ => return Err(FathomError::Type("invalid operand to unary ~".into())),
                };
                Ok(Object::from_value(program, self.ty(), Value::Float(round_float(value, primitive))))
            }
            Operand::Pointer { .. } => Err(FathomError::Type("invalid pointer operand to unary operator".into())),
        }
    }

    /// Convert the value to another scalar type the way a C cast does.
    pub fn convert(&self, program: &Program, ty: TypeId) -> FathomResult<Object>
    {
        let platform = program.platform();
        let types = program.types();
        let source = operand(program, self)?;
        let target = types.get(types.strip_aliases(ty)?)?;

        let value = match target.kind() {
            TypeKind::Pointer { .. } => match source {
                Operand::Int { primitive, bits } => Value::Unsigned(pointer_bits(widen(bits, primitive, platform), platform)),
                Operand::Pointer { address, .. } => Value::Unsigned(address),
                Operand::Float { .. } => {
                    return Err(FathomError::Type("cannot convert a floating point value to a pointer".into()));
                }
            },
            TypeKind::Primitive { .. } | TypeKind::Enum(_) => {
                let primitive = types.classify_primitive(ty)?.ok_or_else(|| {
                    FathomError::Unsupported(format!("conversion to '{}'", types.type_name(ty).unwrap_or_default()))
                })?;
                match (primitive, source) {
                    (CPrimitive::Bool, source) => Value::Unsigned(u64::from(source.truthy())),
                    (p, source) if is_float(p) => Value::Float(round_float(float_of(source, platform), p)),
                    (p, Operand::Int { primitive, bits }) => narrow(widen(bits, primitive, platform), p, platform),
                    (p, Operand::Float { value, .. }) => narrow(value as i128, p, platform),
                    (p, Operand::Pointer { address, .. }) => narrow(i128::from(address), p, platform),
                }
            }
            _ => {
                return Err(FathomError::Type(format!(
                    "cannot convert to non-scalar type '{}'",
                    types.type_name(ty)?
                )));
            }
        };
        Ok(Object::from_value(program, ty, value))
    }
}

fn primitive_of(operand: Operand) -> CPrimitive
{
    match operand {
        Operand::Int { primitive, .. } | Operand::Float { primitive, .. } => primitive,
        Operand::Pointer { .. } => CPrimitive::UnsignedLong,
    }
}

fn float_of(operand: Operand, platform: &Platform) -> f64
{
    match operand {
        Operand::Int { primitive, bits } => widen(bits, primitive, platform) as f64,
        Operand::Float { value, .. } => value,
        Operand::Pointer { address, .. } => address as f64,
    }
}

/// Value of `bits` (of type `from`) converted to `to`, as raw bits.
fn truncate_to(bits: u64, from: CPrimitive, to: CPrimitive, platform: &Platform) -> u64
{
    truncate(widen(bits, from, platform) as u64, bit_width(to, platform))
}

fn pointer_bits(value: i128, platform: &Platform) -> u64
{
    truncate(value as u64, platform.word_size() as u32 * 8)
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::platform::Architecture;

    fn lp64() -> Platform
    {
        Platform::new(Architecture::X86_64, None).unwrap()
    }

    #[test]
    fn promotions_and_conversions()
    {
        let platform = lp64();
        assert_eq!(promote(CPrimitive::Char), CPrimitive::Int);
        assert_eq!(promote(CPrimitive::UnsignedShort), CPrimitive::Int);
        assert_eq!(common_type(CPrimitive::Int, CPrimitive::UnsignedInt, &platform), CPrimitive::UnsignedInt);
        assert_eq!(common_type(CPrimitive::Long, CPrimitive::UnsignedInt, &platform), CPrimitive::Long);
        assert_eq!(common_type(CPrimitive::LongLong, CPrimitive::UnsignedLong, &platform), CPrimitive::UnsignedLong);
        assert_eq!(common_type(CPrimitive::Int, CPrimitive::Double, &platform), CPrimitive::Double);

        let ilp32 = Platform::new(Architecture::I386, None).unwrap();
        assert_eq!(common_type(CPrimitive::Long, CPrimitive::UnsignedInt, &ilp32), CPrimitive::UnsignedLong);
    }

    #[test]
    fn narrowing_wraps()
    {
        let platform = lp64();
        assert_eq!(narrow(256, CPrimitive::UnsignedChar, &platform), Value::Unsigned(0));
        assert_eq!(narrow(-1, CPrimitive::UnsignedInt, &platform), Value::Unsigned(0xffff_ffff));
        assert_eq!(narrow(0x8000_0000, CPrimitive::Int, &platform), Value::Signed(i64::from(i32::MIN)));
        assert_eq!(widen(0xffff_ffff, CPrimitive::Int, &platform), -1);
    }
}
