//! Tests for typed objects and C operators

mod common;

use common::*;
use fathom_core::error::ErrorKind;
use fathom_core::object::{BinaryOp, Location, Object, UnaryOp, Value};
use fathom_core::typesys::TypeId;

#[test]
fn test_struct_members()
{
    let program = program();
    let origin = program.find_object("origin").unwrap();
    let y = origin.member(&program, "y").unwrap();
    assert_eq!(y.address().map(|a| a.value()), Some(DATA + 0x14));
    assert_eq!(y.value(&program).unwrap(), Value::Signed(20));
    assert!(origin.member(&program, "z").unwrap_err().is_not_found());
}

#[test]
fn test_member_through_pointer()
{
    let program = program();
    let head = program.find_object("head").unwrap();
    assert_eq!(program.type_name(head.ty()).unwrap(), "struct point *");
    let x = head.member(&program, "x").unwrap();
    assert_eq!(x.value(&program).unwrap().as_i64(), Some(10));
}

#[test]
fn test_member_of_scalar_is_type_error()
{
    let program = program();
    let counter = program.find_object("counter").unwrap();
    assert_eq!(counter.member(&program, "x").unwrap_err().kind(), ErrorKind::Type);
}

#[test]
fn test_bit_field_members()
{
    let program = program();
    let status = program.find_object("status").unwrap();
    let a = status.member(&program, "a").unwrap();
    let b = status.member(&program, "b").unwrap();
    assert_eq!(a.value(&program).unwrap(), Value::Unsigned(3));
    assert_eq!(b.value(&program).unwrap(), Value::Unsigned(21));
    assert!(b.address().is_none());
    assert_eq!(b.address_of(&program).unwrap_err().kind(), ErrorKind::Type);
}

#[test]
fn test_array_subscript()
{
    let program = program();
    let table = program.find_object("table").unwrap();
    assert_eq!(program.size_of(table.ty()).unwrap(), 16);
    let third = table.subscript(&program, 2).unwrap();
    assert_eq!(third.address().map(|a| a.value()), Some(DATA + 0x28));
    assert_eq!(third.value(&program).unwrap().as_i64(), Some(3));
}

#[test]
fn test_subscript_of_value_array()
{
    let program = program();
    let table = program.find_object("table").unwrap().read(&program).unwrap();
    assert!(table.address().is_none());
    assert_eq!(table.subscript(&program, 3).unwrap().value(&program).unwrap().as_i64(), Some(4));
}

#[test]
fn test_deref_and_address_of_round_trip()
{
    let program = program();
    let head = program.find_object("head").unwrap();
    let point = head.deref(&program).unwrap();
    assert_eq!(point.address().map(|a| a.value()), Some(DATA + 0x10));

    let pointer = point.address_of(&program).unwrap();
    assert_eq!(pointer.value(&program).unwrap().as_u64(), Some(DATA + 0x10));
    assert!(program.types_equivalent(pointer.ty(), head.ty()).unwrap());
}

#[test]
fn test_deref_void_pointer_is_type_error()
{
    let program = program();
    let void_ptr = program.find_type("void *").unwrap();
    let object = Object::at_address(&program, void_ptr, DATA + 0x40);
    assert_eq!(object.deref(&program).unwrap_err().kind(), ErrorKind::Type);
}

#[test]
fn test_c_string()
{
    let program = program();
    let name = program.find_object("name").unwrap();
    assert_eq!(name.read_c_string(&program, 64).unwrap(), b"fathom");
    assert_eq!(name.read_c_string(&program, 3).unwrap(), b"fat");
}

#[test]
fn test_cast_reinterprets_storage()
{
    let program = program();
    let counter = program.find_object("counter").unwrap();
    let unsigned = program.find_type("unsigned int").unwrap();
    let cast = counter.cast(&program, unsigned).unwrap();
    assert_eq!(cast.value(&program).unwrap(), Value::Unsigned(0xffff_fffd));

    let long = program.find_type("long").unwrap();
    assert_eq!(counter.cast(&program, long).unwrap_err().kind(), ErrorKind::Type);
}

#[test]
fn test_convert_sign_extends()
{
    let program = program();
    let counter = program.find_object("counter").unwrap();
    let long = program.find_type("long").unwrap();
    let wide = counter.convert(&program, long).unwrap();
    assert_eq!(wide.value(&program).unwrap().as_i64(), Some(-3));
}

#[test]
fn test_integer_arithmetic()
{
    let program = program();
    let counter = program.find_object("counter").unwrap();
    let answer = program.find_object("answer").unwrap();

    let sum = counter.binary_op(&program, BinaryOp::Add, &answer).unwrap();
    assert_eq!(sum.value(&program).unwrap().as_i64(), Some(39));
    assert_eq!(program.type_name(sum.ty()).unwrap(), "int");

    let less = counter.binary_op(&program, BinaryOp::Lt, &answer).unwrap();
    assert!(less.value(&program).unwrap().is_truthy().unwrap());

    let negated = counter.unary_op(&program, UnaryOp::Neg).unwrap();
    assert_eq!(negated.value(&program).unwrap().as_i64(), Some(3));
}

#[test]
fn test_usual_arithmetic_conversions()
{
    let program = program();
    let counter = program.find_object("counter").unwrap();
    let uint = program.find_type("unsigned int").unwrap();
    let one = Object::from_value(&program, uint, Value::Unsigned(1));

    // -3 converts to unsigned int, so it compares greater
    let greater = counter.binary_op(&program, BinaryOp::Gt, &one).unwrap();
    assert!(greater.value(&program).unwrap().is_truthy().unwrap());

    let sum = counter.binary_op(&program, BinaryOp::Add, &one).unwrap();
    assert_eq!(program.type_name(sum.ty()).unwrap(), "unsigned int");
    assert_eq!(sum.value(&program).unwrap(), Value::Unsigned(0xffff_fffe));
}

#[test]
fn test_division_by_zero()
{
    let program = program();
    let int = program.find_type("int").unwrap();
    let ten = Object::from_value(&program, int, Value::Signed(10));
    let zero = Object::from_value(&program, int, Value::Signed(0));
    assert_eq!(
        ten.binary_op(&program, BinaryOp::Div, &zero).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
}

#[test]
fn test_pointer_arithmetic_scales()
{
    let program = program();
    let table = program.find_object("table").unwrap();
    let int = program.find_type("int").unwrap();
    let two = Object::from_value(&program, int, Value::Signed(2));

    let element = table.binary_op(&program, BinaryOp::Add, &two).unwrap();
    assert_eq!(element.value(&program).unwrap().as_u64(), Some(DATA + 0x28));
    assert_eq!(element.deref(&program).unwrap().value(&program).unwrap().as_i64(), Some(3));

    let base = table.binary_op(&program, BinaryOp::Add, &Object::from_value(&program, int, Value::Signed(0))).unwrap();
    let distance = element.binary_op(&program, BinaryOp::Sub, &base).unwrap();
    assert_eq!(distance.value(&program).unwrap().as_i64(), Some(2));
}

#[test]
fn test_pointer_times_integer_is_invalid()
{
    let program = program();
    let head = program.find_object("head").unwrap();
    let int = program.find_type("int").unwrap();
    let two = Object::from_value(&program, int, Value::Signed(2));
    assert_eq!(head.binary_op(&program, BinaryOp::Mul, &two).unwrap_err().kind(), ErrorKind::Type);
}

#[test]
fn test_absent_object_has_type_but_no_value()
{
    let program = program();
    let int = program.find_type("int").unwrap();
    let absent = Object::absent(&program, int);
    assert!(matches!(absent.location(), Location::Absent));
    assert_eq!(program.size_of(absent.ty()).unwrap(), 4);
    assert_eq!(absent.read_bytes(&program).unwrap_err().kind(), ErrorKind::ValueUnavailable);
}

#[test]
fn test_void_object_has_no_size()
{
    let program = program();
    let object = Object::at_address(&program, TypeId::VOID, DATA);
    assert_eq!(object.read_bytes(&program).unwrap_err().kind(), ErrorKind::IncompleteType);
}

#[test]
fn test_reads_are_not_cached()
{
    use fathom_core::memory::{MemorySegment, SegmentBacking};
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&5i32.to_le_bytes()).unwrap();
    file.flush().unwrap();

    let mut program = fathom_core::Program::new(x86_64());
    program
        .add_segment(MemorySegment::new(0x4000..0x4004, SegmentBacking::file(file.path(), 0).unwrap()))
        .unwrap();
    let int = program.find_type("int").unwrap();
    let object = Object::at_address(&program, int, 0x4000u64);
    assert_eq!(object.value(&program).unwrap().as_i64(), Some(5));

    let snapshot = object.read(&program).unwrap();
    std::fs::write(file.path(), 6i32.to_le_bytes()).unwrap();
    assert_eq!(object.value(&program).unwrap().as_i64(), Some(6));
    assert_eq!(snapshot.value(&program).unwrap().as_i64(), Some(5));
}

/// A lone `char` holding `0xff` on a program for `architecture`.
fn char_ff(architecture: fathom_core::platform::Architecture) -> (fathom_core::Program, Object)
{
    use fathom_core::memory::{MemorySegment, SegmentBacking};

    let platform = fathom_core::platform::Platform::new(architecture, None).unwrap();
    let mut program = fathom_core::Program::new(platform);
    program
        .add_segment(MemorySegment::new(0x1000..0x1001, SegmentBacking::buffer(vec![0xff])))
        .unwrap();
    let char_ = program.find_type("char").unwrap();
    let object = Object::at_address(&program, char_, 0x1000u64);
    (program, object)
}

#[test]
fn test_plain_char_is_signed_on_x86_64()
{
    let (program, c) = char_ff(fathom_core::platform::Architecture::X86_64);
    assert_eq!(c.value(&program).unwrap(), Value::Signed(-1));
    let one = Object::from_value(&program, program.find_type("int").unwrap(), Value::Signed(1));
    let sum = c.binary_op(&program, BinaryOp::Add, &one).unwrap();
    assert_eq!(sum.value(&program).unwrap().as_i64(), Some(0));
}

#[test]
fn test_plain_char_is_unsigned_on_aarch64()
{
    let (program, c) = char_ff(fathom_core::platform::Architecture::Aarch64);
    assert_eq!(c.value(&program).unwrap(), Value::Unsigned(255));
    let one = Object::from_value(&program, program.find_type("int").unwrap(), Value::Signed(1));
    let sum = c.binary_op(&program, BinaryOp::Add, &one).unwrap();
    assert_eq!(sum.value(&program).unwrap().as_i64(), Some(256));
}
