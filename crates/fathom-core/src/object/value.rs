//! Decoded scalar values and the byte-level helpers behind them.

use std::fmt;
use std::sync::Arc;

use crate::error::{FathomError, FathomResult};
use crate::platform::ByteOrder;

/// A value read out of the inspected program.
///
/// Integers keep the signedness of their type. Aggregates and types the
/// engine cannot interpret (`long double`) are raw bytes in target order.
#[derive(Debug, Clone, PartialEq)]
pub enum Value
{
    Signed(i64),
    Unsigned(u64),
    Float(f64),
    Bytes(Arc<[u8]>),
}

impl Value
{
    /// Two's complement bits of an integer value.
    pub fn as_u64(&self) -> Option<u64>
    {
        match self {
            Value::Signed(v) => Some(*v as u64),
            Value::Unsigned(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64>
    {
        match self {
            Value::Signed(v) => Some(*v),
            Value::Unsigned(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64>
    {
        match self {
            Value::Signed(v) => Some(*v as f64),
            Value::Unsigned(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]>
    {
        match self {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// C truth value of a scalar.
    pub fn is_truthy(&self) -> FathomResult<bool>
    {
        match self {
            Value::Signed(v) => Ok(*v != 0),
            Value::Unsigned(v) => Ok(*v != 0),
            Value::Float(v) => Ok(*v != 0.0),
            Value::Bytes(_) => Err(FathomError::Type("aggregate used where a scalar is required".into())),
        }
    }

    /// Encode into `size` bytes of the target's representation.
    pub(crate) fn encode(&self, size: usize, order: ByteOrder) -> FathomResult<Vec<u8>>
    {
        match self {
            Value::Signed(v) => encode_int(*v as u64, size, *v < 0, order),
            Value::Unsigned(v) => encode_int(*v, size, false, order),
            Value::Float(v) => match size {
                4 => Ok(order.write_uint(u64::from((*v as f32).to_bits()), 4)),
                8 => Ok(order.write_uint(v.to_bits(), 8)),
                _ => Err(FathomError::Unsupported(format!("{size}-byte floating point values"))),
            },
            Value::Bytes(bytes) => {
                if bytes.len() < size {
                    return Err(FathomError::InvalidArgument(format!(
                        "value holds {} bytes, type needs {size}",
                        bytes.len()
                    )));
                }
                Ok(bytes[..size].to_vec())
            }
        }
    }
}

impl fmt::Display for Value
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Value::Signed(v) => write!(f, "{v}"),
            Value::Unsigned(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bytes(bytes) => {
                f.write_str("{")?;
                for (i, byte) in bytes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "0x{byte:02x}")?;
                }
                f.write_str("}")
            }
        }
    }
}

fn encode_int(bits: u64, size: usize, negative: bool, order: ByteOrder) -> FathomResult<Vec<u8>>
{
    match size {
        0 => Ok(Vec::new()),
        1..=8 => Ok(order.write_uint(bits, size)),
        _ => {
            // sign-extend into wide storage
            let fill = if negative { 0xff } else { 0 };
            let mut bytes = vec![fill; size];
            let low = order.write_uint(bits, 8);
            match order {
                ByteOrder::Little => bytes[..8].copy_from_slice(&low),
                ByteOrder::Big => bytes[size - 8..].copy_from_slice(&low),
            }
            Ok(bytes)
        }
    }
}

/// How the bytes of a type are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape
{
    Signed,
    Unsigned,
    Float,
    Aggregate,
}

/// Interpret `bytes` (exactly the type's size) as a value.
pub(crate) fn decode(bytes: &[u8], shape: Shape, order: ByteOrder) -> Value
{
    match shape {
        Shape::Signed if bytes.len() <= 8 => Value::Signed(sign_extend(order.read_uint(bytes), bytes.len() as u32 * 8)),
        Shape::Unsigned if bytes.len() <= 8 => Value::Unsigned(order.read_uint(bytes)),
        Shape::Float if bytes.len() == 4 => Value::Float(f64::from(f32::from_bits(order.read_uint(bytes) as u32))),
        Shape::Float if bytes.len() == 8 => Value::Float(f64::from_bits(order.read_uint(bytes))),
        _ => Value::Bytes(Arc::from(bytes)),
    }
}

/// Sign-extend the low `bits` bits of `value`.
pub(crate) fn sign_extend(value: u64, bits: u32) -> i64
{
    if bits == 0 || bits >= 64 {
        return value as i64;
    }
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

/// Keep only the low `bits` bits.
pub(crate) fn truncate(value: u64, bits: u32) -> u64
{
    if bits >= 64 { value } else { value & ((1u64 << bits) - 1) }
}

/// Extract a bit field of `width` bits starting `bit_offset` bits into `raw`.
///
/// Little-endian targets number bits from the least significant bit of the
/// first byte, big-endian targets from the most significant bit.
pub(crate) fn extract_bits(raw: &[u8], bit_offset: u64, width: u64, order: ByteOrder) -> FathomResult<u64>
{
    let total_bits = raw.len() as u64 * 8;
    if width == 0 || width > 64 || raw.len() > 16 || bit_offset + width > total_bits {
        return Err(FathomError::InvalidArgument(format!(
            "bit field of {width} bits at bit {bit_offset} does not fit {} bytes",
            raw.len()
        )));
    }
    let mut wide = 0u128;
    match order {
        ByteOrder::Little => {
            for byte in raw.iter().rev() {
                wide = (wide << 8) | u128::from(*byte);
            }
            wide >>= bit_offset;
        }
        ByteOrder::Big => {
            for byte in raw {
                wide = (wide << 8) | u128::from(*byte);
            }
            wide >>= total_bits - bit_offset - width;
        }
    }
    Ok(truncate(wide as u64, width as u32))
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn sign_extension()
    {
        assert_eq!(sign_extend(0xff, 8), -1);
        assert_eq!(sign_extend(0x7f, 8), 127);
        assert_eq!(sign_extend(0b101, 3), -3);
    }

    #[test]
    fn bit_fields_follow_byte_order()
    {
        // bits 3..8 of 0b1010_1000 hold 0b10101
        assert_eq!(extract_bits(&[0b1010_1000], 3, 5, ByteOrder::Little).unwrap(), 0b10101);
        // on big-endian the first field occupies the top bits
        assert_eq!(extract_bits(&[0b1010_1000], 0, 3, ByteOrder::Big).unwrap(), 0b101);
        // a field straddling two bytes
        assert_eq!(extract_bits(&[0x80, 0x01], 7, 2, ByteOrder::Little).unwrap(), 0b11);
        assert!(extract_bits(&[0], 4, 8, ByteOrder::Little).is_err());
    }

    #[test]
    fn decode_and_encode_agree()
    {
        let bytes = Value::Signed(-2).encode(2, ByteOrder::Big).unwrap();
        assert_eq!(bytes, vec![0xff, 0xfe]);
        assert_eq!(decode(&bytes, Shape::Signed, ByteOrder::Big), Value::Signed(-2));
        assert_eq!(decode(&[1, 0, 0, 0], Shape::Unsigned, ByteOrder::Little), Value::Unsigned(1));
        let float = Value::Float(1.5).encode(4, ByteOrder::Little).unwrap();
        assert_eq!(decode(&float, Shape::Float, ByteOrder::Little), Value::Float(1.5));
    }
}
