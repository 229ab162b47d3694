//! Runtime address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed runtime address in the inspected program
///
/// Wraps a `u64` so addresses don't get mixed up with sizes, offsets or
/// register values. All arithmetic wraps, matching how the inspected program's
/// own pointer arithmetic behaves at the top of the address space.
///
/// ## Example
///
/// ```rust
/// use fathom_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// let next = addr + 0x100;
/// assert_eq!(next.value(), 0x1100);
/// assert_eq!(format!("{next}"), "0x0000000000001100");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address.
    pub const ZERO: Self = Address(0);

    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Returns `true` for the null address.
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Add an offset, returning `None` on overflow
    ///
    /// ```rust
    /// use fathom_core::types::Address;
    ///
    /// assert_eq!(Address::from(0x1000).checked_add(0x10), Some(Address::from(0x1010)));
    /// assert_eq!(Address::from(u64::MAX).checked_add(1), None);
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Apply a signed displacement (CFA offsets, frame-base offsets).
    pub fn offset(self, delta: i64) -> Self
    {
        Address(self.0.wrapping_add_signed(delta))
    }

    /// Round down to a power-of-two alignment.
    pub fn align_down(self, alignment: u64) -> Self
    {
        if alignment == 0 {
            return self;
        }
        Address(self.0 & !(alignment - 1))
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}
