//! # Platform Model
//!
//! Describes an instruction-set architecture: word size, byte order, register
//! set and the handful of special registers the unwinder needs.
//!
//! All per-architecture data lives in immutable `static` tables (see
//! [`tables`]), so a [`Platform`] is a small `Copy` value that can be shared
//! across threads freely.
//!
//! ## Example
//!
//! ```rust
//! use fathom_core::platform::{Architecture, Platform, PlatformFlags};
//!
//! let platform = Platform::new(Architecture::X86_64, None)?;
//! assert!(platform.register_by_name("rax").is_ok());
//! assert_eq!(platform.word_size(), 8);
//!
//! let empty = Platform::new(Architecture::Unknown, Some(PlatformFlags::empty()))?;
//! assert!(empty.registers().is_empty());
//! # Ok::<(), fathom_core::FathomError>(())
//! ```
//!
//! ## Live processes
//!
//! The [`linux`] submodule holds the ptrace and procfs plumbing used to attach
//! to live processes. It is only compiled on Linux.

pub mod tables;

#[cfg(target_os = "linux")]
pub mod linux;

use std::fmt;

use bitflags::bitflags;

use crate::error::{FathomError, FathomResult, LookupKind};
use tables::arch_info;

/// Instruction-set architecture tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    X86_64,
    I386,
    Aarch64,
    Arm,
    Ppc64,
    S390x,
    Riscv64,
    /// Sentinel for synthetic contexts with no register model.
    Unknown,
}

impl Architecture
{
    /// Every architecture tag, including [`Architecture::Unknown`].
    pub const ALL: [Architecture; 8] = [
        Architecture::X86_64,
        Architecture::I386,
        Architecture::Aarch64,
        Architecture::Arm,
        Architecture::Ppc64,
        Architecture::S390x,
        Architecture::Riscv64,
        Architecture::Unknown,
    ];

    pub fn name(self) -> &'static str
    {
        arch_info(self).name
    }

    /// Map an ELF `e_machine` value to an architecture.
    pub fn from_elf_machine(machine: u16) -> Self
    {
        use object::elf;

        match machine {
            elf::EM_X86_64 => Architecture::X86_64,
            elf::EM_386 => Architecture::I386,
            elf::EM_AARCH64 => Architecture::Aarch64,
            elf::EM_ARM => Architecture::Arm,
            elf::EM_PPC64 => Architecture::Ppc64,
            elf::EM_S390 => Architecture::S390x,
            elf::EM_RISCV => Architecture::Riscv64,
            _ => Architecture::Unknown,
        }
    }

    /// Map an `object` crate architecture to ours.
    pub fn from_object(architecture: object::Architecture) -> Self
    {
        match architecture {
            object::Architecture::X86_64 => Architecture::X86_64,
            object::Architecture::I386 => Architecture::I386,
            object::Architecture::Aarch64 => Architecture::Aarch64,
            object::Architecture::Arm => Architecture::Arm,
            object::Architecture::PowerPc64 => Architecture::Ppc64,
            object::Architecture::S390x => Architecture::S390x,
            object::Architecture::Riscv64 => Architecture::Riscv64,
            _ => Architecture::Unknown,
        }
    }

    /// Architecture of the machine this library was compiled for.
    pub fn host() -> Self
    {
        if cfg!(target_arch = "x86_64") {
            Architecture::X86_64
        } else if cfg!(target_arch = "x86") {
            Architecture::I386
        } else if cfg!(target_arch = "aarch64") {
            Architecture::Aarch64
        } else if cfg!(target_arch = "arm") {
            Architecture::Arm
        } else if cfg!(target_arch = "powerpc64") {
            Architecture::Ppc64
        } else if cfg!(target_arch = "s390x") {
            Architecture::S390x
        } else if cfg!(target_arch = "riscv64") {
            Architecture::Riscv64
        } else {
            Architecture::Unknown
        }
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.name())
    }
}

bitflags! {
    /// Capability flags of a platform.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PlatformFlags: u32 {
        /// Pointers and general-purpose registers are 64 bits wide.
        const IS_64_BIT = 1 << 0;
        /// Multi-byte values are stored least significant byte first.
        const IS_LITTLE_ENDIAN = 1 << 1;
    }
}

/// Byte order used to decode memory and register contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder
{
    Little,
    Big,
}

impl ByteOrder
{
    /// Byte order of the host.
    pub const fn native() -> Self
    {
        if cfg!(target_endian = "little") {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }

    /// Decode an unsigned integer of 1 to 8 bytes.
    ///
    /// Longer inputs are truncated to their first 8 bytes.
    pub fn read_uint(self, bytes: &[u8]) -> u64
    {
        let bytes = &bytes[..bytes.len().min(8)];
        let mut value = 0u64;
        match self {
            ByteOrder::Little => {
                for byte in bytes.iter().rev() {
                    value = (value << 8) | u64::from(*byte);
                }
            }
            ByteOrder::Big => {
                for byte in bytes {
                    value = (value << 8) | u64::from(*byte);
                }
            }
        }
        value
    }

    /// Encode the low `size` bytes of `value`.
    pub fn write_uint(self, value: u64, size: usize) -> Vec<u8>
    {
        let size = size.min(8);
        match self {
            ByteOrder::Little => value.to_le_bytes()[..size].to_vec(),
            ByteOrder::Big => value.to_be_bytes()[8 - size..].to_vec(),
        }
    }
}

impl From<ByteOrder> for gimli::RunTimeEndian
{
    fn from(order: ByteOrder) -> Self
    {
        match order {
            ByteOrder::Little => gimli::RunTimeEndian::Little,
            ByteOrder::Big => gimli::RunTimeEndian::Big,
        }
    }
}

/// One architectural register
///
/// Descriptive only. `number` is the DWARF register number where the ABI
/// defines one, otherwise a pseudo number from [`tables::PSEUDO_BASE`] up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register
{
    pub name: &'static str,
    /// Width in bytes.
    pub size: u8,
    pub number: u16,
}

/// An architecture plus its capability flags
///
/// Invariant: [`Platform::registers`] always matches the architecture's fixed
/// register list; [`Architecture::Unknown`] has none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform
{
    architecture: Architecture,
    flags: PlatformFlags,
}

impl Platform
{
    /// Create a platform, validating the flags against the architecture
    ///
    /// With `flags` omitted the architecture's default flags are used.
    /// [`Architecture::Unknown`] has no defaults, so it must be given an
    /// explicit empty flag set.
    ///
    /// ## Errors
    ///
    /// [`FathomError::Configuration`] when `Unknown` is combined with non-empty
    /// flags or with omitted flags.
    pub fn new(architecture: Architecture, flags: Option<PlatformFlags>) -> FathomResult<Self>
    {
        let flags = match (architecture, flags) {
            (Architecture::Unknown, None) => {
                return Err(FathomError::Configuration(
                    "flags must be specified for unknown architecture".into(),
                ));
            }
            (Architecture::Unknown, Some(flags)) if !flags.is_empty() => {
                return Err(FathomError::Configuration(format!(
                    "unknown architecture cannot have flags {flags:?}"
                )));
            }
            (_, Some(flags)) => flags,
            (architecture, None) => arch_info(architecture).default_flags,
        };
        Ok(Self { architecture, flags })
    }

    /// Platform of the machine this library runs on.
    pub fn host() -> Self
    {
        let architecture = Architecture::host();
        let mut flags = PlatformFlags::empty();
        if architecture != Architecture::Unknown {
            flags.set(PlatformFlags::IS_64_BIT, cfg!(target_pointer_width = "64"));
            flags.set(PlatformFlags::IS_LITTLE_ENDIAN, cfg!(target_endian = "little"));
        }
        Self { architecture, flags }
    }

    pub fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    pub fn flags(&self) -> PlatformFlags
    {
        self.flags
    }

    pub fn is_64_bit(&self) -> bool
    {
        self.flags.contains(PlatformFlags::IS_64_BIT)
    }

    pub fn byte_order(&self) -> ByteOrder
    {
        if self.flags.contains(PlatformFlags::IS_LITTLE_ENDIAN) {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }

    /// Pointer width in bytes.
    pub fn word_size(&self) -> usize
    {
        if self.is_64_bit() { 8 } else { 4 }
    }

    /// Whether plain `char` is signed under the architecture's ABI.
    pub fn char_is_signed(&self) -> bool
    {
        matches!(self.architecture, Architecture::X86_64 | Architecture::I386 | Architecture::Unknown)
    }

    /// The architecture's fixed, ordered register list.
    pub fn registers(&self) -> &'static [Register]
    {
        arch_info(self.architecture).registers
    }

    /// Look up a register by name or alias (`lr`, `fp`...).
    pub fn register_by_name(&self, name: &str) -> FathomResult<&'static Register>
    {
        let info = arch_info(self.architecture);
        if let Some(register) = info.registers.iter().find(|r| r.name == name) {
            return Ok(register);
        }
        info.aliases
            .iter()
            .find(|(alias, _)| *alias == name)
            .and_then(|(_, number)| info.registers.iter().find(|r| r.number == *number))
            .ok_or_else(|| FathomError::not_found(LookupKind::Register, name))
    }

    pub fn register_by_number(&self, number: u16) -> FathomResult<&'static Register>
    {
        self.registers()
            .iter()
            .find(|r| r.number == number)
            .ok_or_else(|| FathomError::not_found(LookupKind::Register, format!("#{number}")))
    }

    pub fn pc_register(&self) -> Option<&'static Register>
    {
        self.special(arch_info(self.architecture).pc)
    }

    pub fn sp_register(&self) -> Option<&'static Register>
    {
        self.special(arch_info(self.architecture).sp)
    }

    pub fn fp_register(&self) -> Option<&'static Register>
    {
        arch_info(self.architecture).fp.and_then(|n| self.special(n))
    }

    /// Register (CFI column) that holds the caller's program counter on entry.
    pub fn return_address_register(&self) -> Option<&'static Register>
    {
        self.special(arch_info(self.architecture).return_address)
    }

    pub fn callee_saved_registers(&self) -> impl Iterator<Item = &'static Register> + '_
    {
        let info = arch_info(self.architecture);
        info.callee_saved
            .iter()
            .filter_map(move |n| info.registers.iter().find(|r| r.number == *n))
    }

    fn special(&self, number: u16) -> Option<&'static Register>
    {
        self.registers().iter().find(|r| r.number == number)
    }
}

impl fmt::Display for Platform
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{} ({:?})", self.architecture, self.flags)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn byte_order_reads_partial_widths()
    {
        assert_eq!(ByteOrder::Little.read_uint(&[0x34, 0x12]), 0x1234);
        assert_eq!(ByteOrder::Big.read_uint(&[0x12, 0x34]), 0x1234);
        assert_eq!(ByteOrder::Big.write_uint(0x1234, 2), vec![0x12, 0x34]);
        assert_eq!(ByteOrder::Little.write_uint(0x1234, 4), vec![0x34, 0x12, 0, 0]);
    }

    #[test]
    fn s390x_defaults_to_big_endian()
    {
        let platform = Platform::new(Architecture::S390x, None).unwrap();
        assert_eq!(platform.byte_order(), ByteOrder::Big);
        assert!(platform.is_64_bit());
    }

    #[test]
    fn aliases_resolve_to_table_registers()
    {
        let platform = Platform::new(Architecture::Aarch64, None).unwrap();
        assert_eq!(platform.register_by_name("lr").unwrap().name, "x30");
        assert_eq!(platform.fp_register().unwrap().name, "x29");
        assert_eq!(platform.return_address_register().unwrap().number, 30);
    }
}
