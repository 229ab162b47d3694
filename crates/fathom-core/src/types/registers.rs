//! Register snapshots.
//!
//! A [`RegisterSnapshot`] is the set of register values known for one frame,
//! keyed by register number (see [`crate::platform::Register`]). Innermost
//! frames usually have every register; caller frames only have what the
//! unwinder could recover.

use std::collections::BTreeMap;

use crate::error::{FathomError, FathomResult};
use crate::platform::tables::arch_info;
use crate::platform::{Architecture, ByteOrder, Platform};

/// Known register values for one frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegisterSnapshot
{
    architecture: Architecture,
    values: BTreeMap<u16, u64>,
}

impl RegisterSnapshot
{
    /// Empty snapshot for an architecture.
    pub fn new(architecture: Architecture) -> Self
    {
        Self {
            architecture,
            values: BTreeMap::new(),
        }
    }

    /// Snapshot holding just a program counter, stack pointer and optional frame pointer.
    pub fn from_pc_sp(architecture: Architecture, pc: u64, sp: u64, fp: Option<u64>) -> Self
    {
        let info = arch_info(architecture);
        let mut snapshot = Self::new(architecture);
        snapshot.set(info.pc, pc);
        snapshot.set(info.sp, sp);
        if let (Some(number), Some(value)) = (info.fp, fp) {
            snapshot.set(number, value);
        }
        snapshot
    }

    pub fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    pub fn get(&self, number: u16) -> Option<u64>
    {
        self.values.get(&number).copied()
    }

    pub fn set(&mut self, number: u16, value: u64)
    {
        self.values.insert(number, value);
    }

    /// Builder form of [`RegisterSnapshot::set`].
    pub fn with(mut self, number: u16, value: u64) -> Self
    {
        self.set(number, value);
        self
    }

    pub fn remove(&mut self, number: u16) -> Option<u64>
    {
        self.values.remove(&number)
    }

    /// Look up a register value by name through the platform's table.
    pub fn get_by_name(&self, platform: &Platform, name: &str) -> FathomResult<Option<u64>>
    {
        let register = platform.register_by_name(name)?;
        Ok(self.get(register.number))
    }

    pub fn pc(&self) -> Option<u64>
    {
        self.get(arch_info(self.architecture).pc)
    }

    pub fn sp(&self) -> Option<u64>
    {
        self.get(arch_info(self.architecture).sp)
    }

    pub fn fp(&self) -> Option<u64>
    {
        arch_info(self.architecture).fp.and_then(|n| self.get(n))
    }

    pub fn set_pc(&mut self, value: u64)
    {
        self.set(arch_info(self.architecture).pc, value);
    }

    pub fn set_sp(&mut self, value: u64)
    {
        self.set(arch_info(self.architecture).sp, value);
    }

    /// Iterate `(number, value)` pairs in register-number order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, u64)> + '_
    {
        self.values.iter().map(|(n, v)| (*n, *v))
    }

    pub fn len(&self) -> usize
    {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.values.is_empty()
    }

    /// Decode an `NT_PRSTATUS` note descriptor
    ///
    /// Returns the thread id (`pr_pid`) and the general-purpose registers.
    ///
    /// ## Layout
    ///
    /// `struct elf_prstatus` places `pr_pid` at offset 32 and `pr_reg` at
    /// offset 112 on 64-bit targets (24 and 72 on 32-bit ones). `pr_reg` is an
    /// array of machine words in the architecture's `user_regs_struct` order.
    pub fn from_prstatus(
        architecture: Architecture,
        is_64_bit: bool,
        byte_order: ByteOrder,
        desc: &[u8],
    ) -> FathomResult<(u32, Self)>
    {
        let (pid_offset, regs_offset, word) = if is_64_bit { (32, 112, 8) } else { (24, 72, 4) };
        if desc.len() < regs_offset {
            return Err(FathomError::CorruptDebugInfo(format!(
                "NT_PRSTATUS note is {} bytes, expected at least {regs_offset}",
                desc.len()
            )));
        }
        let tid = byte_order.read_uint(&desc[pid_offset..pid_offset + 4]) as u32;
        let snapshot = Self::from_user_regs(architecture, word, byte_order, &desc[regs_offset..])?;
        Ok((tid, snapshot))
    }

    /// Decode a `user_regs_struct` image, as found in `pr_reg` or returned by
    /// `PTRACE_GETREGSET` with `NT_PRSTATUS`.
    pub fn from_user_regs(
        architecture: Architecture,
        word: usize,
        byte_order: ByteOrder,
        regs: &[u8],
    ) -> FathomResult<Self>
    {
        let layout = arch_info(architecture).prstatus_layout;
        if layout.is_empty() {
            return Err(FathomError::Unsupported(format!(
                "NT_PRSTATUS registers for {architecture}"
            )));
        }

        let needed = layout.len() * word;
        if regs.len() < needed {
            return Err(FathomError::CorruptDebugInfo(format!(
                "register set is {} bytes, expected at least {needed}",
                regs.len()
            )));
        }

        let mut snapshot = Self::new(architecture);
        for (slot, number) in layout.iter().enumerate() {
            let Some(number) = number else {
                continue;
            };
            let start = slot * word;
            snapshot.set(*number, byte_order.read_uint(&regs[start..start + word]));
        }
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn prstatus_64(words: &[u64], pid: u32) -> Vec<u8>
    {
        let mut desc = vec![0u8; 112 + words.len() * 8];
        desc[32..36].copy_from_slice(&pid.to_le_bytes());
        for (i, word) in words.iter().enumerate() {
            desc[112 + i * 8..120 + i * 8].copy_from_slice(&word.to_le_bytes());
        }
        desc
    }

    #[test]
    fn decodes_x86_64_prstatus()
    {
        let mut words = vec![0u64; 27];
        words[4] = 0x7ffd_0000_0010; // rbp
        words[10] = 42; // rax
        words[16] = 0x40_1000; // rip
        words[19] = 0x7ffd_0000_0000; // rsp
        let desc = prstatus_64(&words, 1234);

        let (tid, regs) = RegisterSnapshot::from_prstatus(Architecture::X86_64, true, ByteOrder::Little, &desc).unwrap();
        assert_eq!(tid, 1234);
        assert_eq!(regs.pc(), Some(0x40_1000));
        assert_eq!(regs.sp(), Some(0x7ffd_0000_0000));
        assert_eq!(regs.fp(), Some(0x7ffd_0000_0010));
        assert_eq!(regs.get(0), Some(42));
    }

    #[test]
    fn short_prstatus_is_corrupt()
    {
        let err = RegisterSnapshot::from_prstatus(Architecture::Aarch64, true, ByteOrder::Little, &[0u8; 64]).unwrap_err();
        assert!(matches!(err, FathomError::CorruptDebugInfo(_)));
    }

    #[test]
    fn pc_maps_to_the_architecture_pc_register()
    {
        let regs = RegisterSnapshot::from_pc_sp(Architecture::Aarch64, 0x1000, 0x2000, Some(0x3000));
        assert_eq!(regs.get(32), Some(0x1000));
        assert_eq!(regs.get(31), Some(0x2000));
        assert_eq!(regs.get(29), Some(0x3000));
    }
}
