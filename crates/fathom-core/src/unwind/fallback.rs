//! Frame-pointer and back-chain heuristics.
//!
//! Used when no call-frame information covers a PC. Each heuristic assumes
//! the conventional frame record of its ABI and can be fooled by code built
//! without frame pointers, so frames recovered this way are marked
//! [`FrameStatus::Heuristic`](crate::types::FrameStatus::Heuristic).

use crate::error::FathomResult;
use crate::memory::MemoryAccess;
use crate::platform::Architecture;
use crate::platform::tables::arch_info;
use crate::types::RegisterSnapshot;

/// Caller registers recovered by a heuristic.
pub(crate) struct HeuristicStep
{
    pub pc: u64,
    pub sp: u64,
    pub fp: Option<u64>,
}

impl HeuristicStep
{
    pub fn into_snapshot(self, architecture: Architecture) -> RegisterSnapshot
    {
        RegisterSnapshot::from_pc_sp(architecture, self.pc, self.sp, self.fp)
    }
}

/// Step one frame using the architecture's frame record convention
///
/// Returns `None` when the architecture has no heuristic or the frame
/// pointer is not known or null.
pub(crate) fn frame_pointer_step<M: MemoryAccess>(
    architecture: Architecture,
    registers: &RegisterSnapshot,
    memory: &M,
) -> Option<FathomResult<HeuristicStep>>
{
    let info = arch_info(architecture);
    match architecture {
        Architecture::X86_64 | Architecture::Aarch64 => {
            // [fp] = caller fp, [fp + 8] = return address
            let fp = non_null(registers.get(info.fp?))?;
            Some(linked_record(memory, fp, 8, fp.wrapping_add(16)))
        }
        Architecture::I386 | Architecture::Arm => {
            let fp = non_null(registers.get(info.fp?))?;
            Some(linked_record(memory, fp, 4, fp.wrapping_add(8)))
        }
        Architecture::Riscv64 => {
            // s0 points just above the saved ra/s0 pair
            let fp = non_null(registers.get(info.fp?))?;
            Some((|| {
                let pc = memory.read_word(fp.wrapping_sub(8))?;
                let caller_fp = memory.read_word(fp.wrapping_sub(16))?;
                Ok(HeuristicStep {
                    pc,
                    sp: fp,
                    fp: Some(caller_fp),
                })
            })())
        }
        Architecture::Ppc64 => {
            // back chain: [r1] = caller's r1, LR save word at caller r1 + 16
            let sp = non_null(registers.get(info.sp))?;
            Some((|| {
                let caller_sp = memory.read_word(sp)?;
                let pc = memory.read_word(caller_sp.wrapping_add(16))?;
                Ok(HeuristicStep {
                    pc,
                    sp: caller_sp,
                    fp: None,
                })
            })())
        }
        Architecture::S390x | Architecture::Unknown => None,
    }
}

fn non_null(value: Option<u64>) -> Option<u64>
{
    value.filter(|v| *v != 0)
}

/// `[fp]` holds the caller's frame pointer and `[fp + word]` the return address.
fn linked_record<M: MemoryAccess>(memory: &M, fp: u64, word: u64, caller_sp: u64) -> FathomResult<HeuristicStep>
{
    let caller_fp = memory.read_word(fp)?;
    let pc = memory.read_word(fp.wrapping_add(word))?;
    Ok(HeuristicStep {
        pc,
        sp: caller_sp,
        fp: Some(caller_fp),
    })
}
