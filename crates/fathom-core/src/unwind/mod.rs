//! # Stack Unwinder
//!
//! Turns one register snapshot into a [`StackTrace`].
//!
//! ## Algorithm
//!
//! Starting from the innermost frame, each step:
//!
//! 1. looks up the module and call-frame information covering the PC
//!    (`pc - 1` for caller frames, whose PC is a return address),
//! 2. emits a [`Frame`] with whatever symbol, function and line information
//!    exists for that address,
//! 3. computes the canonical frame address (CFA) and the caller's registers:
//!    callee-saved registers default to "same value", the row's rules
//!    override them, the caller's stack pointer is the CFA and its PC is the
//!    recovered return address,
//! 4. without CFI, falls back to the architecture's frame-pointer heuristic
//!    (see [`fallback`]) when enabled.
//!
//! ## Termination
//!
//! A trace ends normally when the return address is zero or undefined. On
//! architectures whose return-address column is the PC itself, a row with no
//! rule for it counts as undefined. Otherwise it is truncated, never failed,
//! and carries a [`TruncationReason`]: a caller PC outside every module, no unwind
//! information, the frame limit, a step that does not move, or a step that
//! failed (unreadable stack, corrupt CFI).
//!
//! Unwinding reads only the snapshot, the index and memory, so unwinding the
//! same frozen state twice yields identical traces.

mod fallback;

use std::sync::Arc;

use tracing::{debug, trace};

use crate::debuginfo::demangle::make_symbol_name;
use crate::debuginfo::{CfaRuleRecord, CfiRecord, CfiRow, DebugInfoIndex, Module, RegisterRuleRecord, SymbolRef};
use crate::error::{FathomError, FathomResult};
use crate::memory::MemoryAccess;
use crate::platform::Platform;
use crate::platform::tables::arch_info;
use crate::types::{Address, Frame, FrameId, FrameStatus, RegisterSnapshot, StackTrace, ThreadId, TruncationReason};

/// Default frame limit.
pub const DEFAULT_MAX_FRAMES: usize = 1024;

/// Outcome of unwinding one frame.
enum Step
{
    Caller
    {
        registers: RegisterSnapshot,
        status: FrameStatus,
        cfa: Option<u64>,
    },
    Complete
    {
        cfa: Option<u64>,
    },
    NoUnwindInfo,
}

/// CFI-driven stack unwinder with frame-pointer fallbacks.
pub struct StackUnwinder<'a, M>
{
    platform: &'a Platform,
    index: &'a DebugInfoIndex,
    memory: &'a M,
    max_frames: usize,
    frame_pointer_fallback: bool,
}

impl<'a, M: MemoryAccess> StackUnwinder<'a, M>
{
    pub fn new(platform: &'a Platform, index: &'a DebugInfoIndex, memory: &'a M) -> Self
    {
        Self {
            platform,
            index,
            memory,
            max_frames: DEFAULT_MAX_FRAMES,
            frame_pointer_fallback: true,
        }
    }

    pub fn with_max_frames(mut self, max_frames: usize) -> Self
    {
        self.max_frames = max_frames;
        self
    }

    pub fn with_frame_pointer_fallback(mut self, enabled: bool) -> Self
    {
        self.frame_pointer_fallback = enabled;
        self
    }

    /// Unwind from `initial`, the registers of the innermost frame.
    pub fn unwind(&self, thread: Option<ThreadId>, initial: RegisterSnapshot) -> StackTrace
    {
        let mut frames: Vec<Frame> = Vec::new();
        let mut registers = initial;
        let mut status = FrameStatus::Initial;

        let truncation = loop {
            if frames.len() >= self.max_frames {
                break Some(TruncationReason::MaxFrames(self.max_frames));
            }
            let Some(pc) = registers.pc() else {
                break Some(TruncationReason::UnwindFailed {
                    pc: Address::ZERO,
                    message: "register snapshot has no program counter".into(),
                });
            };
            let interrupted = frames.is_empty();
            let lookup = if interrupted || pc == 0 { pc } else { pc - 1 };
            let module = self.index.module_for_address(lookup);
            if module.is_none() && !interrupted {
                break Some(TruncationReason::UnknownPc { pc: Address::new(pc) });
            }

            let registers_now = Arc::new(registers);
            frames.push(self.frame(thread, frames.len(), pc, lookup, module, status, Arc::clone(&registers_now)));
            trace!(index = frames.len() - 1, pc = format_args!("0x{pc:x}"), ?status, "frame");

            let step = match self.step(module, lookup, &registers_now) {
                Ok(step) => step,
                Err(err) => {
                    break Some(TruncationReason::UnwindFailed {
                        pc: Address::new(pc),
                        message: err.to_string(),
                    });
                }
            };
            match step {
                Step::Complete { cfa } => {
                    set_cfa(&mut frames, cfa);
                    break None;
                }
                Step::NoUnwindInfo => break Some(TruncationReason::NoUnwindInfo { pc: Address::new(pc) }),
                Step::Caller {
                    registers: caller,
                    status: caller_status,
                    cfa,
                } => {
                    set_cfa(&mut frames, cfa);
                    if caller.pc() == Some(pc) && caller.sp() == registers_now.sp() {
                        break Some(TruncationReason::NoProgress { pc: Address::new(pc) });
                    }
                    registers = caller;
                    status = caller_status;
                }
            }
        };

        if let Some(reason) = &truncation {
            debug!(?thread, frames = frames.len(), %reason, "stack trace truncated");
        }
        StackTrace::new(thread, frames, truncation)
    }

    #[allow(clippy::too_many_arguments)]
    fn frame(
        &self,
        thread: Option<ThreadId>,
        index: usize,
        pc: u64,
        lookup: u64,
        module: Option<&Module>,
        status: FrameStatus,
        registers: Arc<RegisterSnapshot>,
    ) -> Frame
    {
        let (function, symbol, location) = match module {
            Some(module) => {
                let symbol = module.symbol_at(lookup).map(|record| SymbolRef { module, record }.to_symbol(None));
                let function = module
                    .function_at(lookup)
                    .map(|f| make_symbol_name(f.linkage_name.as_deref().unwrap_or(&f.name)))
                    .or_else(|| symbol.as_ref().map(|s| s.name.clone()));
                (function, symbol, module.line_at(lookup))
            }
            None => (None, None, None),
        };
        Frame {
            id: FrameId::new(thread, index, Address::new(pc), registers.sp()),
            index,
            pc: Address::new(pc),
            registers,
            status,
            interrupted: index == 0,
            module: module.map(Module::id),
            function,
            symbol,
            location,
            cfa: None,
        }
    }

    fn step(&self, module: Option<&Module>, lookup: u64, registers: &RegisterSnapshot) -> FathomResult<Step>
    {
        if let Some(module) = module {
            if let Some((record, row)) = module.cfi_row_at(lookup)? {
                return self.cfi_step(record, row, registers);
            }
        }
        if self.frame_pointer_fallback {
            let architecture = self.platform.architecture();
            if let Some(result) = fallback::frame_pointer_step(architecture, registers, self.memory) {
                let step = result?;
                if step.pc == 0 {
                    return Ok(Step::Complete { cfa: None });
                }
                return Ok(Step::Caller {
                    registers: step.into_snapshot(architecture),
                    status: FrameStatus::Heuristic,
                    cfa: None,
                });
            }
        }
        Ok(Step::NoUnwindInfo)
    }

    fn cfi_step(&self, record: &CfiRecord, row: &CfiRow, registers: &RegisterSnapshot) -> FathomResult<Step>
    {
        let architecture = self.platform.architecture();
        let info = arch_info(architecture);

        let cfa = match &row.cfa {
            CfaRuleRecord::RegisterOffset { register, offset } => {
                let base = registers.get(*register).ok_or_else(|| {
                    FathomError::ValueUnavailable(format!("CFA register {register} is not known"))
                })?;
                base.wrapping_add_signed(*offset)
            }
            CfaRuleRecord::Unsupported(what) => {
                return Err(FathomError::Unsupported(format!("CFA rule: {what}")));
            }
        };

        let mut caller = RegisterSnapshot::new(architecture);
        for number in info.callee_saved {
            if let Some(value) = registers.get(*number) {
                caller.set(*number, value);
            }
        }
        for (number, rule) in &row.registers {
            match self.evaluate_rule(*number, rule, registers, cfa)? {
                Some(value) => caller.set(*number, value),
                None => {
                    caller.remove(*number);
                }
            }
        }

        let return_column = record.return_address_register;
        let return_address = match row.rule_for(return_column) {
            Some(RegisterRuleRecord::Undefined) => return Ok(Step::Complete { cfa: Some(cfa) }),
            Some(RegisterRuleRecord::Unsupported(what)) => {
                return Err(FathomError::Unsupported(format!("return address rule: {what}")));
            }
            Some(_) => caller.get(return_column),
            // a PC column with no rule is undefined; a link register keeps its value
            None if return_column == info.pc => return Ok(Step::Complete { cfa: Some(cfa) }),
            None => registers.get(return_column),
        };
        let return_address = return_address.ok_or_else(|| {
            FathomError::ValueUnavailable(format!("return address column {return_column} is not recoverable"))
        })?;
        if return_address == 0 {
            return Ok(Step::Complete { cfa: Some(cfa) });
        }

        caller.set_sp(cfa);
        caller.set_pc(return_address);
        Ok(Step::Caller {
            registers: caller,
            status: FrameStatus::Cfi,
            cfa: Some(cfa),
        })
    }

    /// Caller value of register `number`; `None` when it cannot be recovered.
    fn evaluate_rule(&self, number: u16, rule: &RegisterRuleRecord, registers: &RegisterSnapshot, cfa: u64)
        -> FathomResult<Option<u64>>
    {
        match rule {
            RegisterRuleRecord::Undefined | RegisterRuleRecord::Unsupported(_) => Ok(None),
            RegisterRuleRecord::SameValue => Ok(registers.get(number)),
            RegisterRuleRecord::Offset(offset) => self.memory.read_word(cfa.wrapping_add_signed(*offset)).map(Some),
            RegisterRuleRecord::ValOffset(offset) => Ok(Some(cfa.wrapping_add_signed(*offset))),
            RegisterRuleRecord::Register(other) => Ok(registers.get(*other)),
        }
    }
}

fn set_cfa(frames: &mut [Frame], cfa: Option<u64>)
{
    if let Some(frame) = frames.last_mut() {
        frame.cfa = cfa.map(Address::new);
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::memory::{MemoryReader, MemorySegment, SegmentBacking};
    use crate::platform::Architecture;

    fn stack(platform: &Platform, base: u64, words: &[u64]) -> MemoryReader
    {
        let mut bytes = Vec::new();
        for word in words {
            bytes.extend_from_slice(&platform.byte_order().write_uint(*word, platform.word_size()));
        }
        let mut memory = MemoryReader::new(*platform);
        memory
            .add_segment(MemorySegment::new(base..base + bytes.len() as u64, SegmentBacking::buffer(bytes)))
            .unwrap();
        memory
    }

    #[test]
    fn riscv_frame_record_sits_below_s0()
    {
        let platform = Platform::new(Architecture::Riscv64, None).unwrap();
        // 0x7000: saved s0, 0x7008: saved ra, s0 = 0x7010
        let memory = stack(&platform, 0x7000, &[0x9000, 0x4242]);
        let registers = RegisterSnapshot::from_pc_sp(Architecture::Riscv64, 0x1000, 0x6ff0, Some(0x7010));

        let step = fallback::frame_pointer_step(Architecture::Riscv64, &registers, &memory)
            .unwrap()
            .unwrap();
        assert_eq!(step.pc, 0x4242);
        assert_eq!(step.sp, 0x7010);
        assert_eq!(step.fp, Some(0x9000));
    }

    #[test]
    fn s390x_has_no_heuristic()
    {
        let platform = Platform::new(Architecture::S390x, None).unwrap();
        let memory = stack(&platform, 0x7000, &[0]);
        let registers = RegisterSnapshot::from_pc_sp(Architecture::S390x, 0x1000, 0x7000, Some(0x7000));
        assert!(fallback::frame_pointer_step(Architecture::S390x, &registers, &memory).is_none());
    }

    #[test]
    fn missing_pc_truncates_without_frames()
    {
        let platform = Platform::new(Architecture::X86_64, None).unwrap();
        let index = DebugInfoIndex::new();
        let memory = MemoryReader::new(platform);
        let trace = StackUnwinder::new(&platform, &index, &memory).unwind(None, RegisterSnapshot::new(Architecture::X86_64));
        assert!(trace.is_empty());
        assert!(matches!(trace.truncation(), Some(TruncationReason::UnwindFailed { .. })));
    }
}
