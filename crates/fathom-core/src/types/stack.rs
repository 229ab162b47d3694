//! Stack frame and stack trace types.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::registers::RegisterSnapshot;
use super::symbols::{SourceLocation, Symbol, SymbolName};
use super::{Address, ThreadId};
use crate::debuginfo::ModuleId;

/// Stable identifier for a stack frame
///
/// Derived only from the thread, frame depth, program counter and stack
/// pointer, so re-unwinding the same frozen state yields the same ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u128);

impl FrameId
{
    pub fn new(thread: Option<ThreadId>, depth: usize, pc: Address, sp: Option<u64>) -> Self
    {
        let mut hasher_a = DefaultHasher::new();
        thread.hash(&mut hasher_a);
        depth.hash(&mut hasher_a);
        let upper = hasher_a.finish() as u128;

        let mut hasher_b = DefaultHasher::new();
        pc.hash(&mut hasher_b);
        sp.hash(&mut hasher_b);
        let lower = hasher_b.finish() as u128;

        Self((upper << 64) | lower)
    }

    pub fn as_u128(self) -> u128
    {
        self.0
    }
}

/// How a frame's registers were obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameStatus
{
    /// Registers came straight from the starting snapshot.
    Initial,
    /// Recovered by executing call-frame information.
    Cfi,
    /// Recovered by a frame-pointer or back-chain heuristic (may be inaccurate).
    Heuristic,
}

/// One activation record.
#[derive(Debug, Clone)]
pub struct Frame
{
    pub id: FrameId,
    /// Position in the trace, 0 = innermost.
    pub index: usize,
    pub pc: Address,
    /// Registers known for this frame. Caller frames hold only recovered registers.
    pub registers: Arc<RegisterSnapshot>,
    pub status: FrameStatus,
    /// `true` when `pc` is the exact faulting/current instruction rather than a return address.
    pub interrupted: bool,
    pub module: Option<ModuleId>,
    /// Name of the containing function, from debug info or the symbol table.
    pub function: Option<SymbolName>,
    pub symbol: Option<Symbol>,
    pub location: Option<SourceLocation>,
    /// Canonical frame address computed while unwinding this frame.
    pub cfa: Option<Address>,
}

impl Frame
{
    /// Address used for symbol and CFI lookups
    ///
    /// For caller frames `pc` is a return address, which may point past the
    /// end of the calling function, so lookups use `pc - 1`.
    pub fn lookup_pc(&self) -> Address
    {
        if self.interrupted || self.pc.is_null() {
            self.pc
        } else {
            self.pc - 1
        }
    }

    pub fn sp(&self) -> Option<u64>
    {
        self.registers.sp()
    }

    pub fn function_name(&self) -> Option<&str>
    {
        self.function.as_ref().map(SymbolName::display_name)
    }
}

/// Why a stack trace stopped before reaching the outermost frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TruncationReason
{
    /// A caller PC is not covered by any loaded module.
    UnknownPc
    {
        pc: Address,
    },
    /// No CFI covers the PC and no frame-pointer heuristic applied.
    NoUnwindInfo
    {
        pc: Address,
    },
    /// The configured frame limit was reached.
    MaxFrames(usize),
    /// The caller's PC and stack pointer equal the callee's.
    NoProgress
    {
        pc: Address,
    },
    /// Executing the unwind step failed (unreadable stack, corrupt CFI...).
    UnwindFailed
    {
        pc: Address,
        message: String,
    },
}

impl fmt::Display for TruncationReason
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            TruncationReason::UnknownPc { pc } => write!(f, "pc {pc} is not in any loaded module"),
            TruncationReason::NoUnwindInfo { pc } => write!(f, "no unwind information for pc {pc}"),
            TruncationReason::MaxFrames(limit) => write!(f, "reached maximum of {limit} frames"),
            TruncationReason::NoProgress { pc } => write!(f, "unwinding made no progress at pc {pc}"),
            TruncationReason::UnwindFailed { pc, message } => write!(f, "unwinding failed at pc {pc}: {message}"),
        }
    }
}

/// Ordered frames, innermost first. Immutable once built.
#[derive(Debug, Clone)]
pub struct StackTrace
{
    thread: Option<ThreadId>,
    frames: Vec<Frame>,
    truncation: Option<TruncationReason>,
}

impl StackTrace
{
    pub(crate) fn new(thread: Option<ThreadId>, frames: Vec<Frame>, truncation: Option<TruncationReason>) -> Self
    {
        Self {
            thread,
            frames,
            truncation,
        }
    }

    pub fn thread(&self) -> Option<ThreadId>
    {
        self.thread
    }

    pub fn frames(&self) -> &[Frame]
    {
        &self.frames
    }

    pub fn get(&self, index: usize) -> Option<&Frame>
    {
        self.frames.get(index)
    }

    pub fn len(&self) -> usize
    {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.frames.is_empty()
    }

    /// Reason the trace stopped early, if it did.
    pub fn truncation(&self) -> Option<&TruncationReason>
    {
        self.truncation.as_ref()
    }

    pub fn is_truncated(&self) -> bool
    {
        self.truncation.is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Frame>
    {
        self.frames.iter()
    }
}

impl<'a> IntoIterator for &'a StackTrace
{
    type IntoIter = std::slice::Iter<'a, Frame>;
    type Item = &'a Frame;

    fn into_iter(self) -> Self::IntoIter
    {
        self.frames.iter()
    }
}

impl fmt::Display for StackTrace
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        for frame in &self.frames {
            write!(f, "#{:<2} {}", frame.index, frame.pc)?;
            if let Some(name) = frame.function_name() {
                write!(f, " in {name}")?;
            }
            if let Some(location) = &frame.location {
                write!(f, " at {location}")?;
            }
            writeln!(f)?;
        }
        if let Some(reason) = &self.truncation {
            writeln!(f, "(truncated: {reason})")?;
        }
        Ok(())
    }
}
