//! Process and thread types.

use std::fmt;
use std::sync::Arc;

use super::registers::RegisterSnapshot;

/// Process identifier (PID) of a live or dumped process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId
{
    fn from(pid: u32) -> Self
    {
        ProcessId(pid)
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Kernel thread id (TID)
///
/// For core dumps this is `pr_pid` from the thread's `NT_PRSTATUS` note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(pub u32);

impl From<u32> for ThreadId
{
    fn from(tid: u32) -> Self
    {
        ThreadId(tid)
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// A thread of the inspected target with its resting registers.
#[derive(Debug, Clone)]
pub struct Thread
{
    pub id: ThreadId,
    /// `comm` name for live threads, when procfs reports one.
    pub name: Option<String>,
    pub registers: Arc<RegisterSnapshot>,
}
