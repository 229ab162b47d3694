//! # Linux Live Processes
//!
//! [`Program::from_pid`] builds a program over a running process:
//!
//! - memory is one unbounded segment backed by `/proc/<pid>/mem`, so reads
//!   always see the current contents
//! - every file in `/proc/<pid>/maps` is loaded as a module
//! - every thread in `/proc/<pid>/task` is briefly stopped with ptrace to
//!   snapshot its registers, then detached again
//!
//! Register snapshots are taken once, at open time. Threads that cannot be
//! stopped (already exited, or ptrace denied) are left out of
//! [`Program::threads`]; memory and symbols stay usable.
//!
//! ## Permissions
//!
//! Reading another process needs the same rights as `ptrace(2)`: same user
//! and a permissive `kernel.yama.ptrace_scope`, or `CAP_SYS_PTRACE`.

pub mod procfs;
pub mod ptrace;

use std::io;

use tracing::{debug, info, warn};

use crate::config::ProgramOptions;
use crate::error::{FathomError, FathomResult, LookupKind};
use crate::memory::{MemorySegment, SegmentBacking};
use crate::platform::{Architecture, Platform};
use crate::program::Program;
use crate::target::load_mapped_modules;
use crate::types::{ProcessId, Thread};
use ptrace::SeizedThread;

impl Program
{
    /// Open the live process `pid`.
    ///
    /// ## Errors
    ///
    /// - [`FathomError::NotFound`] if the process does not exist.
    /// - [`FathomError::PermissionDenied`] if its memory cannot be opened.
    /// - [`FathomError::Unsupported`] on a host architecture without a register model.
    pub fn from_pid(pid: ProcessId, options: ProgramOptions) -> FathomResult<Self>
    {
        let platform = Platform::host();
        if platform.architecture() == Architecture::Unknown {
            return Err(FathomError::Unsupported("live processes on this host architecture".into()));
        }

        let mut program = Program::with_options(platform, options);
        let backing = SegmentBacking::process(pid).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => FathomError::not_found(LookupKind::Process, pid.to_string()),
            io::ErrorKind::PermissionDenied => {
                FathomError::PermissionDenied(format!("cannot open memory of process {pid}"))
            }
            _ => FathomError::Io(err),
        })?;
        program.add_segment(MemorySegment::unbounded(0, backing))?;

        for thread in snapshot_threads(pid, &platform)? {
            program.add_thread(thread);
        }

        let mapped = procfs::mapped_files(pid)?;
        load_mapped_modules(&mut program, &mapped, page_size());

        info!(
            pid = pid.0,
            threads = program.threads().len(),
            modules = program.index().modules().count(),
            "opened live process"
        );
        Ok(program)
    }
}

/// Stop every thread, read its registers, then let them all go.
fn snapshot_threads(pid: ProcessId, platform: &Platform) -> FathomResult<Vec<Thread>>
{
    let mut seized = Vec::new();
    for tid in procfs::thread_ids(pid)? {
        match SeizedThread::seize(tid) {
            Ok(guard) => seized.push((tid, guard)),
            Err(err) if err.is_not_found() => debug!(tid = tid.0, "thread exited before it could be stopped"),
            Err(err) => warn!(tid = tid.0, error = %err, "cannot stop thread; omitting it"),
        }
    }

    let mut threads = Vec::with_capacity(seized.len());
    for (tid, guard) in &seized {
        match guard.registers(platform) {
            Ok(registers) => threads.push(Thread {
                id: *tid,
                name: procfs::thread_name(pid, *tid),
                registers: registers.into(),
            }),
            Err(err) => warn!(tid = tid.0, error = %err, "cannot read thread registers; omitting it"),
        }
    }
    Ok(threads)
}

fn page_size() -> u64
{
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    u64::try_from(size).ok().filter(|s| *s > 0).unwrap_or(4096)
}
