//! # ptrace Plumbing
//!
//! A [`SeizedThread`] is one thread attached with `PTRACE_SEIZE` and stopped
//! with `PTRACE_INTERRUPT`. Dropping it detaches, which resumes the thread.
//!
//! `PTRACE_SEIZE` is used instead of `PTRACE_ATTACH` because it does not send
//! `SIGSTOP`, so a process that is not stopped for us never sees a signal.

use std::io;
use std::ptr;

use libc::{c_void, pid_t};
use tracing::{debug, trace};

use crate::error::{FathomError, FathomResult, LookupKind};
use crate::platform::Platform;
use crate::types::{RegisterSnapshot, ThreadId};

/// `NT_PRSTATUS` as the register-set selector for `PTRACE_GETREGSET`.
const NT_PRSTATUS: usize = object::elf::NT_PRSTATUS as usize;

/// Large enough for any supported `user_regs_struct`.
const REGSET_BUFFER: usize = 1024;

/// A thread held in a ptrace stop
///
/// The thread is detached (and resumes) when the guard is dropped, including
/// on error paths.
#[derive(Debug)]
pub struct SeizedThread
{
    tid: pid_t,
    attached: bool,
}

impl SeizedThread
{
    /// Seize `tid` and wait for it to enter a ptrace stop.
    ///
    /// ## Errors
    ///
    /// - [`FathomError::PermissionDenied`] when ptrace is not allowed
    ///   (`EPERM`, e.g. Yama `ptrace_scope`).
    /// - [`FathomError::NotFound`] when the thread has exited.
    pub fn seize(tid: ThreadId) -> FathomResult<Self>
    {
        let raw = pid_t::try_from(tid.0)
            .map_err(|_| FathomError::InvalidArgument(format!("thread id {tid} is out of range")))?;

        ptrace(libc::PTRACE_SEIZE, raw, ptr::null_mut(), ptr::null_mut()).map_err(|err| map_errno(err, tid, "seize"))?;
        let mut guard = Self {
            tid: raw,
            attached: true,
        };
        ptrace(libc::PTRACE_INTERRUPT, raw, ptr::null_mut(), ptr::null_mut())
            .map_err(|err| map_errno(err, tid, "interrupt"))?;
        guard.wait_for_stop().map_err(|err| map_errno(err, tid, "wait"))?;
        trace!(tid = raw, "thread stopped");
        Ok(guard)
    }

    fn wait_for_stop(&mut self) -> io::Result<()>
    {
        let mut status = 0;
        loop {
            // SAFETY: status points to a live c_int.
            let result = unsafe { libc::waitpid(self.tid, &mut status, libc::__WALL) };
            if result == -1 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            if libc::WIFEXITED(status) || libc::WIFSIGNALED(status) {
                self.attached = false;
                return Err(io::Error::from_raw_os_error(libc::ESRCH));
            }
            if libc::WIFSTOPPED(status) {
                return Ok(());
            }
        }
    }

    /// General-purpose registers through `PTRACE_GETREGSET`.
    pub fn registers(&self, platform: &Platform) -> FathomResult<RegisterSnapshot>
    {
        let mut buffer = [0u8; REGSET_BUFFER];
        let mut iov = libc::iovec {
            iov_base: buffer.as_mut_ptr().cast::<c_void>(),
            iov_len: buffer.len(),
        };
        ptrace(
            libc::PTRACE_GETREGSET,
            self.tid,
            NT_PRSTATUS as *mut c_void,
            (&mut iov as *mut libc::iovec).cast::<c_void>(),
        )
        .map_err(|err| map_errno(err, ThreadId(self.tid as u32), "read registers of"))?;

        let filled = iov.iov_len.min(buffer.len());
        RegisterSnapshot::from_user_regs(
            platform.architecture(),
            platform.word_size(),
            platform.byte_order(),
            &buffer[..filled],
        )
    }
}

impl Drop for SeizedThread
{
    fn drop(&mut self)
    {
        if self.attached {
            // Best effort: the thread may already be gone.
            if let Err(err) = ptrace(libc::PTRACE_DETACH, self.tid, ptr::null_mut(), ptr::null_mut()) {
                debug!(tid = self.tid, error = %err, "detach failed");
            }
        }
    }
}

#[cfg(target_env = "gnu")]
type Request = libc::c_uint;
#[cfg(not(target_env = "gnu"))]
type Request = libc::c_int;

fn ptrace(request: Request, tid: pid_t, addr: *mut c_void, data: *mut c_void) -> io::Result<libc::c_long>
{
    // SAFETY: callers pass either null or pointers to live buffers sized for the request.
    let result = unsafe { libc::ptrace(request, tid, addr, data) };
    if result == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(result)
}

fn map_errno(err: io::Error, tid: ThreadId, action: &str) -> FathomError
{
    match err.raw_os_error() {
        Some(libc::EPERM) | Some(libc::EACCES) => {
            FathomError::PermissionDenied(format!("cannot {action} thread {tid}: {err}"))
        }
        Some(libc::ESRCH) => FathomError::not_found(LookupKind::Thread, tid.to_string()),
        _ => FathomError::Io(io::Error::new(err.kind(), format!("failed to {action} thread {tid}: {err}"))),
    }
}
