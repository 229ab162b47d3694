//! `/proc/<pid>` readers.

use std::fs;
use std::io;
use std::path::PathBuf;

use crate::error::{FathomError, FathomResult, LookupKind};
use crate::target::MappedFile;
use crate::types::{ProcessId, ThreadId};

/// File-backed mappings from `/proc/<pid>/maps`.
pub fn mapped_files(pid: ProcessId) -> FathomResult<Vec<MappedFile>>
{
    let text = fs::read_to_string(format!("/proc/{}/maps", pid.0)).map_err(|err| map_io(err, pid))?;
    Ok(parse_maps(&text))
}

/// Parse `maps` text, keeping only mappings of regular files
///
/// Anonymous mappings, pseudo paths such as `[stack]` and files marked
/// `(deleted)` are dropped.
pub fn parse_maps(text: &str) -> Vec<MappedFile>
{
    text.lines().filter_map(parse_maps_line).collect()
}

fn parse_maps_line(line: &str) -> Option<MappedFile>
{
    let mut fields = line.splitn(6, ' ');
    let range = fields.next()?;
    let _perms = fields.next()?;
    let offset = fields.next()?;
    let _device = fields.next()?;
    let _inode = fields.next()?;
    let path = fields.next()?.trim_start();
    if !path.starts_with('/') || path.ends_with(" (deleted)") {
        return None;
    }

    let (start, end) = range.split_once('-')?;
    Some(MappedFile {
        start: u64::from_str_radix(start, 16).ok()?,
        end: u64::from_str_radix(end, 16).ok()?,
        offset: u64::from_str_radix(offset, 16).ok()?,
        path: PathBuf::from(path),
    })
}

/// Thread ids from `/proc/<pid>/task`, in ascending order.
pub fn thread_ids(pid: ProcessId) -> FathomResult<Vec<ThreadId>>
{
    let mut tids: Vec<ThreadId> = fs::read_dir(format!("/proc/{}/task", pid.0))
        .map_err(|err| map_io(err, pid))?
        .filter_map(|entry| entry.ok()?.file_name().to_str()?.parse().ok().map(ThreadId))
        .collect();
    tids.sort_unstable();
    Ok(tids)
}

/// `comm` of a thread, if it is still readable.
pub fn thread_name(pid: ProcessId, tid: ThreadId) -> Option<String>
{
    fs::read_to_string(format!("/proc/{}/task/{}/comm", pid.0, tid.0))
        .ok()
        .map(|name| name.trim_end().to_string())
}

fn map_io(err: io::Error, pid: ProcessId) -> FathomError
{
    match err.kind() {
        io::ErrorKind::NotFound => FathomError::not_found(LookupKind::Process, pid.0.to_string()),
        io::ErrorKind::PermissionDenied => FathomError::PermissionDenied(format!("cannot inspect process {}", pid.0)),
        _ => FathomError::Io(err),
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    const MAPS: &str = "\
55d0c0a00000-55d0c0a02000 r--p 00000000 fd:01 1835015                    /usr/bin/cat
55d0c0a02000-55d0c0a07000 r-xp 00002000 fd:01 1835015                    /usr/bin/cat
55d0c1b6e000-55d0c1b8f000 rw-p 00000000 00:00 0                          [heap]
7f1e2a400000-7f1e2a428000 r--p 00000000 fd:01 1836021                    /usr/lib/x86_64-linux-gnu/libc.so.6
7f1e2a600000-7f1e2a601000 rw-p 00000000 00:00 0
7f1e2a700000-7f1e2a701000 r--p 00000000 fd:01 99                         /tmp/old.so (deleted)
7ffc4c9e0000-7ffc4ca01000 rw-p 00000000 00:00 0                          [stack]
";

    #[test]
    fn keeps_file_mappings_only()
    {
        let files = parse_maps(MAPS);
        assert_eq!(files.len(), 3);
        assert_eq!(files[1].start, 0x55d0_c0a0_2000);
        assert_eq!(files[1].offset, 0x2000);
        assert_eq!(files[2].path, PathBuf::from("/usr/lib/x86_64-linux-gnu/libc.so.6"));
    }

    #[test]
    fn lists_own_threads()
    {
        let pid = ProcessId(std::process::id());
        let tids = thread_ids(pid).unwrap();
        assert!(tids.contains(&ThreadId(pid.0)));
    }
}
