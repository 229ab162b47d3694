//! Backing stores for memory segments.
//!
//! Each [`SegmentBacking`] variant is one read strategy. The reader picks the
//! strategy from the segment's tag; there is no trait object in the read path.

use std::fmt;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::types::ProcessId;

/// Where a segment's bytes come from.
#[derive(Clone)]
pub enum SegmentBacking
{
    /// A region of a file (core dump `PT_LOAD` contents, raw images)
    ///
    /// `offset` is the file offset of the segment's first byte.
    File
    {
        file: Arc<File>,
        path: PathBuf,
        offset: u64,
    },
    /// Live process memory through `/proc/<pid>/mem`. Offsets are virtual addresses.
    Process
    {
        pid: ProcessId,
        mem: Arc<File>,
    },
    /// Kernel virtual memory backed by physical memory in a crash dump
    ///
    /// `physical_address` is the physical address of the segment's first byte.
    KernelPhysical
    {
        physical_address: u64,
        memory: Arc<PhysicalMemory>,
    },
    /// Reads as zeroes (`.bss`-like tails of core dump segments).
    ZeroFill,
    /// An in-memory buffer; `offset` is the index of the segment's first byte.
    Buffer
    {
        data: Arc<[u8]>,
        offset: usize,
    },
}

impl SegmentBacking
{
    /// Back a segment with a file, starting at `offset`.
    pub fn file(path: impl AsRef<Path>, offset: u64) -> io::Result<Self>
    {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(SegmentBacking::File {
            file: Arc::new(file),
            path: path.to_path_buf(),
            offset,
        })
    }

    /// Back a segment with the live memory of `pid`.
    pub fn process(pid: ProcessId) -> io::Result<Self>
    {
        let mem = File::open(format!("/proc/{}/mem", pid.0))?;
        Ok(SegmentBacking::Process {
            pid,
            mem: Arc::new(mem),
        })
    }

    /// Back a segment with an owned buffer.
    pub fn buffer(data: impl Into<Arc<[u8]>>) -> Self
    {
        SegmentBacking::Buffer {
            data: data.into(),
            offset: 0,
        }
    }

    /// Short tag naming the backing kind.
    pub fn kind(&self) -> &'static str
    {
        match self {
            SegmentBacking::File { .. } => "file",
            SegmentBacking::Process { .. } => "process",
            SegmentBacking::KernelPhysical { .. } => "kernel-physical",
            SegmentBacking::ZeroFill => "zero-fill",
            SegmentBacking::Buffer { .. } => "buffer",
        }
    }

    /// Read `buf.len()` bytes located `delta` bytes into a segment that starts at `segment_start`.
    pub(crate) fn read_at(&self, segment_start: u64, delta: u64, buf: &mut [u8]) -> io::Result<()>
    {
        match self {
            SegmentBacking::File { file, offset, .. } => {
                let position = offset
                    .checked_add(delta)
                    .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "file offset overflow"))?;
                file.read_exact_at(buf, position)
            }
            SegmentBacking::Process { mem, .. } => mem.read_exact_at(buf, segment_start.wrapping_add(delta)),
            SegmentBacking::KernelPhysical {
                physical_address,
                memory,
            } => memory.read(physical_address.wrapping_add(delta), buf),
            SegmentBacking::ZeroFill => {
                buf.fill(0);
                Ok(())
            }
            SegmentBacking::Buffer { data, offset } => {
                let start = usize::try_from(delta)
                    .ok()
                    .and_then(|d| d.checked_add(*offset))
                    .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
                let bytes = start
                    .checked_add(buf.len())
                    .and_then(|end| data.get(start..end))
                    .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "buffer shorter than segment"))?;
                buf.copy_from_slice(bytes);
                Ok(())
            }
        }
    }
}

impl fmt::Debug for SegmentBacking
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            SegmentBacking::File { path, offset, .. } => f
                .debug_struct("File")
                .field("path", path)
                .field("offset", &format_args!("0x{offset:x}"))
                .finish(),
            SegmentBacking::Process { pid, .. } => f.debug_struct("Process").field("pid", pid).finish(),
            SegmentBacking::KernelPhysical { physical_address, .. } => f
                .debug_struct("KernelPhysical")
                .field("physical_address", &format_args!("0x{physical_address:x}"))
                .finish(),
            SegmentBacking::ZeroFill => f.write_str("ZeroFill"),
            SegmentBacking::Buffer { data, offset } => f
                .debug_struct("Buffer")
                .field("len", &data.len())
                .field("offset", offset)
                .finish(),
        }
    }
}

/// One contiguous run of physical memory stored in a dump file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalRange
{
    pub physical_start: u64,
    pub size: u64,
    pub file_offset: u64,
}

/// Physical address space of a kernel crash dump
///
/// Maps physical addresses to offsets in the dump file. Holes between ranges
/// read as I/O errors.
pub struct PhysicalMemory
{
    file: File,
    ranges: Vec<PhysicalRange>,
}

impl PhysicalMemory
{
    pub fn new(file: File, mut ranges: Vec<PhysicalRange>) -> Self
    {
        ranges.retain(|r| r.size > 0);
        ranges.sort_by_key(|r| r.physical_start);
        Self { file, ranges }
    }

    pub fn ranges(&self) -> &[PhysicalRange]
    {
        &self.ranges
    }

    fn range_containing(&self, physical: u64) -> Option<&PhysicalRange>
    {
        let index = self.ranges.partition_point(|r| r.physical_start <= physical);
        let range = self.ranges.get(index.checked_sub(1)?)?;
        (physical - range.physical_start < range.size).then_some(range)
    }

    pub fn read(&self, physical: u64, buf: &mut [u8]) -> io::Result<()>
    {
        let mut done = 0usize;
        while done < buf.len() {
            let address = physical.wrapping_add(done as u64);
            let range = self.range_containing(address).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("physical address 0x{address:x} is not present in the dump"),
                )
            })?;
            let within = address - range.physical_start;
            let available = usize::try_from(range.size - within).unwrap_or(usize::MAX);
            let chunk = available.min(buf.len() - done);
            self.file
                .read_exact_at(&mut buf[done..done + chunk], range.file_offset + within)?;
            done += chunk;
        }
        Ok(())
    }
}

impl fmt::Debug for PhysicalMemory
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("PhysicalMemory").field("ranges", &self.ranges.len()).finish()
    }
}
