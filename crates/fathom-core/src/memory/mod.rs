//! # Memory Reader
//!
//! One virtual address space assembled from non-overlapping segments.
//!
//! Every memory access in the engine funnels through [`MemoryReader::read`].
//! It never caches: live-process memory can change between two calls.
//!
//! ## Read semantics
//!
//! - A read may span any number of adjacent segments and any alignment.
//! - If any byte of the request is unmapped the read fails with
//!   [`FathomError::NoBackingSegment`] and no bytes are returned.
//! - If a backing store fails (process exited, truncated core) the read fails
//!   with [`FathomError::MemoryRead`] carrying the underlying I/O error.
//!
//! ## Example
//!
//! ```rust
//! use fathom_core::memory::{MemoryReader, MemorySegment, SegmentBacking};
//! use fathom_core::platform::{Architecture, Platform};
//!
//! let platform = Platform::new(Architecture::X86_64, None)?;
//! let mut reader = MemoryReader::new(platform);
//! reader.add_segment(MemorySegment::new(0x1000..0x2000, SegmentBacking::buffer(vec![7u8; 0x1000])))?;
//!
//! assert_eq!(reader.read(0x1000, 4)?, vec![7, 7, 7, 7]);
//! assert!(reader.read(0x1ff8, 16).is_err());
//! # Ok::<(), fathom_core::FathomError>(())
//! ```

mod backing;

use std::collections::BTreeMap;
use std::ops::Range;

pub use backing::{PhysicalMemory, PhysicalRange, SegmentBacking};
use tracing::debug;

use crate::error::{FathomError, FathomResult};
use crate::platform::{ByteOrder, Platform};

/// A virtual address range plus the store that backs it.
#[derive(Debug, Clone)]
pub struct MemorySegment
{
    start: u64,
    /// Exclusive end; `None` extends to the top of the address space.
    end: Option<u64>,
    backing: SegmentBacking,
}

impl MemorySegment
{
    /// Segment covering the half-open range `range`.
    pub fn new(range: Range<u64>, backing: SegmentBacking) -> Self
    {
        Self {
            start: range.start,
            end: Some(range.end),
            backing,
        }
    }

    /// Segment from `start` to the top of the address space.
    pub fn unbounded(start: u64, backing: SegmentBacking) -> Self
    {
        Self {
            start,
            end: None,
            backing,
        }
    }

    pub fn start(&self) -> u64
    {
        self.start
    }

    /// Exclusive end, or `None` for an unbounded segment.
    pub fn end(&self) -> Option<u64>
    {
        self.end
    }

    pub fn backing(&self) -> &SegmentBacking
    {
        &self.backing
    }

    fn last(&self, max_address: u64) -> u64
    {
        match self.end {
            Some(end) => end.wrapping_sub(1).min(max_address),
            None => max_address,
        }
    }
}

/// Synchronous, word-size aware memory access
///
/// Implemented by [`MemoryReader`]; the unwinder and object model only
/// depend on this trait so they can be driven by synthetic memory in tests.
pub trait MemoryAccess
{
    /// Fill `buf` from `address` or fail without partial results.
    fn read_exact(&self, address: u64, buf: &mut [u8]) -> FathomResult<()>;

    fn byte_order(&self) -> ByteOrder;

    /// Pointer width in bytes.
    fn word_size(&self) -> usize;

    fn read_word(&self, address: u64) -> FathomResult<u64>
    {
        let mut bytes = [0u8; 8];
        let size = self.word_size().min(8);
        self.read_exact(address, &mut bytes[..size])?;
        Ok(self.byte_order().read_uint(&bytes[..size]))
    }
}

/// Planned piece of a read: which segment, where in it, how long.
struct Chunk
{
    segment_start: u64,
    address: u64,
    length: usize,
}

/// Layered virtual-address-space reader.
#[derive(Debug, Clone)]
pub struct MemoryReader
{
    platform: Platform,
    max_address: u64,
    segments: BTreeMap<u64, MemorySegment>,
}

impl MemoryReader
{
    pub fn new(platform: Platform) -> Self
    {
        let max_address = if platform.is_64_bit() { u64::MAX } else { u64::from(u32::MAX) };
        Self {
            platform,
            max_address,
            segments: BTreeMap::new(),
        }
    }

    pub fn platform(&self) -> &Platform
    {
        &self.platform
    }

    /// Insert a segment
    ///
    /// ## Errors
    ///
    /// [`FathomError::Configuration`] if the range is empty or inverted, lies
    /// outside the platform's address space, or overlaps an existing segment.
    pub fn add_segment(&mut self, segment: MemorySegment) -> FathomResult<()>
    {
        if let Some(end) = segment.end {
            if end <= segment.start {
                return Err(FathomError::Configuration(format!(
                    "empty or inverted segment 0x{:x}..0x{end:x}",
                    segment.start
                )));
            }
        }
        if segment.start > self.max_address {
            return Err(FathomError::Configuration(format!(
                "segment start 0x{:x} is outside the address space",
                segment.start
            )));
        }

        let last = segment.last(self.max_address);
        if let Some((_, existing)) = self.segments.range(..=last).next_back() {
            if existing.last(self.max_address) >= segment.start {
                return Err(FathomError::Configuration(format!(
                    "segment 0x{:x}..=0x{last:x} overlaps existing segment 0x{:x}..=0x{:x}",
                    segment.start,
                    existing.start,
                    existing.last(self.max_address)
                )));
            }
        }

        debug!(
            start = format_args!("0x{:x}", segment.start),
            last = format_args!("0x{last:x}"),
            backing = segment.backing.kind(),
            "added memory segment"
        );
        self.segments.insert(segment.start, segment);
        Ok(())
    }

    /// Segments in address order.
    pub fn segments(&self) -> impl Iterator<Item = &MemorySegment>
    {
        self.segments.values()
    }

    pub fn segment_containing(&self, address: u64) -> Option<&MemorySegment>
    {
        let (_, segment) = self.segments.range(..=address).next_back()?;
        (address <= segment.last(self.max_address)).then_some(segment)
    }

    /// Returns `true` if `address` is mapped.
    pub fn contains(&self, address: u64) -> bool
    {
        self.segment_containing(address).is_some()
    }

    /// Read `length` bytes starting at `address`.
    pub fn read(&self, address: u64, length: usize) -> FathomResult<Vec<u8>>
    {
        let mut buf = vec![0u8; length];
        self.read_into(address, &mut buf)?;
        Ok(buf)
    }

    /// Fill `buf` from `address`
    ///
    /// Coverage of the whole request is checked before any backing store is
    /// touched, so an unmapped byte is always reported as
    /// [`FathomError::NoBackingSegment`].
    pub fn read_into(&self, address: u64, buf: &mut [u8]) -> FathomResult<()>
    {
        let chunks = self.plan(address, buf.len())?;
        let mut done = 0usize;
        for chunk in chunks {
            let target = &mut buf[done..done + chunk.length];
            let segment = self
                .segments
                .get(&chunk.segment_start)
                .ok_or(FathomError::NoBackingSegment { address: chunk.address })?;
            segment
                .backing
                .read_at(segment.start, chunk.address - segment.start, target)
                .map_err(|source| FathomError::MemoryRead {
                    address: chunk.address,
                    length: chunk.length as u64,
                    source,
                })?;
            done += chunk.length;
        }
        Ok(())
    }

    fn plan(&self, address: u64, length: usize) -> FathomResult<Vec<Chunk>>
    {
        let mut chunks = Vec::new();
        let mut cursor = address;
        let mut remaining = length as u64;
        while remaining > 0 {
            let segment = self
                .segment_containing(cursor)
                .ok_or(FathomError::NoBackingSegment { address: cursor })?;
            let last = segment.last(self.max_address);
            // `last - cursor + 1` can be 2^64 for a full-width segment.
            let available = (last - cursor).saturating_add(1);
            let take = available.min(remaining);
            chunks.push(Chunk {
                segment_start: segment.start,
                address: cursor,
                length: take as usize,
            });
            remaining -= take;
            if remaining > 0 {
                cursor = match last.checked_add(1) {
                    Some(next) if next <= self.max_address => next,
                    _ => {
                        return Err(FathomError::NoBackingSegment {
                            address: last.wrapping_add(1) & self.max_address,
                        });
                    }
                };
            }
        }
        Ok(chunks)
    }

    pub fn read_u8(&self, address: u64) -> FathomResult<u8>
    {
        let mut byte = [0u8; 1];
        self.read_into(address, &mut byte)?;
        Ok(byte[0])
    }

    pub fn read_u16(&self, address: u64) -> FathomResult<u16>
    {
        self.read_uint(address, 2).map(|v| v as u16)
    }

    pub fn read_u32(&self, address: u64) -> FathomResult<u32>
    {
        self.read_uint(address, 4).map(|v| v as u32)
    }

    pub fn read_u64(&self, address: u64) -> FathomResult<u64>
    {
        self.read_uint(address, 8)
    }

    fn read_uint(&self, address: u64, size: usize) -> FathomResult<u64>
    {
        let mut bytes = [0u8; 8];
        self.read_into(address, &mut bytes[..size])?;
        Ok(self.platform.byte_order().read_uint(&bytes[..size]))
    }
}

impl MemoryAccess for MemoryReader
{
    fn read_exact(&self, address: u64, buf: &mut [u8]) -> FathomResult<()>
    {
        self.read_into(address, buf)
    }

    fn byte_order(&self) -> ByteOrder
    {
        self.platform.byte_order()
    }

    fn word_size(&self) -> usize
    {
        self.platform.word_size()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::platform::{Architecture, PlatformFlags};

    fn reader() -> MemoryReader
    {
        MemoryReader::new(Platform::new(Architecture::X86_64, None).unwrap())
    }

    #[test]
    fn unbounded_segment_reaches_top_of_address_space()
    {
        let mut reader = reader();
        reader
            .add_segment(MemorySegment::unbounded(0xffff_ffff_ffff_0000, SegmentBacking::ZeroFill))
            .unwrap();
        assert_eq!(reader.read(u64::MAX - 3, 4).unwrap(), vec![0; 4]);
        assert!(matches!(
            reader.read(u64::MAX - 3, 8),
            Err(FathomError::NoBackingSegment { .. })
        ));
    }

    #[test]
    fn thirty_two_bit_platform_clamps_unbounded_segments()
    {
        let platform = Platform::new(Architecture::I386, Some(PlatformFlags::IS_LITTLE_ENDIAN)).unwrap();
        let mut reader = MemoryReader::new(platform);
        reader.add_segment(MemorySegment::unbounded(0, SegmentBacking::ZeroFill)).unwrap();
        assert!(reader.contains(0xffff_ffff));
        assert!(!reader.contains(0x1_0000_0000));
        assert!(reader
            .add_segment(MemorySegment::new(0x1_0000_0000..0x1_0000_1000, SegmentBacking::ZeroFill))
            .is_err());
    }

    #[test]
    fn short_buffer_is_an_io_failure_not_a_gap()
    {
        let mut reader = reader();
        reader
            .add_segment(MemorySegment::new(0x1000..0x2000, SegmentBacking::buffer(vec![1u8; 16])))
            .unwrap();
        let err = reader.read(0x1000, 32).unwrap_err();
        assert!(matches!(err, FathomError::MemoryRead { address: 0x1000, .. }));
    }
}
