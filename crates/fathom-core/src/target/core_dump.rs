//! Userspace ELF core dumps.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{load_mapped_modules, parse_nt_file, ElfImage, MappedFile, NT_FILE};
use crate::config::ProgramOptions;
use crate::error::{FathomError, FathomResult};
use crate::memory::{MemorySegment, SegmentBacking};
use crate::program::Program;

impl Program
{
    /// Open an ELF core dump
    ///
    /// - `PT_LOAD` contents become file-backed segments; the part of a
    ///   segment past its file size reads as zeroes.
    /// - Segments the kernel did not dump are backed by the mapped file
    ///   named in `NT_FILE`, when it can be opened.
    /// - `NT_PRSTATUS` notes become threads.
    /// - Every file in `NT_FILE` is loaded as a module; files that cannot be
    ///   decoded are logged and skipped.
    ///
    /// ## Errors
    ///
    /// [`FathomError::Configuration`] if the file is not an ELF core, I/O and
    /// decode errors for the dump itself.
    pub fn from_core_dump(path: impl AsRef<Path>, options: ProgramOptions) -> FathomResult<Self>
    {
        let path = path.as_ref();
        let (file, image) = ElfImage::open(path)?;
        if !image.is_core() {
            return Err(FathomError::Configuration(format!("{} is not a core dump", path.display())));
        }

        let platform = image.platform;
        let mut program = Program::with_options(platform, options);
        let (page_size, mapped) = match image.notes_of(b"CORE", NT_FILE).next() {
            Some(note) => parse_nt_file(&note.desc, platform.word_size(), platform.byte_order())?,
            None => (0x1000, Vec::new()),
        };

        let file = Arc::new(file);
        for load in &image.loads {
            let segments = if load.filesz > 0 {
                let mut segments = vec![MemorySegment::new(
                    load.vaddr..load.vaddr.saturating_add(load.filesz),
                    SegmentBacking::File {
                        file: Arc::clone(&file),
                        path: path.to_path_buf(),
                        offset: load.offset,
                    },
                )];
                if load.memsz > load.filesz {
                    segments.push(MemorySegment::new(
                        load.vaddr.saturating_add(load.filesz)..load.vaddr.saturating_add(load.memsz),
                        SegmentBacking::ZeroFill,
                    ));
                }
                segments
            } else {
                mapped_file_segment(load.vaddr, load.memsz, &mapped).into_iter().collect()
            };
            for segment in segments {
                if let Err(err) = program.add_segment(segment) {
                    warn!(vaddr = format_args!("0x{:x}", load.vaddr), error = %err, "skipping core segment");
                }
            }
        }

        for thread in image.threads() {
            program.add_thread(thread);
        }

        load_mapped_modules(&mut program, &mapped, page_size);

        info!(
            core = %path.display(),
            architecture = %platform.architecture(),
            threads = program.threads().len(),
            modules = program.index().modules().count(),
            "opened core dump"
        );
        Ok(program)
    }
}

/// Back an undumped segment by the file mapped at the same address.
fn mapped_file_segment(vaddr: u64, memsz: u64, mapped: &[MappedFile]) -> Option<MemorySegment>
{
    if memsz == 0 {
        return None;
    }
    let entry = mapped.iter().find(|m| m.start == vaddr)?;
    let end = entry.end.min(vaddr.saturating_add(memsz));
    match SegmentBacking::file(&entry.path, entry.offset) {
        Ok(backing) => Some(MemorySegment::new(vaddr..end, backing)),
        Err(err) => {
            debug!(file = %entry.path.display(), error = %err, "mapped file unavailable");
            None
        }
    }
}
