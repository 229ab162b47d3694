//! # Targets
//!
//! Constructors that assemble a [`Program`](crate::Program) from something
//! real:
//!
//! - [`Program::from_core_dump`](crate::Program::from_core_dump): a userspace ELF core file
//! - [`Program::from_kernel_dump`](crate::Program::from_kernel_dump): an ELF `vmcore` plus `vmlinux`
//! - `Program::from_pid` (Linux): a live process, see [`crate::platform::linux`]
//!
//! Dump files are read through [`object::ReadCache`], so only the ELF
//! headers and notes are pulled into memory; segment contents stay in the
//! file and are read on demand by the memory reader.

mod core_dump;
mod kernel;

use std::fs::File;
use std::path::{Path, PathBuf};

use object::elf;
use object::read::elf::{FileHeader, ProgramHeader};
use object::{Endian, Endianness, FileKind, ReadCache};
use tracing::{debug, warn};

use crate::debuginfo::dwarf;
use crate::error::{map_object_error, FathomError, FathomResult};
use crate::platform::{Architecture, ByteOrder, Platform, PlatformFlags};
use crate::program::Program;
use crate::types::{Address, RegisterSnapshot, Thread, ThreadId};

pub use kernel::parse_vmcoreinfo;

/// `n_type` of the `NT_FILE` note.
const NT_FILE: u32 = 0x4649_4c45;

/// A `PT_LOAD` program header.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoadSegment
{
    pub vaddr: u64,
    pub paddr: u64,
    pub offset: u64,
    pub filesz: u64,
    pub memsz: u64,
}

/// An owned ELF note.
#[derive(Debug, Clone)]
pub(crate) struct ElfNote
{
    pub name: Vec<u8>,
    pub kind: u32,
    pub desc: Vec<u8>,
}

/// Program headers and notes of an ELF dump.
#[derive(Debug)]
pub(crate) struct ElfImage
{
    pub platform: Platform,
    pub file_type: u16,
    pub loads: Vec<LoadSegment>,
    pub notes: Vec<ElfNote>,
}

impl ElfImage
{
    /// Open an ELF dump, returning its file handle for segment backing.
    pub fn open(path: &Path) -> FathomResult<(File, Self)>
    {
        let cache = ReadCache::new(File::open(path)?);
        let context = format!("parsing {}", path.display());
        let image = match FileKind::parse(&cache).map_err(|err| map_object_error(&context, err))? {
            FileKind::Elf64 => Self::parse::<elf::FileHeader64<Endianness>>(&cache, &context)?,
            FileKind::Elf32 => Self::parse::<elf::FileHeader32<Endianness>>(&cache, &context)?,
            other => {
                return Err(FathomError::Configuration(format!(
                    "{} is a {other:?} file, not ELF",
                    path.display()
                )));
            }
        };
        Ok((cache.into_inner(), image))
    }

    fn parse<Elf>(data: &ReadCache<File>, context: &str) -> FathomResult<Self>
    where
        Elf: FileHeader<Endian = Endianness>,
    {
        let header = Elf::parse(data).map_err(|err| map_object_error(context, err))?;
        let endian = header.endian().map_err(|err| map_object_error(context, err))?;

        let mut flags = PlatformFlags::empty();
        if header.is_type_64() {
            flags |= PlatformFlags::IS_64_BIT;
        }
        if endian.is_little_endian() {
            flags |= PlatformFlags::IS_LITTLE_ENDIAN;
        }
        let platform = Platform::new(Architecture::from_elf_machine(header.e_machine(endian)), Some(flags))?;

        let mut loads = Vec::new();
        let mut notes = Vec::new();
        for phdr in header
            .program_headers(endian, data)
            .map_err(|err| map_object_error(context, err))?
        {
            match phdr.p_type(endian) {
                elf::PT_LOAD => loads.push(LoadSegment {
                    vaddr: phdr.p_vaddr(endian).into(),
                    paddr: phdr.p_paddr(endian).into(),
                    offset: phdr.p_offset(endian).into(),
                    filesz: phdr.p_filesz(endian).into(),
                    memsz: phdr.p_memsz(endian).into(),
                }),
                elf::PT_NOTE => {
                    let Some(mut iter) = phdr.notes(endian, data).map_err(|err| map_object_error(context, err))?
                    else {
                        continue;
                    };
                    while let Some(note) = iter.next().map_err(|err| map_object_error(context, err))? {
                        notes.push(ElfNote {
                            name: note.name().to_vec(),
                            kind: note.n_type(endian),
                            desc: note.desc().to_vec(),
                        });
                    }
                }
                _ => {}
            }
        }

        Ok(Self {
            platform,
            file_type: header.e_type(endian),
            loads,
            notes,
        })
    }

    pub fn is_core(&self) -> bool
    {
        self.file_type == elf::ET_CORE
    }

    pub fn notes_of(&self, name: &'static [u8], kind: u32) -> impl Iterator<Item = &ElfNote>
    {
        self.notes.iter().filter(move |n| n.name == name && n.kind == kind)
    }

    /// Threads from the `NT_PRSTATUS` notes. Undecodable notes are skipped.
    pub fn threads(&self) -> Vec<Thread>
    {
        let architecture = self.platform.architecture();
        self.notes_of(b"CORE", elf::NT_PRSTATUS)
            .enumerate()
            .filter_map(|(index, note)| {
                match RegisterSnapshot::from_prstatus(
                    architecture,
                    self.platform.is_64_bit(),
                    self.platform.byte_order(),
                    &note.desc,
                ) {
                    Ok((tid, registers)) => Some(Thread {
                        id: ThreadId(tid),
                        name: None,
                        registers: registers.into(),
                    }),
                    Err(err) => {
                        warn!(note = index, error = %err, "skipping NT_PRSTATUS note");
                        None
                    }
                }
            })
            .collect()
    }
}

/// A file mapping: `[start, end)` maps `path` starting at byte `offset`
///
/// Decoded from `NT_FILE` notes of core dumps and from `/proc/<pid>/maps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedFile
{
    pub start: u64,
    pub end: u64,
    pub offset: u64,
    pub path: PathBuf,
}

/// Decode an `NT_FILE` note
///
/// The descriptor holds `count` and `page_size` words, `count` triples of
/// `start, end, file offset in pages`, then `count` NUL-terminated paths.
pub(crate) fn parse_nt_file(desc: &[u8], word: usize, order: ByteOrder) -> FathomResult<(u64, Vec<MappedFile>)>
{
    let corrupt = || FathomError::CorruptDebugInfo(format!("NT_FILE note of {} bytes is truncated", desc.len()));
    let read = |index: usize| -> FathomResult<u64> {
        let start = index.checked_mul(word).ok_or_else(corrupt)?;
        desc.get(start..start + word).map(|b| order.read_uint(b)).ok_or_else(corrupt)
    };

    let count = usize::try_from(read(0)?).map_err(|_| corrupt())?;
    let page_size = read(1)?;
    let names_start = count
        .checked_mul(3)
        .and_then(|n| n.checked_add(2))
        .and_then(|n| n.checked_mul(word))
        .ok_or_else(corrupt)?;
    let mut names = desc.get(names_start..).ok_or_else(corrupt)?.split(|b| *b == 0);

    let mut files = Vec::with_capacity(count.min(4096));
    for i in 0..count {
        let base = 2 + i * 3;
        let name = names.next().ok_or_else(corrupt)?;
        files.push(MappedFile {
            start: read(base)?,
            end: read(base + 1)?,
            offset: read(base + 2)?.wrapping_mul(page_size),
            path: PathBuf::from(String::from_utf8_lossy(name).into_owned()),
        });
    }
    Ok((page_size, files))
}

/// Each mapped path once, in mapping order, with the address its offset 0 is mapped at.
pub(crate) fn module_bases(mapped: &[MappedFile]) -> Vec<(PathBuf, u64)>
{
    let mut modules: Vec<(PathBuf, u64)> = Vec::new();
    for entry in mapped {
        let base = entry.start.wrapping_sub(entry.offset);
        match modules.iter_mut().find(|(path, _)| *path == entry.path) {
            Some((_, existing)) => *existing = (*existing).min(base),
            None => modules.push((entry.path.clone(), base)),
        }
    }
    modules
}

/// Load every mapped file as a module. Files that do not decode are skipped.
pub(crate) fn load_mapped_modules(program: &mut Program, mapped: &[MappedFile], page_size: u64)
{
    let debug_info_paths = program.options().debug_info_paths().to_vec();
    for (path, base) in module_bases(mapped) {
        let records = match dwarf::load_module_records(&path, &debug_info_paths) {
            Ok(records) => records,
            Err(err) => {
                debug!(module = %path.display(), error = %err, "skipping mapped file");
                continue;
            }
        };
        let first = records.address_range.as_ref().map_or(0, |r| r.start);
        let bias = base.wrapping_sub(Address::new(first).align_down(page_size).value());
        if let Err(err) = program.add_module(records, bias) {
            warn!(module = %path.display(), error = %err, "skipping module");
        }
    }
}
