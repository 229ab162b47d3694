//! Tests for opening ELF core dumps

use std::io::Write;

use fathom_core::config::ProgramOptions;
use fathom_core::error::ErrorKind;
use fathom_core::types::ThreadId;
use fathom_core::Program;
use tempfile::NamedTempFile;

const PT_LOAD: u32 = 1;
const PT_NOTE: u32 = 4;
const NT_PRSTATUS: u32 = 1;

const EHDR_SIZE: usize = 64;
const PHDR_SIZE: usize = 56;
const PRSTATUS_SIZE: usize = 112 + 27 * 8;

const LOAD_VADDR: u64 = 0x10000;
const LOAD_BYTES: &[u8] = b"core dump bytes!";
const LOAD_MEMSZ: u64 = 0x20;

const TID: u32 = 1234;
const RIP: u64 = 0x40_1234;
const RSP: u64 = 0x7ffe_0000;
const RBP: u64 = 0x7ffe_0040;

fn put_u16(buf: &mut [u8], at: usize, value: u16)
{
    buf[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(buf: &mut [u8], at: usize, value: u32)
{
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn put_u64(buf: &mut [u8], at: usize, value: u64)
{
    buf[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

fn prstatus() -> Vec<u8>
{
    let mut desc = vec![0u8; PRSTATUS_SIZE];
    put_u32(&mut desc, 32, TID);
    let reg = |slot: usize| 112 + slot * 8;
    put_u64(&mut desc, reg(4), RBP);
    put_u64(&mut desc, reg(16), RIP);
    put_u64(&mut desc, reg(19), RSP);
    desc
}

fn note(name: &[u8], kind: u32, desc: &[u8]) -> Vec<u8>
{
    let pad = |n: usize| (n + 3) & !3;
    let mut out = vec![0u8; 12];
    put_u32(&mut out, 0, name.len() as u32 + 1);
    put_u32(&mut out, 4, desc.len() as u32);
    put_u32(&mut out, 8, kind);
    let mut padded_name = name.to_vec();
    padded_name.resize(pad(name.len() + 1), 0);
    out.extend_from_slice(&padded_name);
    let mut padded_desc = desc.to_vec();
    padded_desc.resize(pad(desc.len()), 0);
    out.extend_from_slice(&padded_desc);
    out
}

/// A little-endian x86_64 ELF64 file with one `PT_NOTE` and one `PT_LOAD`.
fn elf_image(e_type: u16) -> Vec<u8>
{
    let notes = note(b"CORE", NT_PRSTATUS, &prstatus());
    let notes_offset = EHDR_SIZE + 2 * PHDR_SIZE;
    let load_offset = (notes_offset + notes.len() + 15) & !15;

    let mut image = vec![0u8; load_offset];
    image[..4].copy_from_slice(b"\x7fELF");
    image[4] = 2; // ELFCLASS64
    image[5] = 1; // ELFDATA2LSB
    image[6] = 1; // EV_CURRENT
    put_u16(&mut image, 16, e_type);
    put_u16(&mut image, 18, 62); // EM_X86_64
    put_u32(&mut image, 20, 1);
    put_u64(&mut image, 32, EHDR_SIZE as u64);
    put_u16(&mut image, 52, EHDR_SIZE as u16);
    put_u16(&mut image, 54, PHDR_SIZE as u16);
    put_u16(&mut image, 56, 2);

    let note_phdr = EHDR_SIZE;
    put_u32(&mut image, note_phdr, PT_NOTE);
    put_u64(&mut image, note_phdr + 8, notes_offset as u64);
    put_u64(&mut image, note_phdr + 32, notes.len() as u64);
    put_u64(&mut image, note_phdr + 40, notes.len() as u64);
    put_u64(&mut image, note_phdr + 48, 4);

    let load_phdr = EHDR_SIZE + PHDR_SIZE;
    put_u32(&mut image, load_phdr, PT_LOAD);
    put_u32(&mut image, load_phdr + 4, 6); // PF_R | PF_W
    put_u64(&mut image, load_phdr + 8, load_offset as u64);
    put_u64(&mut image, load_phdr + 16, LOAD_VADDR);
    put_u64(&mut image, load_phdr + 32, LOAD_BYTES.len() as u64);
    put_u64(&mut image, load_phdr + 40, LOAD_MEMSZ);
    put_u64(&mut image, load_phdr + 48, 0x1000);

    image[notes_offset..notes_offset + notes.len()].copy_from_slice(&notes);
    image.extend_from_slice(LOAD_BYTES);
    image
}

fn write_temp(bytes: &[u8]) -> NamedTempFile
{
    fathom_utils::logging::init_test_logging();
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_core_dump_platform()
{
    let core = write_temp(&elf_image(4));
    let program = Program::from_core_dump(core.path(), ProgramOptions::default()).unwrap();
    let platform = program.platform();
    assert_eq!(platform.architecture(), fathom_core::platform::Architecture::X86_64);
    assert!(platform.is_64_bit());
    assert_eq!(platform.word_size(), 8);
}

#[test]
fn test_core_dump_threads()
{
    let core = write_temp(&elf_image(4));
    let program = Program::from_core_dump(core.path(), ProgramOptions::default()).unwrap();
    assert_eq!(program.threads().len(), 1);

    let thread = program.thread(ThreadId(TID)).unwrap();
    assert_eq!(thread.registers.pc(), Some(RIP));
    assert_eq!(thread.registers.sp(), Some(RSP));
    assert_eq!(thread.registers.fp(), Some(RBP));
    assert!(program.thread(ThreadId(TID + 1)).unwrap_err().is_not_found());
}

#[test]
fn test_core_dump_memory()
{
    let core = write_temp(&elf_image(4));
    let program = Program::from_core_dump(core.path(), ProgramOptions::default()).unwrap();
    assert_eq!(program.read_memory(LOAD_VADDR, LOAD_BYTES.len()).unwrap(), LOAD_BYTES);
    assert_eq!(program.read_memory(LOAD_VADDR + 5, 4).unwrap(), b"dump");
}

#[test]
fn test_core_dump_zero_fills_past_file_size()
{
    let core = write_temp(&elf_image(4));
    let program = Program::from_core_dump(core.path(), ProgramOptions::default()).unwrap();
    let tail = LOAD_VADDR + LOAD_BYTES.len() as u64;
    assert_eq!(program.read_memory(tail, 16).unwrap(), vec![0u8; 16]);

    // a read that spans the file-backed part and the zero tail
    let spanning = program.read_memory(tail - 2, 4).unwrap();
    assert_eq!(spanning, [b's', b'!', 0, 0]);

    let err = program.read_memory(LOAD_VADDR + LOAD_MEMSZ, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_executable_is_not_a_core_dump()
{
    let executable = write_temp(&elf_image(2));
    let err = Program::from_core_dump(executable.path(), ProgramOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_garbage_is_rejected()
{
    let garbage = write_temp(b"this is not an object file at all");
    assert!(Program::from_core_dump(garbage.path(), ProgramOptions::default()).is_err());
}

#[test]
fn test_missing_core_is_io_error()
{
    let dir = tempfile::tempdir().unwrap();
    let err = Program::from_core_dump(dir.path().join("core.missing"), ProgramOptions::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_kernel_dump_requires_vmlinux()
{
    let core = write_temp(&elf_image(4));
    let dir = tempfile::tempdir().unwrap();
    let result = Program::from_kernel_dump(dir.path().join("vmlinux"), core.path(), ProgramOptions::default());
    assert!(result.is_err());
}
