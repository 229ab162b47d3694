//! Kernel crash dumps (`/proc/vmcore` style ELF).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::ElfImage;
use crate::config::ProgramOptions;
use crate::debuginfo::dwarf;
use crate::error::{FathomError, FathomResult};
use crate::memory::{MemorySegment, PhysicalMemory, PhysicalRange, SegmentBacking};
use crate::program::Program;

/// `n_type` of the `VMCOREINFO` note.
const NT_VMCOREINFO: u32 = 0;

/// Parse the `KEY=VALUE` lines of a `VMCOREINFO` note
///
/// Lines without `=` are ignored; a repeated key keeps its last value.
///
/// ```rust
/// use fathom_core::target::parse_vmcoreinfo;
///
/// let info = parse_vmcoreinfo("OSRELEASE=6.1.0\nPAGESIZE=4096\nKERNELOFFSET=1a000000\n");
/// assert_eq!(info["PAGESIZE"], "4096");
/// assert_eq!(info["KERNELOFFSET"], "1a000000");
/// ```
pub fn parse_vmcoreinfo(text: &str) -> HashMap<String, String>
{
    text.lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// `KERNELOFFSET` is hex without a prefix.
fn kernel_offset(info: &HashMap<String, String>) -> FathomResult<u64>
{
    match info.get("KERNELOFFSET") {
        None => Ok(0),
        Some(value) => u64::from_str_radix(value.trim_start_matches("0x"), 16).map_err(|_| {
            FathomError::CorruptDebugInfo(format!("VMCOREINFO KERNELOFFSET {value:?} is not hex"))
        }),
    }
}

impl Program
{
    /// Open a kernel crash dump with the matching `vmlinux`
    ///
    /// The physical memory map comes from the physical addresses of the
    /// dump's `PT_LOAD` headers; every header with a virtual address also
    /// becomes a kernel virtual segment read through that map.
    /// `KERNELOFFSET` from `VMCOREINFO` is the load bias of `vmlinux`.
    /// Per-CPU `NT_PRSTATUS` notes become threads named `cpuN`.
    ///
    /// ## Errors
    ///
    /// [`FathomError::Configuration`] if `vmcore` is not an ELF core or its
    /// architecture differs from `vmlinux`; decode errors for either file.
    pub fn from_kernel_dump(
        vmlinux: impl AsRef<Path>,
        vmcore: impl AsRef<Path>,
        options: ProgramOptions,
    ) -> FathomResult<Self>
    {
        let (vmlinux, vmcore) = (vmlinux.as_ref(), vmcore.as_ref());
        let (file, image) = ElfImage::open(vmcore)?;
        if !image.is_core() {
            return Err(FathomError::Configuration(format!("{} is not a kernel core dump", vmcore.display())));
        }

        let info = image
            .notes_of(b"VMCOREINFO", NT_VMCOREINFO)
            .next()
            .map(|note| parse_vmcoreinfo(&String::from_utf8_lossy(&note.desc)))
            .unwrap_or_default();
        if info.is_empty() {
            warn!(vmcore = %vmcore.display(), "no VMCOREINFO note; assuming no KASLR offset");
        }
        let bias = kernel_offset(&info)?;

        let ranges = image
            .loads
            .iter()
            .map(|load| PhysicalRange {
                physical_start: load.paddr,
                size: load.filesz,
                file_offset: load.offset,
            })
            .collect();
        let physical = Arc::new(PhysicalMemory::new(file, ranges));

        let mut program = Program::with_options(image.platform, options);
        for load in image.loads.iter().filter(|l| l.vaddr != 0 && l.filesz > 0) {
            let segment = MemorySegment::new(
                load.vaddr..load.vaddr.saturating_add(load.filesz),
                SegmentBacking::KernelPhysical {
                    physical_address: load.paddr,
                    memory: Arc::clone(&physical),
                },
            );
            if let Err(err) = program.add_segment(segment) {
                warn!(vaddr = format_args!("0x{:x}", load.vaddr), error = %err, "skipping kernel segment");
            }
        }

        for (cpu, mut thread) in image.threads().into_iter().enumerate() {
            thread.name = Some(format!("cpu{cpu}"));
            program.add_thread(thread);
        }

        let records = dwarf::load_module_records(vmlinux, program.options().debug_info_paths())?;
        program.add_module(records, bias)?;

        if let Some(release) = info.get("OSRELEASE") {
            debug!(release = %release, "kernel release");
        }
        info!(
            vmcore = %vmcore.display(),
            architecture = %image.platform.architecture(),
            kaslr_offset = format_args!("0x{bias:x}"),
            cpus = program.threads().len(),
            "opened kernel dump"
        );
        Ok(program)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn vmcoreinfo_ignores_noise()
    {
        let info = parse_vmcoreinfo("garbage\nSYMBOL(init_task)=ffffffff82a0c940\n=x\nPAGESIZE=4096\nPAGESIZE=16384\n");
        assert_eq!(info.len(), 2);
        assert_eq!(info["SYMBOL(init_task)"], "ffffffff82a0c940");
        assert_eq!(info["PAGESIZE"], "16384");
    }

    #[test]
    fn kernel_offset_is_hex()
    {
        assert_eq!(kernel_offset(&parse_vmcoreinfo("KERNELOFFSET=1e600000")).unwrap(), 0x1e60_0000);
        assert_eq!(kernel_offset(&HashMap::new()).unwrap(), 0);
        assert!(kernel_offset(&parse_vmcoreinfo("KERNELOFFSET=zz")).is_err());
    }
}
