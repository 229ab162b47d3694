//! Static per-architecture tables.
//!
//! Register numbers are DWARF register numbers where the psABI defines one.
//! Registers the ABI leaves unnumbered (the program counter on ppc64 and
//! riscv64, status words) get numbers from [`PSEUDO_BASE`] upward so they can
//! never collide with a CFI column.
//!
//! ## References
//!
//! - [System V AMD64 psABI, DWARF register mapping](https://gitlab.com/x86-psABIs/x86-64-ABI)
//! - [DWARF for the Arm 64-bit Architecture](https://github.com/ARM-software/abi-aa/blob/main/aadwarf64/aadwarf64.rst)
//! - [RISC-V ELF psABI, DWARF register numbers](https://github.com/riscv-non-isa/riscv-elf-psabi-doc)

use super::{Architecture, PlatformFlags, Register};

/// First register number used for registers without a DWARF number.
pub const PSEUDO_BASE: u16 = 0x8000;

/// Everything the engine needs to know about one architecture.
pub(crate) struct ArchInfo
{
    pub name: &'static str,
    pub default_flags: PlatformFlags,
    pub registers: &'static [Register],
    /// Extra spellings accepted by name lookup (`lr`, `fp`, `x1`...).
    pub aliases: &'static [(&'static str, u16)],
    pub pc: u16,
    pub sp: u16,
    pub fp: Option<u16>,
    /// CFI column holding the caller's program counter.
    pub return_address: u16,
    pub callee_saved: &'static [u16],
    /// `NT_PRSTATUS` register block layout: one entry per machine word.
    pub prstatus_layout: &'static [Option<u16>],
}

const fn reg(name: &'static str, size: u8, number: u16) -> Register
{
    Register { name, size, number }
}

const LE64: PlatformFlags = PlatformFlags::IS_64_BIT.union(PlatformFlags::IS_LITTLE_ENDIAN);
const LE32: PlatformFlags = PlatformFlags::IS_LITTLE_ENDIAN;

static X86_64_REGISTERS: [Register; 26] = [
    reg("rax", 8, 0),
    reg("rdx", 8, 1),
    reg("rcx", 8, 2),
    reg("rbx", 8, 3),
    reg("rsi", 8, 4),
    reg("rdi", 8, 5),
    reg("rbp", 8, 6),
    reg("rsp", 8, 7),
    reg("r8", 8, 8),
    reg("r9", 8, 9),
    reg("r10", 8, 10),
    reg("r11", 8, 11),
    reg("r12", 8, 12),
    reg("r13", 8, 13),
    reg("r14", 8, 14),
    reg("r15", 8, 15),
    reg("rip", 8, 16),
    reg("rflags", 8, 49),
    reg("es", 2, 50),
    reg("cs", 2, 51),
    reg("ss", 2, 52),
    reg("ds", 2, 53),
    reg("fs", 2, 54),
    reg("gs", 2, 55),
    reg("fs_base", 8, 58),
    reg("gs_base", 8, 59),
];

// struct user_regs_struct
static X86_64_PRSTATUS: [Option<u16>; 27] = [
    Some(15),
    Some(14),
    Some(13),
    Some(12),
    Some(6),
    Some(3),
    Some(11),
    Some(10),
    Some(9),
    Some(8),
    Some(0),
    Some(2),
    Some(1),
    Some(4),
    Some(5),
    None, // orig_rax
    Some(16),
    Some(51),
    Some(49),
    Some(7),
    Some(52),
    Some(58),
    Some(59),
    Some(53),
    Some(50),
    Some(54),
    Some(55),
];

static I386_REGISTERS: [Register; 16] = [
    reg("eax", 4, 0),
    reg("ecx", 4, 1),
    reg("edx", 4, 2),
    reg("ebx", 4, 3),
    reg("esp", 4, 4),
    reg("ebp", 4, 5),
    reg("esi", 4, 6),
    reg("edi", 4, 7),
    reg("eip", 4, 8),
    reg("eflags", 4, 9),
    reg("es", 2, 40),
    reg("cs", 2, 41),
    reg("ss", 2, 42),
    reg("ds", 2, 43),
    reg("fs", 2, 44),
    reg("gs", 2, 45),
];

static I386_PRSTATUS: [Option<u16>; 17] = [
    Some(3),
    Some(1),
    Some(2),
    Some(6),
    Some(7),
    Some(5),
    Some(0),
    Some(43),
    Some(40),
    Some(44),
    Some(45),
    None, // orig_eax
    Some(8),
    Some(41),
    Some(9),
    Some(4),
    Some(42),
];

static AARCH64_REGISTERS: [Register; 34] = [
    reg("x0", 8, 0),
    reg("x1", 8, 1),
    reg("x2", 8, 2),
    reg("x3", 8, 3),
    reg("x4", 8, 4),
    reg("x5", 8, 5),
    reg("x6", 8, 6),
    reg("x7", 8, 7),
    reg("x8", 8, 8),
    reg("x9", 8, 9),
    reg("x10", 8, 10),
    reg("x11", 8, 11),
    reg("x12", 8, 12),
    reg("x13", 8, 13),
    reg("x14", 8, 14),
    reg("x15", 8, 15),
    reg("x16", 8, 16),
    reg("x17", 8, 17),
    reg("x18", 8, 18),
    reg("x19", 8, 19),
    reg("x20", 8, 20),
    reg("x21", 8, 21),
    reg("x22", 8, 22),
    reg("x23", 8, 23),
    reg("x24", 8, 24),
    reg("x25", 8, 25),
    reg("x26", 8, 26),
    reg("x27", 8, 27),
    reg("x28", 8, 28),
    reg("x29", 8, 29),
    reg("x30", 8, 30),
    reg("sp", 8, 31),
    reg("pc", 8, 32),
    reg("pstate", 8, PSEUDO_BASE),
];

static AARCH64_PRSTATUS: [Option<u16>; 34] = [
    Some(0),
    Some(1),
    Some(2),
    Some(3),
    Some(4),
    Some(5),
    Some(6),
    Some(7),
    Some(8),
    Some(9),
    Some(10),
    Some(11),
    Some(12),
    Some(13),
    Some(14),
    Some(15),
    Some(16),
    Some(17),
    Some(18),
    Some(19),
    Some(20),
    Some(21),
    Some(22),
    Some(23),
    Some(24),
    Some(25),
    Some(26),
    Some(27),
    Some(28),
    Some(29),
    Some(30),
    Some(31),
    Some(32),
    Some(PSEUDO_BASE),
];

static ARM_REGISTERS: [Register; 17] = [
    reg("r0", 4, 0),
    reg("r1", 4, 1),
    reg("r2", 4, 2),
    reg("r3", 4, 3),
    reg("r4", 4, 4),
    reg("r5", 4, 5),
    reg("r6", 4, 6),
    reg("r7", 4, 7),
    reg("r8", 4, 8),
    reg("r9", 4, 9),
    reg("r10", 4, 10),
    reg("r11", 4, 11),
    reg("r12", 4, 12),
    reg("r13", 4, 13),
    reg("r14", 4, 14),
    reg("r15", 4, 15),
    reg("cpsr", 4, PSEUDO_BASE),
];

static ARM_PRSTATUS: [Option<u16>; 18] = [
    Some(0),
    Some(1),
    Some(2),
    Some(3),
    Some(4),
    Some(5),
    Some(6),
    Some(7),
    Some(8),
    Some(9),
    Some(10),
    Some(11),
    Some(12),
    Some(13),
    Some(14),
    Some(15),
    Some(PSEUDO_BASE),
    None, // orig_r0
];

static PPC64_REGISTERS: [Register; 36] = [
    reg("r0", 8, 0),
    reg("r1", 8, 1),
    reg("r2", 8, 2),
    reg("r3", 8, 3),
    reg("r4", 8, 4),
    reg("r5", 8, 5),
    reg("r6", 8, 6),
    reg("r7", 8, 7),
    reg("r8", 8, 8),
    reg("r9", 8, 9),
    reg("r10", 8, 10),
    reg("r11", 8, 11),
    reg("r12", 8, 12),
    reg("r13", 8, 13),
    reg("r14", 8, 14),
    reg("r15", 8, 15),
    reg("r16", 8, 16),
    reg("r17", 8, 17),
    reg("r18", 8, 18),
    reg("r19", 8, 19),
    reg("r20", 8, 20),
    reg("r21", 8, 21),
    reg("r22", 8, 22),
    reg("r23", 8, 23),
    reg("r24", 8, 24),
    reg("r25", 8, 25),
    reg("r26", 8, 26),
    reg("r27", 8, 27),
    reg("r28", 8, 28),
    reg("r29", 8, 29),
    reg("r30", 8, 30),
    reg("r31", 8, 31),
    reg("lr", 8, 65),
    reg("ctr", 8, 66),
    reg("nip", 8, PSEUDO_BASE),
    reg("msr", 8, PSEUDO_BASE + 1),
];

// struct pt_regs, truncated after the link register
static PPC64_PRSTATUS: [Option<u16>; 37] = [
    Some(0),
    Some(1),
    Some(2),
    Some(3),
    Some(4),
    Some(5),
    Some(6),
    Some(7),
    Some(8),
    Some(9),
    Some(10),
    Some(11),
    Some(12),
    Some(13),
    Some(14),
    Some(15),
    Some(16),
    Some(17),
    Some(18),
    Some(19),
    Some(20),
    Some(21),
    Some(22),
    Some(23),
    Some(24),
    Some(25),
    Some(26),
    Some(27),
    Some(28),
    Some(29),
    Some(30),
    Some(31),
    Some(PSEUDO_BASE),
    Some(PSEUDO_BASE + 1),
    None, // orig_gpr3
    Some(66),
    Some(65),
];

static S390X_REGISTERS: [Register; 18] = [
    reg("r0", 8, 0),
    reg("r1", 8, 1),
    reg("r2", 8, 2),
    reg("r3", 8, 3),
    reg("r4", 8, 4),
    reg("r5", 8, 5),
    reg("r6", 8, 6),
    reg("r7", 8, 7),
    reg("r8", 8, 8),
    reg("r9", 8, 9),
    reg("r10", 8, 10),
    reg("r11", 8, 11),
    reg("r12", 8, 12),
    reg("r13", 8, 13),
    reg("r14", 8, 14),
    reg("r15", 8, 15),
    reg("pswm", 8, 64),
    reg("pswa", 8, 65),
];

static S390X_PRSTATUS: [Option<u16>; 18] = [
    Some(64),
    Some(65),
    Some(0),
    Some(1),
    Some(2),
    Some(3),
    Some(4),
    Some(5),
    Some(6),
    Some(7),
    Some(8),
    Some(9),
    Some(10),
    Some(11),
    Some(12),
    Some(13),
    Some(14),
    Some(15),
];

static RISCV64_REGISTERS: [Register; 32] = [
    reg("pc", 8, PSEUDO_BASE),
    reg("ra", 8, 1),
    reg("sp", 8, 2),
    reg("gp", 8, 3),
    reg("tp", 8, 4),
    reg("t0", 8, 5),
    reg("t1", 8, 6),
    reg("t2", 8, 7),
    reg("s0", 8, 8),
    reg("s1", 8, 9),
    reg("a0", 8, 10),
    reg("a1", 8, 11),
    reg("a2", 8, 12),
    reg("a3", 8, 13),
    reg("a4", 8, 14),
    reg("a5", 8, 15),
    reg("a6", 8, 16),
    reg("a7", 8, 17),
    reg("s2", 8, 18),
    reg("s3", 8, 19),
    reg("s4", 8, 20),
    reg("s5", 8, 21),
    reg("s6", 8, 22),
    reg("s7", 8, 23),
    reg("s8", 8, 24),
    reg("s9", 8, 25),
    reg("s10", 8, 26),
    reg("s11", 8, 27),
    reg("t3", 8, 28),
    reg("t4", 8, 29),
    reg("t5", 8, 30),
    reg("t6", 8, 31),
];

// struct user_regs_struct: pc followed by x1..x31
static RISCV64_PRSTATUS: [Option<u16>; 32] = [
    Some(PSEUDO_BASE),
    Some(1),
    Some(2),
    Some(3),
    Some(4),
    Some(5),
    Some(6),
    Some(7),
    Some(8),
    Some(9),
    Some(10),
    Some(11),
    Some(12),
    Some(13),
    Some(14),
    Some(15),
    Some(16),
    Some(17),
    Some(18),
    Some(19),
    Some(20),
    Some(21),
    Some(22),
    Some(23),
    Some(24),
    Some(25),
    Some(26),
    Some(27),
    Some(28),
    Some(29),
    Some(30),
    Some(31),
];

static X86_64: ArchInfo = ArchInfo {
    name: "x86_64",
    default_flags: LE64,
    registers: &X86_64_REGISTERS,
    aliases: &[("pc", 16), ("sp", 7), ("fp", 6), ("eflags", 49)],
    pc: 16,
    sp: 7,
    fp: Some(6),
    return_address: 16,
    callee_saved: &[3, 6, 12, 13, 14, 15],
    prstatus_layout: &X86_64_PRSTATUS,
};

static I386: ArchInfo = ArchInfo {
    name: "i386",
    default_flags: LE32,
    registers: &I386_REGISTERS,
    aliases: &[("pc", 8), ("sp", 4), ("fp", 5)],
    pc: 8,
    sp: 4,
    fp: Some(5),
    return_address: 8,
    callee_saved: &[3, 5, 6, 7],
    prstatus_layout: &I386_PRSTATUS,
};

static AARCH64: ArchInfo = ArchInfo {
    name: "aarch64",
    default_flags: LE64,
    registers: &AARCH64_REGISTERS,
    aliases: &[("fp", 29), ("lr", 30), ("cpsr", PSEUDO_BASE)],
    pc: 32,
    sp: 31,
    fp: Some(29),
    return_address: 30,
    callee_saved: &[19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29],
    prstatus_layout: &AARCH64_PRSTATUS,
};

static ARM: ArchInfo = ArchInfo {
    name: "arm",
    default_flags: LE32,
    registers: &ARM_REGISTERS,
    aliases: &[("fp", 11), ("ip", 12), ("sp", 13), ("lr", 14), ("pc", 15)],
    pc: 15,
    sp: 13,
    fp: Some(11),
    return_address: 14,
    callee_saved: &[4, 5, 6, 7, 8, 9, 10, 11],
    prstatus_layout: &ARM_PRSTATUS,
};

static PPC64: ArchInfo = ArchInfo {
    name: "ppc64",
    default_flags: LE64,
    registers: &PPC64_REGISTERS,
    aliases: &[("sp", 1), ("toc", 2), ("pc", PSEUDO_BASE)],
    pc: PSEUDO_BASE,
    sp: 1,
    fp: None,
    return_address: 65,
    callee_saved: &[
        2, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31,
    ],
    prstatus_layout: &PPC64_PRSTATUS,
};

static S390X: ArchInfo = ArchInfo {
    name: "s390x",
    default_flags: PlatformFlags::IS_64_BIT,
    registers: &S390X_REGISTERS,
    aliases: &[("sp", 15), ("pc", 65)],
    pc: 65,
    sp: 15,
    fp: Some(11),
    return_address: 14,
    callee_saved: &[6, 7, 8, 9, 10, 11, 12, 13, 15],
    prstatus_layout: &S390X_PRSTATUS,
};

static RISCV64: ArchInfo = ArchInfo {
    name: "riscv64",
    default_flags: LE64,
    registers: &RISCV64_REGISTERS,
    aliases: &[
        ("x1", 1),
        ("x2", 2),
        ("x3", 3),
        ("x4", 4),
        ("x5", 5),
        ("x6", 6),
        ("x7", 7),
        ("x8", 8),
        ("fp", 8),
        ("x9", 9),
        ("x10", 10),
        ("x11", 11),
        ("x12", 12),
        ("x13", 13),
        ("x14", 14),
        ("x15", 15),
        ("x16", 16),
        ("x17", 17),
        ("x18", 18),
        ("x19", 19),
        ("x20", 20),
        ("x21", 21),
        ("x22", 22),
        ("x23", 23),
        ("x24", 24),
        ("x25", 25),
        ("x26", 26),
        ("x27", 27),
        ("x28", 28),
        ("x29", 29),
        ("x30", 30),
        ("x31", 31),
    ],
    pc: PSEUDO_BASE,
    sp: 2,
    fp: Some(8),
    return_address: 1,
    callee_saved: &[2, 8, 9, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27],
    prstatus_layout: &RISCV64_PRSTATUS,
};

static UNKNOWN: ArchInfo = ArchInfo {
    name: "unknown",
    default_flags: PlatformFlags::empty(),
    registers: &[],
    aliases: &[],
    pc: PSEUDO_BASE,
    sp: PSEUDO_BASE,
    fp: None,
    return_address: PSEUDO_BASE,
    callee_saved: &[],
    prstatus_layout: &[],
};

/// Look up the static table for an architecture.
pub(crate) fn arch_info(architecture: Architecture) -> &'static ArchInfo
{
    match architecture {
        Architecture::X86_64 => &X86_64,
        Architecture::I386 => &I386,
        Architecture::Aarch64 => &AARCH64,
        Architecture::Arm => &ARM,
        Architecture::Ppc64 => &PPC64,
        Architecture::S390x => &S390X,
        Architecture::Riscv64 => &RISCV64,
        Architecture::Unknown => &UNKNOWN,
    }
}
