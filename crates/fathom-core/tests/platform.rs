//! Tests for platforms and register tables

use std::collections::HashSet;

use fathom_core::error::ErrorKind;
use fathom_core::platform::{Architecture, ByteOrder, Platform, PlatformFlags};

#[test]
fn test_unknown_architecture_needs_empty_flags()
{
    let err = Platform::new(Architecture::Unknown, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let err = Platform::new(Architecture::Unknown, Some(PlatformFlags::IS_64_BIT)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let platform = Platform::new(Architecture::Unknown, Some(PlatformFlags::empty())).unwrap();
    assert!(platform.registers().is_empty());
    assert!(platform.pc_register().is_none());
}

#[test]
fn test_default_flags()
{
    let x86_64 = Platform::new(Architecture::X86_64, None).unwrap();
    assert!(x86_64.is_64_bit());
    assert_eq!(x86_64.byte_order(), ByteOrder::Little);
    assert_eq!(x86_64.word_size(), 8);

    let arm = Platform::new(Architecture::Arm, None).unwrap();
    assert!(!arm.is_64_bit());
    assert_eq!(arm.word_size(), 4);

    let ppc64 = Platform::new(Architecture::Ppc64, None).unwrap();
    assert_eq!(ppc64.byte_order(), ByteOrder::Little);
}

#[test]
fn test_explicit_flags_override_defaults()
{
    let big = Platform::new(Architecture::Ppc64, Some(PlatformFlags::IS_64_BIT)).unwrap();
    assert_eq!(big.byte_order(), ByteOrder::Big);
    assert_eq!(big.flags(), PlatformFlags::IS_64_BIT);
}

#[test]
fn test_register_tables_are_consistent()
{
    for architecture in Architecture::ALL {
        let flags = (architecture == Architecture::Unknown).then(PlatformFlags::empty);
        let platform = Platform::new(architecture, flags).unwrap();

        let mut names = HashSet::new();
        let mut numbers = HashSet::new();
        for register in platform.registers() {
            assert!(names.insert(register.name), "{architecture}: duplicate {}", register.name);
            assert!(numbers.insert(register.number), "{architecture}: duplicate #{}", register.number);
            assert_eq!(platform.register_by_name(register.name).unwrap(), register);
            assert_eq!(platform.register_by_number(register.number).unwrap(), register);
        }
        for saved in platform.callee_saved_registers() {
            assert!(names.contains(saved.name));
        }
        if architecture != Architecture::Unknown {
            assert!(platform.pc_register().is_some(), "{architecture} has no pc");
            assert!(platform.sp_register().is_some(), "{architecture} has no sp");
        }
    }
}

#[test]
fn test_x86_64_dwarf_numbers()
{
    let platform = Platform::new(Architecture::X86_64, None).unwrap();
    assert_eq!(platform.register_by_name("rip").unwrap().number, 16);
    assert_eq!(platform.register_by_name("pc").unwrap().name, "rip");
    assert_eq!(platform.sp_register().unwrap().name, "rsp");
    assert_eq!(platform.fp_register().unwrap().name, "rbp");
    assert_eq!(platform.register_by_number(3).unwrap().name, "rbx");
}

#[test]
fn test_unknown_register_is_not_found()
{
    let platform = Platform::new(Architecture::Riscv64, None).unwrap();
    assert!(platform.register_by_name("rax").unwrap_err().is_not_found());
}

#[test]
fn test_elf_machine_mapping()
{
    use object::elf;

    assert_eq!(Architecture::from_elf_machine(elf::EM_X86_64), Architecture::X86_64);
    assert_eq!(Architecture::from_elf_machine(elf::EM_AARCH64), Architecture::Aarch64);
    assert_eq!(Architecture::from_elf_machine(elf::EM_S390), Architecture::S390x);
    assert_eq!(Architecture::from_elf_machine(0xffff), Architecture::Unknown);
}
