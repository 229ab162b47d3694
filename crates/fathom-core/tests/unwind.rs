//! Tests for stack unwinding

mod common;

use common::*;
use fathom_core::config::ProgramOptions;
use fathom_core::debuginfo::{CfaRuleRecord, CfiRecord, CfiRow, RegisterRuleRecord};
use fathom_core::memory::{MemorySegment, SegmentBacking};
use fathom_core::debuginfo::ModuleRecords;
use fathom_core::platform::{Architecture, Platform};
use fathom_core::types::{FrameStatus, RegisterSnapshot, Thread, ThreadId, TruncationReason};
use fathom_core::{Program, StackStart};

#[test]
fn test_cfi_unwind_through_two_frames()
{
    let program = program();
    let trace = program.stack_trace(StackStart::Registers(helper_registers())).unwrap();

    assert_eq!(trace.len(), 2);
    assert!(!trace.is_truncated(), "{:?}", trace.truncation());

    let helper = &trace.frames()[0];
    assert_eq!(helper.function_name(), Some("helper"));
    assert!(helper.interrupted);
    assert_eq!(helper.status, FrameStatus::Initial);
    assert_eq!(helper.cfa.map(|a| a.value()), Some(0x8010));

    let main = &trace.frames()[1];
    assert_eq!(main.function_name(), Some("main"));
    assert!(!main.interrupted);
    assert_eq!(main.status, FrameStatus::Cfi);
    assert_eq!(main.pc.value(), MAIN + 0x50);
    assert_eq!(main.sp(), Some(0x8010));
    assert_eq!(main.registers.get(RBP), Some(0x8040));
    assert_eq!(main.cfa.map(|a| a.value()), Some(0x8020));
}

#[test]
fn test_caller_loses_scratch_registers()
{
    let program = program();
    let trace = program.stack_trace(StackStart::Registers(helper_registers())).unwrap();
    assert_eq!(trace.frames()[0].registers.get(RAX), Some(99));
    assert_eq!(trace.frames()[1].registers.get(RAX), None);
}

#[test]
fn test_unwinding_is_deterministic()
{
    let program = program();
    let a = program.stack_trace(StackStart::Registers(helper_registers())).unwrap();
    let b = program.stack_trace(StackStart::Registers(helper_registers())).unwrap();
    assert_eq!(a.len(), b.len());
    for (x, y) in a.frames().iter().zip(b.frames()) {
        assert_eq!(x.id, y.id);
        assert_eq!(x.pc, y.pc);
        assert_eq!(x.cfa, y.cfa);
    }
}

#[test]
fn test_frame_limit_truncates()
{
    let program = program_with(ProgramOptions::default().with_max_frames(1));
    let trace = program.stack_trace(StackStart::Registers(helper_registers())).unwrap();
    assert_eq!(trace.len(), 1);
    assert!(matches!(trace.truncation(), Some(TruncationReason::MaxFrames(1))));
}

#[test]
fn test_frame_zero_is_emitted_outside_modules()
{
    let program = program_with(ProgramOptions::default().with_frame_pointer_fallback(false));
    let trace = program
        .stack_trace(StackStart::Pc {
            pc: 0xdead_0000,
            sp: 0x8000,
            fp: None,
        })
        .unwrap();
    assert_eq!(trace.len(), 1);
    assert_eq!(trace.frames()[0].function_name(), None);
    assert!(matches!(trace.truncation(), Some(TruncationReason::NoUnwindInfo { .. })));
}

#[test]
fn test_return_into_unknown_code_truncates()
{
    let mut program = Program::new(x86_64());
    let mut stack = vec![0u8; 0x20];
    stack[8..16].copy_from_slice(&0xdead_0000u64.to_le_bytes());
    program
        .add_segment(MemorySegment::new(0x8000..0x8020, SegmentBacking::buffer(stack)))
        .unwrap();
    program.add_module(app_records(), 0).unwrap();

    let trace = program
        .stack_trace(StackStart::Pc {
            pc: HELPER + 0x10,
            sp: 0x8000,
            fp: None,
        })
        .unwrap();
    assert_eq!(trace.len(), 1);
    assert!(matches!(
        trace.truncation(),
        Some(TruncationReason::UnknownPc { pc }) if pc.value() == 0xdead_0000
    ));
}

#[test]
fn test_unreadable_stack_truncates_with_failure()
{
    let mut program = Program::new(x86_64());
    program.add_module(app_records(), 0).unwrap();
    let trace = program
        .stack_trace(StackStart::Pc {
            pc: HELPER + 0x10,
            sp: 0x8000,
            fp: None,
        })
        .unwrap();
    assert_eq!(trace.len(), 1);
    assert!(matches!(trace.truncation(), Some(TruncationReason::UnwindFailed { .. })));
}

#[test]
fn test_frame_pointer_fallback_without_cfi()
{
    let mut records = app_records();
    records.cfi.clear();
    let mut program = Program::new(x86_64());
    program
        .add_segment(MemorySegment::new(STACK..STACK + 0x200, SegmentBacking::buffer(stack_bytes())))
        .unwrap();
    program.add_module(records, 0).unwrap();

    // rbp = 0x8000: [rbp] = 0x8040 (caller rbp), [rbp + 8] = return into main
    let trace = program
        .stack_trace(StackStart::Pc {
            pc: HELPER + 0x10,
            sp: 0x7ff0,
            fp: Some(0x8000),
        })
        .unwrap();
    assert!(trace.len() >= 2);
    let main = &trace.frames()[1];
    assert_eq!(main.status, FrameStatus::Heuristic);
    assert_eq!(main.pc.value(), MAIN + 0x50);
    assert_eq!(main.sp(), Some(0x8010));
    assert_eq!(main.registers.get(RBP), Some(0x8040));
}

#[test]
fn test_thread_start()
{
    let mut program = program();
    program.add_thread(Thread {
        id: ThreadId(42),
        name: Some("worker".into()),
        registers: helper_registers().into(),
    });
    let trace = program.stack_trace(StackStart::Thread(ThreadId(42))).unwrap();
    assert_eq!(trace.thread(), Some(ThreadId(42)));
    assert_eq!(trace.len(), 2);

    let err = program.stack_trace(StackStart::Thread(ThreadId(7))).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_registers_for_another_architecture_are_rejected()
{
    let program = program();
    let registers = RegisterSnapshot::from_pc_sp(Architecture::Aarch64, 0x1000, 0x8000, None);
    assert!(program.stack_trace(StackStart::Registers(registers)).is_err());
}

/// `helper` described by a single row with CFA = rsp + 8 and the given rules.
fn program_with_helper_rules(registers: Vec<(u16, RegisterRuleRecord)>) -> Program
{
    let mut records = app_records();
    records.cfi[1] = CfiRecord {
        start: HELPER,
        end: HELPER + 0x80,
        return_address_register: RIP,
        rows: vec![CfiRow {
            start: HELPER,
            end: HELPER + 0x80,
            cfa: CfaRuleRecord::RegisterOffset {
                register: RSP,
                offset: 8,
            },
            registers,
        }],
        corrupt: None,
    };
    let mut program = Program::new(x86_64());
    program
        .add_segment(MemorySegment::new(STACK..STACK + 0x200, SegmentBacking::buffer(stack_bytes())))
        .unwrap();
    program.add_module(records, 0).unwrap();
    program
}

#[test]
fn test_same_value_rule_keeps_register()
{
    // [0x8008] = MAIN + 0x50 is the return address at CFA - 8
    let program = program_with_helper_rules(vec![
        (RIP, RegisterRuleRecord::Offset(-8)),
        (RBP, RegisterRuleRecord::SameValue),
    ]);
    let trace = program
        .stack_trace(StackStart::Pc {
            pc: HELPER + 0x10,
            sp: 0x8008,
            fp: Some(0x8100),
        })
        .unwrap();
    assert!(trace.len() >= 2);
    let main = &trace.frames()[1];
    assert_eq!(main.pc.value(), MAIN + 0x50);
    assert_eq!(main.sp(), Some(0x8010));
    assert_eq!(main.registers.get(RBP), Some(0x8100));
}

#[test]
fn test_undefined_return_address_ends_trace()
{
    let program = program_with_helper_rules(vec![(RIP, RegisterRuleRecord::Undefined)]);
    let trace = program
        .stack_trace(StackStart::Pc {
            pc: HELPER + 0x10,
            sp: 0x8000,
            fp: Some(0x8100),
        })
        .unwrap();
    assert_eq!(trace.len(), 1);
    assert!(!trace.is_truncated(), "{:?}", trace.truncation());
    assert_eq!(trace.frames()[0].cfa.map(|a| a.value()), Some(0x8008));
}

#[test]
fn test_missing_pc_column_rule_ends_trace()
{
    let program = program_with_helper_rules(vec![(RBP, RegisterRuleRecord::SameValue)]);
    let trace = program
        .stack_trace(StackStart::Pc {
            pc: HELPER + 0x10,
            sp: 0x8000,
            fp: Some(0x8100),
        })
        .unwrap();
    assert_eq!(trace.len(), 1);
    assert!(!trace.is_truncated(), "{:?}", trace.truncation());
}

#[test]
fn test_missing_link_register_rule_keeps_its_value()
{
    // aarch64: x30 is the return-address column and a leaf keeps it live
    const X29: u16 = 29;
    const X30: u16 = 30;
    const SP: u16 = 31;
    let platform = Platform::new(Architecture::Aarch64, None).unwrap();
    let mut records = ModuleRecords::new("leaf");
    records.architecture = Some(Architecture::Aarch64);
    records.address_range = Some(0x1000..0x3000);
    records.cfi = vec![CfiRecord {
        start: 0x1000,
        end: 0x1100,
        return_address_register: X30,
        rows: vec![CfiRow {
            start: 0x1000,
            end: 0x1100,
            cfa: CfaRuleRecord::RegisterOffset {
                register: SP,
                offset: 0,
            },
            registers: Vec::new(),
        }],
        corrupt: None,
    }];
    let mut program = Program::with_options(platform, ProgramOptions::default().with_frame_pointer_fallback(false));
    program.add_module(records, 0).unwrap();

    let registers = RegisterSnapshot::from_pc_sp(Architecture::Aarch64, 0x1010, 0x9000, None)
        .with(X30, 0x2040)
        .with(X29, 0x9100);
    let trace = program.stack_trace(StackStart::Registers(registers)).unwrap();
    assert_eq!(trace.len(), 2);
    let caller = &trace.frames()[1];
    assert_eq!(caller.pc.value(), 0x2040);
    assert_eq!(caller.sp(), Some(0x9000));
    assert_eq!(caller.registers.get(X29), Some(0x9100));
    assert!(matches!(trace.truncation(), Some(TruncationReason::NoUnwindInfo { .. })));
}
