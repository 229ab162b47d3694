//! Shared fixtures: a hand-built x86_64 program with globals, two functions
//! with unwind rows, locals and a small stack.

#![allow(dead_code)]

use fathom_core::config::ProgramOptions;
use fathom_core::debuginfo::{
    BaseEncoding, CfaRuleRecord, CfiRecord, CfiRow, CompoundKind, ConstValue, FrameBaseRecord, FunctionRecord,
    LocalRecord, LocationRecord, MemberRecord, ModuleRecords, RecordId, RegisterRuleRecord, SymbolRecord,
    TypeRecord, TypeRecordKind, VariableRecord,
};
use fathom_core::memory::{MemorySegment, SegmentBacking};
use fathom_core::platform::{Architecture, Platform};
use fathom_core::types::{RegisterSnapshot, SymbolBinding, SymbolKind};
use fathom_core::Program;

pub const INT: RecordId = RecordId(1);
pub const CHAR: RecordId = RecordId(2);
pub const POINT: RecordId = RecordId(3);
pub const POINT_PTR: RecordId = RecordId(4);
pub const INT_ARRAY: RecordId = RecordId(5);
pub const POINT_T: RecordId = RecordId(6);
pub const FLAGS: RecordId = RecordId(7);
pub const UINT: RecordId = RecordId(8);
pub const CHAR_PTR: RecordId = RecordId(9);
pub const NODE_DECL: RecordId = RecordId(10);
pub const MAIN_TYPE: RecordId = RecordId(11);

pub const DATA: u64 = 0x10000;
pub const STACK: u64 = 0x7f00;

pub const MAIN: u64 = 0x1100;
pub const HELPER: u64 = 0x1200;

pub const RAX: u16 = 0;
pub const RBP: u16 = 6;
pub const RSP: u16 = 7;
pub const RIP: u16 = 16;

pub fn x86_64() -> Platform
{
    Platform::new(Architecture::X86_64, None).unwrap()
}

pub fn ty(id: RecordId, kind: TypeRecordKind) -> TypeRecord
{
    TypeRecord { id, kind }
}

pub fn base(name: &str, encoding: BaseEncoding, byte_size: u64) -> TypeRecordKind
{
    TypeRecordKind::Base {
        name: name.to_string(),
        encoding,
        byte_size,
    }
}

pub fn member(name: &str, type_id: RecordId, bit_offset: u64, bit_field_size: Option<u64>) -> MemberRecord
{
    MemberRecord {
        name: Some(name.to_string()),
        type_id,
        bit_offset,
        bit_field_size,
    }
}

pub fn symbol(name: &str, address: u64, size: u64, kind: SymbolKind, binding: SymbolBinding) -> SymbolRecord
{
    SymbolRecord {
        name: name.to_string(),
        address,
        size,
        binding,
        kind,
        type_id: None,
    }
}

pub fn local(name: &str, type_id: RecordId, location: LocationRecord, parameter: bool) -> LocalRecord
{
    LocalRecord {
        variable: VariableRecord::new(name, Some(type_id), location),
        parameter,
        scope: Vec::new(),
        depth: 0,
    }
}

/// Standard `push rbp; mov rbp, rsp` frame: CFA = rsp + 16, return address at CFA - 8, rbp at CFA - 16.
pub fn rbp_frame(start: u64, end: u64) -> CfiRecord
{
    CfiRecord {
        start,
        end,
        return_address_register: RIP,
        rows: vec![CfiRow {
            start,
            end,
            cfa: CfaRuleRecord::RegisterOffset {
                register: RSP,
                offset: 16,
            },
            registers: vec![(RIP, RegisterRuleRecord::Offset(-8)), (RBP, RegisterRuleRecord::Offset(-16))],
        }],
        corrupt: None,
    }
}

pub fn types() -> Vec<TypeRecord>
{
    vec![
        ty(INT, base("int", BaseEncoding::Signed, 4)),
        ty(CHAR, base("char", BaseEncoding::Signed, 1)),
        ty(
            POINT,
            TypeRecordKind::Compound {
                kind: CompoundKind::Struct,
                name: Some("point".into()),
                byte_size: Some(8),
                members: vec![member("x", INT, 0, None), member("y", INT, 32, None)],
                declaration: false,
            },
        ),
        ty(
            POINT_PTR,
            TypeRecordKind::Pointer {
                pointee: Some(POINT),
                byte_size: None,
            },
        ),
        ty(
            INT_ARRAY,
            TypeRecordKind::Array {
                element: INT,
                length: Some(4),
            },
        ),
        ty(
            POINT_T,
            TypeRecordKind::Typedef {
                name: "point_t".into(),
                target: Some(POINT),
            },
        ),
        ty(
            FLAGS,
            TypeRecordKind::Compound {
                kind: CompoundKind::Struct,
                name: Some("flags".into()),
                byte_size: Some(4),
                members: vec![member("a", UINT, 0, Some(3)), member("b", UINT, 3, Some(5))],
                declaration: false,
            },
        ),
        ty(UINT, base("unsigned int", BaseEncoding::Unsigned, 4)),
        ty(
            CHAR_PTR,
            TypeRecordKind::Pointer {
                pointee: Some(CHAR),
                byte_size: None,
            },
        ),
        ty(
            NODE_DECL,
            TypeRecordKind::Compound {
                kind: CompoundKind::Struct,
                name: Some("node".into()),
                byte_size: None,
                members: Vec::new(),
                declaration: true,
            },
        ),
        ty(
            MAIN_TYPE,
            TypeRecordKind::Function {
                return_type: Some(INT),
                parameters: vec![Some(INT)],
                variadic: false,
            },
        ),
    ]
}

/// Records of the main executable, file addresses `0x1000..0x20000`.
pub fn app_records() -> ModuleRecords
{
    let mut records = ModuleRecords::new("app");
    records.architecture = Some(Architecture::X86_64);
    records.address_range = Some(0x1000..0x2_0000);
    records.types = types();

    let mut counter = symbol("counter", DATA, 4, SymbolKind::Object, SymbolBinding::Global);
    counter.type_id = Some(INT);
    records.symbols = vec![
        counter,
        symbol("main", MAIN, 0x100, SymbolKind::Function, SymbolBinding::Global),
        symbol("helper", HELPER, 0x80, SymbolKind::Function, SymbolBinding::Local),
        symbol("dup", 0x1300, 0x10, SymbolKind::Function, SymbolBinding::Local),
        symbol("_start", 0x1000, 0, SymbolKind::Function, SymbolBinding::Global),
    ];

    records.variables = vec![
        VariableRecord::new("counter", Some(INT), LocationRecord::Address(DATA)),
        VariableRecord::new("origin", Some(POINT), LocationRecord::Address(DATA + 0x10)),
        VariableRecord::new("table", Some(INT_ARRAY), LocationRecord::Address(DATA + 0x20)),
        VariableRecord::new("head", Some(POINT_PTR), LocationRecord::Address(DATA + 0x40)),
        VariableRecord::new("status", Some(FLAGS), LocationRecord::Address(DATA + 0x48)),
        VariableRecord::new("name", Some(CHAR_PTR), LocationRecord::Address(DATA + 0x50)),
        VariableRecord::new("answer", Some(INT), LocationRecord::Constant(ConstValue::Signed(42))),
        VariableRecord::new("gone", Some(INT), LocationRecord::OptimizedOut),
    ];

    let mut block_local = local("x", INT, LocationRecord::Constant(ConstValue::Signed(1)), false);
    block_local.scope = vec![HELPER..HELPER + 0x40];
    block_local.depth = 1;
    let mut late = local("late", INT, LocationRecord::Constant(ConstValue::Signed(9)), false);
    late.scope = vec![HELPER + 0x50..HELPER + 0x60];

    records.functions = vec![
        FunctionRecord {
            name: "main".into(),
            linkage_name: None,
            low_pc: MAIN,
            high_pc: MAIN + 0x100,
            type_id: Some(MAIN_TYPE),
            frame_base: FrameBaseRecord::Cfa,
            locals: vec![local("result", INT, LocationRecord::Register(RAX), false)],
            external: true,
        },
        FunctionRecord {
            name: "helper".into(),
            linkage_name: None,
            low_pc: HELPER,
            high_pc: HELPER + 0x80,
            type_id: None,
            frame_base: FrameBaseRecord::Cfa,
            locals: vec![
                local("depth", INT, LocationRecord::FrameBaseOffset(-20), true),
                local("x", INT, LocationRecord::Constant(ConstValue::Signed(2)), true),
                block_local,
                local("scratch", INT, LocationRecord::Register(RAX), false),
                local("counter", INT, LocationRecord::Constant(ConstValue::Signed(5)), false),
                late,
            ],
            external: false,
        },
    ];

    records.cfi = vec![rbp_frame(MAIN, MAIN + 0x100), rbp_frame(HELPER, HELPER + 0x80)];
    records
}

fn words(values: &[u64]) -> Vec<u8>
{
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Global data at [`DATA`]
///
/// `counter = -3`, `origin = {10, 20}`, `table = {1, 2, 3, 4}`,
/// `head = &origin`, `status = {a = 3, b = 21}`, `name = "fathom"`.
pub fn data_bytes() -> Vec<u8>
{
    let mut data = vec![0u8; 0x100];
    data[0..4].copy_from_slice(&(-3i32).to_le_bytes());
    data[0x10..0x14].copy_from_slice(&10i32.to_le_bytes());
    data[0x14..0x18].copy_from_slice(&20i32.to_le_bytes());
    for (i, v) in [1i32, 2, 3, 4].iter().enumerate() {
        data[0x20 + i * 4..0x24 + i * 4].copy_from_slice(&v.to_le_bytes());
    }
    data[0x40..0x48].copy_from_slice(&(DATA + 0x10).to_le_bytes());
    data[0x48] = (21 << 3) | 3;
    data[0x50..0x58].copy_from_slice(&(DATA + 0x60).to_le_bytes());
    data[0x60..0x67].copy_from_slice(b"fathom\0");
    data
}

/// Stack at [`STACK`]: helper's frame at `0x8000` returns into main, main's return address is 0.
pub fn stack_bytes() -> Vec<u8>
{
    let mut stack = vec![0u8; 0x200];
    // depth = 7 at CFA(helper) - 20
    stack[0xfc..0x100].copy_from_slice(&7i32.to_le_bytes());
    let frame = words(&[0x8040, MAIN + 0x50, 0x8060, 0]);
    stack[0x100..0x120].copy_from_slice(&frame);
    stack
}

/// Registers of the innermost frame, stopped in `helper`.
pub fn helper_registers() -> RegisterSnapshot
{
    RegisterSnapshot::from_pc_sp(Architecture::X86_64, HELPER + 0x10, 0x8000, Some(0x8100)).with(RAX, 99)
}

pub fn program_with(options: ProgramOptions) -> Program
{
    fathom_utils::logging::init_test_logging();
    let mut program = Program::with_options(x86_64(), options);
    program
        .add_segment(MemorySegment::new(DATA..DATA + 0x100, SegmentBacking::buffer(data_bytes())))
        .unwrap();
    program
        .add_segment(MemorySegment::new(STACK..STACK + 0x200, SegmentBacking::buffer(stack_bytes())))
        .unwrap();
    program.add_module(app_records(), 0).unwrap();
    program
}

pub fn program() -> Program
{
    program_with(ProgramOptions::default())
}

/// A second module, loaded at bias `0x7f00_0000`, defining `struct node` and a global `dup`.
pub fn lib_records() -> ModuleRecords
{
    let mut records = ModuleRecords::new("libfoo.so");
    records.architecture = Some(Architecture::X86_64);
    records.address_range = Some(0x1000..0x2000);
    records.types = vec![
        ty(RecordId(1), base("int", BaseEncoding::Signed, 4)),
        ty(
            RecordId(2),
            TypeRecordKind::Compound {
                kind: CompoundKind::Struct,
                name: Some("node".into()),
                byte_size: Some(16),
                members: vec![member("value", RecordId(1), 0, None), member("next", RecordId(3), 64, None)],
                declaration: false,
            },
        ),
        ty(
            RecordId(3),
            TypeRecordKind::Pointer {
                pointee: Some(RecordId(2)),
                byte_size: None,
            },
        ),
    ];
    records.symbols = vec![symbol("dup", 0x1400, 0x10, SymbolKind::Function, SymbolBinding::Global)];
    records
}

pub const LIB_BIAS: u64 = 0x7f00_0000;
