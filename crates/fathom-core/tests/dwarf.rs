//! Tests for decoding ELF files carrying DWARF type, variable and unwind data

use fathom_core::config::ProgramOptions;
use fathom_core::debuginfo::dwarf::parse_module_records;
use fathom_core::debuginfo::{
    BaseEncoding, CompoundKind, ConstValue, FrameBaseRecord, LocationRecord, MemberRecord, ModuleRecords,
    RegisterRuleRecord, TypeRecordKind,
};
use fathom_core::memory::{MemorySegment, SegmentBacking};
use fathom_core::platform::{Architecture, Platform};
use fathom_core::types::RegisterSnapshot;
use fathom_core::{Program, StackStart};
use gimli::write::{
    Address, AttributeValue, CallFrameInstruction, CommonInformationEntry, DwarfUnit, EndianVec, Expression,
    FrameDescriptionEntry, FrameTable, Sections, UnitEntryId,
};
use gimli::{Encoding, Format, LittleEndian, Register};

const START: u64 = 0x1000;
const MAIN: u64 = 0x1010;
const COUNTER: u64 = 0x4000;

const RBX: u16 = 3;
const RBP: u16 = 6;
const RSP: u16 = 7;
const RIP: u16 = 16;

fn encoding() -> Encoding
{
    Encoding {
        format: Format::Dwarf32,
        version: 4,
        address_size: 8,
    }
}

struct Builder
{
    dwarf: DwarfUnit,
}

impl Builder
{
    fn add(&mut self, parent: UnitEntryId, tag: gimli::DwTag, attributes: Vec<(gimli::DwAt, AttributeValue)>)
        -> UnitEntryId
    {
        let id = self.dwarf.unit.add(parent, tag);
        let entry = self.dwarf.unit.get_mut(id);
        for (name, value) in attributes {
            entry.set(name, value);
        }
        id
    }
}

fn name(value: &str) -> (gimli::DwAt, AttributeValue)
{
    (gimli::DW_AT_name, AttributeValue::String(value.as_bytes().to_vec()))
}

fn of_type(id: UnitEntryId) -> (gimli::DwAt, AttributeValue)
{
    (gimli::DW_AT_type, AttributeValue::UnitRef(id))
}

fn udata(attribute: gimli::DwAt, value: u64) -> (gimli::DwAt, AttributeValue)
{
    (attribute, AttributeValue::Udata(value))
}

fn location(build: impl FnOnce(&mut Expression)) -> (gimli::DwAt, AttributeValue)
{
    let mut expression = Expression::new();
    build(&mut expression);
    (gimli::DW_AT_location, AttributeValue::Exprloc(expression))
}

/// A compile unit with the types, globals and functions the tests look at.
fn debug_info() -> DwarfUnit
{
    let mut builder = Builder {
        dwarf: DwarfUnit::new(encoding()),
    };
    let root = builder.dwarf.unit.root();

    let int = builder.add(
        root,
        gimli::DW_TAG_base_type,
        vec![
            name("int"),
            udata(gimli::DW_AT_byte_size, 4),
            (gimli::DW_AT_encoding, AttributeValue::Encoding(gimli::DW_ATE_signed)),
        ],
    );
    let uint = builder.add(
        root,
        gimli::DW_TAG_base_type,
        vec![
            name("unsigned int"),
            udata(gimli::DW_AT_byte_size, 4),
            (gimli::DW_AT_encoding, AttributeValue::Encoding(gimli::DW_ATE_unsigned)),
        ],
    );
    let u32_alias = builder.add(root, gimli::DW_TAG_typedef, vec![name("u32"), of_type(uint)]);

    let packet = builder.add(
        root,
        gimli::DW_TAG_structure_type,
        vec![name("packet"), udata(gimli::DW_AT_byte_size, 16)],
    );
    builder.add(
        packet,
        gimli::DW_TAG_member,
        vec![name("len"), of_type(int), udata(gimli::DW_AT_data_member_location, 0)],
    );
    let mut plus_four = Expression::new();
    plus_four.op_plus_uconst(4);
    builder.add(
        packet,
        gimli::DW_TAG_member,
        vec![
            name("kind"),
            of_type(int),
            (gimli::DW_AT_data_member_location, AttributeValue::Exprloc(plus_four)),
        ],
    );
    builder.add(
        packet,
        gimli::DW_TAG_member,
        vec![
            name("low"),
            of_type(uint),
            udata(gimli::DW_AT_bit_size, 3),
            udata(gimli::DW_AT_data_bit_offset, 64),
        ],
    );
    // DWARF 2 style: 5 bits ending 3 bits above the bottom of a 4-byte unit at offset 8
    builder.add(
        packet,
        gimli::DW_TAG_member,
        vec![
            name("mid"),
            of_type(uint),
            udata(gimli::DW_AT_data_member_location, 8),
            udata(gimli::DW_AT_byte_size, 4),
            udata(gimli::DW_AT_bit_size, 5),
            udata(gimli::DW_AT_bit_offset, 24),
        ],
    );
    builder.add(
        packet,
        gimli::DW_TAG_member,
        vec![
            name("high"),
            of_type(u32_alias),
            udata(gimli::DW_AT_data_member_location, 8),
            udata(gimli::DW_AT_bit_size, 8),
            udata(gimli::DW_AT_bit_offset, 16),
        ],
    );
    builder.add(
        packet,
        gimli::DW_TAG_member,
        vec![
            name("tail"),
            of_type(int),
            udata(gimli::DW_AT_data_member_location, 12),
        ],
    );

    let broken = builder.add(
        root,
        gimli::DW_TAG_structure_type,
        vec![name("broken"), udata(gimli::DW_AT_byte_size, 8)],
    );
    builder.add(
        broken,
        gimli::DW_TAG_member,
        vec![
            name("far"),
            of_type(int),
            udata(gimli::DW_AT_data_member_location, u64::MAX / 4),
        ],
    );
    builder.add(
        broken,
        gimli::DW_TAG_member,
        vec![name("near"), of_type(int), udata(gimli::DW_AT_data_member_location, 4)],
    );

    let packet_ptr = builder.add(
        root,
        gimli::DW_TAG_pointer_type,
        vec![of_type(packet), udata(gimli::DW_AT_byte_size, 8)],
    );
    let table = builder.add(root, gimli::DW_TAG_array_type, vec![of_type(int)]);
    builder.add(table, gimli::DW_TAG_subrange_type, vec![udata(gimli::DW_AT_upper_bound, 3)]);
    builder.add(root, gimli::DW_TAG_typedef, vec![name("packet_ptr_t"), of_type(packet_ptr)]);

    builder.add(
        root,
        gimli::DW_TAG_variable,
        vec![
            name("counter"),
            of_type(int),
            (gimli::DW_AT_external, AttributeValue::Flag(true)),
            location(|e| e.op_addr(Address::Constant(COUNTER))),
        ],
    );
    builder.add(
        root,
        gimli::DW_TAG_variable,
        vec![name("table"), of_type(table), location(|e| e.op_addr(Address::Constant(COUNTER + 0x10)))],
    );
    builder.add(
        root,
        gimli::DW_TAG_variable,
        vec![name("answer"), of_type(int), (gimli::DW_AT_const_value, AttributeValue::Sdata(42))],
    );
    builder.add(
        root,
        gimli::DW_TAG_variable,
        vec![
            name("seven"),
            of_type(uint),
            location(|e| {
                e.op_constu(7);
                e.op(gimli::DW_OP_stack_value);
            }),
        ],
    );
    builder.add(root, gimli::DW_TAG_variable, vec![name("gone"), of_type(int), location(|_| {})]);

    let mut cfa = Expression::new();
    cfa.op(gimli::DW_OP_call_frame_cfa);
    let main = builder.add(
        root,
        gimli::DW_TAG_subprogram,
        vec![
            name("main"),
            of_type(int),
            (gimli::DW_AT_external, AttributeValue::Flag(true)),
            (gimli::DW_AT_low_pc, AttributeValue::Address(Address::Constant(MAIN))),
            udata(gimli::DW_AT_high_pc, 0x20),
            (gimli::DW_AT_frame_base, AttributeValue::Exprloc(cfa)),
        ],
    );
    builder.add(
        main,
        gimli::DW_TAG_formal_parameter,
        vec![name("argc"), of_type(int), location(|e| e.op_fbreg(-20))],
    );
    builder.add(
        main,
        gimli::DW_TAG_variable,
        vec![name("cursor"), of_type(packet_ptr), location(|e| e.op_reg(Register(RBX)))],
    );
    builder.add(
        main,
        gimli::DW_TAG_variable,
        vec![name("slot"), of_type(int), location(|e| e.op_breg(Register(RBP), -8))],
    );
    builder.dwarf
}

/// `_start` marks its return address undefined; `main` leaves rbx alone and
/// saves rbp after a 4-byte prologue.
fn frames() -> FrameTable
{
    let mut frames = FrameTable::default();
    let mut cie = CommonInformationEntry::new(encoding(), 1, -8, Register(RIP));
    cie.add_instruction(CallFrameInstruction::Cfa(Register(RSP), 8));
    cie.add_instruction(CallFrameInstruction::Offset(Register(RIP), -8));
    let cie = frames.add_cie(cie);

    let mut start = FrameDescriptionEntry::new(Address::Constant(START), 0x10);
    start.add_instruction(0, CallFrameInstruction::Undefined(Register(RIP)));
    frames.add_fde(cie, start);

    let mut main = FrameDescriptionEntry::new(Address::Constant(MAIN), 0x20);
    main.add_instruction(0, CallFrameInstruction::SameValue(Register(RBX)));
    main.add_instruction(4, CallFrameInstruction::Cfa(Register(RSP), 16));
    main.add_instruction(4, CallFrameInstruction::Offset(Register(RBP), -16));
    frames.add_fde(cie, main);
    frames
}

/// A relocatable x86_64 ELF with `.text`, `.debug_*` and `.debug_frame`.
fn elf_with_debug_info() -> Vec<u8>
{
    let mut sections = Sections::new(EndianVec::new(LittleEndian));
    debug_info().write(&mut sections).unwrap();
    frames().write_debug_frame(&mut sections.debug_frame).unwrap();

    let mut object = object::write::Object::new(
        object::BinaryFormat::Elf,
        object::Architecture::X86_64,
        object::Endianness::Little,
    );
    let text = object.add_section(Vec::new(), b".text".to_vec(), object::SectionKind::Text);
    object.append_section_data(text, &[0x90; 0x30], 16);
    sections
        .for_each(|id, data| {
            if !data.slice().is_empty() {
                let section = object.add_section(Vec::new(), id.name().as_bytes().to_vec(), object::SectionKind::Debug);
                object.append_section_data(section, data.slice(), 1);
            }
            Ok::<_, ()>(())
        })
        .unwrap();
    object.write().unwrap()
}

fn records() -> ModuleRecords
{
    fathom_utils::logging::init_test_logging();
    parse_module_records("fixture", &elf_with_debug_info()).unwrap()
}

fn compound<'a>(records: &'a ModuleRecords, wanted: &str) -> (Option<u64>, &'a [MemberRecord])
{
    records
        .types
        .iter()
        .find_map(|t| match &t.kind {
            TypeRecordKind::Compound {
                name: Some(name),
                byte_size,
                members,
                kind: CompoundKind::Struct,
                ..
            } if name == wanted => Some((*byte_size, members.as_slice())),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no struct {wanted}"))
}

fn member<'a>(members: &'a [MemberRecord], wanted: &str) -> &'a MemberRecord
{
    members
        .iter()
        .find(|m| m.name.as_deref() == Some(wanted))
        .unwrap_or_else(|| panic!("no member {wanted}"))
}

fn global_location(records: &ModuleRecords, wanted: &str) -> LocationRecord
{
    records
        .variables
        .iter()
        .find(|v| v.name == wanted)
        .unwrap_or_else(|| panic!("no variable {wanted}"))
        .location_at(None)
        .clone()
}

#[test]
fn test_base_types_and_encodings()
{
    let records = records();
    let bases: Vec<(&str, BaseEncoding, u64)> = records
        .types
        .iter()
        .filter_map(|t| match &t.kind {
            TypeRecordKind::Base {
                name,
                encoding,
                byte_size,
            } => Some((name.as_str(), *encoding, *byte_size)),
            _ => None,
        })
        .collect();
    assert!(bases.contains(&("int", BaseEncoding::Signed, 4)));
    assert!(bases.contains(&("unsigned int", BaseEncoding::Unsigned, 4)));
    assert_eq!(records.architecture, Some(Architecture::X86_64));
}

#[test]
fn test_member_byte_offsets()
{
    let records = records();
    let (byte_size, members) = compound(&records, "packet");
    assert_eq!(byte_size, Some(16));
    assert_eq!(member(members, "len").bit_offset, 0);
    assert_eq!(member(members, "kind").bit_offset, 32);
    assert_eq!(member(members, "tail").bit_offset, 96);
    assert_eq!(member(members, "tail").bit_field_size, None);
}

#[test]
fn test_data_bit_offset_bit_field()
{
    let records = records();
    let (_, members) = compound(&records, "packet");
    let low = member(members, "low");
    assert_eq!(low.bit_offset, 64);
    assert_eq!(low.bit_field_size, Some(3));
}

#[test]
fn test_legacy_bit_offset_counts_from_the_top()
{
    let records = records();
    let (_, members) = compound(&records, "packet");
    // 64 + (32 - (24 + 5))
    let mid = member(members, "mid");
    assert_eq!(mid.bit_offset, 67);
    assert_eq!(mid.bit_field_size, Some(5));
}

#[test]
fn test_legacy_bit_offset_takes_storage_size_from_the_type()
{
    let records = records();
    let (_, members) = compound(&records, "packet");
    // no DW_AT_byte_size on the member: the u32 typedef's target gives 4 bytes
    let high = member(members, "high");
    assert_eq!(high.bit_offset, 64 + 32 - (16 + 8));
    assert_eq!(high.bit_field_size, Some(8));
}

#[test]
fn test_overflowing_member_offset_is_dropped()
{
    let records = records();
    let (_, members) = compound(&records, "broken");
    assert!(members.iter().all(|m| m.name.as_deref() != Some("far")));
    assert_eq!(member(members, "near").bit_offset, 32);
}

#[test]
fn test_pointer_array_and_typedef_records()
{
    let records = records();
    assert!(records.types.iter().any(|t| matches!(
        &t.kind,
        TypeRecordKind::Pointer {
            pointee: Some(_),
            byte_size: Some(8)
        }
    )));
    assert!(records.types.iter().any(|t| matches!(
        &t.kind,
        TypeRecordKind::Array {
            length: Some(4),
            ..
        }
    )));
    assert!(records.types.iter().any(|t| matches!(
        &t.kind,
        TypeRecordKind::Typedef { name, target: Some(_) } if name == "packet_ptr_t"
    )));
}

#[test]
fn test_global_locations()
{
    let records = records();
    assert_eq!(global_location(&records, "counter"), LocationRecord::Address(COUNTER));
    assert_eq!(
        global_location(&records, "answer"),
        LocationRecord::Constant(ConstValue::Signed(42))
    );
    assert_eq!(
        global_location(&records, "seven"),
        LocationRecord::Constant(ConstValue::Unsigned(7))
    );
    assert_eq!(global_location(&records, "gone"), LocationRecord::OptimizedOut);

    let counter = records.variables.iter().find(|v| v.name == "counter").unwrap();
    assert!(counter.external);
    let table = records.variables.iter().find(|v| v.name == "table").unwrap();
    assert!(!table.external);
}

#[test]
fn test_function_and_local_locations()
{
    let records = records();
    let main = records.functions.iter().find(|f| f.name == "main").unwrap();
    assert_eq!((main.low_pc, main.high_pc), (MAIN, MAIN + 0x20));
    assert_eq!(main.frame_base, FrameBaseRecord::Cfa);
    assert!(main.external);

    let local = |wanted: &str| {
        main.locals
            .iter()
            .find(|l| l.variable.name == wanted)
            .unwrap_or_else(|| panic!("no local {wanted}"))
    };
    assert!(local("argc").parameter);
    assert_eq!(local("argc").variable.location_at(None), &LocationRecord::FrameBaseOffset(-20));
    assert_eq!(local("cursor").variable.location_at(None), &LocationRecord::Register(RBX));
    assert_eq!(
        local("slot").variable.location_at(None),
        &LocationRecord::RegisterOffset {
            register: RBP,
            offset: -8
        }
    );
}

#[test]
fn test_decoded_types_resolve_in_a_program()
{
    let mut records = records();
    records.address_range = Some(START..0x2000);
    let mut program = Program::new(Platform::new(Architecture::X86_64, None).unwrap());
    program.add_module(records, 0).unwrap();

    let packet = program.find_type("struct packet").unwrap();
    assert_eq!(program.size_of(packet).unwrap(), 16);
    let high = program.types().find_member(program.index(), packet, "high").unwrap();
    assert_eq!(program.type_name(high.ty).unwrap(), "u32");
    assert_eq!(program.type_name(program.find_type("packet_ptr_t").unwrap()).unwrap(), "packet_ptr_t");
}

#[test]
fn test_undefined_return_address_survives_decoding()
{
    let records = records();
    let start = records.cfi.iter().find(|c| c.start == START).unwrap();
    assert_eq!(start.return_address_register, RIP);
    assert_eq!(start.rows.len(), 1);
    assert_eq!(start.rows[0].rule_for(RIP), Some(&RegisterRuleRecord::Undefined));
}

#[test]
fn test_cfi_rows_after_prologue()
{
    let records = records();
    let main = records.cfi.iter().find(|c| c.start == MAIN).unwrap();
    assert_eq!(main.rows.len(), 2);

    let entry = &main.rows[0];
    assert_eq!((entry.start, entry.end), (MAIN, MAIN + 4));
    assert_eq!(entry.rule_for(RIP), Some(&RegisterRuleRecord::Offset(-8)));
    assert_eq!(entry.rule_for(RBX), Some(&RegisterRuleRecord::SameValue));
    assert_eq!(entry.rule_for(RBP), None);

    let body = &main.rows[1];
    assert_eq!(body.start, MAIN + 4);
    assert_eq!(body.rule_for(RBP), Some(&RegisterRuleRecord::Offset(-16)));
    assert_eq!(body.rule_for(RBX), Some(&RegisterRuleRecord::SameValue));
}

#[test]
fn test_unwind_stops_at_undefined_return_address()
{
    let mut records = records();
    records.address_range = Some(START..0x2000);
    let platform = Platform::new(Architecture::X86_64, None).unwrap();
    let mut program = Program::with_options(platform, ProgramOptions::default().with_frame_pointer_fallback(false));
    // main's return address points back into _start
    let mut stack = vec![0u8; 0x10];
    stack[..8].copy_from_slice(&(START + 8).to_le_bytes());
    program
        .add_segment(MemorySegment::new(0x8000..0x8010, SegmentBacking::buffer(stack)))
        .unwrap();
    program.add_module(records, 0).unwrap();

    let registers = RegisterSnapshot::from_pc_sp(Architecture::X86_64, MAIN + 2, 0x8000, Some(0x9000)).with(RBX, 77);
    let trace = program.stack_trace(StackStart::Registers(registers)).unwrap();

    assert_eq!(trace.len(), 2, "{:?}", trace.truncation());
    assert!(!trace.is_truncated(), "{:?}", trace.truncation());
    assert_eq!(trace.frames()[0].function_name(), Some("main"));
    let start = &trace.frames()[1];
    assert_eq!(start.pc.value(), START + 8);
    assert_eq!(start.sp(), Some(0x8008));
    assert_eq!(start.registers.get(RBX), Some(77));
    assert_eq!(start.registers.get(RBP), Some(0x9000));
}
