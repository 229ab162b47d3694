//! # ELF and DWARF Loader
//!
//! Decodes one binary into [`ModuleRecords`]:
//!
//! - **symbols** from `.symtab` and `.dynsym`
//! - **types, variables and functions** from a walk over every `.debug_info` unit
//! - **call-frame information** from `.eh_frame`, then `.debug_frame` for
//!   ranges `.eh_frame` does not cover
//! - **line ranges** through `addr2line`
//!
//! Record ids are `.debug_info` offsets, so a reference between DIEs maps
//! directly onto a [`RecordId`] without a second pass.
//!
//! Stripped binaries are paired with a separate debug file found by build id
//! (`<root>/.build-id/xx/yyyy.debug`) or by `.gnu_debuglink` next to the
//! binary, in its `.debug/` directory, or under each search root.

use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::fs;
use std::ops::Range;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use addr2line::Context;
use gimli::{
    constants, AttributeValue, BaseAddresses, CallFrameInstruction, CfaRule, CieOrFde, DebugFrame,
    DebuggingInformationEntry, Dwarf, DwAt, EhFrame, EndianArcSlice, EntriesTreeNode, Expression, FrameDescriptionEntry,
    Operation, Reader, RegisterRule, RunTimeEndian, SectionId, Unit, UnitOffset, UnwindContext, UnwindSection,
    UnwindTableRow,
};
use object::{Object, ObjectSection, ObjectSegment, ObjectSymbol, SectionKind, SymbolFlags};
use tracing::{debug, trace, warn};

use super::records::*;
use crate::error::{map_dwarf_error, map_object_error, FathomError, FathomResult};
use crate::platform::Architecture;
use crate::types::{SymbolBinding, SymbolKind};

type OwnedReader = EndianArcSlice<RunTimeEndian>;
type OwnedDwarf = Dwarf<OwnedReader>;
type Die<'abbrev, 'unit> = DebuggingInformationEntry<'abbrev, 'unit, OwnedReader>;
type Node<'abbrev, 'unit, 'tree> = EntriesTreeNode<'abbrev, 'unit, 'tree, OwnedReader>;

/// Searched for separate debug files after the configured roots.
const DEFAULT_DEBUG_ROOT: &str = "/usr/lib/debug";

/// Hops followed through `DW_AT_specification` / `DW_AT_abstract_origin`.
const MAX_ORIGIN_DEPTH: usize = 8;

/// ELF `STB_GNU_UNIQUE`.
const STB_GNU_UNIQUE: u8 = 10;

/// Read and decode the binary at `path`
///
/// When the binary carries no `.debug_info`, a separate debug file is looked
/// up under `debug_info_paths` (then `/usr/lib/debug`).
///
/// ## Errors
///
/// - [`FathomError::Io`](crate::FathomError::Io) if a file cannot be read
/// - [`FathomError::CorruptDebugInfo`](crate::FathomError::CorruptDebugInfo)
///   if the file is not a recognizable object file
pub fn load_module_records(path: &Path, debug_info_paths: &[PathBuf]) -> FathomResult<ModuleRecords>
{
    let data = fs::read(path)?;
    let file = object::File::parse(&*data)
        .map_err(|err| map_object_error(&format!("parsing {}", path.display()), err))?;
    let name = path
        .file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());

    let mut records = records_from_object(&name, &file)?;
    records.path = Some(path.to_path_buf());

    if file.section_by_name(".debug_info").is_none() {
        if let Some(debug_path) = find_debug_file(path, &file, debug_info_paths) {
            debug!(module = %name, debug_file = %debug_path.display(), "loading separate debug info");
            let debug_data = fs::read(&debug_path)?;
            let debug_file = object::File::parse(&*debug_data)
                .map_err(|err| map_object_error(&format!("parsing {}", debug_path.display()), err))?;
            merge_symbols(&mut records.symbols, symbol_records(&debug_file));
            if records.cfi.is_empty() {
                records.cfi = cfi_records(&debug_file);
            }
            load_dwarf(&debug_file, &mut records)?;
            link_symbol_types(&mut records);
        } else {
            debug!(module = %name, "no debug info found");
        }
    }
    Ok(records)
}

/// Decode an in-memory object file.
pub fn parse_module_records(name: &str, data: &[u8]) -> FathomResult<ModuleRecords>
{
    let file = object::File::parse(data).map_err(|err| map_object_error(&format!("parsing {name}"), err))?;
    records_from_object(name, &file)
}

fn records_from_object(name: &str, file: &object::File<'_>) -> FathomResult<ModuleRecords>
{
    let mut records = ModuleRecords::new(name);
    let architecture = Architecture::from_object(file.architecture());
    records.architecture = (architecture != Architecture::Unknown).then_some(architecture);
    records.address_range = loadable_range(file);
    records.symbols = symbol_records(file);
    records.cfi = cfi_records(file);
    load_dwarf(file, &mut records)?;
    link_symbol_types(&mut records);

    debug!(
        module = name,
        symbols = records.symbols.len(),
        types = records.types.len(),
        functions = records.functions.len(),
        variables = records.variables.len(),
        cfi = records.cfi.len(),
        "decoded module"
    );
    Ok(records)
}

fn loadable_range(file: &object::File<'_>) -> Option<Range<u64>>
{
    let mut ranges: Vec<Range<u64>> = file
        .segments()
        .filter(|s| s.size() > 0)
        .map(|s| s.address()..s.address().saturating_add(s.size()))
        .collect();
    if ranges.is_empty() {
        ranges = file
            .sections()
            .filter(|s| s.address() != 0 && s.size() > 0)
            .map(|s| s.address()..s.address().saturating_add(s.size()))
            .collect();
    }
    let start = ranges.iter().map(|r| r.start).min()?;
    let end = ranges.iter().map(|r| r.end).max()?;
    (start < end).then_some(start..end)
}

fn symbol_records(file: &object::File<'_>) -> Vec<SymbolRecord>
{
    let mut seen = HashSet::new();
    let mut symbols = Vec::new();
    for symbol in file.symbols().chain(file.dynamic_symbols()) {
        if symbol.is_undefined() {
            continue;
        }
        let kind = match symbol.kind() {
            object::SymbolKind::Text => SymbolKind::Function,
            object::SymbolKind::Data => SymbolKind::Object,
            object::SymbolKind::Tls => SymbolKind::Tls,
            object::SymbolKind::Unknown => SymbolKind::Unknown,
            _ => continue,
        };
        let Ok(name) = symbol.name() else {
            continue;
        };
        if name.is_empty() || !seen.insert((name.to_string(), symbol.address())) {
            continue;
        }
        let binding = match symbol.flags() {
            SymbolFlags::Elf { st_info, .. } if st_info >> 4 == STB_GNU_UNIQUE => SymbolBinding::Unique,
            _ if symbol.is_weak() => SymbolBinding::Weak,
            _ if symbol.is_global() => SymbolBinding::Global,
            _ if symbol.is_local() => SymbolBinding::Local,
            _ => SymbolBinding::Unknown,
        };
        symbols.push(SymbolRecord {
            name: name.to_string(),
            address: symbol.address(),
            size: symbol.size(),
            binding,
            kind,
            type_id: None,
        });
    }
    symbols
}

fn merge_symbols(symbols: &mut Vec<SymbolRecord>, extra: Vec<SymbolRecord>)
{
    let known: HashSet<(String, u64)> = symbols.iter().map(|s| (s.name.clone(), s.address)).collect();
    symbols.extend(extra.into_iter().filter(|s| !known.contains(&(s.name.clone(), s.address))));
}

/// Give symbols the type of the function or variable defined at their address.
fn link_symbol_types(records: &mut ModuleRecords)
{
    let functions: HashMap<u64, RecordId> = records
        .functions
        .iter()
        .filter_map(|f| Some((f.low_pc, f.type_id?)))
        .collect();
    let variables: HashMap<u64, RecordId> = records
        .variables
        .iter()
        .filter_map(|v| match v.location_at(None) {
            LocationRecord::Address(address) => Some((*address, v.type_id?)),
            _ => None,
        })
        .collect();
    for symbol in &mut records.symbols {
        symbol.type_id = match symbol.kind {
            SymbolKind::Function => functions.get(&symbol.address).copied(),
            SymbolKind::Object => variables.get(&symbol.address).copied(),
            _ => None,
        };
    }
}

fn find_debug_file(path: &Path, file: &object::File<'_>, search: &[PathBuf]) -> Option<PathBuf>
{
    let mut roots = search.to_vec();
    roots.push(PathBuf::from(DEFAULT_DEBUG_ROOT));

    if let Ok(Some(build_id)) = file.build_id() {
        if let Some(found) = roots.iter().map(|root| build_id_path(root, build_id)).find(|c| c.is_file()) {
            return Some(found);
        }
    }

    let (link, _crc) = file.gnu_debuglink().ok().flatten()?;
    let link = Path::new(OsStr::from_bytes(link));
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut candidates = vec![dir.join(link), dir.join(".debug").join(link)];
    for root in &roots {
        candidates.push(root.join(dir.strip_prefix("/").unwrap_or(dir)).join(link));
        candidates.push(root.join(link));
    }
    candidates.into_iter().find(|c| c.is_file() && c != path)
}

fn build_id_path(root: &Path, build_id: &[u8]) -> PathBuf
{
    let hex: String = build_id.iter().map(|b| format!("{b:02x}")).collect();
    let (head, tail) = hex.split_at(hex.len().min(2));
    root.join(".build-id").join(head).join(format!("{tail}.debug"))
}

fn endian_of(file: &object::File<'_>) -> RunTimeEndian
{
    if file.is_little_endian() {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    }
}

fn section_data(file: &object::File<'_>, name: &str) -> Option<(u64, Arc<[u8]>)>
{
    let section = file.section_by_name(name)?;
    match section.uncompressed_data() {
        Ok(data) => {
            let data: Arc<[u8]> = match data {
                Cow::Borrowed(bytes) => Arc::from(bytes),
                Cow::Owned(vec) => vec.into(),
            };
            Some((section.address(), data))
        }
        Err(err) => {
            warn!(section = name, error = %err, "failed to read section");
            None
        }
    }
}

fn cfi_records(file: &object::File<'_>) -> Vec<CfiRecord>
{
    let endian = endian_of(file);
    let address_size = if file.is_64() { 8 } else { 4 };
    let text = file.section_by_name(".text").map_or(0, |s| s.address());
    let mut records = Vec::new();

    if let Some((address, data)) = section_data(file, ".eh_frame") {
        let mut section = EhFrame::new(&data, endian);
        section.set_address_size(address_size);
        let mut bases = BaseAddresses::default().set_eh_frame(address).set_text(text);
        if let Some(got) = file.section_by_name(".got") {
            bases = bases.set_got(got.address());
        }
        collect_fdes(&section, &bases, ".eh_frame", &mut records);
    }
    if let Some((_, data)) = section_data(file, ".debug_frame") {
        let mut section = DebugFrame::new(&data, endian);
        section.set_address_size(address_size);
        let covered: Vec<Range<u64>> = records.iter().map(|r| r.start..r.end).collect();
        let mut extra = Vec::new();
        collect_fdes(&section, &BaseAddresses::default(), ".debug_frame", &mut extra);
        records.extend(extra.into_iter().filter(|r| !covered.iter().any(|c| c.contains(&r.start))));
    }
    records
}

fn collect_fdes<R, S>(section: &S, bases: &BaseAddresses, name: &str, records: &mut Vec<CfiRecord>)
where
    R: gimli::Reader<Offset = usize>,
    S: UnwindSection<R>,
{
    let mut ctx = UnwindContext::<usize>::new();
    let mut entries = section.entries(bases);
    loop {
        let entry = match entries.next() {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) => {
                warn!(section = name, error = %err, "stopped reading unwind entries");
                break;
            }
        };
        let CieOrFde::Fde(partial) = entry else {
            continue;
        };
        let fde = match partial.parse(|section, bases, offset| section.cie_from_offset(bases, offset)) {
            Ok(fde) => fde,
            Err(err) => {
                trace!(section = name, error = %err, "skipping unparsable FDE");
                continue;
            }
        };
        let start = fde.initial_address();
        let end = start.wrapping_add(fde.len());
        if start >= end {
            continue;
        }

        let rows = (|| -> gimli::Result<Vec<CfiRow>> {
            let undefined = undefined_registers(&fde, section, bases)?;
            let mut table = fde.rows(section, bases, &mut ctx)?;
            let mut rows = Vec::new();
            while let Some(row) = table.next_row()? {
                let at = undefined.iter().rev().find(|(location, _)| *location <= row.start_address());
                rows.push(convert_row(row, at.map_or(&[][..], |(_, registers)| registers)));
            }
            Ok(rows)
        })();

        let (rows, corrupt) = match rows {
            Ok(rows) => (rows, None),
            Err(err) => (Vec::new(), Some(err.to_string())),
        };
        records.push(CfiRecord {
            start,
            end,
            return_address_register: fde.cie().return_address_register().0,
            rows,
            corrupt,
        });
    }
}

/// Registers explicitly marked undefined, as `(from address, registers)` changes
///
/// gimli stores `DW_CFA_undefined` as the absence of a rule, which is not the
/// same as a register the CIE never mentions, so the instructions are
/// replayed to recover it.
fn undefined_registers<R, S>(
    fde: &FrameDescriptionEntry<R>,
    section: &S,
    bases: &BaseAddresses,
) -> gimli::Result<Vec<(u64, Vec<u16>)>>
where
    R: gimli::Reader<Offset = usize>,
    S: UnwindSection<R>,
{
    let mut initial = Vec::new();
    let mut stack = Vec::new();
    let mut instructions = fde.cie().instructions(section, bases);
    while let Some(instruction) = instructions.next()? {
        track_undefined(&instruction, &mut initial, &[], &mut stack);
    }

    let factor = fde.cie().code_alignment_factor();
    let mut location = fde.initial_address();
    let mut undefined = initial.clone();
    let mut changes = vec![(location, undefined.clone())];
    stack.clear();
    let mut instructions = fde.instructions(section, bases);
    while let Some(instruction) = instructions.next()? {
        match instruction {
            CallFrameInstruction::AdvanceLoc { delta } => {
                location = location.wrapping_add(u64::from(delta).wrapping_mul(factor));
            }
            CallFrameInstruction::SetLoc { address } => location = address,
            other => {
                let before = undefined.clone();
                track_undefined(&other, &mut undefined, &initial, &mut stack);
                if undefined != before {
                    changes.push((location, undefined.clone()));
                }
            }
        }
    }
    Ok(changes)
}

fn track_undefined(
    instruction: &CallFrameInstruction<usize>,
    undefined: &mut Vec<u16>,
    initial: &[u16],
    stack: &mut Vec<Vec<u16>>,
)
{
    let (register, now_undefined) = match instruction {
        CallFrameInstruction::Undefined { register } => (*register, true),
        CallFrameInstruction::SameValue { register }
        | CallFrameInstruction::Offset { register, .. }
        | CallFrameInstruction::OffsetExtendedSf { register, .. }
        | CallFrameInstruction::ValOffset { register, .. }
        | CallFrameInstruction::ValOffsetSf { register, .. }
        | CallFrameInstruction::Expression { register, .. }
        | CallFrameInstruction::ValExpression { register, .. } => (*register, false),
        CallFrameInstruction::Register { dest_register, .. } => (*dest_register, false),
        CallFrameInstruction::Restore { register } => (*register, initial.contains(&register.0)),
        CallFrameInstruction::RememberState => {
            stack.push(undefined.clone());
            return;
        }
        CallFrameInstruction::RestoreState => {
            if let Some(saved) = stack.pop() {
                *undefined = saved;
            }
            return;
        }
        _ => return,
    };
    undefined.retain(|number| *number != register.0);
    if now_undefined {
        undefined.push(register.0);
    }
}

fn convert_row(row: &UnwindTableRow<usize>, undefined: &[u16]) -> CfiRow
{
    let cfa = match row.cfa() {
        CfaRule::RegisterAndOffset { register, offset } => CfaRuleRecord::RegisterOffset {
            register: register.0,
            offset: *offset,
        },
        _ => CfaRuleRecord::Unsupported("DWARF expression CFA".into()),
    };
    let mut registers = row
        .registers()
        .map(|pair| {
            let (register, rule) = pair;
            let rule = match rule {
                RegisterRule::Undefined => RegisterRuleRecord::Undefined,
                RegisterRule::SameValue => RegisterRuleRecord::SameValue,
                RegisterRule::Offset(offset) => RegisterRuleRecord::Offset(*offset),
                RegisterRule::ValOffset(offset) => RegisterRuleRecord::ValOffset(*offset),
                RegisterRule::Register(other) => RegisterRuleRecord::Register(other.0),
                _ => RegisterRuleRecord::Unsupported("expression register rule".into()),
            };
            (register.0, rule)
        })
        .collect::<Vec<_>>();
    for number in undefined {
        if !registers.iter().any(|(n, _)| n == number) {
            registers.push((*number, RegisterRuleRecord::Undefined));
        }
    }
    CfiRow {
        start: row.start_address(),
        end: row.end_address(),
        cfa,
        registers,
    }
}

fn bytes_to_bits(bytes: u64, what: &str) -> FathomResult<u64>
{
    bytes
        .checked_mul(8)
        .ok_or_else(|| FathomError::CorruptDebugInfo(format!("{what} of {bytes} bytes overflows a bit offset")))
}

/// Sections of the DWARF data, loaded once and shared by every reader.
struct DebugSections
{
    sections: HashMap<SectionId, Arc<[u8]>>,
    endian: RunTimeEndian,
}

impl DebugSections
{
    const IDS: &'static [SectionId] = &[
        SectionId::DebugAbbrev,
        SectionId::DebugAddr,
        SectionId::DebugInfo,
        SectionId::DebugLine,
        SectionId::DebugLineStr,
        SectionId::DebugLoc,
        SectionId::DebugLocLists,
        SectionId::DebugRanges,
        SectionId::DebugRngLists,
        SectionId::DebugStr,
        SectionId::DebugStrOffsets,
    ];

    fn from_object(file: &object::File<'_>) -> Self
    {
        let sections = Self::IDS
            .iter()
            .filter_map(|id| section_data(file, id.name()).map(|(_, data)| (*id, data)))
            .collect();
        Self {
            sections,
            endian: endian_of(file),
        }
    }

    fn has_info(&self) -> bool
    {
        self.sections.contains_key(&SectionId::DebugInfo)
    }

    fn dwarf(&self) -> FathomResult<OwnedDwarf>
    {
        Dwarf::load(|id| {
            let data = self
                .sections
                .get(&id)
                .cloned()
                .unwrap_or_else(|| Arc::<[u8]>::from(Vec::new()));
            Ok::<_, gimli::Error>(EndianArcSlice::new(data, self.endian))
        })
        .map_err(|err| map_dwarf_error("loading DWARF sections", err))
    }
}

fn load_dwarf(file: &object::File<'_>, records: &mut ModuleRecords) -> FathomResult<()>
{
    let sections = DebugSections::from_object(file);
    if !sections.has_info() {
        return Ok(());
    }
    let dwarf = sections.dwarf()?;
    let little_endian = file.is_little_endian();

    let mut headers = dwarf.units();
    while let Some(header) = headers
        .next()
        .map_err(|err| map_dwarf_error("reading .debug_info unit header", err))?
    {
        let unit = match dwarf.unit(header) {
            Ok(unit) => unit,
            Err(err) => {
                warn!(module = %records.name, error = %err, "skipping unparsable unit");
                continue;
            }
        };
        let mut walker = UnitWalker {
            dwarf: &dwarf,
            unit: &unit,
            records: &mut *records,
            little_endian,
        };
        if let Err(err) = walker.walk() {
            warn!(module = %records.name, error = %err, "stopped decoding unit");
        }
    }

    let text: Vec<Range<u64>> = file
        .sections()
        .filter(|s| s.kind() == SectionKind::Text && s.size() > 0)
        .map(|s| s.address()..s.address().saturating_add(s.size()))
        .collect();
    records.lines = line_records(sections.dwarf()?, &text);
    Ok(())
}

fn line_records(dwarf: OwnedDwarf, text: &[Range<u64>]) -> Vec<LineRecord>
{
    let context = match Context::from_dwarf(dwarf) {
        Ok(context) => context,
        Err(err) => {
            warn!(error = %err, "failed to build line table context");
            return Vec::new();
        }
    };
    let mut lines = Vec::new();
    for range in text {
        let iter = match context.find_location_range(range.start, range.end) {
            Ok(iter) => iter,
            Err(err) => {
                debug!(error = %err, start = range.start, "no line table for range");
                continue;
            }
        };
        for (start, length, location) in iter {
            let Some(file) = location.file else {
                continue;
            };
            lines.push(LineRecord {
                start,
                end: start.saturating_add(length.max(1)),
                file: file.to_string(),
                line: location.line,
                column: location.column,
            });
        }
    }
    lines
}

/// Locals and signature gathered while walking one subprogram.
#[derive(Default)]
struct FunctionParts
{
    locals: Vec<LocalRecord>,
    parameters: Vec<Option<RecordId>>,
    variadic: bool,
}

/// Turns the DIE tree of one unit into records.
struct UnitWalker<'a>
{
    dwarf: &'a OwnedDwarf,
    unit: &'a Unit<OwnedReader>,
    records: &'a mut ModuleRecords,
    little_endian: bool,
}

impl<'a> UnitWalker<'a>
{
    fn walk(&mut self) -> FathomResult<()>
    {
        let mut tree = self
            .unit
            .entries_tree(None)
            .map_err(|err| map_dwarf_error("building DIE tree", err))?;
        let root = tree.root().map_err(|err| map_dwarf_error("navigating unit root", err))?;
        self.visit(root)
    }

    fn visit(&mut self, node: Node<'_, '_, '_>) -> FathomResult<()>
    {
        let entry = node.entry().clone();
        match entry.tag() {
            constants::DW_TAG_compile_unit | constants::DW_TAG_partial_unit | constants::DW_TAG_namespace => {
                self.visit_children(node)
            }
            constants::DW_TAG_base_type => self.base_type(&entry),
            constants::DW_TAG_pointer_type
            | constants::DW_TAG_reference_type
            | constants::DW_TAG_rvalue_reference_type => {
                let pointee = self.type_ref(&entry)?;
                let byte_size = self.udata(&entry, constants::DW_AT_byte_size)?;
                self.push_type(&entry, TypeRecordKind::Pointer { pointee, byte_size });
                Ok(())
            }
            constants::DW_TAG_const_type
            | constants::DW_TAG_volatile_type
            | constants::DW_TAG_restrict_type
            | constants::DW_TAG_atomic_type => {
                let qualifiers = match entry.tag() {
                    constants::DW_TAG_const_type => Qualifiers::CONST,
                    constants::DW_TAG_volatile_type => Qualifiers::VOLATILE,
                    constants::DW_TAG_restrict_type => Qualifiers::RESTRICT,
                    _ => Qualifiers::ATOMIC,
                };
                let target = self.type_ref(&entry)?;
                self.push_type(&entry, TypeRecordKind::Qualified { qualifiers, target });
                Ok(())
            }
            constants::DW_TAG_typedef => {
                if let Some(name) = self.name(&entry)? {
                    let target = self.type_ref(&entry)?;
                    self.push_type(&entry, TypeRecordKind::Typedef { name, target });
                }
                Ok(())
            }
            constants::DW_TAG_unspecified_type => {
                self.push_type(&entry, TypeRecordKind::Void);
                Ok(())
            }
            constants::DW_TAG_structure_type | constants::DW_TAG_class_type | constants::DW_TAG_union_type => {
                self.compound(&entry, node)
            }
            constants::DW_TAG_enumeration_type => self.enumeration(&entry, node),
            constants::DW_TAG_array_type => self.array(&entry, node),
            constants::DW_TAG_subroutine_type => self.subroutine_type(&entry, node),
            constants::DW_TAG_variable => {
                if let Some(variable) = self.variable(&entry)? {
                    self.records.variables.push(variable);
                }
                Ok(())
            }
            constants::DW_TAG_subprogram => self.subprogram(&entry, node),
            _ => Ok(()),
        }
    }

    fn visit_children(&mut self, node: Node<'_, '_, '_>) -> FathomResult<()>
    {
        let mut children = node.children();
        while let Some(child) = children
            .next()
            .map_err(|err| map_dwarf_error("iterating DIE children", err))?
        {
            self.visit(child)?;
        }
        Ok(())
    }

    fn push_type(&mut self, entry: &Die<'_, '_>, kind: TypeRecordKind)
    {
        if let Some(id) = self.record_id(entry.offset()) {
            self.records.types.push(TypeRecord { id, kind });
        }
    }

    fn base_type(&mut self, entry: &Die<'_, '_>) -> FathomResult<()>
    {
        let (Some(name), Some(byte_size)) = (self.name(entry)?, self.udata(entry, constants::DW_AT_byte_size)?)
        else {
            return Ok(());
        };
        let encoding = match self.attr(entry, constants::DW_AT_encoding)? {
            Some(AttributeValue::Encoding(encoding)) => match encoding {
                constants::DW_ATE_signed | constants::DW_ATE_signed_char | constants::DW_ATE_signed_fixed => {
                    BaseEncoding::Signed
                }
                constants::DW_ATE_boolean => BaseEncoding::Bool,
                constants::DW_ATE_float => BaseEncoding::Float,
                _ => BaseEncoding::Unsigned,
            },
            _ => BaseEncoding::Unsigned,
        };
        self.push_type(
            entry,
            TypeRecordKind::Base {
                name,
                encoding,
                byte_size,
            },
        );
        Ok(())
    }

    fn compound(&mut self, entry: &Die<'_, '_>, node: Node<'_, '_, '_>) -> FathomResult<()>
    {
        let kind = match entry.tag() {
            constants::DW_TAG_union_type => CompoundKind::Union,
            constants::DW_TAG_class_type => CompoundKind::Class,
            _ => CompoundKind::Struct,
        };
        let name = self.name(entry)?;
        let byte_size = self.udata(entry, constants::DW_AT_byte_size)?;
        let declaration = self.flag(entry, constants::DW_AT_declaration)?;

        let mut members = Vec::new();
        let mut children = node.children();
        while let Some(child) = children
            .next()
            .map_err(|err| map_dwarf_error("iterating members", err))?
        {
            let child_entry = child.entry().clone();
            match child_entry.tag() {
                constants::DW_TAG_member | constants::DW_TAG_inheritance => {
                    match self.member(&child_entry) {
                        Ok(Some(member)) => members.push(member),
                        Ok(None) => {}
                        Err(err) => warn!(compound = ?name, error = %err, "skipping member"),
                    }
                }
                _ => self.visit(child)?,
            }
        }

        self.push_type(
            entry,
            TypeRecordKind::Compound {
                kind,
                name,
                byte_size,
                members,
                declaration,
            },
        );
        Ok(())
    }

    fn member(&self, entry: &Die<'_, '_>) -> FathomResult<Option<MemberRecord>>
    {
        // static data members have no storage in the object
        if self.flag(entry, constants::DW_AT_declaration)? || self.flag(entry, constants::DW_AT_external)? {
            return Ok(None);
        }
        let Some(type_id) = self.type_ref(entry)? else {
            return Ok(None);
        };
        let name = match entry.tag() {
            constants::DW_TAG_inheritance => None,
            _ => self.name(entry)?,
        };
        let bit_field_size = self.udata(entry, constants::DW_AT_bit_size)?;

        let location = match self.attr(entry, constants::DW_AT_data_member_location)? {
            Some(AttributeValue::Exprloc(expression)) => {
                let mut operations = expression.operations(self.unit.encoding());
                match operations.next() {
                    Ok(Some(Operation::PlusConstant { value })) => value,
                    _ => 0,
                }
            }
            Some(value) => value.udata_value().unwrap_or(0),
            None => 0,
        };
        let location_bits = bytes_to_bits(location, "member offset")?;

        let bit_offset = if let Some(bits) = self.udata(entry, constants::DW_AT_data_bit_offset)? {
            bits
        } else if let (Some(legacy), Some(width)) = (self.udata(entry, constants::DW_AT_bit_offset)?, bit_field_size) {
            // DWARF 2 counts from the most significant bit of the storage unit
            if self.little_endian {
                let storage = match self.udata(entry, constants::DW_AT_byte_size)? {
                    Some(size) => size,
                    None => self.storage_size(entry)?,
                };
                let storage_bits = bytes_to_bits(storage, "bit-field storage size")?;
                location_bits.saturating_add(storage_bits.saturating_sub(legacy.saturating_add(width)))
            } else {
                location_bits.saturating_add(legacy)
            }
        } else {
            location_bits
        };

        Ok(Some(MemberRecord {
            name,
            type_id,
            bit_offset,
            bit_field_size,
        }))
    }

    /// Byte size of a member's type, looking through typedefs and qualifiers.
    fn storage_size(&self, entry: &Die<'_, '_>) -> FathomResult<u64>
    {
        let mut reference = self.attr(entry, constants::DW_AT_type)?;
        for _ in 0..MAX_ORIGIN_DEPTH {
            let Some(AttributeValue::UnitRef(offset)) = reference else {
                break;
            };
            let target = self
                .unit
                .entry(offset)
                .map_err(|err| map_dwarf_error("resolving member type", err))?;
            if let Some(size) = self.udata(&target, constants::DW_AT_byte_size)? {
                return Ok(size);
            }
            match target.tag() {
                constants::DW_TAG_typedef
                | constants::DW_TAG_const_type
                | constants::DW_TAG_volatile_type
                | constants::DW_TAG_restrict_type
                | constants::DW_TAG_atomic_type => reference = self.attr(&target, constants::DW_AT_type)?,
                _ => break,
            }
        }
        Err(FathomError::CorruptDebugInfo(
            "bit-field with DW_AT_bit_offset has no storage unit size".into(),
        ))
    }

    fn enumeration(&mut self, entry: &Die<'_, '_>, node: Node<'_, '_, '_>) -> FathomResult<()>
    {
        let name = self.name(entry)?;
        let underlying = self.type_ref(entry)?;
        let byte_size = self.udata(entry, constants::DW_AT_byte_size)?;
        let declaration = self.flag(entry, constants::DW_AT_declaration)?;

        let mut enumerators = Vec::new();
        let mut children = node.children();
        while let Some(child) = children
            .next()
            .map_err(|err| map_dwarf_error("iterating enumerators", err))?
        {
            let child_entry = child.entry();
            if child_entry.tag() != constants::DW_TAG_enumerator {
                continue;
            }
            let Some(name) = self.name(child_entry)? else {
                continue;
            };
            let value = child_entry
                .attr(constants::DW_AT_const_value)
                .map_err(|err| map_dwarf_error("reading DW_AT_const_value", err))?
                .and_then(|attr| attr.sdata_value().or_else(|| attr.udata_value().map(|v| v as i64)))
                .unwrap_or(0);
            enumerators.push(EnumeratorRecord { name, value });
        }

        self.push_type(
            entry,
            TypeRecordKind::Enum {
                name,
                underlying,
                byte_size,
                enumerators,
                declaration,
            },
        );
        Ok(())
    }

    /// Multi-dimensional arrays become nested array records; inner
    /// dimensions take the id of their subrange DIE.
    fn array(&mut self, entry: &Die<'_, '_>, node: Node<'_, '_, '_>) -> FathomResult<()>
    {
        let Some(element) = self.type_ref(entry)? else {
            return Ok(());
        };
        let mut dimensions: Vec<(UnitOffset, Option<u64>)> = Vec::new();
        let mut children = node.children();
        while let Some(child) = children
            .next()
            .map_err(|err| map_dwarf_error("iterating subranges", err))?
        {
            let sub = child.entry();
            if sub.tag() != constants::DW_TAG_subrange_type {
                continue;
            }
            let length = match self.udata(sub, constants::DW_AT_count)? {
                Some(count) => Some(count),
                None => self
                    .udata(sub, constants::DW_AT_upper_bound)?
                    .map(|upper| upper.wrapping_add(1)),
            };
            dimensions.push((sub.offset(), length));
        }

        let Some(((_, outer_length), inner)) = dimensions.split_first() else {
            self.push_type(entry, TypeRecordKind::Array { element, length: None });
            return Ok(());
        };
        let mut element = element;
        for (offset, length) in inner.iter().rev() {
            let Some(id) = self.record_id(*offset) else {
                continue;
            };
            self.records.types.push(TypeRecord {
                id,
                kind: TypeRecordKind::Array {
                    element,
                    length: *length,
                },
            });
            element = id;
        }
        self.push_type(
            entry,
            TypeRecordKind::Array {
                element,
                length: *outer_length,
            },
        );
        Ok(())
    }

    fn subroutine_type(&mut self, entry: &Die<'_, '_>, node: Node<'_, '_, '_>) -> FathomResult<()>
    {
        let return_type = self.type_ref(entry)?;
        let mut parameters = Vec::new();
        let mut variadic = false;
        let mut children = node.children();
        while let Some(child) = children
            .next()
            .map_err(|err| map_dwarf_error("iterating parameters", err))?
        {
            match child.entry().tag() {
                constants::DW_TAG_formal_parameter => parameters.push(self.type_ref(child.entry())?),
                constants::DW_TAG_unspecified_parameters => variadic = true,
                _ => {}
            }
        }
        self.push_type(
            entry,
            TypeRecordKind::Function {
                return_type,
                parameters,
                variadic,
            },
        );
        Ok(())
    }

    /// A concrete subprogram yields a function record and doubles as its own
    /// function type record.
    fn subprogram(&mut self, entry: &Die<'_, '_>, node: Node<'_, '_, '_>) -> FathomResult<()>
    {
        let ranges = self.ranges(entry)?;
        let mut parts = FunctionParts::default();
        self.collect_locals(node, 0, &[], &mut parts)?;

        let return_type = self.type_from(self.inherited(entry, constants::DW_AT_type)?);
        let type_id = self.record_id(entry.offset());
        self.push_type(
            entry,
            TypeRecordKind::Function {
                return_type,
                parameters: parts.parameters,
                variadic: parts.variadic,
            },
        );

        let (Some(low_pc), Some(high_pc)) =
            (ranges.iter().map(|r| r.start).min(), ranges.iter().map(|r| r.end).max())
        else {
            return Ok(());
        };
        let Some(name) = self.inherited_string(entry, constants::DW_AT_name)? else {
            return Ok(());
        };
        let linkage_name = match self.inherited_string(entry, constants::DW_AT_linkage_name)? {
            Some(name) => Some(name),
            None => self.inherited_string(entry, constants::DW_AT_MIPS_linkage_name)?,
        };
        let frame_base = match self.attr(entry, constants::DW_AT_frame_base)? {
            Some(AttributeValue::Exprloc(expression)) => self.frame_base(expression)?,
            _ => FrameBaseRecord::Unknown,
        };

        trace!(function = %name, low_pc, high_pc, locals = parts.locals.len(), "function");
        self.records.functions.push(FunctionRecord {
            name,
            linkage_name,
            low_pc,
            high_pc,
            type_id,
            frame_base,
            locals: parts.locals,
            external: matches!(
                self.inherited(entry, constants::DW_AT_external)?,
                Some(AttributeValue::Flag(true))
            ),
        });
        Ok(())
    }

    fn collect_locals(
        &mut self,
        node: Node<'_, '_, '_>,
        depth: u32,
        scope: &[Range<u64>],
        parts: &mut FunctionParts,
    ) -> FathomResult<()>
    {
        let mut children = node.children();
        while let Some(child) = children
            .next()
            .map_err(|err| map_dwarf_error("iterating function body", err))?
        {
            let entry = child.entry().clone();
            match entry.tag() {
                constants::DW_TAG_formal_parameter | constants::DW_TAG_variable => {
                    let parameter = entry.tag() == constants::DW_TAG_formal_parameter;
                    if parameter && depth == 0 {
                        parts.parameters.push(self.type_from(self.inherited(&entry, constants::DW_AT_type)?));
                    }
                    if let Some(variable) = self.variable(&entry)? {
                        parts.locals.push(LocalRecord {
                            variable,
                            parameter,
                            scope: scope.to_vec(),
                            depth,
                        });
                    }
                }
                constants::DW_TAG_unspecified_parameters if depth == 0 => parts.variadic = true,
                constants::DW_TAG_lexical_block => {
                    let ranges = self.ranges(&entry)?;
                    let inner = if ranges.is_empty() { scope.to_vec() } else { ranges };
                    self.collect_locals(child, depth + 1, &inner, parts)?;
                }
                // inlined bodies are attributed to the caller
                constants::DW_TAG_inlined_subroutine => {}
                _ => self.visit(child)?,
            }
        }
        Ok(())
    }

    fn variable(&self, entry: &Die<'_, '_>) -> FathomResult<Option<VariableRecord>>
    {
        let Some(name) = self.inherited_string(entry, constants::DW_AT_name)? else {
            return Ok(None);
        };
        let location = self.attr(entry, constants::DW_AT_location)?;
        let const_value = entry
            .attr(constants::DW_AT_const_value)
            .map_err(|err| map_dwarf_error("reading DW_AT_const_value", err))?;
        if location.is_none() && const_value.is_none() && self.flag(entry, constants::DW_AT_declaration)? {
            return Ok(None);
        }

        let locations = match (location, const_value) {
            (Some(value), _) => self.locations(value)?,
            (None, Some(attr)) => {
                let value = match attr.value() {
                    AttributeValue::Sdata(v) => ConstValue::Signed(v),
                    AttributeValue::Block(block) => ConstValue::Bytes(
                        block
                            .to_slice()
                            .map_err(|err| map_dwarf_error("reading constant block", err))?
                            .into_owned(),
                    ),
                    _ => ConstValue::Unsigned(attr.udata_value().unwrap_or(0)),
                };
                vec![LocationEntry {
                    range: None,
                    location: LocationRecord::Constant(value),
                }]
            }
            (None, None) => Vec::new(),
        };

        let linkage_name = match self.inherited_string(entry, constants::DW_AT_linkage_name)? {
            Some(name) => Some(name),
            None => self.inherited_string(entry, constants::DW_AT_MIPS_linkage_name)?,
        };
        Ok(Some(VariableRecord {
            name,
            linkage_name,
            type_id: self.type_from(self.inherited(entry, constants::DW_AT_type)?),
            locations,
            external: matches!(
                self.inherited(entry, constants::DW_AT_external)?,
                Some(AttributeValue::Flag(true))
            ),
        }))
    }

    fn locations(&self, value: AttributeValue<OwnedReader>) -> FathomResult<Vec<LocationEntry>>
    {
        match value {
            AttributeValue::Exprloc(expression) => Ok(vec![LocationEntry {
                range: None,
                location: self.decode_location(expression)?,
            }]),
            AttributeValue::LocationListsRef(offset) => {
                let mut iter = self
                    .dwarf
                    .locations(self.unit, offset)
                    .map_err(|err| map_dwarf_error("reading location list", err))?;
                let mut entries = Vec::new();
                while let Some(entry) = iter
                    .next()
                    .map_err(|err| map_dwarf_error("reading location list entry", err))?
                {
                    if entry.range.begin >= entry.range.end {
                        continue;
                    }
                    entries.push(LocationEntry {
                        range: Some(entry.range.begin..entry.range.end),
                        location: self.decode_location(entry.data)?,
                    });
                }
                Ok(entries)
            }
            _ => Ok(vec![LocationEntry {
                range: None,
                location: LocationRecord::Unsupported("location attribute form".into()),
            }]),
        }
    }

    fn operations(&self, expression: Expression<OwnedReader>) -> FathomResult<Vec<Operation<OwnedReader>>>
    {
        let mut iter = expression.operations(self.unit.encoding());
        let mut operations = Vec::new();
        while let Some(operation) = iter
            .next()
            .map_err(|err| map_dwarf_error("decoding location expression", err))?
        {
            operations.push(operation);
        }
        Ok(operations)
    }

    fn decode_location(&self, expression: Expression<OwnedReader>) -> FathomResult<LocationRecord>
    {
        let operations = self.operations(expression)?;
        let location = match operations.as_slice() {
            [] => LocationRecord::OptimizedOut,
            [Operation::Address { address }] => LocationRecord::Address(*address),
            [Operation::AddressIndex { index }] => LocationRecord::Address(
                self.dwarf
                    .address(self.unit, *index)
                    .map_err(|err| map_dwarf_error("resolving DW_OP_addrx", err))?,
            ),
            [Operation::Register { register }] => LocationRecord::Register(register.0),
            [Operation::FrameOffset { offset }] => LocationRecord::FrameBaseOffset(*offset),
            [Operation::RegisterOffset { register, offset, .. }] => LocationRecord::RegisterOffset {
                register: register.0,
                offset: *offset,
            },
            [Operation::UnsignedConstant { value }, Operation::StackValue] => {
                LocationRecord::Constant(ConstValue::Unsigned(*value))
            }
            [Operation::SignedConstant { value }, Operation::StackValue] => {
                LocationRecord::Constant(ConstValue::Signed(*value))
            }
            [Operation::ImplicitValue { data }] => LocationRecord::Constant(ConstValue::Bytes(
                data.to_slice()
                    .map_err(|err| map_dwarf_error("reading implicit value", err))?
                    .into_owned(),
            )),
            other => LocationRecord::Unsupported(format!("{}-operation location expression", other.len())),
        };
        Ok(location)
    }

    fn frame_base(&self, expression: Expression<OwnedReader>) -> FathomResult<FrameBaseRecord>
    {
        Ok(match self.operations(expression)?.as_slice() {
            [Operation::CallFrameCFA] => FrameBaseRecord::Cfa,
            [Operation::Register { register }] => FrameBaseRecord::Register(register.0),
            [Operation::RegisterOffset { register, offset, .. }] => FrameBaseRecord::RegisterOffset {
                register: register.0,
                offset: *offset,
            },
            _ => FrameBaseRecord::Unknown,
        })
    }

    fn ranges(&self, entry: &Die<'_, '_>) -> FathomResult<Vec<Range<u64>>>
    {
        let mut iter = self
            .dwarf
            .die_ranges(self.unit, entry)
            .map_err(|err| map_dwarf_error("reading DIE ranges", err))?;
        let mut ranges = Vec::new();
        while let Some(range) = iter.next().map_err(|err| map_dwarf_error("reading range", err))? {
            // address 0 marks code discarded by the linker
            if range.begin != 0 && range.begin < range.end {
                ranges.push(range.begin..range.end);
            }
        }
        Ok(ranges)
    }

    fn record_id(&self, offset: UnitOffset) -> Option<RecordId>
    {
        offset
            .to_debug_info_offset(&self.unit.header)
            .map(|o| RecordId(o.0 as u64))
    }

    fn type_ref(&self, entry: &Die<'_, '_>) -> FathomResult<Option<RecordId>>
    {
        Ok(self.type_from(self.attr(entry, constants::DW_AT_type)?))
    }

    /// Type references into `.debug_types` are not followed and read as `void`.
    fn type_from(&self, value: Option<AttributeValue<OwnedReader>>) -> Option<RecordId>
    {
        match value? {
            AttributeValue::UnitRef(offset) => self.record_id(offset),
            AttributeValue::DebugInfoRef(offset) => Some(RecordId(offset.0 as u64)),
            _ => None,
        }
    }

    fn attr(&self, entry: &Die<'_, '_>, name: DwAt) -> FathomResult<Option<AttributeValue<OwnedReader>>>
    {
        entry
            .attr_value(name)
            .map_err(|err| map_dwarf_error(&format!("reading {name}"), err))
    }

    fn udata(&self, entry: &Die<'_, '_>, name: DwAt) -> FathomResult<Option<u64>>
    {
        Ok(entry
            .attr(name)
            .map_err(|err| map_dwarf_error(&format!("reading {name}"), err))?
            .and_then(|attr| attr.udata_value()))
    }

    fn flag(&self, entry: &Die<'_, '_>, name: DwAt) -> FathomResult<bool>
    {
        Ok(matches!(self.attr(entry, name)?, Some(AttributeValue::Flag(true))))
    }

    fn name(&self, entry: &Die<'_, '_>) -> FathomResult<Option<String>>
    {
        self.attr(entry, constants::DW_AT_name)?
            .map(|value| self.string(value))
            .transpose()
    }

    fn string(&self, value: AttributeValue<OwnedReader>) -> FathomResult<String>
    {
        let reader = self
            .dwarf
            .attr_string(self.unit, value)
            .map_err(|err| map_dwarf_error("resolving DWARF string", err))?;
        let text = reader
            .to_string_lossy()
            .map_err(|err| map_dwarf_error("decoding DWARF string", err))?;
        Ok(text.into_owned())
    }

    /// Declaration or abstract instance this DIE completes.
    fn origin_of(&self, entry: &Die<'_, '_>) -> FathomResult<Option<Die<'a, 'a>>>
    {
        for name in [constants::DW_AT_specification, constants::DW_AT_abstract_origin] {
            if let Some(AttributeValue::UnitRef(offset)) = self.attr(entry, name)? {
                let origin = self
                    .unit
                    .entry(offset)
                    .map_err(|err| map_dwarf_error("resolving DIE origin", err))?;
                return Ok(Some(origin));
            }
        }
        Ok(None)
    }

    /// Attribute of the DIE or, failing that, of the DIEs it completes.
    fn inherited(&self, entry: &Die<'_, '_>, name: DwAt) -> FathomResult<Option<AttributeValue<OwnedReader>>>
    {
        if let Some(value) = self.attr(entry, name)? {
            return Ok(Some(value));
        }
        let mut current = self.origin_of(entry)?;
        for _ in 0..MAX_ORIGIN_DEPTH {
            let Some(origin) = current else {
                break;
            };
            if let Some(value) = self.attr(&origin, name)? {
                return Ok(Some(value));
            }
            current = self.origin_of(&origin)?;
        }
        Ok(None)
    }

    fn inherited_string(&self, entry: &Die<'_, '_>, name: DwAt) -> FathomResult<Option<String>>
    {
        self.inherited(entry, name)?.map(|value| self.string(value)).transpose()
    }
}
