//! # Debug-Info Index
//!
//! Indexes the decoded records of every loaded module two ways:
//!
//! - **by name**: symbols, types (per C name space), variables and functions
//! - **by address**: symbols, functions, CFI rows and line-table ranges
//!
//! Lookups by name return every candidate in module load order; choosing
//! between same-named candidates is the caller's job (see
//! [`crate::config::SymbolPrecedence`]). Absence is reported as
//! [`FathomError::NotFound`] for name lookups and `None` for address lookups,
//! where "nothing here" is routine.
//!
//! Modules are immutable once added and shared behind `Arc`, so references
//! handed out by lookups stay valid while the index grows.

pub mod demangle;
pub mod dwarf;
pub mod records;

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

pub use records::*;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::error::{FathomError, FathomResult, LookupKind};
use crate::types::{Address, SourceLocation, Symbol, SymbolName};
use crate::typesys::TypeId;

/// Load-order position of a module. Also its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u32);

impl fmt::Display for ModuleId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "module#{}", self.0)
    }
}

type Candidates = SmallVec<[usize; 1]>;

/// One loaded binary with its lookup structures.
pub struct Module
{
    id: ModuleId,
    records: ModuleRecords,
    bias: u64,
    /// Runtime address range.
    range: Option<Range<u64>>,
    symbols_by_name: HashMap<String, Candidates>,
    types_by_name: HashMap<(TypeNamespace, String), Candidates>,
    variables_by_name: HashMap<String, Candidates>,
    functions_by_name: HashMap<String, Candidates>,
    type_positions: HashMap<RecordId, usize>,
    /// Symbol indexes sorted by file address.
    symbols_by_address: Vec<usize>,
    /// Function indexes sorted by `low_pc`.
    functions_by_address: Vec<usize>,
    /// CFI indexes sorted by start address.
    cfi_by_address: Vec<usize>,
    /// Line indexes sorted by start address.
    lines_by_address: Vec<usize>,
}

impl Module
{
    fn build(id: ModuleId, records: ModuleRecords, bias: u64) -> Self
    {
        let mut symbols_by_name: HashMap<String, Candidates> = HashMap::new();
        for (i, symbol) in records.symbols.iter().enumerate() {
            if symbol.name.is_empty() {
                continue;
            }
            symbols_by_name.entry(symbol.name.clone()).or_default().push(i);
            let demangled = demangle::make_symbol_name(symbol.name.as_str());
            if let Some(pretty) = demangled.demangled() {
                if pretty != symbol.name {
                    symbols_by_name.entry(pretty.to_string()).or_default().push(i);
                }
            }
        }

        let mut types_by_name: HashMap<(TypeNamespace, String), Candidates> = HashMap::new();
        let mut type_positions = HashMap::with_capacity(records.types.len());
        for (i, record) in records.types.iter().enumerate() {
            type_positions.insert(record.id, i);
            if let Some((namespace, name)) = record.kind.indexed_name() {
                types_by_name.entry((namespace, name.to_string())).or_default().push(i);
            }
        }

        let mut variables_by_name: HashMap<String, Candidates> = HashMap::new();
        for (i, variable) in records.variables.iter().enumerate() {
            variables_by_name.entry(variable.name.clone()).or_default().push(i);
            if let Some(linkage) = &variable.linkage_name {
                if linkage != &variable.name {
                    variables_by_name.entry(linkage.clone()).or_default().push(i);
                }
            }
        }

        let mut functions_by_name: HashMap<String, Candidates> = HashMap::new();
        for (i, function) in records.functions.iter().enumerate() {
            functions_by_name.entry(function.name.clone()).or_default().push(i);
            if let Some(linkage) = &function.linkage_name {
                if linkage != &function.name {
                    functions_by_name.entry(linkage.clone()).or_default().push(i);
                }
            }
        }

        let mut symbols_by_address: Vec<usize> = (0..records.symbols.len()).collect();
        symbols_by_address.sort_by_key(|i| (records.symbols[*i].address, std::cmp::Reverse(records.symbols[*i].size)));
        let mut functions_by_address: Vec<usize> = (0..records.functions.len()).collect();
        functions_by_address.sort_by_key(|i| records.functions[*i].low_pc);
        let mut cfi_by_address: Vec<usize> = (0..records.cfi.len()).collect();
        cfi_by_address.sort_by_key(|i| records.cfi[*i].start);
        let mut lines_by_address: Vec<usize> = (0..records.lines.len()).collect();
        lines_by_address.sort_by_key(|i| records.lines[*i].start);

        let file_range = records.address_range.clone().or_else(|| derived_range(&records));
        let range = file_range.map(|r| r.start.wrapping_add(bias)..r.end.wrapping_add(bias));

        Self {
            id,
            records,
            bias,
            range,
            symbols_by_name,
            types_by_name,
            variables_by_name,
            functions_by_name,
            type_positions,
            symbols_by_address,
            functions_by_address,
            cfi_by_address,
            lines_by_address,
        }
    }

    pub fn id(&self) -> ModuleId
    {
        self.id
    }

    pub fn name(&self) -> &str
    {
        &self.records.name
    }

    pub fn path(&self) -> Option<&Path>
    {
        self.records.path.as_deref()
    }

    /// Load bias: runtime address = file address + bias.
    pub fn bias(&self) -> u64
    {
        self.bias
    }

    pub fn records(&self) -> &ModuleRecords
    {
        &self.records
    }

    /// Runtime address range covered by this module.
    pub fn range(&self) -> Option<Range<u64>>
    {
        self.range.clone()
    }

    pub fn contains(&self, address: u64) -> bool
    {
        self.range.as_ref().is_some_and(|r| r.contains(&address))
    }

    /// Translate a runtime address to a file address.
    pub fn file_address(&self, address: u64) -> u64
    {
        address.wrapping_sub(self.bias)
    }

    pub fn runtime_address(&self, file_address: u64) -> u64
    {
        file_address.wrapping_add(self.bias)
    }

    pub fn type_record(&self, id: RecordId) -> Option<&TypeRecord>
    {
        self.type_positions.get(&id).map(|i| &self.records.types[*i])
    }

    fn symbols_named(&self, name: &str) -> impl Iterator<Item = &SymbolRecord>
    {
        self.symbols_by_name
            .get(name)
            .into_iter()
            .flatten()
            .map(|i| &self.records.symbols[*i])
    }

    fn types_named(&self, namespace: TypeNamespace, name: &str) -> impl Iterator<Item = &TypeRecord>
    {
        self.types_by_name
            .get(&(namespace, name.to_string()))
            .into_iter()
            .flatten()
            .map(|i| &self.records.types[*i])
    }

    /// Symbol covering a runtime address.
    ///
    /// Sized symbols must contain the address; otherwise the nearest
    /// preceding zero-sized function symbol is used.
    pub fn symbol_at(&self, address: u64) -> Option<&SymbolRecord>
    {
        let file_address = self.file_address(address);
        let end = self
            .symbols_by_address
            .partition_point(|i| self.records.symbols[*i].address <= file_address);
        let mut fallback = None;
        for i in self.symbols_by_address[..end].iter().rev() {
            let symbol = &self.records.symbols[*i];
            if symbol.size > 0 {
                if file_address - symbol.address < symbol.size {
                    return Some(symbol);
                }
            } else if fallback.is_none() && symbol.kind == crate::types::SymbolKind::Function {
                fallback = Some(symbol);
            }
            if fallback.is_some() && symbol.size == 0 {
                break;
            }
        }
        fallback
    }

    /// Function whose code range contains a runtime address.
    pub fn function_at(&self, address: u64) -> Option<&FunctionRecord>
    {
        let file_address = self.file_address(address);
        let end = self
            .functions_by_address
            .partition_point(|i| self.records.functions[*i].low_pc <= file_address);
        self.functions_by_address[..end]
            .iter()
            .rev()
            .map(|i| &self.records.functions[*i])
            .find(|f| f.contains(file_address))
    }

    /// CFI row for a runtime address
    ///
    /// ## Errors
    ///
    /// [`FathomError::CorruptDebugInfo`] if the covering unwind program could
    /// not be executed by the decoder or its rows are malformed.
    pub fn cfi_row_at(&self, address: u64) -> FathomResult<Option<(&CfiRecord, &CfiRow)>>
    {
        let file_address = self.file_address(address);
        let end = self
            .cfi_by_address
            .partition_point(|i| self.records.cfi[*i].start <= file_address);
        let Some(record) = self.cfi_by_address[..end]
            .iter()
            .rev()
            .map(|i| &self.records.cfi[*i])
            .find(|c| (c.start..c.end).contains(&file_address))
        else {
            return Ok(None);
        };

        if let Some(reason) = &record.corrupt {
            return Err(FathomError::CorruptDebugInfo(format!(
                "unwind program for 0x{:x}..0x{:x} in {}: {reason}",
                record.start,
                record.end,
                self.name()
            )));
        }
        if record.rows.iter().any(|row| row.start >= row.end || row.start < record.start || row.end > record.end) {
            return Err(FathomError::CorruptDebugInfo(format!(
                "unwind rows for 0x{:x}..0x{:x} in {} fall outside their program",
                record.start,
                record.end,
                self.name()
            )));
        }
        Ok(record
            .rows
            .iter()
            .find(|row| (row.start..row.end).contains(&file_address))
            .map(|row| (record, row)))
    }

    /// Source location of a runtime address.
    pub fn line_at(&self, address: u64) -> Option<SourceLocation>
    {
        let file_address = self.file_address(address);
        let end = self
            .lines_by_address
            .partition_point(|i| self.records.lines[*i].start <= file_address);
        self.lines_by_address[..end]
            .iter()
            .rev()
            .map(|i| &self.records.lines[*i])
            .find(|l| (l.start..l.end).contains(&file_address))
            .map(|l| SourceLocation {
                file: l.file.clone(),
                line: l.line,
                column: l.column,
            })
    }
}

impl fmt::Debug for Module
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("name", &self.records.name)
            .field("bias", &format_args!("0x{:x}", self.bias))
            .field("range", &self.range)
            .finish()
    }
}

fn derived_range(records: &ModuleRecords) -> Option<Range<u64>>
{
    let starts = records
        .symbols
        .iter()
        .filter(|s| s.address != 0)
        .map(|s| (s.address, s.address.saturating_add(s.size.max(1))))
        .chain(records.functions.iter().map(|f| (f.low_pc, f.high_pc)))
        .chain(records.cfi.iter().map(|c| (c.start, c.end)));
    let (mut low, mut high) = (u64::MAX, 0u64);
    for (start, end) in starts {
        low = low.min(start);
        high = high.max(end);
    }
    (low < high).then_some(low..high)
}

/// A symbol record together with the module it came from.
#[derive(Debug, Clone, Copy)]
pub struct SymbolRef<'a>
{
    pub module: &'a Module,
    pub record: &'a SymbolRecord,
}

impl SymbolRef<'_>
{
    pub fn name(&self) -> SymbolName
    {
        demangle::make_symbol_name(self.record.name.as_str())
    }

    pub fn runtime_address(&self) -> u64
    {
        self.module.runtime_address(self.record.address)
    }

    /// Owned [`Symbol`] at its runtime address.
    pub fn to_symbol(&self, type_id: Option<TypeId>) -> Symbol
    {
        Symbol {
            name: self.name(),
            address: Address::new(self.runtime_address()),
            size: self.record.size,
            binding: self.record.binding,
            kind: self.record.kind,
            module: self.module.id(),
            type_id,
        }
    }
}

/// A type record together with the module it came from.
#[derive(Debug, Clone, Copy)]
pub struct TypeRef<'a>
{
    pub module: &'a Module,
    pub record: &'a TypeRecord,
}

#[derive(Debug, Clone, Copy)]
pub struct VariableRef<'a>
{
    pub module: &'a Module,
    pub record: &'a VariableRecord,
}

#[derive(Debug, Clone, Copy)]
pub struct FunctionRef<'a>
{
    pub module: &'a Module,
    pub record: &'a FunctionRecord,
}

/// Name and address index over every loaded module.
#[derive(Debug, Default)]
pub struct DebugInfoIndex
{
    modules: Vec<Arc<Module>>,
}

impl DebugInfoIndex
{
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Index a module's records with the given load bias.
    pub fn add_module(&mut self, records: ModuleRecords, bias: u64) -> FathomResult<ModuleId>
    {
        let id = u32::try_from(self.modules.len())
            .map(ModuleId)
            .map_err(|_| FathomError::Configuration("too many modules".into()))?;
        let module = Module::build(id, records, bias);
        debug!(
            module = module.name(),
            %id,
            bias = format_args!("0x{bias:x}"),
            symbols = module.records.symbols.len(),
            types = module.records.types.len(),
            functions = module.records.functions.len(),
            cfi = module.records.cfi.len(),
            "indexed module"
        );
        self.modules.push(Arc::new(module));
        Ok(id)
    }

    /// Modules in load order.
    pub fn modules(&self) -> impl Iterator<Item = &Module>
    {
        self.modules.iter().map(Arc::as_ref)
    }

    pub fn module(&self, id: ModuleId) -> FathomResult<&Module>
    {
        self.modules
            .get(id.0 as usize)
            .map(Arc::as_ref)
            .ok_or_else(|| FathomError::not_found(LookupKind::Module, id.to_string()))
    }

    pub fn module_by_name(&self, name: &str) -> FathomResult<&Module>
    {
        self.modules()
            .find(|m| m.name() == name)
            .ok_or_else(|| FathomError::not_found(LookupKind::Module, name))
    }

    /// Module whose runtime range contains `address`.
    pub fn module_for_address(&self, address: u64) -> Option<&Module>
    {
        self.modules().find(|m| m.contains(address))
    }

    /// All symbols with this (raw or demangled) name, in module load order.
    pub fn find_symbols(&self, name: &str) -> FathomResult<Vec<SymbolRef<'_>>>
    {
        let found: Vec<_> = self
            .modules()
            .flat_map(|module| module.symbols_named(name).map(move |record| SymbolRef { module, record }))
            .collect();
        if found.is_empty() {
            return Err(FathomError::not_found(LookupKind::Symbol, name));
        }
        trace!(name, candidates = found.len(), "symbol lookup");
        Ok(found)
    }

    /// Symbol covering a runtime address.
    pub fn symbol_at(&self, address: u64) -> Option<SymbolRef<'_>>
    {
        let module = self.module_for_address(address)?;
        module.symbol_at(address).map(|record| SymbolRef { module, record })
    }

    /// All types registered under `name` in `namespace`, in module load order.
    pub fn find_types(&self, namespace: TypeNamespace, name: &str) -> FathomResult<Vec<TypeRef<'_>>>
    {
        let found: Vec<_> = self
            .modules()
            .flat_map(|module| {
                module
                    .types_named(namespace, name)
                    .map(move |record| TypeRef { module, record })
            })
            .collect();
        if found.is_empty() {
            return Err(FathomError::not_found(LookupKind::Type, name));
        }
        Ok(found)
    }

    /// A complete definition of a possibly forward-declared compound or enum type
    ///
    /// Searches `preferred` first, then every module in load order.
    pub fn find_complete_type(
        &self,
        namespace: TypeNamespace,
        name: &str,
        preferred: Option<ModuleId>,
    ) -> Option<TypeRef<'_>>
    {
        let preferred = preferred.and_then(|id| self.module(id).ok());
        preferred
            .into_iter()
            .chain(self.modules())
            .flat_map(|module| {
                module
                    .types_named(namespace, name)
                    .map(move |record| TypeRef { module, record })
            })
            .find(|t| !t.record.kind.is_declaration())
    }

    pub fn type_record(&self, module: ModuleId, id: RecordId) -> FathomResult<TypeRef<'_>>
    {
        let module = self.module(module)?;
        let record = module.type_record(id).ok_or_else(|| {
            FathomError::CorruptDebugInfo(format!(
                "{} references missing type record 0x{:x}",
                module.name(),
                id.0
            ))
        })?;
        Ok(TypeRef { module, record })
    }

    /// Global variables named `name`, in module load order.
    pub fn find_variables(&self, name: &str) -> FathomResult<Vec<VariableRef<'_>>>
    {
        let found: Vec<_> = self
            .modules()
            .flat_map(|module| {
                module
                    .variables_by_name
                    .get(name)
                    .into_iter()
                    .flatten()
                    .map(move |i| VariableRef {
                        module,
                        record: &module.records.variables[*i],
                    })
            })
            .collect();
        if found.is_empty() {
            return Err(FathomError::not_found(LookupKind::Variable, name));
        }
        Ok(found)
    }

    /// Functions named `name`, in module load order.
    pub fn find_functions(&self, name: &str) -> FathomResult<Vec<FunctionRef<'_>>>
    {
        let found: Vec<_> = self
            .modules()
            .flat_map(|module| {
                module
                    .functions_by_name
                    .get(name)
                    .into_iter()
                    .flatten()
                    .map(move |i| FunctionRef {
                        module,
                        record: &module.records.functions[*i],
                    })
            })
            .collect();
        if found.is_empty() {
            return Err(FathomError::not_found(LookupKind::Function, name));
        }
        Ok(found)
    }

    /// Function containing a runtime address.
    pub fn function_at(&self, address: u64) -> Option<FunctionRef<'_>>
    {
        let module = self.module_for_address(address)?;
        module.function_at(address).map(|record| FunctionRef { module, record })
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::types::{SymbolBinding, SymbolKind};

    fn symbol(name: &str, address: u64, size: u64) -> SymbolRecord
    {
        SymbolRecord {
            name: name.into(),
            address,
            size,
            binding: SymbolBinding::Global,
            kind: SymbolKind::Function,
            type_id: None,
        }
    }

    #[test]
    fn symbol_at_prefers_containing_sized_symbol()
    {
        let mut records = ModuleRecords::new("a.out");
        records.address_range = Some(0x1000..0x3000);
        records.symbols = vec![
            symbol("start", 0x1000, 0),
            symbol("outer", 0x1100, 0x200),
            symbol("inner", 0x1180, 0x10),
        ];
        let mut index = DebugInfoIndex::new();
        index.add_module(records, 0x10_0000).unwrap();

        assert_eq!(index.symbol_at(0x10_1184).unwrap().record.name, "inner");
        assert_eq!(index.symbol_at(0x10_1200).unwrap().record.name, "outer");
        assert_eq!(index.symbol_at(0x10_1010).unwrap().record.name, "start");
        assert!(index.symbol_at(0x1184).is_none());
    }

    #[test]
    fn malformed_cfi_is_reported_at_lookup()
    {
        let mut records = ModuleRecords::new("broken");
        records.address_range = Some(0..0x100);
        records.cfi = vec![CfiRecord {
            start: 0x10,
            end: 0x20,
            return_address_register: 16,
            rows: Vec::new(),
            corrupt: Some("bad opcode".into()),
        }];
        let mut index = DebugInfoIndex::new();
        let id = index.add_module(records, 0).unwrap();
        let module = index.module(id).unwrap();

        assert!(matches!(module.cfi_row_at(0x18), Err(FathomError::CorruptDebugInfo(_))));
        assert!(module.cfi_row_at(0x30).unwrap().is_none());
    }
}
