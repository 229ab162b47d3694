//! # Program
//!
//! Ties one platform, one memory reader, the debug-info index and the type
//! system together and answers the questions an evaluator asks: read memory,
//! find a symbol, a type or a global object, and unwind a thread.
//!
//! A `Program` is assembled either by hand (add segments and module records,
//! useful for synthetic targets and tests) or by one of the target
//! constructors: [`Program::from_core_dump`], [`Program::from_kernel_dump`]
//! and, on Linux, [`Program::from_pid`].
//!
//! ## Example
//!
//! ```rust
//! use fathom_core::memory::{MemorySegment, SegmentBacking};
//! use fathom_core::platform::{Architecture, Platform};
//! use fathom_core::Program;
//!
//! let platform = Platform::new(Architecture::X86_64, None)?;
//! let mut program = Program::new(platform);
//! program.add_segment(MemorySegment::new(0x1000..0x1010, SegmentBacking::buffer(vec![0xab; 16])))?;
//! assert_eq!(program.read_memory(0x1004, 2)?, vec![0xab, 0xab]);
//! # Ok::<(), fathom_core::FathomError>(())
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, trace};

use crate::config::ProgramOptions;
use crate::debuginfo::{
    ConstValue, DebugInfoIndex, FrameBaseRecord, LocationRecord, Module, ModuleId, ModuleRecords, RecordId,
    VariableRecord, dwarf,
};
use crate::error::{FathomError, FathomResult, LookupKind};
use crate::memory::{MemoryAccess, MemoryReader, MemorySegment};
use crate::object::{Object, Value};
use crate::platform::Platform;
use crate::types::{Frame, RegisterSnapshot, StackTrace, Symbol, SymbolBinding, Thread, ThreadId};
use crate::typesys::{TypeId, TypeSystem};
use crate::unwind::StackUnwinder;

/// Where a stack trace starts.
#[derive(Debug, Clone)]
pub enum StackStart
{
    /// A thread of a core dump or live process.
    Thread(ThreadId),
    /// An explicit register snapshot.
    Registers(RegisterSnapshot),
    /// Just a program counter, stack pointer and optional frame pointer.
    Pc
    {
        pc: u64,
        sp: u64,
        fp: Option<u64>,
    },
}

/// One inspected program.
pub struct Program
{
    platform: Platform,
    memory: MemoryReader,
    index: DebugInfoIndex,
    types: TypeSystem,
    options: ProgramOptions,
    threads: Vec<Thread>,
    symbol_cache: RwLock<HashMap<String, Arc<[Symbol]>>>,
}

impl Program
{
    /// Empty program with default options.
    pub fn new(platform: Platform) -> Self
    {
        Self::with_options(platform, ProgramOptions::default())
    }

    pub fn with_options(platform: Platform, options: ProgramOptions) -> Self
    {
        Self {
            platform,
            memory: MemoryReader::new(platform),
            index: DebugInfoIndex::new(),
            types: TypeSystem::new(platform).with_precedence(options.symbol_precedence()),
            options,
            threads: Vec::new(),
            symbol_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn platform(&self) -> &Platform
    {
        &self.platform
    }

    pub fn memory(&self) -> &MemoryReader
    {
        &self.memory
    }

    pub fn index(&self) -> &DebugInfoIndex
    {
        &self.index
    }

    pub fn types(&self) -> &TypeSystem
    {
        &self.types
    }

    pub fn options(&self) -> &ProgramOptions
    {
        &self.options
    }

    /// Threads of a core dump or live process; empty for hand-built programs.
    pub fn threads(&self) -> &[Thread]
    {
        &self.threads
    }

    pub fn thread(&self, id: ThreadId) -> FathomResult<&Thread>
    {
        self.threads
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| FathomError::not_found(LookupKind::Thread, id.to_string()))
    }

    pub fn add_thread(&mut self, thread: Thread)
    {
        debug!(thread = %thread.id, registers = thread.registers.len(), "added thread");
        self.threads.push(thread);
    }

    pub fn add_segment(&mut self, segment: MemorySegment) -> FathomResult<()>
    {
        self.memory.add_segment(segment)
    }

    /// Index a module's records at load bias `bias`.
    ///
    /// ## Errors
    ///
    /// [`FathomError::Configuration`] when the records are for another architecture.
    pub fn add_module(&mut self, records: ModuleRecords, bias: u64) -> FathomResult<ModuleId>
    {
        if let Some(architecture) = records.architecture {
            if architecture != self.platform.architecture() {
                return Err(FathomError::Configuration(format!(
                    "module {} is for {architecture}, program is {}",
                    records.name,
                    self.platform.architecture()
                )));
            }
        }
        let id = self.index.add_module(records, bias)?;
        self.symbol_cache.write().unwrap_or_else(PoisonError::into_inner).clear();
        Ok(id)
    }

    /// Decode an ELF file's symbols and DWARF and index it at `bias`.
    pub fn load_module(&mut self, path: impl AsRef<Path>, bias: u64) -> FathomResult<ModuleId>
    {
        let records = dwarf::load_module_records(path.as_ref(), self.options.debug_info_paths())?;
        self.add_module(records, bias)
    }

    pub fn read_memory(&self, address: u64, length: usize) -> FathomResult<Vec<u8>>
    {
        self.memory.read(address, length)
    }

    /// Pointer-sized word in target byte order.
    pub fn read_word(&self, address: u64) -> FathomResult<u64>
    {
        self.memory.read_word(address)
    }

    /// Every symbol named `name`, ordered by the configured precedence.
    pub fn find_symbol(&self, name: &str) -> FathomResult<Vec<Symbol>>
    {
        if let Some(cached) = self
            .symbol_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(cached.to_vec());
        }

        let mut candidates = self.index.find_symbols(name)?;
        let precedence = self.options.symbol_precedence();
        candidates.sort_by_key(|c| precedence.rank(c.module.id().0, c.record.binding));
        let symbols: Vec<Symbol> = candidates
            .iter()
            .map(|c| Ok(c.to_symbol(self.record_type(c.module.id(), c.record.type_id)?)))
            .collect::<FathomResult<_>>()?;

        self.symbol_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), Arc::from(symbols.as_slice()));
        Ok(symbols)
    }

    /// Symbol covering a runtime address.
    pub fn symbol_at(&self, address: u64) -> Option<Symbol>
    {
        let found = self.index.symbol_at(address)?;
        let type_id = self.record_type(found.module.id(), found.record.type_id).ok().flatten();
        Some(found.to_symbol(type_id))
    }

    fn record_type(&self, module: ModuleId, record: Option<RecordId>) -> FathomResult<Option<TypeId>>
    {
        record
            .map(|record| self.types.from_record(&self.index, module, record))
            .transpose()
    }

    /// Resolve a C type name.
    pub fn find_type(&self, name: &str) -> FathomResult<TypeId>
    {
        self.types.find_type(&self.index, name)
    }

    pub fn size_of(&self, ty: TypeId) -> FathomResult<u64>
    {
        self.types.size_of(ty)
    }

    pub fn type_name(&self, ty: TypeId) -> FathomResult<String>
    {
        self.types.type_name(ty)
    }

    pub fn strip_aliases(&self, ty: TypeId) -> FathomResult<TypeId>
    {
        self.types.strip_aliases(ty)
    }

    pub fn types_equivalent(&self, a: TypeId, b: TypeId) -> FathomResult<bool>
    {
        self.types.types_equivalent(&self.index, a, b)
    }

    /// A global variable, function or bare symbol by name.
    ///
    /// Variables with debug info come first, then functions, then symbols
    /// without debug info (typed `void`, so only their address is usable).
    pub fn find_object(&self, name: &str) -> FathomResult<Object>
    {
        let precedence = self.options.symbol_precedence();
        match self.index.find_variables(name) {
            Ok(mut variables) => {
                variables.sort_by_key(|v| precedence.rank(v.module.id().0, binding_of(v.record.external)));
                let variable = &variables[0];
                return self.variable_object(variable.module, variable.record, None);
            }
            Err(err) if !err.is_not_found() => return Err(err),
            Err(_) => {}
        }
        match self.index.find_functions(name) {
            Ok(mut functions) => {
                functions.sort_by_key(|f| precedence.rank(f.module.id().0, binding_of(f.record.external)));
                let function = &functions[0];
                let ty = self.record_type(function.module.id(), function.record.type_id)?;
                let address = function.module.runtime_address(function.record.low_pc);
                return Ok(Object::at_address(self, ty.unwrap_or(TypeId::VOID), address));
            }
            Err(err) if !err.is_not_found() => return Err(err),
            Err(_) => {}
        }
        let symbols = self.find_symbol(name)?;
        let symbol = &symbols[0];
        Ok(Object::at_address(self, symbol.type_id.unwrap_or(TypeId::VOID), symbol.address))
    }

    /// Unwind a thread or an explicit register set.
    pub fn stack_trace(&self, start: StackStart) -> FathomResult<StackTrace>
    {
        let architecture = self.platform.architecture();
        let (thread, registers) = match start {
            StackStart::Thread(id) => (Some(id), self.thread(id)?.registers.as_ref().clone()),
            StackStart::Registers(registers) => (None, registers),
            StackStart::Pc { pc, sp, fp } => (None, RegisterSnapshot::from_pc_sp(architecture, pc, sp, fp)),
        };
        if registers.architecture() != architecture {
            return Err(FathomError::InvalidArgument(format!(
                "registers are for {}, program is {architecture}",
                registers.architecture()
            )));
        }
        let unwinder = StackUnwinder::new(&self.platform, &self.index, &self.memory)
            .with_max_frames(self.options.max_frames())
            .with_frame_pointer_fallback(self.options.frame_pointer_fallback());
        Ok(unwinder.unwind(thread, registers))
    }

    /// A variable visible in frame `frame` of `trace`
    ///
    /// Searches the innermost lexical scope's locals, then the function's
    /// parameters, then globals.
    pub fn frame_variable(&self, trace: &StackTrace, frame: usize, name: &str) -> FathomResult<Object>
    {
        let frame = trace.get(frame).ok_or_else(|| {
            FathomError::InvalidArgument(format!("frame {frame} is out of range for a trace of {}", trace.len()))
        })?;

        if let Some(module) = frame.module.map(|id| self.index.module(id)).transpose()? {
            let lookup = frame.lookup_pc().value();
            if let Some(function) = module.function_at(lookup) {
                let pc = module.file_address(lookup);
                let local = function
                    .locals
                    .iter()
                    .filter(|local| local.variable.name == name && local.in_scope(pc))
                    .max_by_key(|local| (!local.parameter, local.depth));
                if let Some(local) = local {
                    trace!(name, function = %function.name, parameter = local.parameter, "frame variable");
                    let context = FrameContext {
                        frame,
                        frame_base: function.frame_base,
                    };
                    return self.variable_object(module, &local.variable, Some(&context));
                }
            }
        }
        self.find_object(name)
    }

    fn variable_object(
        &self,
        module: &Module,
        variable: &VariableRecord,
        context: Option<&FrameContext<'_>>,
    ) -> FathomResult<Object>
    {
        let ty = self.record_type(module.id(), variable.type_id)?.unwrap_or(TypeId::VOID);
        let pc = context.map(|c| module.file_address(c.frame.lookup_pc().value()));
        let frame = context.map(|c| c.frame);

        let object = match variable.location_at(pc) {
            LocationRecord::Address(address) => Object::at_address(self, ty, module.runtime_address(*address)),
            LocationRecord::Register(register) => match frame {
                Some(frame) => Object::in_register(self, ty, *register, Some(frame.id), Arc::clone(&frame.registers)),
                None => Object::absent(self, ty),
            },
            LocationRecord::FrameBaseOffset(offset) => match context.and_then(|c| c.frame_base()) {
                Some(base) => Object::at_address(self, ty, base.wrapping_add_signed(*offset)),
                None => Object::absent(self, ty),
            },
            LocationRecord::RegisterOffset { register, offset } => {
                match frame.and_then(|f| f.registers.get(*register)) {
                    Some(base) => Object::at_address(self, ty, base.wrapping_add_signed(*offset)),
                    None => Object::absent(self, ty),
                }
            }
            LocationRecord::Constant(value) => {
                let value = match value {
                    ConstValue::Signed(v) => Value::Signed(*v),
                    ConstValue::Unsigned(v) => Value::Unsigned(*v),
                    ConstValue::Bytes(bytes) => Value::Bytes(Arc::from(bytes.as_slice())),
                };
                Object::from_value(self, ty, value)
            }
            LocationRecord::OptimizedOut => Object::absent(self, ty),
            LocationRecord::Unsupported(what) => {
                debug!(variable = %variable.name, what = %what, "unsupported location, treating as absent");
                Object::absent(self, ty)
            }
        };
        Ok(object)
    }
}

/// Frame a local variable is evaluated in.
struct FrameContext<'a>
{
    frame: &'a Frame,
    frame_base: FrameBaseRecord,
}

impl FrameContext<'_>
{
    fn frame_base(&self) -> Option<u64>
    {
        match self.frame_base {
            FrameBaseRecord::Cfa => self.frame.cfa.map(|a| a.value()),
            FrameBaseRecord::Register(register) => self.frame.registers.get(register),
            FrameBaseRecord::RegisterOffset { register, offset } => {
                self.frame.registers.get(register).map(|v| v.wrapping_add_signed(offset))
            }
            FrameBaseRecord::Unknown => None,
        }
    }
}

fn binding_of(external: bool) -> SymbolBinding
{
    if external { SymbolBinding::Global } else { SymbolBinding::Local }
}

impl fmt::Debug for Program
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Program")
            .field("platform", &self.platform)
            .field("modules", &self.index.modules().count())
            .field("segments", &self.memory.segments().count())
            .field("threads", &self.threads.len())
            .finish()
    }
}
