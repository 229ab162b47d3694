//! # fathom-core
//!
//! Architecture-independent introspection of a program's state: a live
//! process, a userspace core dump or a kernel crash dump.
//!
//! The crate is layered bottom-up:
//!
//! - [`platform`]: architectures, byte order, register sets
//! - [`memory`]: one virtual address space over file, process, kernel-physical and zero-fill backing
//! - [`debuginfo`]: symbols, types, variables, call frame information and line tables decoded from ELF/DWARF
//! - [`typesys`]: interned semantic types built lazily from debug info
//! - [`object`]: typed values living in memory, in a register, or nowhere (optimized out)
//! - [`unwind`]: call-stack reconstruction from CFI with a frame-pointer fallback
//! - [`Program`]: the aggregate that ties them together, and the entry point for queries
//!
//! ## Example
//!
//! ```rust,no_run
//! use fathom_core::config::ProgramOptions;
//! use fathom_core::{Program, StackStart};
//!
//! let program = Program::from_core_dump("core.1234", ProgramOptions::from_env()?)?;
//! let thread = program.threads()[0].id;
//! for frame in program.stack_trace(StackStart::Thread(thread))?.frames() {
//!     println!("{:#x} {}", frame.pc.value(), frame.function_name().unwrap_or("??"));
//! }
//! # Ok::<(), fathom_core::FathomError>(())
//! ```
//!
//! ## Unsafe code
//!
//! Confined to [`platform::linux`]: `ptrace(2)`, `waitpid(2)` and `sysconf(3)`.

#![allow(unsafe_code)]

pub mod config;
pub mod debuginfo;
pub mod error;
pub mod memory;
pub mod object;
pub mod platform;
pub mod prelude;
pub mod program;
pub mod target;
pub mod types;
pub mod typesys;
pub mod unwind;

pub use error::{FathomError, FathomResult};
pub use program::{Program, StackStart};
