//! Common imports for code that inspects a [`Program`]
//!
//! ```rust
//! use fathom_core::prelude::*;
//! ```

pub use crate::config::{ProgramOptions, SymbolPrecedence};
pub use crate::error::{ErrorKind, FathomError, FathomResult, LookupKind};
pub use crate::memory::{MemoryReader, MemorySegment, SegmentBacking};
pub use crate::object::{Location, Object, Value};
pub use crate::platform::{Architecture, ByteOrder, Platform, PlatformFlags};
pub use crate::program::{Program, StackStart};
pub use crate::types::{Address, Frame, ProcessId, RegisterSnapshot, StackTrace, Symbol, Thread, ThreadId};
pub use crate::typesys::{TypeId, TypeKind, TypeSystem};
