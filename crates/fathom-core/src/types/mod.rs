//! # Types
//!
//! Value types shared by every layer of the engine: addresses, register
//! snapshots, threads, symbols and stack frames.

pub mod address;
pub mod process;
pub mod registers;
pub mod stack;
pub mod symbols;

pub use address::Address;
pub use process::{ProcessId, Thread, ThreadId};
pub use registers::RegisterSnapshot;
pub use stack::{Frame, FrameId, FrameStatus, StackTrace, TruncationReason};
pub use symbols::{SourceLocation, Symbol, SymbolBinding, SymbolKind, SymbolLanguage, SymbolName};
