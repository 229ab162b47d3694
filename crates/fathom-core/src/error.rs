//! # Error Types
//!
//! General error handling for the introspection engine.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages. Every public operation returns [`FathomResult`],
//! and callers that need to branch on the failure category use
//! [`FathomError::kind`] instead of matching on individual variants.

use std::fmt;
use std::io;

use thiserror::Error;

/// What a failed lookup was looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupKind
{
    Symbol,
    Type,
    Register,
    Member,
    Variable,
    Function,
    Module,
    Thread,
    Process,
}

impl fmt::Display for LookupKind
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let label = match self {
            LookupKind::Symbol => "Symbol",
            LookupKind::Type => "Type",
            LookupKind::Register => "Register",
            LookupKind::Member => "Member",
            LookupKind::Variable => "Variable",
            LookupKind::Function => "Function",
            LookupKind::Module => "Module",
            LookupKind::Thread => "Thread",
            LookupKind::Process => "Process",
        };
        write!(f, "{label}")
    }
}

/// Coarse classification of a [`FathomError`].
///
/// Memory faults and backing-store failures both classify as [`ErrorKind::Io`]:
/// from the caller's point of view both mean "these bytes could not be read".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind
{
    Configuration,
    NotFound,
    ValueUnavailable,
    Io,
    IncompleteType,
    CorruptDebugInfo,
    Type,
    InvalidArgument,
    Unsupported,
    PermissionDenied,
}

/// Main error type for introspection operations
///
/// ## Error Categories
///
/// 1. **Configuration errors**: invalid platform construction, overlapping segments.
///    Reported at the call that introduced them.
/// 2. **Lookup errors**: `NotFound` for missing symbols, types, registers, members.
/// 3. **Availability errors**: `ValueUnavailable` for optimized-out or unrecovered values.
/// 4. **Memory errors**: `NoBackingSegment`, `MemoryRead`, `Io`.
/// 5. **Debug-info errors**: `IncompleteType`, `CorruptDebugInfo`.
/// 6. **Usage errors**: `Type`, `InvalidArgument`, `Unsupported`, `PermissionDenied`.
#[derive(Error, Debug)]
pub enum FathomError
{
    /// A platform, reader or program was configured inconsistently
    ///
    /// Examples:
    /// - `Platform::new(Architecture::Unknown, Some(PlatformFlags::IS_64_BIT))`
    /// - Adding a memory segment that overlaps an existing one
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// A lookup found nothing
    ///
    /// This is the normal result of asking for a name or address that the
    /// loaded debug information does not describe.
    #[error("{kind} not found: {name}")]
    NotFound
    {
        /// What was being looked up
        kind: LookupKind,
        /// The name (or formatted address) that was requested
        name: String,
    },

    /// The object's type is known but its value is not
    ///
    /// Raised when reading an optimized-out variable or a register the unwinder
    /// could not recover for a caller frame.
    #[error("Value unavailable: {0}")]
    ValueUnavailable(String),

    /// No memory segment covers the given address
    #[error("No backing segment for address 0x{address:x}")]
    NoBackingSegment
    {
        /// First unmapped address of the failed read
        address: u64,
    },

    /// A memory segment exists but its backing store failed
    ///
    /// This happens when:
    /// - The live process exited or unmapped the page mid-read
    /// - A core file is truncated and the segment's file range is missing
    /// - A kernel physical address has no backing in the dump
    #[error("Failed to read {length} bytes at 0x{address:x}: {source}")]
    MemoryRead
    {
        /// Start of the failed sub-read
        address: u64,
        /// Length of the failed sub-read
        length: u64,
        /// Underlying backing-store error
        #[source]
        source: io::Error,
    },

    /// Size or layout was requested for a type that has none
    ///
    /// Forward-declared structures, `void`, functions and arrays of unknown
    /// length are incomplete. This is recoverable.
    #[error("Incomplete type: {0}")]
    IncompleteType(String),

    /// Debug information or call-frame information is malformed
    #[error("Corrupt debug information: {0}")]
    CorruptDebugInfo(String),

    /// An operation was applied to an object of the wrong kind of type
    ///
    /// Examples:
    /// - Member access on an integer
    /// - Dereferencing a `void *`
    /// - Reinterpreting a 4-byte scalar as an 8-byte scalar
    #[error("Type error: {0}")]
    Type(String),

    /// Invalid argument passed to an engine function
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested feature is not available for this target or architecture
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Insufficient permissions to inspect the target
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// I/O error (opening core files, reading binaries, procfs)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FathomError
{
    /// Shorthand for a [`FathomError::NotFound`] error.
    pub fn not_found(kind: LookupKind, name: impl Into<String>) -> Self
    {
        FathomError::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind
    {
        match self {
            FathomError::Configuration(_) => ErrorKind::Configuration,
            FathomError::NotFound { .. } => ErrorKind::NotFound,
            FathomError::ValueUnavailable(_) => ErrorKind::ValueUnavailable,
            FathomError::NoBackingSegment { .. } | FathomError::MemoryRead { .. } | FathomError::Io(_) => ErrorKind::Io,
            FathomError::IncompleteType(_) => ErrorKind::IncompleteType,
            FathomError::CorruptDebugInfo(_) => ErrorKind::CorruptDebugInfo,
            FathomError::Type(_) => ErrorKind::Type,
            FathomError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            FathomError::Unsupported(_) => ErrorKind::Unsupported,
            FathomError::PermissionDenied(_) => ErrorKind::PermissionDenied,
        }
    }

    /// Returns `true` for [`ErrorKind::NotFound`].
    pub fn is_not_found(&self) -> bool
    {
        self.kind() == ErrorKind::NotFound
    }
}

/// Convenience type alias for `Result<T, FathomError>`
///
/// ```rust
/// use fathom_core::error::FathomResult;
/// fn foo() -> FathomResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type FathomResult<T> = std::result::Result<T, FathomError>;

/// Map a gimli error to [`FathomError::CorruptDebugInfo`] with context.
pub(crate) fn map_dwarf_error(context: &str, err: gimli::Error) -> FathomError
{
    FathomError::CorruptDebugInfo(format!("{context}: {err}"))
}

/// Map an object-file parse error to [`FathomError::CorruptDebugInfo`] with context.
pub(crate) fn map_object_error(context: &str, err: object::Error) -> FathomError
{
    FathomError::CorruptDebugInfo(format!("{context}: {err}"))
}
