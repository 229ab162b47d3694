//! # Program Options
//!
//! Knobs that change how a [`Program`](crate::Program) answers queries.
//!
//! ## Environment Variables
//!
//! [`ProgramOptions::from_env`] reads:
//!
//! - `FATHOM_MAX_FRAMES`: frame limit for stack traces (default `1024`)
//! - `FATHOM_SYMBOL_PRECEDENCE`: `first-loaded`, `last-loaded` or `global-first`
//! - `FATHOM_FRAME_POINTER_FALLBACK`: `true`/`false`, `1`/`0`, `on`/`off`
//! - `FATHOM_DEBUG_INFO_PATH`: colon-separated directories searched for separate debug files
//!
//! ## Example
//!
//! ```rust
//! use fathom_core::config::{ProgramOptions, SymbolPrecedence};
//!
//! let options = ProgramOptions::default()
//!     .with_max_frames(64)
//!     .with_symbol_precedence(SymbolPrecedence::GlobalFirst);
//! assert_eq!(options.max_frames(), 64);
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{FathomError, FathomResult};
use crate::types::SymbolBinding;
use crate::unwind::DEFAULT_MAX_FRAMES;

/// How same-named symbols from different modules are ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SymbolPrecedence
{
    /// Earlier-loaded modules win (the executable before its libraries).
    #[default]
    FirstLoaded,
    /// Later-loaded modules win.
    LastLoaded,
    /// Global and weak definitions before local ones, then load order.
    GlobalFirst,
}

impl SymbolPrecedence
{
    /// Sort key for a candidate; lower sorts first.
    pub(crate) fn rank(self, load_order: u32, binding: SymbolBinding) -> (u8, i64)
    {
        match self {
            SymbolPrecedence::FirstLoaded => (0, i64::from(load_order)),
            SymbolPrecedence::LastLoaded => (0, -i64::from(load_order)),
            SymbolPrecedence::GlobalFirst => {
                let class = match binding {
                    SymbolBinding::Global | SymbolBinding::Unique => 0,
                    SymbolBinding::Weak => 1,
                    SymbolBinding::Local | SymbolBinding::Unknown => 2,
                };
                (class, i64::from(load_order))
            }
        }
    }
}

impl FromStr for SymbolPrecedence
{
    type Err = FathomError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().replace('_', "-").as_str() {
            "first-loaded" | "first" => Ok(SymbolPrecedence::FirstLoaded),
            "last-loaded" | "last" => Ok(SymbolPrecedence::LastLoaded),
            "global-first" | "global" => Ok(SymbolPrecedence::GlobalFirst),
            _ => Err(FathomError::Configuration(format!(
                "unknown symbol precedence {s:?}; use first-loaded, last-loaded or global-first"
            ))),
        }
    }
}

/// Options for a [`Program`](crate::Program).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramOptions
{
    max_frames: usize,
    symbol_precedence: SymbolPrecedence,
    frame_pointer_fallback: bool,
    debug_info_paths: Vec<PathBuf>,
}

impl Default for ProgramOptions
{
    fn default() -> Self
    {
        Self {
            max_frames: DEFAULT_MAX_FRAMES,
            symbol_precedence: SymbolPrecedence::default(),
            frame_pointer_fallback: true,
            debug_info_paths: Vec::new(),
        }
    }
}

impl ProgramOptions
{
    /// Defaults overridden by `FATHOM_*` environment variables
    ///
    /// ## Errors
    ///
    /// [`FathomError::Configuration`] when a variable is set to a value that
    /// does not parse.
    pub fn from_env() -> FathomResult<Self>
    {
        let mut options = Self::default();
        if let Some(value) = var("FATHOM_MAX_FRAMES") {
            options.max_frames = value.parse().map_err(|_| {
                FathomError::Configuration(format!("FATHOM_MAX_FRAMES must be a number, got {value:?}"))
            })?;
        }
        if let Some(value) = var("FATHOM_SYMBOL_PRECEDENCE") {
            options.symbol_precedence = value.parse()?;
        }
        if let Some(value) = var("FATHOM_FRAME_POINTER_FALLBACK") {
            options.frame_pointer_fallback = parse_bool(&value).ok_or_else(|| {
                FathomError::Configuration(format!("FATHOM_FRAME_POINTER_FALLBACK must be a boolean, got {value:?}"))
            })?;
        }
        if let Some(value) = var("FATHOM_DEBUG_INFO_PATH") {
            options.debug_info_paths = env::split_paths(&value).filter(|p| !p.as_os_str().is_empty()).collect();
        }
        Ok(options)
    }

    pub fn max_frames(&self) -> usize
    {
        self.max_frames
    }

    pub fn symbol_precedence(&self) -> SymbolPrecedence
    {
        self.symbol_precedence
    }

    pub fn frame_pointer_fallback(&self) -> bool
    {
        self.frame_pointer_fallback
    }

    pub fn debug_info_paths(&self) -> &[PathBuf]
    {
        &self.debug_info_paths
    }

    pub fn with_max_frames(mut self, max_frames: usize) -> Self
    {
        self.max_frames = max_frames;
        self
    }

    pub fn with_symbol_precedence(mut self, precedence: SymbolPrecedence) -> Self
    {
        self.symbol_precedence = precedence;
        self
    }

    pub fn with_frame_pointer_fallback(mut self, enabled: bool) -> Self
    {
        self.frame_pointer_fallback = enabled;
        self
    }

    pub fn with_debug_info_path(mut self, path: impl AsRef<Path>) -> Self
    {
        self.debug_info_paths.push(path.as_ref().to_path_buf());
        self
    }
}

fn var(name: &str) -> Option<String>
{
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool>
{
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn precedence_parses_common_spellings()
    {
        assert_eq!("last_loaded".parse::<SymbolPrecedence>().unwrap(), SymbolPrecedence::LastLoaded);
        assert_eq!("Global-First".parse::<SymbolPrecedence>().unwrap(), SymbolPrecedence::GlobalFirst);
        assert!("newest".parse::<SymbolPrecedence>().is_err());
    }

    #[test]
    fn global_first_orders_bindings_before_load_order()
    {
        let p = SymbolPrecedence::GlobalFirst;
        assert!(p.rank(5, SymbolBinding::Global) < p.rank(0, SymbolBinding::Local));
        assert!(p.rank(0, SymbolBinding::Weak) < p.rank(0, SymbolBinding::Local));
        let last = SymbolPrecedence::LastLoaded;
        assert!(last.rank(3, SymbolBinding::Local) < last.rank(1, SymbolBinding::Local));
    }

    #[test]
    fn booleans()
    {
        assert_eq!(parse_bool(" Off "), Some(false));
        assert_eq!(parse_bool("1"), Some(true));
        assert_eq!(parse_bool("maybe"), None);
    }
}
