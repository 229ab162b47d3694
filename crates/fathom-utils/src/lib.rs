//! # fathom-utils
//!
//! Shared helpers for the fathom workspace. Today that is logging setup
//! built on `tracing-subscriber` and `tracing-appender`.

pub mod logging;

pub use logging::{
    init_logging, init_logging_with_level, init_test_logging, LogFormat, LogLevel, LoggingError, LoggingGuard,
};
pub use tracing::{debug, error, info, trace, warn};
