//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the media pipeline crates:
//! - Logging and tracing initialisation
//! - Host log forwarding through [`logging::LoggerSink`]
//!
//! Pipeline crates only emit `tracing` events. Whether and where those events
//! are written is decided once, at startup, by [`logging::init_logging`].

pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::{init_logging, LogEntry, LogFormat, LogLevel, LoggerSink, LoggingConfig};
