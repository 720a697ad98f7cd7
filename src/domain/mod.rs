//! Domain layer for rask-log-relay.
//!
//! Contains the canonical types shared across all modules:
//! - `LogEvent`: The normalized record produced by the codec
//! - `Severity`: Internal log severity (Trace/Debug/Info/Warn/Error/Critical)
//! - `MessageContext`: Per-message stream coordinates passed explicitly
//! - `ProducerRecord`: The raw event contract producers publish
//! - `RelayError`: Top-level error type

pub mod context;
pub mod error;
pub mod log_event;
pub mod log_level;
pub mod producer;

pub use context::MessageContext;
pub use error::RelayError;
pub use log_event::LogEvent;
pub use log_level::{Severity, map_level};
pub use producer::ProducerRecord;
