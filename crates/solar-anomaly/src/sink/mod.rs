//! Destinations for labeled per-device tables.
//!
//! The persistence stage hands every labeled table to a [`ResultSink`]. Two
//! sinks ship with the crate: [`CsvDirectorySink`] writes one CSV file per
//! device and [`MemorySink`] keeps the tables in memory.
//!
//! # Implementing a sink
//!
//! ```rust,ignore
//! use solar_anomaly::sink::{ResultSink, SinkLocation};
//! use solar_anomaly::Result;
//! use polars::prelude::DataFrame;
//!
//! struct StdoutSink;
//!
//! impl ResultSink for StdoutSink {
//!     fn write(&self, device_id: &str, df: &mut DataFrame) -> Result<SinkLocation> {
//!         println!("{device_id}\n{df}");
//!         Ok(SinkLocation::Memory(device_id.to_string()))
//!     }
//! }
//! ```

mod csv;
mod memory;

pub use csv::CsvDirectorySink;
pub use memory::MemorySink;

use crate::error::Result;
use polars::prelude::DataFrame;
use std::fmt;
use std::path::PathBuf;

/// Where a sink stored a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkLocation {
    File(PathBuf),
    /// Key under which an in-memory sink holds the table.
    Memory(String),
}

impl fmt::Display for SinkLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Memory(key) => write!(f, "memory://{}", key),
        }
    }
}

/// Stores one labeled table per device.
///
/// A repeated write for the same device replaces the earlier table.
pub trait ResultSink: Send + Sync {
    fn write(&self, device_id: &str, df: &mut DataFrame) -> Result<SinkLocation>;
}
