//! Per-device outlier labeling for solar plant sensor data.
//!
//! # Overview
//!
//! Every sensor device has its own CSV table of readings. A run:
//!
//! - **Loads and cleans** each device's table: selects the six feature
//!   columns, converts them to `Float64` and forward-fills gaps
//! - **Detects anomalies** per device: standardizes the features with that
//!   device's statistics and labels rows with a seeded isolation forest
//! - **Persists** each labeled table, with a boolean `is_anomaly` column,
//!   through a pluggable [`ResultSink`]
//!
//! A device that fails at any stage is logged and skipped; the rest of the
//! batch always completes. The outcome of every device is recorded in the
//! returned [`RunReport`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use solar_anomaly::{Pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::builder()
//!     .input_dir("Datasets/sensor_wise_data")
//!     .output_dir("output")
//!     .build()?;
//!
//! let report = Pipeline::builder().config(config).build()?.run();
//! println!(
//!     "{} of {} devices written",
//!     report.fully_processed(),
//!     report.devices_configured
//! );
//! ```
//!
//! # Sinks
//!
//! By default labeled tables go to `<output_dir>/anomalies_<device>.csv`.
//! Pass a [`MemorySink`] or your own [`ResultSink`] to
//! [`PipelineBuilder::sink`] to store them elsewhere.

pub mod cleaner;
pub mod config;
pub mod detector;
pub mod error;
pub mod imputers;
pub mod loader;
pub mod pipeline;
pub mod reporting;
pub mod sink;
pub mod types;

pub use cleaner::DataCleaner;
pub use config::{DetectorConfig, DeviceGroup, PipelineConfig, RetryPolicy};
pub use detector::{
    IsolationForest, ModelFactory, OutlierDetector, OutlierModel, StandardScaler,
};
pub use error::{PipelineError, Result};
pub use pipeline::{
    ClosureProgressReporter, Pipeline, PipelineBuilder, PipelineStage, ProgressReporter,
    ProgressUpdate,
};
pub use reporting::RunReport;
pub use sink::{CsvDirectorySink, MemorySink, ResultSink, SinkLocation};
pub use types::{
    CleanedDataset, DeviceOutcome, LabeledDataset, PersistedOutput, StageOutput, StageReport,
};
