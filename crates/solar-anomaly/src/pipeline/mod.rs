//! Pipeline module.
//!
//! This module provides the pipeline entry point, its stages, and progress
//! reporting.

mod builder;
pub mod progress;
pub mod stages;

pub use builder::{Pipeline, PipelineBuilder};
pub use progress::{ClosureProgressReporter, PipelineStage, ProgressReporter, ProgressUpdate};
pub use stages::{detect_anomalies, detect_anomalies_with, persist, preprocess};
