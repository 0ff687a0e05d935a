//! Custom error types for the anomaly pipeline.
//!
//! Every per-device failure is one of these variants. The pipeline never
//! propagates them past the device that produced them; instead they are
//! recorded in the run report, which is why errors serialize to a
//! `{ code, message }` pair.

use serde::Serialize;
use serde::ser::SerializeStruct;
use thiserror::Error;

/// The main error type for the anomaly pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The device's source file does not exist.
    #[error("Source file not found: {0}")]
    SourceNotFound(String),

    /// One or more required feature columns are absent from the source.
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    /// A feature column contains values that are not numeric.
    #[error("Failed to convert column '{column}' to {target_type}: {reason}")]
    TypeConversionFailed {
        column: String,
        target_type: String,
        reason: String,
    },

    /// Missing values remain after forward-fill (leading run of a column).
    #[error("Column '{column}' has {count} unresolved missing values")]
    UnresolvedMissing { column: String, count: usize },

    /// Not enough rows to estimate per-column statistics.
    #[error("At least {required} rows are required, found {found}")]
    InsufficientRows { required: usize, found: usize },

    /// A feature has zero variance and cannot be standardized.
    #[error("Column '{column}' has zero variance")]
    DegenerateFeature { column: String },

    /// A model was used for scoring before it was fitted.
    #[error("Model must be fitted before scoring")]
    ModelNotFitted,

    /// Rows handed to a model differ in width from the rows it was fitted on.
    #[error("Expected {expected} features per row, found {found}")]
    FeatureCountMismatch { expected: usize, found: usize },

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The result sink rejected a write.
    #[error("Failed to write results: {0}")]
    SinkFailed(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Polars error wrapper.
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Add context to an error.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PipelineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Stable error code used in run reports.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::SourceNotFound(_) => "SOURCE_NOT_FOUND",
            Self::MissingColumns(_) => "MISSING_COLUMNS",
            Self::TypeConversionFailed { .. } => "TYPE_CONVERSION_FAILED",
            Self::UnresolvedMissing { .. } => "UNRESOLVED_MISSING",
            Self::InsufficientRows { .. } => "INSUFFICIENT_ROWS",
            Self::DegenerateFeature { .. } => "DEGENERATE_FEATURE",
            Self::ModelNotFitted => "MODEL_NOT_FITTED",
            Self::FeatureCountMismatch { .. } => "FEATURE_COUNT_MISMATCH",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::SinkFailed(_) => "SINK_FAILED",
            Self::Io(_) => "IO_ERROR",
            Self::Polars(_) => "POLARS_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::WithContext { source, .. } => source.error_code(),
        }
    }

    /// Whether the error is caused by the device's data rather than the
    /// environment (IO, sink, config).
    pub fn is_data_error(&self) -> bool {
        match self {
            Self::MissingColumns(_)
            | Self::TypeConversionFailed { .. }
            | Self::UnresolvedMissing { .. }
            | Self::InsufficientRows { .. }
            | Self::DegenerateFeature { .. } => true,
            Self::WithContext { source, .. } => source.is_data_error(),
            _ => false,
        }
    }
}

/// Errors are serialized as a struct with `code` and `message` fields.
impl Serialize for PipelineError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("PipelineError", 2)?;
        state.serialize_field("code", &self.error_code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, polars::error::PolarsError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PipelineError::Polars(e).with_context(context))
    }
}
