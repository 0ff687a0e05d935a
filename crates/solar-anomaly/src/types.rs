use crate::error::PipelineError;
use crate::pipeline::PipelineStage;
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

/// A device's source table after feature selection and forward-fill.
#[derive(Debug, Clone)]
pub struct CleanedDataset {
    pub device_id: String,
    pub group: String,
    /// Exactly the configured feature columns, all `Float64`.
    pub data: DataFrame,
}

/// A cleaned dataset together with its per-row outlier labels.
#[derive(Debug, Clone)]
pub struct LabeledDataset {
    pub device_id: String,
    pub group: String,
    pub data: DataFrame,
    /// `true` for rows scored as outliers; one entry per row of `data`.
    pub labels: Vec<bool>,
    /// Raw anomaly scores in (0, 1]; higher is more anomalous.
    pub scores: Vec<f64>,
    /// Score above which a row is labeled anomalous.
    pub threshold: f64,
}

impl LabeledDataset {
    pub fn anomaly_count(&self) -> usize {
        self.labels.iter().filter(|&&flag| flag).count()
    }

    /// Fraction of rows labeled anomalous.
    pub fn anomaly_ratio(&self) -> f64 {
        if self.labels.is_empty() {
            0.0
        } else {
            self.anomaly_count() as f64 / self.labels.len() as f64
        }
    }
}

/// Where a device's labeled table ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedOutput {
    pub device_id: String,
    pub group: String,
    /// Sink-specific location, e.g. a file path.
    pub location: String,
    pub rows: usize,
    pub anomalies: usize,
}

/// Result of processing one device in one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeviceOutcome {
    Succeeded {
        device_id: String,
        group: String,
        detail: String,
    },
    Failed {
        device_id: String,
        group: String,
        error_code: String,
        reason: String,
    },
}

impl DeviceOutcome {
    pub fn succeeded(device_id: &str, group: &str, detail: impl Into<String>) -> Self {
        Self::Succeeded {
            device_id: device_id.to_string(),
            group: group.to_string(),
            detail: detail.into(),
        }
    }

    pub fn failed(device_id: &str, group: &str, error: &PipelineError) -> Self {
        Self::Failed {
            device_id: device_id.to_string(),
            group: group.to_string(),
            error_code: error.error_code().to_string(),
            reason: error.to_string(),
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            Self::Succeeded { device_id, .. } | Self::Failed { device_id, .. } => device_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }
}

/// Per-stage tally of device outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: PipelineStage,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub outcomes: Vec<DeviceOutcome>,
}

impl StageReport {
    pub fn new(stage: PipelineStage) -> Self {
        Self {
            stage,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            duration_ms: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: DeviceOutcome) {
        self.attempted += 1;
        if outcome.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.outcomes.push(outcome);
    }

    pub fn failures(&self) -> impl Iterator<Item = &DeviceOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// What a stage hands to the next one, plus its report.
#[derive(Debug, Clone)]
pub struct StageOutput<T> {
    pub items: Vec<T>,
    pub report: StageReport,
}

impl<T> StageOutput<T> {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
