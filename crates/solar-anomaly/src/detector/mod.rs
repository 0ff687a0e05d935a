//! Per-device outlier detection.
//!
//! Every device is modeled against its own distribution: features are
//! standardized with that device's statistics, then an isolation forest is
//! fitted and used to label each row.

mod isolation_forest;
mod scaler;

pub use isolation_forest::IsolationForest;
pub use scaler::StandardScaler;

use crate::config::DetectorConfig;
use crate::error::{PipelineError, Result};
use crate::types::{CleanedDataset, LabeledDataset};
use polars::prelude::*;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// An unsupervised model that scores rows by how anomalous they are.
///
/// Implementations must be deterministic for a fixed configuration and input.
pub trait OutlierModel: Send + Sync {
    /// Fit the model to row-major feature data.
    fn fit(&mut self, rows: &[Vec<f64>]) -> Result<()>;

    /// Anomaly score for each row; higher is more anomalous.
    fn score(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>>;

    /// Score above which a row is considered anomalous.
    fn threshold(&self) -> Result<f64>;

    /// Label each row, `true` meaning anomalous.
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<bool>> {
        let threshold = self.threshold()?;
        Ok(self
            .score(rows)?
            .into_iter()
            .map(|score| score > threshold)
            .collect())
    }

    fn is_fitted(&self) -> bool;
}

/// Builds an unfitted model for one device.
pub type ModelFactory = Arc<dyn Fn(&DetectorConfig) -> Box<dyn OutlierModel> + Send + Sync>;

fn isolation_forest_factory() -> ModelFactory {
    Arc::new(|config: &DetectorConfig| {
        Box::new(IsolationForest::from_config(config)) as Box<dyn OutlierModel>
    })
}

/// Labels the rows of cleaned datasets.
///
/// A fresh model is built for every dataset, so no state leaks between
/// devices. The default model is [`IsolationForest`].
#[derive(Clone)]
pub struct OutlierDetector {
    config: DetectorConfig,
    model_factory: ModelFactory,
}

impl fmt::Debug for OutlierDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutlierDetector")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for OutlierDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl OutlierDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self::with_model_factory(config, isolation_forest_factory())
    }

    /// Detector that labels with models built by `model_factory`.
    pub fn with_model_factory(config: DetectorConfig, model_factory: ModelFactory) -> Self {
        Self {
            config,
            model_factory,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Standardize the dataset and label it with a freshly fitted model.
    pub fn label(&self, dataset: &CleanedDataset) -> Result<LabeledDataset> {
        let column_names: Vec<String> = dataset
            .data
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();

        let rows = to_row_matrix(&dataset.data)?;
        if rows.len() < 2 {
            return Err(PipelineError::InsufficientRows {
                required: 2,
                found: rows.len(),
            });
        }

        let mut scaler = StandardScaler::new();
        let scaled = scaler.fit_transform(&rows, &column_names)?;

        let mut model = (self.model_factory)(&self.config);
        model.fit(&scaled)?;
        if !model.is_fitted() {
            return Err(PipelineError::ModelNotFitted);
        }

        let scores = model.score(&scaled)?;
        let threshold = model.threshold()?;
        let labels = model.predict(&scaled)?;

        debug!(
            "{}: threshold {:.4}, {} of {} rows above",
            dataset.device_id,
            threshold,
            labels.iter().filter(|&&l| l).count(),
            labels.len()
        );

        Ok(LabeledDataset {
            device_id: dataset.device_id.clone(),
            group: dataset.group.clone(),
            data: dataset.data.clone(),
            labels,
            scores,
            threshold,
        })
    }
}

/// Copy a frame of `Float64` columns into row-major form.
///
/// A null cell cannot be scored, so any remaining one fails the frame.
fn to_row_matrix(df: &DataFrame) -> Result<Vec<Vec<f64>>> {
    let mut rows = vec![Vec::with_capacity(df.width()); df.height()];

    for column in df.get_columns() {
        let null_count = column.null_count();
        if null_count > 0 {
            return Err(PipelineError::UnresolvedMissing {
                column: column.name().to_string(),
                count: null_count,
            });
        }

        let values = column.as_materialized_series().f64()?;
        for (row, value) in rows.iter_mut().zip(values.into_no_null_iter()) {
            row.push(value);
        }
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(data: DataFrame) -> CleanedDataset {
        CleanedDataset {
            device_id: "A1_df".to_string(),
            group: "location_a".to_string(),
            data,
        }
    }

    fn daytime_readings() -> DataFrame {
        df![
            "DC_POWER" => [100.0, 102.0, 98.0, 101.0, 99.0, 103.0, 97.0, 100.5, 101.5, 99.5],
            "IRRADIATION" => [0.50, 0.52, 0.48, 0.51, 0.49, 0.53, 0.47, 5.0, 0.505, 0.495],
        ]
        .unwrap()
    }

    #[test]
    fn test_label_flags_spike() {
        let labeled = OutlierDetector::default()
            .label(&dataset(daytime_readings()))
            .unwrap();

        assert_eq!(labeled.labels.len(), 10);
        assert_eq!(labeled.scores.len(), 10);
        assert!(labeled.labels[7]);
        assert_eq!(labeled.anomaly_count(), 1);
    }

    #[test]
    fn test_label_is_deterministic() {
        let detector = OutlierDetector::default();
        let first = detector.label(&dataset(daytime_readings())).unwrap();
        let second = detector.label(&dataset(daytime_readings())).unwrap();
        assert_eq!(first.labels, second.labels);
        assert_eq!(first.scores, second.scores);
    }

    /// Scores each row by its first standardized feature; flags rows more
    /// than one standard deviation above the mean.
    #[derive(Default)]
    struct FirstFeatureModel {
        fitted: bool,
    }

    impl OutlierModel for FirstFeatureModel {
        fn fit(&mut self, _rows: &[Vec<f64>]) -> Result<()> {
            self.fitted = true;
            Ok(())
        }

        fn score(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
            Ok(rows.iter().map(|row| row[0]).collect())
        }

        fn threshold(&self) -> Result<f64> {
            Ok(1.0)
        }

        fn is_fitted(&self) -> bool {
            self.fitted
        }
    }

    /// Never reports itself as fitted.
    struct InertModel;

    impl OutlierModel for InertModel {
        fn fit(&mut self, _rows: &[Vec<f64>]) -> Result<()> {
            Ok(())
        }

        fn score(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
            Ok(vec![0.0; rows.len()])
        }

        fn threshold(&self) -> Result<f64> {
            Err(PipelineError::ModelNotFitted)
        }

        fn is_fitted(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_label_uses_supplied_model() {
        let detector = OutlierDetector::with_model_factory(
            DetectorConfig::default(),
            Arc::new(|_: &DetectorConfig| {
                Box::new(FirstFeatureModel::default()) as Box<dyn OutlierModel>
            }),
        );
        let df = df![
            "DC_POWER" => [1.0, 1.0, 1.0, 1.0, 9.0],
            "IRRADIATION" => [0.1, 0.2, 0.3, 0.4, 0.5],
        ]
        .unwrap();

        let labeled = detector.label(&dataset(df)).unwrap();
        assert_eq!(labeled.labels, vec![false, false, false, false, true]);
        assert_eq!(labeled.threshold, 1.0);
        assert!((labeled.scores[4] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_unfitted_model_is_rejected() {
        let detector = OutlierDetector::with_model_factory(
            DetectorConfig::default(),
            Arc::new(|_: &DetectorConfig| Box::new(InertModel) as Box<dyn OutlierModel>),
        );
        let err = detector.label(&dataset(daytime_readings())).unwrap_err();
        assert_eq!(err.error_code(), "MODEL_NOT_FITTED");
    }

    #[test]
    fn test_leading_null_is_unresolved() {
        let df = df![
            "DC_POWER" => [None, Some(1.0), Some(2.0)],
            "IRRADIATION" => [0.1, 0.2, 0.3],
        ]
        .unwrap();

        let err = OutlierDetector::default().label(&dataset(df)).unwrap_err();
        match err {
            PipelineError::UnresolvedMissing { column, count } => {
                assert_eq!(column, "DC_POWER");
                assert_eq!(count, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_single_row_rejected() {
        let df = df!["DC_POWER" => [1.0], "IRRADIATION" => [0.1]].unwrap();
        let err = OutlierDetector::default().label(&dataset(df)).unwrap_err();
        assert_eq!(err.error_code(), "INSUFFICIENT_ROWS");
    }

    #[test]
    fn test_constant_column_rejected() {
        let df = df![
            "DC_POWER" => [1.0, 2.0, 3.0],
            "IRRADIATION" => [0.0, 0.0, 0.0],
        ]
        .unwrap();
        let err = OutlierDetector::default().label(&dataset(df)).unwrap_err();
        assert_eq!(err.error_code(), "DEGENERATE_FEATURE");
    }
}
