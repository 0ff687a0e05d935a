//! Pipeline entry point.
//!
//! This module provides the `Pipeline` struct and its builder, which chain the
//! loading, detection and persistence stages for every configured device.

use crate::config::{ConfigValidationError, DetectorConfig, PipelineConfig};
use crate::detector::{ModelFactory, OutlierDetector, OutlierModel};
use crate::pipeline::progress::{ClosureProgressReporter, ProgressReporter, ProgressUpdate};
use crate::pipeline::stages::{detect_anomalies_with, persist, preprocess};
use crate::reporting::RunReport;
use crate::sink::{CsvDirectorySink, ResultSink};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// The per-device anomaly pipeline.
///
/// Use [`Pipeline::builder()`] to create a pipeline with custom configuration.
///
/// # Example
///
/// ```rust,ignore
/// use solar_anomaly::{Pipeline, PipelineConfig};
///
/// let report = Pipeline::builder()
///     .config(PipelineConfig::builder().input_dir("data").build()?)
///     .on_progress(|update| {
///         println!("[{:.0}%] {}", update.progress * 100.0, update.message);
///     })
///     .build()?
///     .run();
///
/// println!("{} devices written", report.fully_processed());
/// ```
pub struct Pipeline {
    config: PipelineConfig,
    detector: OutlierDetector,
    sink: Arc<dyn ResultSink>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
}

// Embedders may run the pipeline on a worker thread
static_assertions::assert_impl_all!(Pipeline: Send);

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run all three stages over every configured device.
    ///
    /// Per-device failures are logged and recorded in the returned report;
    /// they never stop the run. Devices with no usable source simply produce
    /// no output.
    pub fn run(&self) -> RunReport {
        let start_time = Instant::now();
        let reporter = self.progress_reporter.as_deref();

        info!(
            "Starting anomaly pipeline for {} devices",
            self.config.device_count()
        );

        let cleaned = preprocess(&self.config, reporter);
        let labeled = detect_anomalies_with(cleaned.items, &self.detector, reporter);
        let persisted = persist(
            &labeled.items,
            self.sink.as_ref(),
            &self.config.label_column,
            reporter,
        );

        let report = RunReport::new(
            self.config.device_count(),
            cleaned.report,
            labeled.report,
            persisted.report,
            persisted.items,
            start_time.elapsed().as_millis() as u64,
        );

        info!(
            "Pipeline finished in {}ms: {} of {} devices written, {} anomalies",
            report.duration_ms,
            report.fully_processed(),
            report.devices_configured,
            report.total_anomalies()
        );
        if let Some(reporter) = reporter {
            reporter.report(ProgressUpdate::complete(format!(
                "{} of {} devices written",
                report.fully_processed(),
                report.devices_configured
            )));
        }

        report
    }
}

/// Builder for creating a [`Pipeline`] with custom configuration.
///
/// Without an explicit sink, labeled tables are written as CSV files to the
/// configured output directory.
#[derive(Default)]
pub struct PipelineBuilder {
    config: Option<PipelineConfig>,
    model_factory: Option<ModelFactory>,
    sink: Option<Arc<dyn ResultSink>>,
    progress_reporter: Option<Arc<dyn ProgressReporter>>,
}

static_assertions::assert_impl_all!(PipelineBuilder: Send);

impl PipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Label devices with models built by `factory` instead of the default
    /// isolation forest.
    pub fn outlier_model<F>(mut self, factory: F) -> Self
    where
        F: Fn(&DetectorConfig) -> Box<dyn OutlierModel> + Send + Sync + 'static,
    {
        self.model_factory = Some(Arc::new(factory));
        self
    }

    /// Set where labeled tables are stored.
    ///
    /// Use `Arc` to keep a handle on the sink, e.g. to read back a
    /// [`MemorySink`](crate::sink::MemorySink) after the run.
    pub fn sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set a progress reporter for receiving updates during processing.
    pub fn progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress_reporter = Some(reporter);
        self
    }

    /// Set a progress callback closure.
    ///
    /// This is a convenience method for simple progress handling.
    /// For more complex scenarios, use [`progress_reporter`](Self::progress_reporter).
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.progress_reporter = Some(Arc::new(ClosureProgressReporter::new(callback)));
        self
    }

    /// Build the pipeline.
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> std::result::Result<Pipeline, ConfigValidationError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let sink = self
            .sink
            .unwrap_or_else(|| Arc::new(CsvDirectorySink::from_config(&config)));

        let detector = match self.model_factory {
            Some(factory) => OutlierDetector::with_model_factory(config.detector.clone(), factory),
            None => OutlierDetector::new(config.detector.clone()),
        };

        Ok(Pipeline {
            config,
            detector,
            sink,
            progress_reporter: self.progress_reporter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceGroup;
    use crate::error::Result;
    use crate::pipeline::PipelineStage;
    use crate::sink::MemorySink;
    use parking_lot::Mutex;
    use std::fs;

    #[test]
    fn test_pipeline_builder_default() {
        let pipeline = Pipeline::builder().build().unwrap();
        assert_eq!(pipeline.config().device_count(), 43);
        assert_eq!(pipeline.config().detector.random_seed, 42);
    }

    #[test]
    fn test_pipeline_builder_rejects_invalid_config() {
        let mut config = PipelineConfig::default();
        config.detector.contamination = 0.9;
        assert!(Pipeline::builder().config(config).build().is_err());
    }

    #[test]
    fn test_run_with_no_sources_reports_every_stage() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::builder()
            .input_dir(dir.path())
            .device_groups(vec![DeviceGroup::new("location_a", ["A1_df", "A2_df"])])
            .build()
            .unwrap();

        let stages = Arc::new(Mutex::new(Vec::new()));
        let stages_clone = stages.clone();
        let sink = Arc::new(MemorySink::new());

        let report = Pipeline::builder()
            .config(config)
            .sink(sink.clone())
            .on_progress(move |update| stages_clone.lock().push(update.stage))
            .build()
            .unwrap()
            .run();

        assert_eq!(report.loading.failed, 2);
        assert_eq!(report.detection.attempted, 0);
        assert_eq!(report.persistence.attempted, 0);
        assert!(report.outputs.is_empty());
        assert!(sink.is_empty());

        let stages = stages.lock();
        assert_eq!(stages.first(), Some(&PipelineStage::Loading));
        assert!(stages.contains(&PipelineStage::Detecting));
        assert!(stages.contains(&PipelineStage::Persisting));
        assert_eq!(stages.last(), Some(&PipelineStage::Complete));
    }

    /// Flags every row whose first standardized feature is positive.
    struct AboveMeanModel;

    impl OutlierModel for AboveMeanModel {
        fn fit(&mut self, _rows: &[Vec<f64>]) -> Result<()> {
            Ok(())
        }

        fn score(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
            Ok(rows.iter().map(|row| row[0]).collect())
        }

        fn threshold(&self) -> Result<f64> {
            Ok(0.0)
        }

        fn is_fitted(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_run_labels_with_supplied_model() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("A1_df.csv"),
            "DC_POWER,AC_POWER\n1.0,0.5\n2.0,0.7\n3.0,0.6\n4.0,0.9\n",
        )
        .unwrap();
        let config = PipelineConfig::builder()
            .input_dir(dir.path())
            .feature_columns(["DC_POWER", "AC_POWER"])
            .device_groups(vec![DeviceGroup::new("location_a", ["A1_df"])])
            .build()
            .unwrap();

        let sink = Arc::new(MemorySink::new());
        let report = Pipeline::builder()
            .config(config)
            .sink(sink.clone())
            .outlier_model(|_| Box::new(AboveMeanModel))
            .build()
            .unwrap()
            .run();

        assert_eq!(report.fully_processed(), 1);
        assert_eq!(report.total_anomalies(), 2);

        let df = sink.get("A1_df").unwrap();
        let flags: Vec<Option<bool>> = df
            .column("is_anomaly")
            .unwrap()
            .bool()
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(flags, vec![Some(false), Some(false), Some(true), Some(true)]);
    }
}
