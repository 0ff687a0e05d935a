//! The three pipeline stages.
//!
//! Each stage takes the previous stage's items as a plain value and returns a
//! [`StageOutput`]. A device that fails in a stage is logged, recorded in the
//! stage report, and left out of the items handed on; the rest of the batch
//! always continues. An empty input is a no-op.

use crate::cleaner::DataCleaner;
use crate::config::{DetectorConfig, PipelineConfig};
use crate::detector::OutlierDetector;
use crate::error::{PipelineError, Result};
use crate::loader::read_source_table;
use crate::pipeline::progress::{PipelineStage, ProgressReporter, ProgressUpdate};
use crate::sink::ResultSink;
use crate::types::{
    CleanedDataset, DeviceOutcome, LabeledDataset, PersistedOutput, StageOutput, StageReport,
};
use polars::prelude::*;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Data errors are warnings; environment errors are errors.
fn log_device_failure(action: &str, device_id: &str, e: &PipelineError) {
    if e.is_data_error() {
        warn!("Skipping {} while {}: {}", device_id, action, e);
    } else {
        error!("Skipping {} while {}: {}", device_id, action, e);
    }
}

fn report_progress(reporter: Option<&dyn ProgressReporter>, update: ProgressUpdate) {
    if let Some(reporter) = reporter {
        reporter.report(update);
    }
}

/// Load and clean every configured device.
pub fn preprocess(
    config: &PipelineConfig,
    reporter: Option<&dyn ProgressReporter>,
) -> StageOutput<CleanedDataset> {
    let start = Instant::now();
    let mut report = StageReport::new(PipelineStage::Loading);
    let mut items = Vec::new();
    let cleaner = DataCleaner::new(config.feature_columns.clone());
    let total = config.device_count();

    report_progress(
        reporter,
        ProgressUpdate::new(PipelineStage::Loading, 0.0, format!("Loading {} devices", total)),
    );

    for (index, (group, device_id)) in config.devices().enumerate() {
        let result = read_source_table(&config.source_path(device_id))
            .and_then(|raw| cleaner.clean(&raw));

        match result {
            Ok((data, steps)) => {
                for step in &steps {
                    debug!("{}: {}", device_id, step);
                }
                info!("Loaded {}: {} rows", device_id, data.height());
                report.record(DeviceOutcome::succeeded(
                    device_id,
                    group,
                    format!("{} rows", data.height()),
                ));
                items.push(CleanedDataset {
                    device_id: device_id.to_string(),
                    group: group.to_string(),
                    data,
                });
            }
            Err(e) => {
                log_device_failure("loading", device_id, &e);
                report.record(DeviceOutcome::failed(device_id, group, &e));
            }
        }

        report_progress(
            reporter,
            ProgressUpdate::with_items(
                PipelineStage::Loading,
                device_id,
                index + 1,
                total,
                format!("Loaded {}", device_id),
            ),
        );
    }

    report.duration_ms = start.elapsed().as_millis() as u64;
    StageOutput { items, report }
}

/// Label every cleaned dataset with its own isolation forest.
pub fn detect_anomalies(
    cleaned: Vec<CleanedDataset>,
    detector_config: &DetectorConfig,
    reporter: Option<&dyn ProgressReporter>,
) -> StageOutput<LabeledDataset> {
    detect_anomalies_with(
        cleaned,
        &OutlierDetector::new(detector_config.clone()),
        reporter,
    )
}

/// Label every cleaned dataset with a model fitted by `detector`.
pub fn detect_anomalies_with(
    cleaned: Vec<CleanedDataset>,
    detector: &OutlierDetector,
    reporter: Option<&dyn ProgressReporter>,
) -> StageOutput<LabeledDataset> {
    let start = Instant::now();
    let mut report = StageReport::new(PipelineStage::Detecting);
    let mut items = Vec::with_capacity(cleaned.len());
    let total = cleaned.len();

    report_progress(
        reporter,
        ProgressUpdate::new(
            PipelineStage::Detecting,
            0.0,
            format!("Detecting anomalies for {} devices", total),
        ),
    );

    for (index, dataset) in cleaned.into_iter().enumerate() {
        match detector.label(&dataset) {
            Ok(labeled) => {
                info!(
                    "Detected anomalies for {}: {} of {} rows",
                    labeled.device_id,
                    labeled.anomaly_count(),
                    labeled.labels.len()
                );
                report.record(DeviceOutcome::succeeded(
                    &labeled.device_id,
                    &labeled.group,
                    format!("{} anomalies", labeled.anomaly_count()),
                ));
                items.push(labeled);
            }
            Err(e) => {
                log_device_failure("detecting anomalies", &dataset.device_id, &e);
                report.record(DeviceOutcome::failed(&dataset.device_id, &dataset.group, &e));
            }
        }

        report_progress(
            reporter,
            ProgressUpdate::with_items(
                PipelineStage::Detecting,
                dataset.device_id.as_str(),
                index + 1,
                total,
                format!("Labeled {}", dataset.device_id),
            ),
        );
    }

    report.duration_ms = start.elapsed().as_millis() as u64;
    StageOutput { items, report }
}

/// Append the label column to each dataset and hand it to the sink.
pub fn persist(
    labeled: &[LabeledDataset],
    sink: &dyn ResultSink,
    label_column: &str,
    reporter: Option<&dyn ProgressReporter>,
) -> StageOutput<PersistedOutput> {
    let start = Instant::now();
    let mut report = StageReport::new(PipelineStage::Persisting);
    let mut items = Vec::with_capacity(labeled.len());
    let total = labeled.len();

    report_progress(
        reporter,
        ProgressUpdate::new(
            PipelineStage::Persisting,
            0.0,
            format!("Saving {} labeled tables", total),
        ),
    );

    for (index, dataset) in labeled.iter().enumerate() {
        let result = with_label_column(dataset, label_column)
            .and_then(|mut df| sink.write(&dataset.device_id, &mut df));

        match result {
            Ok(location) => {
                info!("Saved {} to {}", dataset.device_id, location);
                let output = PersistedOutput {
                    device_id: dataset.device_id.clone(),
                    group: dataset.group.clone(),
                    location: location.to_string(),
                    rows: dataset.labels.len(),
                    anomalies: dataset.anomaly_count(),
                };
                report.record(DeviceOutcome::succeeded(
                    &dataset.device_id,
                    &dataset.group,
                    output.location.clone(),
                ));
                items.push(output);
            }
            Err(e) => {
                log_device_failure("saving", &dataset.device_id, &e);
                report.record(DeviceOutcome::failed(&dataset.device_id, &dataset.group, &e));
            }
        }

        report_progress(
            reporter,
            ProgressUpdate::with_items(
                PipelineStage::Persisting,
                dataset.device_id.as_str(),
                index + 1,
                total,
                format!("Saved {}", dataset.device_id),
            ),
        );
    }

    report.duration_ms = start.elapsed().as_millis() as u64;
    StageOutput { items, report }
}

/// Copy of the dataset's features with the boolean label column appended.
fn with_label_column(dataset: &LabeledDataset, label_column: &str) -> Result<DataFrame> {
    if dataset.labels.len() != dataset.data.height() {
        return Err(PipelineError::SinkFailed(format!(
            "{} has {} labels for {} rows",
            dataset.device_id,
            dataset.labels.len(),
            dataset.data.height()
        )));
    }

    let mut df = dataset.data.clone();
    df.with_column(Series::new(label_column.into(), dataset.labels.as_slice()))?;
    Ok(df)
}
