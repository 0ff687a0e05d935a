//! Run summaries.
//!
//! A [`RunReport`] aggregates the three stage reports, the written outputs and
//! timing for one pipeline run. It serializes to JSON for `--json` output and
//! for the `run_report.json` file written by `--emit-report`.

use crate::error::Result;
use crate::types::{DeviceOutcome, PersistedOutput, StageReport};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// File name used by [`RunReport::write_to_dir`].
pub const REPORT_FILE_NAME: &str = "run_report.json";

/// Summary of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Timestamp when the report was generated
    pub generated_at: String,
    /// Number of devices named by the configuration
    pub devices_configured: usize,
    pub loading: StageReport,
    pub detection: StageReport,
    pub persistence: StageReport,
    /// One entry per table handed to the sink successfully
    pub outputs: Vec<PersistedOutput>,
    /// Total execution time in milliseconds
    pub duration_ms: u64,
}

impl RunReport {
    pub fn new(
        devices_configured: usize,
        loading: StageReport,
        detection: StageReport,
        persistence: StageReport,
        outputs: Vec<PersistedOutput>,
        duration_ms: u64,
    ) -> Self {
        Self {
            generated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            devices_configured,
            loading,
            detection,
            persistence,
            outputs,
            duration_ms,
        }
    }

    /// Every failed device outcome, in stage order.
    pub fn failures(&self) -> Vec<&DeviceOutcome> {
        self.loading
            .failures()
            .chain(self.detection.failures())
            .chain(self.persistence.failures())
            .collect()
    }

    /// Number of devices that made it through all three stages.
    pub fn fully_processed(&self) -> usize {
        self.outputs.len()
    }

    pub fn total_anomalies(&self) -> usize {
        self.outputs.iter().map(|o| o.anomalies).sum()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as `run_report.json` inside `dir`.
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;

        let report_path = dir.join(REPORT_FILE_NAME);
        let mut file = File::create(&report_path)?;
        file.write_all(self.to_json()?.as_bytes())?;

        info!("Report saved: {}", report_path.display());
        Ok(report_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::pipeline::PipelineStage;

    fn sample_report() -> RunReport {
        let mut loading = StageReport::new(PipelineStage::Loading);
        loading.record(DeviceOutcome::succeeded("A1_df", "location_a", "10 rows"));
        loading.record(DeviceOutcome::failed(
            "A2_df",
            "location_a",
            &PipelineError::SourceNotFound("A2_df.csv".to_string()),
        ));

        let mut detection = StageReport::new(PipelineStage::Detecting);
        detection.record(DeviceOutcome::succeeded("A1_df", "location_a", "1 anomalies"));

        let mut persistence = StageReport::new(PipelineStage::Persisting);
        persistence.record(DeviceOutcome::succeeded(
            "A1_df",
            "location_a",
            "output/anomalies_A1_df.csv",
        ));

        RunReport::new(
            2,
            loading,
            detection,
            persistence,
            vec![PersistedOutput {
                device_id: "A1_df".to_string(),
                group: "location_a".to_string(),
                location: "output/anomalies_A1_df.csv".to_string(),
                rows: 10,
                anomalies: 1,
            }],
            12,
        )
    }

    #[test]
    fn test_summary_counts() {
        let report = sample_report();
        assert_eq!(report.fully_processed(), 1);
        assert_eq!(report.total_anomalies(), 1);
        let failed: Vec<&str> = report.failures().iter().map(|o| o.device_id()).collect();
        assert_eq!(failed, vec!["A2_df"]);
    }

    #[test]
    fn test_write_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = sample_report().write_to_dir(dir.path()).unwrap();
        assert_eq!(path, dir.path().join(REPORT_FILE_NAME));

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["devices_configured"], 2);
        assert_eq!(json["loading"]["failed"], 1);
        assert_eq!(json["loading"]["outcomes"][1]["error_code"], "SOURCE_NOT_FOUND");
        assert_eq!(json["outputs"][0]["anomalies"], 1);
    }
}
