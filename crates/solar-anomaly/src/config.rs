//! Configuration types for the anomaly pipeline.
//!
//! The whole run is driven by one immutable [`PipelineConfig`]. It can be
//! assembled with the builder, deserialized from JSON, or taken as-is from
//! [`PipelineConfig::default()`], which reproduces the plant layout the job
//! was written for.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Placeholder substituted with the device id in file templates.
pub const DEVICE_PLACEHOLDER: &str = "{device}";

/// Sensors installed at plant location A.
pub const LOCATION_A_DEVICES: [&str; 22] = [
    "A1_df", "A2_df", "A3_df", "A5_df", "A12_df", "A19_df", "A20_df", "A23_df", "A24_df",
    "A25_df", "A26_df", "A27_df", "A28_df", "A32_df", "A34_df", "A36_df", "A37_df", "A39_df",
    "A42_df", "A43_df", "A44_df", "A45_df",
];

/// Sensors installed at plant location B.
pub const LOCATION_B_DEVICES: [&str; 21] = [
    "B4_df", "B6_df", "B8_df", "B9_df", "B10_df", "B11_df", "B13_df", "B14_df", "B15_df",
    "B16_df", "B17_df", "B18_df", "B21_df", "B29_df", "B30_df", "B31_df", "B33_df", "B35_df",
    "B38_df", "B40_df", "B41_df",
];

/// Feature columns read from every source table.
pub const DEFAULT_FEATURE_COLUMNS: [&str; 6] = [
    "DC_POWER",
    "AC_POWER",
    "DAILY_YIELD",
    "AMBIENT_TEMPERATURE",
    "MODULE_TEMPERATURE",
    "IRRADIATION",
];

/// A named group of devices. Groups carry no behavior beyond their label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGroup {
    pub name: String,
    pub devices: Vec<String>,
}

impl DeviceGroup {
    pub fn new<I, S>(name: impl Into<String>, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            devices: devices.into_iter().map(Into::into).collect(),
        }
    }
}

/// Settings for the isolation forest used by the detector stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Expected fraction of outlier rows per device, in (0.0, 0.5].
    /// Default: 0.1
    pub contamination: f64,

    /// Number of trees in the forest.
    /// Default: 100
    pub n_estimators: usize,

    /// Upper bound on rows drawn per tree; the effective value is
    /// `min(max_samples, rows)`.
    /// Default: 256
    pub max_samples: usize,

    /// Seed for the forest's random number generator.
    /// Default: 42
    pub random_seed: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            contamination: 0.1,
            n_estimators: 100,
            max_samples: 256,
            random_seed: 42,
        }
    }
}

/// Whole-run retry policy applied by the CLI runner.
///
/// Per-device failures are never retried; this only covers a run that fails
/// outright.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    /// Default: 1
    pub retries: u32,

    /// Delay between attempts, in seconds.
    /// Default: 300
    pub retry_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 1,
            retry_delay_secs: 300,
        }
    }
}

/// Configuration for one pipeline run.
///
/// Use [`PipelineConfig::builder()`] to create a new configuration
/// with fluent API.
///
/// # Example
///
/// ```rust,ignore
/// use solar_anomaly::config::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .input_dir("Datasets/sensor_wise_data")
///     .output_dir("output")
///     .contamination(0.05)
///     .build()?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding one source table per device.
    /// Default: "Datasets/sensor_wise_data"
    pub input_dir: PathBuf,

    /// Source file name, with `{device}` replaced by the device id.
    /// Default: "{device}.csv"
    pub input_file_template: String,

    /// Directory receiving one labeled table per device.
    /// Default: "output"
    pub output_dir: PathBuf,

    /// Output file name, with `{device}` replaced by the device id.
    /// Default: "anomalies_{device}.csv"
    pub output_file_template: String,

    /// Device groups to process, in order.
    pub device_groups: Vec<DeviceGroup>,

    /// Feature columns selected from each source table, in output order.
    pub feature_columns: Vec<String>,

    /// Name of the boolean column appended by the persister.
    /// Default: "is_anomaly"
    pub label_column: String,

    /// Outlier model settings.
    pub detector: DetectorConfig,

    /// Whole-run retry policy.
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("Datasets/sensor_wise_data"),
            input_file_template: "{device}.csv".to_string(),
            output_dir: PathBuf::from("output"),
            output_file_template: "anomalies_{device}.csv".to_string(),
            device_groups: default_device_groups(),
            feature_columns: DEFAULT_FEATURE_COLUMNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            label_column: "is_anomaly".to_string(),
            detector: DetectorConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

fn default_device_groups() -> Vec<DeviceGroup> {
    vec![
        DeviceGroup::new("location_a", LOCATION_A_DEVICES),
        DeviceGroup::new("location_b", LOCATION_B_DEVICES),
    ]
}

/// Replace the device placeholder in a file template.
pub fn render_template(template: &str, device_id: &str) -> String {
    template.replace(DEVICE_PLACEHOLDER, device_id)
}

impl PipelineConfig {
    /// Create a new configuration builder.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Load and validate a configuration from a JSON file.
    ///
    /// Missing fields fall back to their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: PipelineConfig = serde_json::from_str(&content)?;
        config
            .validate()
            .map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        Ok(config)
    }

    /// All devices with their group name, in processing order.
    pub fn devices(&self) -> impl Iterator<Item = (&str, &str)> {
        self.device_groups.iter().flat_map(|group| {
            group
                .devices
                .iter()
                .map(move |device| (group.name.as_str(), device.as_str()))
        })
    }

    /// Total number of configured devices.
    pub fn device_count(&self) -> usize {
        self.device_groups.iter().map(|g| g.devices.len()).sum()
    }

    /// Path of the source table for a device.
    pub fn source_path(&self, device_id: &str) -> PathBuf {
        self.input_dir
            .join(render_template(&self.input_file_template, device_id))
    }

    /// Path of the labeled output table for a device.
    pub fn output_path(&self, device_id: &str) -> PathBuf {
        self.output_dir
            .join(render_template(&self.output_file_template, device_id))
    }

    /// Validate the configuration and return errors if invalid.
    pub fn validate(&self) -> std::result::Result<(), ConfigValidationError> {
        let contamination = self.detector.contamination;
        if !(contamination > 0.0 && contamination <= 0.5) {
            return Err(ConfigValidationError::InvalidContamination(contamination));
        }

        if self.detector.n_estimators == 0 {
            return Err(ConfigValidationError::InvalidCount {
                field: "n_estimators".to_string(),
            });
        }

        if self.detector.max_samples < 2 {
            return Err(ConfigValidationError::InvalidCount {
                field: "max_samples".to_string(),
            });
        }

        if self.feature_columns.is_empty() {
            return Err(ConfigValidationError::NoFeatureColumns);
        }

        if self.feature_columns.contains(&self.label_column) {
            return Err(ConfigValidationError::LabelColumnConflict(
                self.label_column.clone(),
            ));
        }

        for (field, template) in [
            ("input_file_template", &self.input_file_template),
            ("output_file_template", &self.output_file_template),
        ] {
            if !template.contains(DEVICE_PLACEHOLDER) {
                return Err(ConfigValidationError::MissingPlaceholder {
                    field: field.to_string(),
                    template: template.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Errors that can occur during configuration validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid contamination: {0} (must be in (0.0, 0.5])")]
    InvalidContamination(f64),

    #[error("Invalid value for '{field}': too small")]
    InvalidCount { field: String },

    #[error("At least one feature column is required")]
    NoFeatureColumns,

    #[error("Label column '{0}' collides with a feature column")]
    LabelColumnConflict(String),

    #[error("Template for '{field}' must contain {{device}}: '{template}'")]
    MissingPlaceholder { field: String, template: String },
}

/// Builder for [`PipelineConfig`] with fluent API.
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    input_dir: Option<PathBuf>,
    input_file_template: Option<String>,
    output_dir: Option<PathBuf>,
    output_file_template: Option<String>,
    device_groups: Option<Vec<DeviceGroup>>,
    only_devices: Option<Vec<String>>,
    feature_columns: Option<Vec<String>>,
    label_column: Option<String>,
    contamination: Option<f64>,
    n_estimators: Option<usize>,
    max_samples: Option<usize>,
    random_seed: Option<u64>,
    retry: Option<RetryPolicy>,
}

impl PipelineConfigBuilder {
    /// Start from an existing configuration; later calls override it.
    pub fn from_config(config: PipelineConfig) -> Self {
        Self {
            input_dir: Some(config.input_dir),
            input_file_template: Some(config.input_file_template),
            output_dir: Some(config.output_dir),
            output_file_template: Some(config.output_file_template),
            device_groups: Some(config.device_groups),
            only_devices: None,
            feature_columns: Some(config.feature_columns),
            label_column: Some(config.label_column),
            contamination: Some(config.detector.contamination),
            n_estimators: Some(config.detector.n_estimators),
            max_samples: Some(config.detector.max_samples),
            random_seed: Some(config.detector.random_seed),
            retry: Some(config.retry),
        }
    }

    /// Set the directory holding the source tables.
    pub fn input_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_dir = Some(path.into());
        self
    }

    /// Set the source file template (must contain `{device}`).
    pub fn input_file_template(mut self, template: impl Into<String>) -> Self {
        self.input_file_template = Some(template.into());
        self
    }

    /// Set the directory receiving labeled tables.
    pub fn output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    /// Set the output file template (must contain `{device}`).
    pub fn output_file_template(mut self, template: impl Into<String>) -> Self {
        self.output_file_template = Some(template.into());
        self
    }

    /// Replace all device groups.
    pub fn device_groups(mut self, groups: Vec<DeviceGroup>) -> Self {
        self.device_groups = Some(groups);
        self
    }

    /// Append a device group.
    pub fn device_group(mut self, group: DeviceGroup) -> Self {
        self.device_groups.get_or_insert_with(Vec::new).push(group);
        self
    }

    /// Restrict the run to the named devices. Groups left empty are dropped.
    pub fn only_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only_devices = Some(devices.into_iter().map(Into::into).collect());
        self
    }

    /// Set the feature columns.
    pub fn feature_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.feature_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Set the name of the appended label column.
    pub fn label_column(mut self, name: impl Into<String>) -> Self {
        self.label_column = Some(name.into());
        self
    }

    /// Set the expected outlier fraction.
    pub fn contamination(mut self, contamination: f64) -> Self {
        self.contamination = Some(contamination);
        self
    }

    /// Set the number of trees.
    pub fn n_estimators(mut self, n: usize) -> Self {
        self.n_estimators = Some(n);
        self
    }

    /// Set the per-tree sample size cap.
    pub fn max_samples(mut self, n: usize) -> Self {
        self.max_samples = Some(n);
        self
    }

    /// Set the random seed.
    pub fn random_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    /// Set the whole-run retry policy.
    pub fn retry(mut self, retries: u32, retry_delay_secs: u64) -> Self {
        self.retry = Some(RetryPolicy {
            retries,
            retry_delay_secs,
        });
        self
    }

    /// Build the configuration.
    ///
    /// Returns a validated `PipelineConfig` or an error if validation fails.
    pub fn build(self) -> std::result::Result<PipelineConfig, ConfigValidationError> {
        let defaults = PipelineConfig::default();
        let detector_defaults = DetectorConfig::default();

        let mut device_groups = self.device_groups.unwrap_or(defaults.device_groups);
        if let Some(only) = &self.only_devices {
            for group in &mut device_groups {
                group.devices.retain(|d| only.contains(d));
            }
            device_groups.retain(|g| !g.devices.is_empty());
        }

        let config = PipelineConfig {
            input_dir: self.input_dir.unwrap_or(defaults.input_dir),
            input_file_template: self
                .input_file_template
                .unwrap_or(defaults.input_file_template),
            output_dir: self.output_dir.unwrap_or(defaults.output_dir),
            output_file_template: self
                .output_file_template
                .unwrap_or(defaults.output_file_template),
            device_groups,
            feature_columns: self.feature_columns.unwrap_or(defaults.feature_columns),
            label_column: self.label_column.unwrap_or(defaults.label_column),
            detector: DetectorConfig {
                contamination: self
                    .contamination
                    .unwrap_or(detector_defaults.contamination),
                n_estimators: self.n_estimators.unwrap_or(detector_defaults.n_estimators),
                max_samples: self.max_samples.unwrap_or(detector_defaults.max_samples),
                random_seed: self.random_seed.unwrap_or(detector_defaults.random_seed),
            },
            retry: self.retry.unwrap_or(defaults.retry),
        };

        config.validate()?;
        Ok(config)
    }
}
