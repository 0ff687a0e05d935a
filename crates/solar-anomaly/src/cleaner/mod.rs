//! Data cleaning for per-device source tables.
//!
//! Cleaning a table means:
//! - Selecting the configured feature columns, in configured order
//! - Converting each of them to `Float64`
//! - Forward-filling missing readings

mod converters;

use crate::error::{PipelineError, Result};
use crate::imputers::ForwardFillImputer;
use polars::prelude::*;
use tracing::debug;

/// Restricts a source table to the feature set and fills its gaps.
pub struct DataCleaner {
    feature_columns: Vec<String>,
}

impl DataCleaner {
    pub fn new(feature_columns: Vec<String>) -> Self {
        Self { feature_columns }
    }

    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    /// Clean a raw source table.
    ///
    /// Returns the cleaned frame and a description of each step taken. Fails
    /// if any feature column is absent or holds non-numeric values.
    pub fn clean(&self, df: &DataFrame) -> Result<(DataFrame, Vec<String>)> {
        let mut processing_steps = Vec::new();

        let mut df = self.select_features(df)?;
        processing_steps.push(format!(
            "Selected {} feature columns from {} rows",
            df.width(),
            df.height()
        ));

        for col_name in &self.feature_columns {
            let converted = converters::to_float64(df.column(col_name)?.as_materialized_series())?;
            df.replace(col_name, converted)?;
        }

        ForwardFillImputer::apply(&mut df, &self.feature_columns, &mut processing_steps)?;

        debug!("Cleaned frame shape: {:?}", df.shape());
        Ok((df, processing_steps))
    }

    /// Keep only the feature columns, reporting every absent one at once.
    fn select_features(&self, df: &DataFrame) -> Result<DataFrame> {
        let available: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();

        let missing: Vec<String> = self
            .feature_columns
            .iter()
            .filter(|col| !available.contains(col))
            .cloned()
            .collect();

        if !missing.is_empty() {
            return Err(PipelineError::MissingColumns(missing));
        }

        Ok(df.select(self.feature_columns.iter().map(|s| s.as_str()))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_FEATURE_COLUMNS;
    use pretty_assertions::assert_eq;

    fn cleaner() -> DataCleaner {
        DataCleaner::new(DEFAULT_FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect())
    }

    fn raw_frame() -> DataFrame {
        df![
            "DATE_TIME" => ["15-05-2020 00:00", "15-05-2020 00:15", "15-05-2020 00:30"],
            "SOURCE_KEY" => ["1BY6WEcLGh8j5v7", "1BY6WEcLGh8j5v7", "1BY6WEcLGh8j5v7"],
            "IRRADIATION" => [Some(0.0), None, Some(0.2)],
            "DC_POWER" => [Some(10.0), Some(12.0), None],
            "AC_POWER" => [1.0, 1.2, 1.4],
            "DAILY_YIELD" => [100i64, 110, 120],
            "AMBIENT_TEMPERATURE" => [25.0, 25.1, 25.2],
            "MODULE_TEMPERATURE" => [None, Some(22.0), Some(23.0)],
        ]
        .unwrap()
    }

    #[test]
    fn test_clean_selects_features_in_order() {
        let (df, _) = cleaner().clean(&raw_frame()).unwrap();
        let names: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(names, DEFAULT_FEATURE_COLUMNS.to_vec());
        assert_eq!(df.height(), 3);
        for col in df.get_columns() {
            assert_eq!(col.dtype(), &DataType::Float64);
        }
    }

    #[test]
    fn test_clean_forward_fills_interior_gaps_only() {
        let (df, steps) = cleaner().clean(&raw_frame()).unwrap();

        let irradiation: Vec<Option<f64>> =
            df.column("IRRADIATION").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(irradiation, vec![Some(0.0), Some(0.0), Some(0.2)]);

        let dc_power: Vec<Option<f64>> =
            df.column("DC_POWER").unwrap().f64().unwrap().into_iter().collect();
        assert_eq!(dc_power, vec![Some(10.0), Some(12.0), Some(12.0)]);

        // leading gap has nothing to inherit
        assert_eq!(df.column("MODULE_TEMPERATURE").unwrap().null_count(), 1);
        assert!(steps.iter().any(|s| s.contains("MODULE_TEMPERATURE")));
    }

    #[test]
    fn test_clean_reports_all_missing_columns() {
        let df = df![
            "DC_POWER" => [1.0],
            "AC_POWER" => [1.0],
        ]
        .unwrap();

        let err = cleaner().clean(&df).unwrap_err();
        match err {
            PipelineError::MissingColumns(missing) => {
                assert_eq!(
                    missing,
                    vec![
                        "DAILY_YIELD",
                        "AMBIENT_TEMPERATURE",
                        "MODULE_TEMPERATURE",
                        "IRRADIATION"
                    ]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_clean_rejects_non_numeric_feature() {
        let mut df = raw_frame();
        df.replace(
            "AC_POWER",
            Series::new("AC_POWER".into(), ["1.0", "oops", "1.4"]),
        )
        .unwrap();

        let err = cleaner().clean(&df).unwrap_err();
        assert_eq!(err.error_code(), "TYPE_CONVERSION_FAILED");
    }
}
