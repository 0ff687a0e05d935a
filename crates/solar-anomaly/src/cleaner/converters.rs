//! Conversion of feature columns to `Float64`.

use crate::error::{PipelineError, Result};
use polars::prelude::*;

/// Tokens read as a missing reading rather than a malformed one.
const MISSING_MARKERS: [&str; 4] = ["na", "nan", "null", "none"];

fn is_missing_marker(value: &str) -> bool {
    value.is_empty() || MISSING_MARKERS.contains(&value.to_ascii_lowercase().as_str())
}

/// Convert a feature column to `Float64`.
///
/// Numeric columns are cast directly. String columns (the loader reads every
/// source column as text) are parsed value by value: blanks and missing markers become nulls, anything else that does not
/// parse is a malformed row and fails the whole column. NaN is treated as
/// missing in every case.
pub(crate) fn to_float64(series: &Series) -> Result<Series> {
    match series.dtype() {
        DataType::String => parse_string_column(series),
        dtype if dtype.is_primitive_numeric() || dtype.is_null() => {
            nan_to_null(&series.cast(&DataType::Float64)?)
        }
        other => Err(PipelineError::TypeConversionFailed {
            column: series.name().to_string(),
            target_type: "Float64".to_string(),
            reason: format!("unsupported source type {}", other),
        }),
    }
}

fn nan_to_null(series: &Series) -> Result<Series> {
    let values: Vec<Option<f64>> = series
        .f64()?
        .into_iter()
        .map(|v| v.filter(|x| !x.is_nan()))
        .collect();
    Ok(Series::new(series.name().clone(), values))
}

fn parse_string_column(series: &Series) -> Result<Series> {
    let str_series = series.str()?;
    let mut result_vec: Vec<Option<f64>> = Vec::with_capacity(str_series.len());

    for (row, opt_val) in str_series.into_iter().enumerate() {
        match opt_val.map(str::trim) {
            Some(val) if is_missing_marker(val) => result_vec.push(None),
            Some(val) => match val.parse::<f64>() {
                Ok(parsed) => result_vec.push(Some(parsed).filter(|x| !x.is_nan())),
                Err(_) => {
                    return Err(PipelineError::TypeConversionFailed {
                        column: series.name().to_string(),
                        target_type: "Float64".to_string(),
                        reason: format!("row {} holds non-numeric value '{}'", row, val),
                    });
                }
            },
            None => result_vec.push(None),
        }
    }

    Ok(Series::new(series.name().clone(), result_vec))
}
