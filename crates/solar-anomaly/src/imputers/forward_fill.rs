//! Forward-fill imputation.
//!
//! Each missing cell takes the nearest preceding non-missing value of the same
//! column. A run of missing values at the very start of a column has nothing to
//! inherit from and is left missing.

use crate::error::Result;
use polars::prelude::*;
use tracing::debug;

/// Forward-fills missing values column by column, in row order.
pub struct ForwardFillImputer;

impl ForwardFillImputer {
    /// Forward-fill the named columns of `df` in place.
    ///
    /// Columns absent from the frame are skipped. One processing step is
    /// recorded per column that actually had gaps.
    pub fn apply(
        df: &mut DataFrame,
        columns: &[String],
        processing_steps: &mut Vec<String>,
    ) -> Result<()> {
        for col_name in columns {
            let Ok(column) = df.column(col_name) else {
                continue;
            };
            let series = column.as_materialized_series();
            let missing_before = series.null_count();
            if missing_before == 0 {
                continue;
            }

            let unresolved = Self::leading_null_count(series);
            let filled = Self::fill_series(series)?;
            df.replace(col_name, filled)?;

            debug!(
                "Forward-filled '{}': {} missing, {} leading left unresolved",
                col_name, missing_before, unresolved
            );
            processing_steps.push(format!(
                "Forward-filled {} values in '{}'",
                missing_before - unresolved,
                col_name
            ));
            if unresolved > 0 {
                processing_steps.push(format!(
                    "'{}' starts with {} missing values that could not be filled",
                    col_name, unresolved
                ));
            }
        }

        Ok(())
    }

    /// Forward-fill a single series without a fill limit.
    pub fn fill_series(series: &Series) -> Result<Series> {
        Ok(series.fill_null(FillNullStrategy::Forward(None))?)
    }

    /// Number of missing values before the first present one.
    pub fn leading_null_count(series: &Series) -> usize {
        let mask = series.is_null();
        (&mask)
            .into_iter()
            .take_while(|is_null| is_null.unwrap_or(false))
            .count()
    }
}
