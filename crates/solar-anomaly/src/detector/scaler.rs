//! Per-column standardization to zero mean and unit variance.

use crate::error::{PipelineError, Result};

/// Standardizes each feature column with statistics from the data it was
/// fitted on. Uses the population standard deviation.
#[derive(Debug, Clone, Default)]
pub struct StandardScaler {
    means: Vec<f64>,
    std_devs: Vec<f64>,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute per-column mean and standard deviation.
    ///
    /// `column_names` is only used to name a zero-variance column in the
    /// error.
    pub fn fit(&mut self, rows: &[Vec<f64>], column_names: &[String]) -> Result<()> {
        if rows.len() < 2 {
            return Err(PipelineError::InsufficientRows {
                required: 2,
                found: rows.len(),
            });
        }

        let n_features = rows[0].len();
        let n = rows.len() as f64;
        let mut means = vec![0.0; n_features];
        let mut std_devs = vec![0.0; n_features];

        for feature in 0..n_features {
            let mean = rows.iter().map(|row| row[feature]).sum::<f64>() / n;
            let variance = rows
                .iter()
                .map(|row| (row[feature] - mean).powi(2))
                .sum::<f64>()
                / n;
            let std_dev = variance.sqrt();

            if is_degenerate(std_dev, mean) {
                let column = column_names
                    .get(feature)
                    .cloned()
                    .unwrap_or_else(|| format!("#{}", feature));
                return Err(PipelineError::DegenerateFeature { column });
            }

            means[feature] = mean;
            std_devs[feature] = std_dev;
        }

        self.means = means;
        self.std_devs = std_devs;
        Ok(())
    }

    /// Apply the fitted statistics.
    pub fn transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>> {
        if self.means.is_empty() {
            return Err(PipelineError::ModelNotFitted);
        }

        Ok(rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(self.means.iter().zip(&self.std_devs))
                    .map(|(value, (mean, std_dev))| (value - mean) / std_dev)
                    .collect()
            })
            .collect())
    }

    pub fn fit_transform(
        &mut self,
        rows: &[Vec<f64>],
        column_names: &[String],
    ) -> Result<Vec<Vec<f64>>> {
        self.fit(rows, column_names)?;
        self.transform(rows)
    }

    pub fn means(&self) -> &[f64] {
        &self.means
    }

    pub fn std_devs(&self) -> &[f64] {
        &self.std_devs
    }
}

/// A spread this small relative to the column's magnitude is rounding noise.
fn is_degenerate(std_dev: f64, mean: f64) -> bool {
    !std_dev.is_finite() || std_dev <= 10.0 * f64::EPSILON * mean.abs().max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("f{}", i)).collect()
    }

    #[test]
    fn test_zero_mean_unit_variance() {
        let rows = vec![
            vec![1.0, 10.0],
            vec![2.0, 20.0],
            vec![3.0, 30.0],
            vec![4.0, 40.0],
        ];
        let mut scaler = StandardScaler::new();
        let scaled = scaler.fit_transform(&rows, &names(2)).unwrap();

        for feature in 0..2 {
            let column: Vec<f64> = scaled.iter().map(|r| r[feature]).collect();
            let mean = column.iter().sum::<f64>() / column.len() as f64;
            let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / column.len() as f64;
            assert!(mean.abs() < 1e-12);
            assert!((var - 1.0).abs() < 1e-12);
        }
        assert_eq!(scaler.means(), &[2.5, 25.0]);
    }

    #[test]
    fn test_constant_column_is_degenerate() {
        let rows = vec![vec![1.0, 25.1], vec![2.0, 25.1], vec![3.0, 25.1]];
        let mut scaler = StandardScaler::new();
        let err = scaler
            .fit(&rows, &["DC_POWER".to_string(), "AMBIENT_TEMPERATURE".to_string()])
            .unwrap_err();
        match err {
            PipelineError::DegenerateFeature { column } => assert_eq!(column, "AMBIENT_TEMPERATURE"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_single_row_rejected() {
        let mut scaler = StandardScaler::new();
        let err = scaler.fit(&[vec![1.0]], &names(1)).unwrap_err();
        assert_eq!(err.error_code(), "INSUFFICIENT_ROWS");
    }

    #[test]
    fn test_transform_before_fit() {
        let scaler = StandardScaler::new();
        assert!(scaler.transform(&[vec![1.0]]).is_err());
    }
}
