//! Isolation forest outlier model.
//!
//! Each tree recursively partitions a random subsample with random
//! axis-aligned cuts. Points that end up isolated after few cuts are unusual
//! relative to the bulk of the data; the anomaly score turns the average path
//! length into a value in (0, 1] where higher means more anomalous.

use super::OutlierModel;
use crate::config::DetectorConfig;
use crate::error::{PipelineError, Result};
use rand::prelude::*;
use rand::seq::index;
use tracing::debug;

const EULER_GAMMA: f64 = 0.577_215_664_9;

/// Expected path length of an unsuccessful search in a binary search tree
/// built from `n` points. Normalizes path lengths across sample sizes.
pub(crate) fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    root: Node,
}

impl IsolationTree {
    fn build(rows: &[Vec<f64>], sample: Vec<usize>, height_limit: usize, rng: &mut StdRng) -> Self {
        let n_features = rows.first().map_or(0, Vec::len);
        Self {
            root: grow(rows, sample, 0, height_limit, n_features, rng),
        }
    }

    fn path_length(&self, point: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0usize;
        loop {
            match node {
                Node::Leaf { size } => return depth as f64 + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if point[*feature] < *threshold { left } else { right };
                    depth += 1;
                }
            }
        }
    }
}

fn grow(
    rows: &[Vec<f64>],
    indices: Vec<usize>,
    depth: usize,
    height_limit: usize,
    n_features: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= height_limit || indices.len() <= 1 {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    let mut features: Vec<usize> = (0..n_features).collect();
    features.shuffle(rng);

    for feature in features {
        let (min, max) = indices.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
            let value = rows[i][feature];
            (lo.min(value), hi.max(value))
        });
        if max <= min {
            continue;
        }

        let threshold = rng.gen_range(min..max);
        let (left, right): (Vec<usize>, Vec<usize>) =
            indices.iter().partition(|&&i| rows[i][feature] < threshold);

        return Node::Split {
            feature,
            threshold,
            left: Box::new(grow(rows, left, depth + 1, height_limit, n_features, rng)),
            right: Box::new(grow(rows, right, depth + 1, height_limit, n_features, rng)),
        };
    }

    // every feature is constant within this node
    Node::Leaf {
        size: indices.len(),
    }
}

/// Unsupervised outlier model built from an ensemble of isolation trees.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    n_estimators: usize,
    max_samples: usize,
    contamination: f64,
    random_seed: u64,
    trees: Vec<IsolationTree>,
    sample_size: usize,
    n_features: usize,
    threshold: Option<f64>,
}

impl IsolationForest {
    pub fn new(n_estimators: usize, max_samples: usize, contamination: f64, random_seed: u64) -> Self {
        Self {
            n_estimators: n_estimators.max(1),
            max_samples: max_samples.max(2),
            contamination,
            random_seed,
            trees: Vec::new(),
            sample_size: 0,
            n_features: 0,
            threshold: None,
        }
    }

    /// Create from configuration.
    pub fn from_config(config: &DetectorConfig) -> Self {
        Self::new(
            config.n_estimators,
            config.max_samples,
            config.contamination,
            config.random_seed,
        )
    }

    /// Row width seen during the last fit.
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Rows drawn per tree during the last fit.
    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    fn anomaly_score(&self, point: &[f64]) -> f64 {
        let mean_path = self
            .trees
            .iter()
            .map(|tree| tree.path_length(point))
            .sum::<f64>()
            / self.trees.len() as f64;
        2f64.powf(-mean_path / average_path_length(self.sample_size))
    }
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::from_config(&DetectorConfig::default())
    }
}

impl OutlierModel for IsolationForest {
    fn fit(&mut self, rows: &[Vec<f64>]) -> Result<()> {
        if rows.len() < 2 {
            return Err(PipelineError::InsufficientRows {
                required: 2,
                found: rows.len(),
            });
        }

        let n_features = rows[0].len();
        check_width(rows, n_features)?;

        let mut rng = StdRng::seed_from_u64(self.random_seed);
        let sample_size = self.max_samples.min(rows.len());
        let height_limit = (sample_size as f64).log2().ceil() as usize;

        self.trees = (0..self.n_estimators)
            .map(|_| {
                let sample = index::sample(&mut rng, rows.len(), sample_size).into_vec();
                IsolationTree::build(rows, sample, height_limit, &mut rng)
            })
            .collect();
        self.sample_size = sample_size;
        self.n_features = n_features;

        let scores = self.score(rows)?;
        let threshold = quantile(&scores, 1.0 - self.contamination);
        self.threshold = Some(threshold);

        debug!(
            "Fitted {} trees on {} rows (sample size {}, height limit {}), threshold {:.4}",
            self.trees.len(),
            rows.len(),
            sample_size,
            height_limit,
            threshold
        );
        Ok(())
    }

    fn score(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        if self.trees.is_empty() {
            return Err(PipelineError::ModelNotFitted);
        }
        check_width(rows, self.n_features)?;
        Ok(rows.iter().map(|row| self.anomaly_score(row)).collect())
    }

    fn threshold(&self) -> Result<f64> {
        self.threshold.ok_or(PipelineError::ModelNotFitted)
    }

    fn is_fitted(&self) -> bool {
        self.threshold.is_some()
    }
}

/// Every row must hold `expected` features; tree splits index by position.
fn check_width(rows: &[Vec<f64>], expected: usize) -> Result<()> {
    match rows.iter().find(|row| row.len() != expected) {
        Some(row) => Err(PipelineError::FeatureCountMismatch {
            expected,
            found: row.len(),
        }),
        None => Ok(()),
    }
}

/// Quantile with linear interpolation between closest ranks.
pub(crate) fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * fraction
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tight cluster around the origin with one far-away point at the end.
    fn cluster_with_outlier(n: usize) -> Vec<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(7);
        let mut rows: Vec<Vec<f64>> = (0..n)
            .map(|_| vec![rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)])
            .collect();
        rows.push(vec![8.0, 8.0]);
        rows
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // c(256) is roughly 10.24
        assert!((average_path_length(256) - 10.24).abs() < 0.01);
    }

    #[test]
    fn test_quantile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile(&values, 0.5), 3.0);
        assert!((quantile(&values, 0.9) - 4.6).abs() < 1e-12);
        assert_eq!(quantile(&values, 1.0), 5.0);
    }

    #[test]
    fn test_outlier_scores_highest() {
        let rows = cluster_with_outlier(100);
        let mut forest = IsolationForest::default();
        forest.fit(&rows).unwrap();

        let scores = forest.score(&rows).unwrap();
        let outlier_score = *scores.last().unwrap();
        assert!(scores[..100].iter().all(|&s| s < outlier_score));
        assert!(outlier_score > 0.6);
        assert!(scores.iter().all(|&s| s > 0.0 && s <= 1.0));
    }

    #[test]
    fn test_predict_flags_contamination_share() {
        let rows = cluster_with_outlier(199);
        let mut forest = IsolationForest::default();
        forest.fit(&rows).unwrap();

        let labels = forest.predict(&rows).unwrap();
        let flagged = labels.iter().filter(|&&l| l).count();
        assert!((10..=30).contains(&flagged), "flagged {flagged} of 200");
        assert!(labels[199]);
    }

    #[test]
    fn test_same_seed_same_scores() {
        let rows = cluster_with_outlier(50);
        let mut a = IsolationForest::new(50, 256, 0.1, 42);
        let mut b = IsolationForest::new(50, 256, 0.1, 42);
        a.fit(&rows).unwrap();
        b.fit(&rows).unwrap();
        assert_eq!(a.score(&rows).unwrap(), b.score(&rows).unwrap());
    }

    #[test]
    fn test_sample_size_capped_by_rows() {
        let rows = cluster_with_outlier(9);
        let mut forest = IsolationForest::new(10, 256, 0.1, 1);
        forest.fit(&rows).unwrap();
        assert_eq!(forest.sample_size(), 10);
    }

    #[test]
    fn test_identical_rows_do_not_split() {
        let rows = vec![vec![1.0, 1.0]; 8];
        let mut forest = IsolationForest::new(5, 256, 0.1, 3);
        forest.fit(&rows).unwrap();
        let scores = forest.score(&rows).unwrap();
        assert!(scores.windows(2).all(|w| w[0] == w[1]));
        assert!(forest.predict(&rows).unwrap().iter().all(|&l| !l));
    }

    #[test]
    fn test_score_before_fit() {
        let forest = IsolationForest::default();
        assert!(!forest.is_fitted());
        assert_eq!(
            forest.score(&[vec![0.0]]).unwrap_err().error_code(),
            "MODEL_NOT_FITTED"
        );
    }

    #[test]
    fn test_narrower_rows_rejected() {
        let mut forest = IsolationForest::new(10, 256, 0.1, 42);
        forest.fit(&cluster_with_outlier(20)).unwrap();
        assert_eq!(forest.n_features(), 2);

        let err = forest.score(&[vec![0.5]]).unwrap_err();
        assert_eq!(err.error_code(), "FEATURE_COUNT_MISMATCH");
        assert!(forest.predict(&[vec![0.5, 0.5, 0.5]]).is_err());
    }

    #[test]
    fn test_ragged_training_rows_rejected() {
        let mut forest = IsolationForest::new(10, 256, 0.1, 42);
        let rows = vec![vec![0.0, 1.0], vec![1.0], vec![2.0, 0.5]];
        let err = forest.fit(&rows).unwrap_err();
        assert_eq!(err.error_code(), "FEATURE_COUNT_MISMATCH");
        assert!(!forest.is_fitted());
    }
}
