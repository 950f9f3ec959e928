//! Bagged random-forest regression.
//!
//! Ensemble of CART trees, each grown on a bootstrap draw of the training
//! rows with a random feature subset considered at every split. Prediction is
//! the mean over trees; feature importances are the normalized total variance
//! reduction attributed to each feature across the forest.

mod tree;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{MapError, Result};
use crate::samples::derive_seed;
use tree::{RegressionTree, TreeParams};

/// Forest hyperparameters; the first three are the tuned set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparams {
    /// Random features considered per split.
    pub variables_per_split: usize,
    /// Minimum rows in a leaf.
    pub min_leaf_population: usize,
    /// Fraction of training rows bagged (with replacement) per tree.
    pub bag_fraction: f64,
    /// Trees in the ensemble; fixed, not tuned.
    pub n_trees: usize,
}

impl Default for Hyperparams {
    fn default() -> Self {
        Self {
            variables_per_split: 5,
            min_leaf_population: 5,
            bag_fraction: 0.5,
            n_trees: 100,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RandomForestRegressor {
    trees: Vec<RegressionTree>,
    /// Normalized per-feature importance, summing to 1 unless all-zero.
    importances: Vec<f64>,
    n_features: usize,
}

impl RandomForestRegressor {
    /// Train on a row-major feature table. Fully deterministic for a fixed
    /// seed: every tree's RNG derives from (seed, tree index).
    pub fn fit(
        features: &[Vec<f64>],
        targets: &[f64],
        hp: &Hyperparams,
        seed: u64,
    ) -> Result<Self> {
        if features.is_empty() {
            return Err(MapError::EmptyFeatureTable);
        }
        if features.len() != targets.len() {
            return Err(MapError::TargetLengthMismatch {
                features: features.len(),
                targets: targets.len(),
            });
        }
        let n_features = features[0].len();
        for (row, f) in features.iter().enumerate() {
            if f.len() != n_features {
                return Err(MapError::RaggedFeatureTable {
                    row,
                    got: f.len(),
                    expected: n_features,
                });
            }
        }

        let n = features.len();
        let bag_size = ((n as f64) * hp.bag_fraction).round().max(1.0) as usize;
        let params = TreeParams {
            variables_per_split: hp.variables_per_split.clamp(1, n_features),
            min_leaf_population: hp.min_leaf_population.max(1),
        };

        let mut importances = vec![0.0; n_features];
        let mut trees = Vec::with_capacity(hp.n_trees);
        for t in 0..hp.n_trees {
            let mut rng = StdRng::seed_from_u64(derive_seed(seed, t as u64, 0));
            let rows: Vec<usize> = (0..bag_size).map(|_| rng.gen_range(0..n)).collect();
            trees.push(RegressionTree::fit(
                features,
                targets,
                &rows,
                &params,
                &mut rng,
                &mut importances,
            ));
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for v in &mut importances {
                *v /= total;
            }
        }

        Ok(Self {
            trees,
            importances,
            n_features,
        })
    }

    /// Mean prediction over all trees.
    pub fn predict(&self, x: &[f64]) -> f64 {
        debug_assert_eq!(x.len(), self.n_features);
        let sum: f64 = self.trees.iter().map(|t| t.predict(x)).sum();
        sum / self.trees.len() as f64
    }

    pub fn predict_batch(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        rows.iter().map(|r| self.predict(r)).collect()
    }

    /// Normalized per-feature importances, index-aligned with the feature
    /// table columns.
    pub fn importances(&self) -> &[f64] {
        &self.importances
    }

    /// (name, importance) pairs sorted by descending importance.
    pub fn ranked_importances(&self, names: &[String]) -> Vec<(String, f64)> {
        debug_assert_eq!(names.len(), self.n_features);
        let mut out: Vec<(String, f64)> = names
            .iter()
            .cloned()
            .zip(self.importances.iter().copied())
            .collect();
        out.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        out
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}
