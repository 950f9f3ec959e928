//! CART regression tree with random feature subsets at each split.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Flat node storage. `feature == LEAF` marks a leaf whose prediction is
/// `value`; internal nodes route on `x[feature] <= threshold`.
#[derive(Debug, Clone)]
struct Node {
    feature: usize,
    threshold: f64,
    left: usize,
    right: usize,
    value: f64,
}

const LEAF: usize = usize::MAX;

#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    n_features: usize,
}

/// Split-growth parameters for one tree.
pub struct TreeParams {
    pub variables_per_split: usize,
    pub min_leaf_population: usize,
}

impl RegressionTree {
    /// Grow a tree on the rows of `features` indexed by `rows`.
    ///
    /// `importances` accumulates, per feature, the population-weighted
    /// variance reduction of every split taken — shared across a forest's
    /// trees and normalized there.
    pub fn fit(
        features: &[Vec<f64>],
        targets: &[f64],
        rows: &[usize],
        params: &TreeParams,
        rng: &mut StdRng,
        importances: &mut [f64],
    ) -> Self {
        let n_features = features.first().map_or(0, Vec::len);
        let mut tree = Self {
            nodes: Vec::new(),
            n_features,
        };
        let mut rows = rows.to_vec();
        let n_total = rows.len().max(1);
        tree.grow(features, targets, &mut rows, params, rng, importances, n_total);
        tree
    }

    /// Recursive node growth; returns the new node's index.
    #[allow(clippy::too_many_arguments)]
    fn grow(
        &mut self,
        features: &[Vec<f64>],
        targets: &[f64],
        rows: &mut [usize],
        params: &TreeParams,
        rng: &mut StdRng,
        importances: &mut [f64],
        n_total: usize,
    ) -> usize {
        let mean = node_mean(targets, rows);
        let variance = node_variance(targets, rows, mean);

        if rows.len() < 2 * params.min_leaf_population.max(1) || variance <= 0.0 {
            return self.push_leaf(mean);
        }

        let Some(split) = self.best_split(features, targets, rows, params, rng) else {
            return self.push_leaf(mean);
        };

        // In-place partition on the chosen split.
        let mid = partition_rows(features, rows, split.feature, split.threshold);
        debug_assert!(mid > 0 && mid < rows.len());

        importances[split.feature] += (rows.len() as f64 / n_total as f64) * split.reduction;

        let node_idx = self.nodes.len();
        self.nodes.push(Node {
            feature: split.feature,
            threshold: split.threshold,
            left: 0,
            right: 0,
            value: mean,
        });

        let (left_rows, right_rows) = rows.split_at_mut(mid);
        let left = self.grow(features, targets, left_rows, params, rng, importances, n_total);
        let right = self.grow(features, targets, right_rows, params, rng, importances, n_total);
        self.nodes[node_idx].left = left;
        self.nodes[node_idx].right = right;
        node_idx
    }

    fn push_leaf(&mut self, value: f64) -> usize {
        self.nodes.push(Node {
            feature: LEAF,
            threshold: 0.0,
            left: 0,
            right: 0,
            value,
        });
        self.nodes.len() - 1
    }

    /// Best variance-reducing split over a random feature subset, honouring
    /// `min_leaf_population` on both children. None when no candidate exists
    /// (e.g. every considered feature is constant within the node).
    fn best_split(
        &self,
        features: &[Vec<f64>],
        targets: &[f64],
        rows: &[usize],
        params: &TreeParams,
        rng: &mut StdRng,
    ) -> Option<Split> {
        let mut candidates: Vec<usize> = (0..self.n_features).collect();
        candidates.shuffle(rng);
        candidates.truncate(params.variables_per_split.clamp(1, self.n_features));

        let n = rows.len() as f64;
        let sum: f64 = rows.iter().map(|&r| targets[r]).sum();
        let sum_sq: f64 = rows.iter().map(|&r| targets[r] * targets[r]).sum();
        let parent_var = (sum_sq - sum * sum / n) / n;

        let mut best: Option<Split> = None;
        let min_leaf = params.min_leaf_population.max(1);

        for &feat in &candidates {
            // Sort rows by the candidate feature and sweep prefix sums.
            let mut order: Vec<usize> = rows.to_vec();
            order.sort_by(|&a, &b| {
                features[a][feat]
                    .partial_cmp(&features[b][feat])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for (i, &row) in order.iter().enumerate().take(order.len() - 1) {
                let t = targets[row];
                left_sum += t;
                left_sq += t * t;

                let n_left = i + 1;
                let n_right = order.len() - n_left;
                if n_left < min_leaf || n_right < min_leaf {
                    continue;
                }
                // No split between equal feature values.
                let v = features[row][feat];
                let v_next = features[order[i + 1]][feat];
                if v_next <= v {
                    continue;
                }

                let right_sum = sum - left_sum;
                let right_sq = sum_sq - left_sq;
                let nl = n_left as f64;
                let nr = n_right as f64;
                let var_l = (left_sq - left_sum * left_sum / nl) / nl;
                let var_r = (right_sq - right_sum * right_sum / nr) / nr;
                let weighted = (nl * var_l + nr * var_r) / n;
                let reduction = parent_var - weighted;

                if reduction > best.as_ref().map_or(0.0, |b| b.reduction) {
                    best = Some(Split {
                        feature: feat,
                        threshold: (v + v_next) * 0.5,
                        reduction,
                    });
                }
            }
        }
        best
    }

    pub fn predict(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            let node = &self.nodes[idx];
            if node.feature == LEAF {
                return node.value;
            }
            idx = if x[node.feature] <= node.threshold {
                node.left
            } else {
                node.right
            };
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

struct Split {
    feature: usize,
    threshold: f64,
    reduction: f64,
}

fn node_mean(targets: &[f64], rows: &[usize]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    rows.iter().map(|&r| targets[r]).sum::<f64>() / rows.len() as f64
}

fn node_variance(targets: &[f64], rows: &[usize], mean: f64) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    rows.iter()
        .map(|&r| (targets[r] - mean).powi(2))
        .sum::<f64>()
        / rows.len() as f64
}

/// Hoare-style partition of `rows` so that rows with `x[feature] <= threshold`
/// come first; returns the boundary index.
fn partition_rows(features: &[Vec<f64>], rows: &mut [usize], feature: usize, threshold: f64) -> usize {
    let mut mid = 0;
    for i in 0..rows.len() {
        if features[rows[i]][feature] <= threshold {
            rows.swap(i, mid);
            mid += 1;
        }
    }
    mid
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        // Single feature, clean step at x = 5.
        let features: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let targets: Vec<f64> = (0..20).map(|i| if i < 5 { 1.0 } else { 9.0 }).collect();
        (features, targets)
    }

    fn fit(
        features: &[Vec<f64>],
        targets: &[f64],
        params: &TreeParams,
        seed: u64,
    ) -> (RegressionTree, Vec<f64>) {
        let rows: Vec<usize> = (0..targets.len()).collect();
        let mut imp = vec![0.0; features[0].len()];
        let mut rng = StdRng::seed_from_u64(seed);
        let tree = RegressionTree::fit(features, targets, &rows, params, &mut rng, &mut imp);
        (tree, imp)
    }

    #[test]
    fn recovers_step_function() {
        let (features, targets) = step_data();
        let params = TreeParams {
            variables_per_split: 1,
            min_leaf_population: 2,
        };
        let (tree, _) = fit(&features, &targets, &params, 7);
        assert!((tree.predict(&[2.0]) - 1.0).abs() < 1e-9);
        assert!((tree.predict(&[15.0]) - 9.0).abs() < 1e-9);
    }

    #[test]
    fn constant_feature_yields_single_leaf() {
        let features: Vec<Vec<f64>> = (0..10).map(|_| vec![3.0]).collect();
        let targets: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let params = TreeParams {
            variables_per_split: 1,
            min_leaf_population: 2,
        };
        let (tree, imp) = fit(&features, &targets, &params, 7);
        assert_eq!(tree.n_nodes(), 1);
        assert_eq!(imp[0], 0.0);
        assert!((tree.predict(&[3.0]) - 4.5).abs() < 1e-9);
    }

    #[test]
    fn min_leaf_population_respected() {
        let (features, targets) = step_data();
        let params = TreeParams {
            variables_per_split: 1,
            min_leaf_population: 20,
        };
        let (tree, _) = fit(&features, &targets, &params, 7);
        // Cannot split without starving a child.
        assert_eq!(tree.n_nodes(), 1);
    }

    #[test]
    fn informative_feature_earns_importance() {
        let (features, mut targets) = step_data();
        // Add a pure-noise second feature.
        let features: Vec<Vec<f64>> = features
            .iter()
            .enumerate()
            .map(|(i, f)| vec![f[0], ((i * 7919) % 13) as f64])
            .collect();
        targets[0] += 0.01; // break exact leaf constancy
        let params = TreeParams {
            variables_per_split: 2,
            min_leaf_population: 2,
        };
        let (_, imp) = fit(&features, &targets, &params, 7);
        assert!(
            imp[0] > imp[1],
            "step feature importance {} not above noise importance {}",
            imp[0],
            imp[1]
        );
    }
}
