//! Domain-wide hyperparameter tuning.
//!
//! Coordinate descent per response variable: each round tunes
//! variables-per-split, then min-leaf-population, then bag-fraction,
//! conditioned on the best-so-far values of the others. Each sweep runs a
//! coarse grid (step 5), then refines ±step around the two best coarse
//! candidates at step 1, and picks the arg-min RMSE.
//!
//! The 80/20 split is reshuffled with a fresh seed for every
//! (response, round, hyperparameter) sweep, so RMSE values are comparable
//! within a sweep but not across sweeps. Preserved as documented behaviour.
//!
//! A manual override may replace any sweep when the automatic optimum is
//! computationally unaffordable; it is recorded identically to an automatic
//! pick so downstream consumers never distinguish the two paths.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::forest::{Hyperparams, RandomForestRegressor};
use crate::metrics::rmse;
use crate::predictors::ResponseVar;
use crate::samples::{derive_seed, split_indices};

/// Which hyperparameter a sweep targets. Bag fraction is tuned on an integer
/// percent grid and stored as a fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HpKind {
    VariablesPerSplit,
    MinLeafPopulation,
    BagFraction,
}

impl HpKind {
    const ORDER: [HpKind; 3] = [
        HpKind::VariablesPerSplit,
        HpKind::MinLeafPopulation,
        HpKind::BagFraction,
    ];
}

/// Tuner search space and budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunerConfig {
    pub rounds: usize,
    /// Trees per trial forest (fixed across trials).
    pub n_trees: usize,
    pub coarse_step: usize,
    /// Upper bound for variables-per-split (also clamped to feature count).
    pub vps_max: usize,
    pub min_leaf_max: usize,
    /// Inclusive bag-fraction percent range.
    pub bag_percent_range: (usize, usize),
    pub base_seed: u64,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            rounds: 3,
            n_trees: 100,
            coarse_step: 5,
            vps_max: 30,
            min_leaf_max: 50,
            bag_percent_range: (10, 90),
            base_seed: 42,
        }
    }
}

/// Cost-control escape hatch: pin one sweep's value instead of searching.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ManualOverride {
    pub round: usize,
    pub hp: HpKind,
    /// Integer value on the sweep's grid (percent for bag fraction).
    pub value: usize,
}

/// One evaluated (or manually pinned) trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningTrial {
    pub round: usize,
    pub hp: HpKind,
    pub value: usize,
    /// None for manual picks, which are never evaluated.
    pub rmse: Option<f64>,
    pub chosen: bool,
    pub manual: bool,
}

/// Tuned optimum plus the full trial log for one response variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningOutcome {
    pub response: ResponseVar,
    pub best: Hyperparams,
    pub trials: Vec<TuningTrial>,
}

/// Tune all three hyperparameters for one response variable.
pub fn tune_response(
    features: &[Vec<f64>],
    targets: &[f64],
    response: ResponseVar,
    config: &TunerConfig,
    overrides: &[ManualOverride],
) -> Result<TuningOutcome> {
    let n_features = features.first().map_or(1, Vec::len);
    let mut best = Hyperparams {
        n_trees: config.n_trees,
        ..Hyperparams::default()
    };
    let mut trials = Vec::new();

    for round in 0..config.rounds {
        for (hp_idx, &hp) in HpKind::ORDER.iter().enumerate() {
            if let Some(ov) = overrides
                .iter()
                .find(|o| o.round == round && o.hp == hp)
            {
                apply(&mut best, hp, ov.value);
                trials.push(TuningTrial {
                    round,
                    hp,
                    value: ov.value,
                    rmse: None,
                    chosen: true,
                    manual: true,
                });
                continue;
            }

            // One split per (response, round, hp) sweep, shared by the
            // coarse and refinement passes of that sweep.
            let sweep_seed = derive_seed(
                config.base_seed,
                (response.index() * config.rounds + round) as u64,
                hp_idx as u64,
            );
            let (train, test) = split_indices(features.len(), 0.8, sweep_seed);

            let coarse = coarse_grid(hp, config, n_features);
            let mut evaluated: Vec<(usize, f64)> = Vec::new();
            for &value in &coarse {
                let score = evaluate(
                    features, targets, &train, &test, &best, hp, value, sweep_seed,
                )?;
                evaluated.push((value, score));
            }

            // Refine ±step around the two best coarse candidates, step 1.
            let mut ranked = evaluated.clone();
            ranked.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            let mut refine: Vec<usize> = Vec::new();
            for &(center, _) in ranked.iter().take(2) {
                let lo = center.saturating_sub(config.coarse_step);
                for v in lo..=center + config.coarse_step {
                    let v = clamp_value(hp, config, n_features, v);
                    if !coarse.contains(&v) && !refine.contains(&v) {
                        refine.push(v);
                    }
                }
            }
            for &value in &refine {
                let score = evaluate(
                    features, targets, &train, &test, &best, hp, value, sweep_seed,
                )?;
                evaluated.push((value, score));
            }

            // The coarse grid holds at least one value, so a winner exists.
            let winner = evaluated
                .iter()
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map_or(coarse[0], |&(v, _)| v);
            apply(&mut best, hp, winner);

            for (value, score) in evaluated {
                trials.push(TuningTrial {
                    round,
                    hp,
                    value,
                    rmse: Some(score),
                    chosen: value == winner,
                    manual: false,
                });
            }
        }
    }

    Ok(TuningOutcome {
        response,
        best,
        trials,
    })
}

fn apply(hp: &mut Hyperparams, kind: HpKind, value: usize) {
    match kind {
        HpKind::VariablesPerSplit => hp.variables_per_split = value,
        HpKind::MinLeafPopulation => hp.min_leaf_population = value,
        HpKind::BagFraction => hp.bag_fraction = value as f64 / 100.0,
    }
}

fn coarse_grid(kind: HpKind, config: &TunerConfig, n_features: usize) -> Vec<usize> {
    let step = config.coarse_step.max(1);
    let (lo, hi) = match kind {
        HpKind::VariablesPerSplit => (step, config.vps_max.min(n_features).max(1)),
        HpKind::MinLeafPopulation => (step, config.min_leaf_max.max(1)),
        HpKind::BagFraction => config.bag_percent_range,
    };
    let mut values: Vec<usize> = (lo..=hi).step_by(step).collect();
    if values.is_empty() {
        values.push(hi);
    }
    values
}

fn clamp_value(kind: HpKind, config: &TunerConfig, n_features: usize, v: usize) -> usize {
    match kind {
        HpKind::VariablesPerSplit => v.clamp(1, config.vps_max.min(n_features).max(1)),
        HpKind::MinLeafPopulation => v.clamp(1, config.min_leaf_max.max(1)),
        HpKind::BagFraction => v.clamp(config.bag_percent_range.0.max(1), config.bag_percent_range.1),
    }
}

#[allow(clippy::too_many_arguments)]
fn evaluate(
    features: &[Vec<f64>],
    targets: &[f64],
    train: &[usize],
    test: &[usize],
    base: &Hyperparams,
    kind: HpKind,
    value: usize,
    sweep_seed: u64,
) -> Result<f64> {
    let mut hp = *base;
    apply(&mut hp, kind, value);

    let train_x: Vec<Vec<f64>> = train.iter().map(|&i| features[i].clone()).collect();
    let train_y: Vec<f64> = train.iter().map(|&i| targets[i]).collect();
    let rf = RandomForestRegressor::fit(
        &train_x,
        &train_y,
        &hp,
        derive_seed(sweep_seed, 0xF0, value as u64),
    )?;

    let test_y: Vec<f64> = test.iter().map(|&i| targets[i]).collect();
    let pred: Vec<f64> = test.iter().map(|&i| rf.predict(&features[i])).collect();
    Ok(rmse(&test_y, &pred))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let features: Vec<Vec<f64>> = (0..120)
            .map(|i| vec![(i % 13) as f64, ((i * 3) % 7) as f64])
            .collect();
        let targets: Vec<f64> = features.iter().map(|f| 2.0 * f[0] - f[1]).collect();
        (features, targets)
    }

    fn fast_config() -> TunerConfig {
        TunerConfig {
            rounds: 1,
            n_trees: 5,
            coarse_step: 5,
            vps_max: 2,
            min_leaf_max: 10,
            bag_percent_range: (50, 70),
            base_seed: 42,
        }
    }

    #[test]
    fn tuning_is_deterministic() {
        let (features, targets) = data();
        let cfg = fast_config();
        let a = tune_response(&features, &targets, ResponseVar::Rh98, &cfg, &[]).unwrap();
        let b = tune_response(&features, &targets, ResponseVar::Rh98, &cfg, &[]).unwrap();
        assert_eq!(a.best, b.best);
        assert_eq!(a.trials.len(), b.trials.len());
        for (ta, tb) in a.trials.iter().zip(&b.trials) {
            assert_eq!(ta.value, tb.value);
            assert_eq!(ta.rmse.map(f64::to_bits), tb.rmse.map(f64::to_bits));
        }
    }

    #[test]
    fn exactly_one_chosen_trial_per_sweep() {
        let (features, targets) = data();
        let cfg = fast_config();
        let out = tune_response(&features, &targets, ResponseVar::Pai, &cfg, &[]).unwrap();
        for hp in HpKind::ORDER {
            let chosen = out
                .trials
                .iter()
                .filter(|t| t.round == 0 && t.hp == hp && t.chosen)
                .count();
            assert_eq!(chosen, 1, "{hp:?} sweep chose {chosen} values");
        }
    }

    #[test]
    fn chosen_value_minimizes_sweep_rmse() {
        let (features, targets) = data();
        let cfg = fast_config();
        let out = tune_response(&features, &targets, ResponseVar::Fhd, &cfg, &[]).unwrap();
        for hp in HpKind::ORDER {
            let sweep: Vec<&TuningTrial> = out
                .trials
                .iter()
                .filter(|t| t.round == 0 && t.hp == hp)
                .collect();
            let chosen = sweep.iter().find(|t| t.chosen).unwrap();
            let min = sweep
                .iter()
                .filter_map(|t| t.rmse)
                .fold(f64::INFINITY, f64::min);
            assert_eq!(chosen.rmse.unwrap().to_bits(), min.to_bits());
        }
    }

    #[test]
    fn manual_override_recorded_like_automatic_pick() {
        let (features, targets) = data();
        let cfg = fast_config();
        let ov = ManualOverride {
            round: 0,
            hp: HpKind::MinLeafPopulation,
            value: 7,
        };
        let out = tune_response(&features, &targets, ResponseVar::Cover, &cfg, &[ov]).unwrap();
        assert_eq!(out.best.min_leaf_population, 7);
        let trial = out
            .trials
            .iter()
            .find(|t| t.hp == HpKind::MinLeafPopulation)
            .unwrap();
        assert!(trial.manual && trial.chosen);
        assert!(trial.rmse.is_none());
        // The later bag-fraction sweep conditioned on the override.
        assert!(out
            .trials
            .iter()
            .any(|t| t.hp == HpKind::BagFraction && !t.manual));
    }

    #[test]
    fn bag_fraction_stored_as_fraction_of_percent_grid() {
        let (features, targets) = data();
        let cfg = fast_config();
        let out = tune_response(&features, &targets, ResponseVar::Rh50, &cfg, &[]).unwrap();
        let (lo, hi) = cfg.bag_percent_range;
        let lo = (lo.saturating_sub(cfg.coarse_step).max(1)) as f64 / 100.0;
        let hi = (hi + cfg.coarse_step) as f64 / 100.0;
        assert!(
            (lo..=hi).contains(&out.best.bag_fraction),
            "bag fraction {} escaped the refined grid",
            out.best.bag_fraction
        );
    }
}
