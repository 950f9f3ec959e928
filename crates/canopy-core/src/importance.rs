//! Predictor attribution: importance aggregation and group ablation.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::forest::{Hyperparams, RandomForestRegressor};
use crate::metrics::{r_squared, rmse};
use crate::predictors::{group_of, PredictorGroup};
use crate::samples::{ablation_drawings, derive_seed};
use crate::trainer::TileRecord;

/// Total importance attributed to one predictor group across tile models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupImportance {
    pub group: PredictorGroup,
    pub total: f64,
}

/// Sum the per-tile top-K importances into group totals, descending.
/// Predictor names outside the standard table contribute to no group.
pub fn aggregate_group_importances(records: &[TileRecord]) -> Vec<GroupImportance> {
    let mut totals = [0.0_f64; PredictorGroup::ALL.len()];
    for record in records {
        for (name, importance) in &record.importances {
            if let Some(group) = group_of(name) {
                let slot = PredictorGroup::ALL
                    .iter()
                    .position(|g| *g == group)
                    .unwrap_or(0);
                totals[slot] += importance;
            }
        }
    }
    let mut out: Vec<GroupImportance> = PredictorGroup::ALL
        .iter()
        .zip(totals)
        .map(|(&group, total)| GroupImportance { group, total })
        .collect();
    out.sort_by(|a, b| b.total.partial_cmp(&a.total).unwrap_or(std::cmp::Ordering::Equal));
    out
}

/// Marginal contribution of one predictor group for one tile:
/// complete-model score minus group-excluded score, over repeated drawings.
/// Positive ΔR² means removing the group hurt the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AblationOutcome {
    pub group: PredictorGroup,
    pub delta_r2_mean: f64,
    pub delta_r2_std: f64,
    pub delta_rmse_mean: f64,
    pub delta_rmse_std: f64,
    /// Drawings contributing to the ΔR² statistics (both R² defined).
    pub n_drawings: usize,
}

const ABLATION_SEED_MIX: u64 = 0xB3D7_60A1_8E4F_29C6;

/// Ablation study for one tile: K drawings of up to `m` samples, each split
/// 80/20; for every group present in `predictor_names`, retrain without that
/// group's columns and compare against the complete model on the same
/// drawing. Mean and standard deviation are both retained so consumers can
/// judge the noise of each group's marginal contribution.
#[allow(clippy::too_many_arguments)]
pub fn ablate_tile(
    features: &[Vec<f64>],
    targets: &[f64],
    predictor_names: &[String],
    hp: &Hyperparams,
    k_drawings: usize,
    m: usize,
    tile_id: u32,
    base_seed: u64,
) -> Result<Vec<AblationOutcome>> {
    let drawings = ablation_drawings(features.len(), k_drawings, m, tile_id, base_seed);

    // Per-drawing complete-model scores, reused for every group.
    let mut full_scores = Vec::with_capacity(drawings.len());
    for (d, drawing) in drawings.iter().enumerate() {
        let seed = derive_seed(base_seed ^ ABLATION_SEED_MIX, u64::from(tile_id), d as u64);
        full_scores.push(fit_and_score(features, targets, &drawing.train, &drawing.test, None, hp, seed)?);
    }

    let mut outcomes = Vec::new();
    for group in PredictorGroup::ALL {
        let excluded: Vec<usize> = predictor_names
            .iter()
            .enumerate()
            .filter(|(_, n)| group_of(n) == Some(group))
            .map(|(i, _)| i)
            .collect();
        if excluded.is_empty() || excluded.len() == predictor_names.len() {
            continue;
        }

        let mut delta_r2 = Vec::new();
        let mut delta_rmse = Vec::new();
        for (d, drawing) in drawings.iter().enumerate() {
            let seed = derive_seed(base_seed ^ ABLATION_SEED_MIX, u64::from(tile_id), d as u64);
            let reduced = fit_and_score(
                features,
                targets,
                &drawing.train,
                &drawing.test,
                Some(&excluded),
                hp,
                seed,
            )?;
            let full = &full_scores[d];
            if let (Some(fr2), Some(rr2)) = (full.r2, reduced.r2) {
                delta_r2.push(fr2 - rr2);
            }
            delta_rmse.push(full.rmse - reduced.rmse);
        }

        let (r2_mean, r2_std) = mean_std(&delta_r2);
        let (rmse_mean, rmse_std) = mean_std(&delta_rmse);
        outcomes.push(AblationOutcome {
            group,
            delta_r2_mean: r2_mean,
            delta_r2_std: r2_std,
            delta_rmse_mean: rmse_mean,
            delta_rmse_std: rmse_std,
            n_drawings: delta_r2.len(),
        });
    }
    Ok(outcomes)
}

struct Score {
    rmse: f64,
    r2: Option<f64>,
}

fn fit_and_score(
    features: &[Vec<f64>],
    targets: &[f64],
    train: &[usize],
    test: &[usize],
    excluded_cols: Option<&[usize]>,
    hp: &Hyperparams,
    seed: u64,
) -> Result<Score> {
    let project = |row: &Vec<f64>| -> Vec<f64> {
        match excluded_cols {
            None => row.clone(),
            Some(cols) => row
                .iter()
                .enumerate()
                .filter(|(i, _)| !cols.contains(i))
                .map(|(_, v)| *v)
                .collect(),
        }
    };

    let train_x: Vec<Vec<f64>> = train.iter().map(|&i| project(&features[i])).collect();
    let train_y: Vec<f64> = train.iter().map(|&i| targets[i]).collect();
    let rf = RandomForestRegressor::fit(&train_x, &train_y, hp, seed)?;

    let test_y: Vec<f64> = test.iter().map(|&i| targets[i]).collect();
    let pred: Vec<f64> = test.iter().map(|&i| rf.predict(&project(&features[i]))).collect();
    Ok(Score {
        rmse: rmse(&test_y, &pred),
        r2: r_squared(&test_y, &pred),
    })
}

/// Mean and sample standard deviation (0 for fewer than two values).
fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictors::ResponseVar;
    use crate::raster::RasterFragment;

    fn record(importances: Vec<(&str, f64)>) -> TileRecord {
        TileRecord {
            tile_id: 1,
            response: ResponseVar::Rh98,
            rmse: 1.0,
            r2: Some(0.5),
            n_train: 80,
            n_test: 20,
            fragment: RasterFragment::masked(0, 0, 1, 1),
            importances: importances
                .into_iter()
                .map(|(n, v)| (n.to_string(), v))
                .collect(),
        }
    }

    #[test]
    fn aggregation_sums_by_group_and_sorts() {
        let records = vec![
            record(vec![("ndvi", 0.4), ("elevation", 0.3), ("soil_ph", 0.1)]),
            record(vec![("evi", 0.2), ("elevation", 0.5)]),
        ];
        let agg = aggregate_group_importances(&records);
        let total_of = |g: PredictorGroup| {
            agg.iter().find(|gi| gi.group == g).unwrap().total
        };
        assert!((total_of(PredictorGroup::Topography) - 0.8).abs() < 1e-12);
        assert!((total_of(PredictorGroup::Optical) - 0.6).abs() < 1e-12);
        assert!((total_of(PredictorGroup::SoilProperties) - 0.1).abs() < 1e-12);
        for w in agg.windows(2) {
            assert!(w[0].total >= w[1].total);
        }
    }

    #[test]
    fn unknown_names_contribute_to_no_group() {
        let records = vec![record(vec![("mystery_band", 0.9)])];
        let agg = aggregate_group_importances(&records);
        assert!(agg.iter().all(|g| g.total == 0.0));
    }

    fn ablation_data() -> (Vec<Vec<f64>>, Vec<f64>, Vec<String>) {
        // ndvi drives the target; soil_ph is deterministic noise.
        let features: Vec<Vec<f64>> = (0..150)
            .map(|i| vec![(i % 13) as f64, ((i * 3) % 5) as f64, ((i * 7919) % 11) as f64])
            .collect();
        let targets: Vec<f64> = features.iter().map(|f| 4.0 * f[0] + 0.2 * f[1]).collect();
        let names = vec!["ndvi".to_string(), "elevation".to_string(), "soil_ph".to_string()];
        (features, targets, names)
    }

    fn hp() -> Hyperparams {
        Hyperparams {
            variables_per_split: 2,
            min_leaf_population: 2,
            bag_fraction: 0.8,
            n_trees: 15,
        }
    }

    #[test]
    fn removing_the_driving_group_hurts_most() {
        let (features, targets, names) = ablation_data();
        let out = ablate_tile(&features, &targets, &names, &hp(), 4, 100, 3, 42).unwrap();
        let delta = |g: PredictorGroup| {
            out.iter().find(|o| o.group == g).unwrap().delta_r2_mean
        };
        assert!(
            delta(PredictorGroup::Optical) > delta(PredictorGroup::SoilProperties),
            "optical ablation should cost more R² than soil ablation"
        );
        assert!(delta(PredictorGroup::Optical) > 0.0);
    }

    #[test]
    fn ablation_reports_spread_and_reproduces() {
        let (features, targets, names) = ablation_data();
        let a = ablate_tile(&features, &targets, &names, &hp(), 4, 100, 3, 42).unwrap();
        let b = ablate_tile(&features, &targets, &names, &hp(), 4, 100, 3, 42).unwrap();
        for (oa, ob) in a.iter().zip(&b) {
            assert_eq!(oa.group, ob.group);
            assert_eq!(oa.delta_r2_mean.to_bits(), ob.delta_r2_mean.to_bits());
            assert_eq!(oa.delta_r2_std.to_bits(), ob.delta_r2_std.to_bits());
            assert!(oa.delta_r2_std >= 0.0);
            assert_eq!(oa.n_drawings, 4);
        }
        // Groups absent from the predictor set yield no outcome.
        assert!(a.iter().all(|o| o.group != PredictorGroup::Radar));
    }

    #[test]
    fn mean_std_matches_hand_computation() {
        let (m, s) = mean_std(&[1.0, 2.0, 3.0]);
        assert!((m - 2.0).abs() < 1e-12);
        assert!((s - 1.0).abs() < 1e-12);
        assert_eq!(mean_std(&[]), (0.0, 0.0));
        assert_eq!(mean_std(&[5.0]), (5.0, 0.0));
    }
}
