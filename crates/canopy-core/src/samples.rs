//! Training samples and deterministic sample collection.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{MapError, Result};
use crate::grid::Tile;
use crate::raster::PredictorStack;

/// One point sample derived from a valid response pixel. Immutable after
/// creation; downstream stages only filter and join.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub sample_id: u64,
    /// ID of the tile whose core cell contains the point (cores are disjoint).
    pub tile_id: u32,
    /// Reproducible location hash for deduplication and joins.
    pub pixel_label: u64,
    pub x: f64,
    pub y: f64,
    /// Aligned with the predictor stack's band order.
    pub predictors: Vec<f64>,
    /// Aligned with the response list passed to [`build_samples`].
    pub responses: Vec<f64>,
}

/// Deterministic seed for a stage keyed by two IDs. Pure function of its
/// inputs, so parallel or out-of-order execution reproduces sequential runs.
pub fn derive_seed(base: u64, a: u64, b: u64) -> u64 {
    let mut s = base ^ 0x9E37_79B9_7F4A_7C15_u64.wrapping_mul(a.wrapping_add(1));
    s ^= 0xC2B2_AE3D_27D4_EB4F_u64.wrapping_mul(b.wrapping_add(3));
    s
}

/// Location hash from coordinates scaled to centimetre precision.
pub fn pixel_label(x: f64, y: f64) -> u64 {
    let xi = (x * 100.0).round() as i64 as u64;
    let yi = (y * 100.0).round() as i64 as u64;
    derive_seed(0x5851_F42D_4C95_7F2D, xi, yi)
}

/// Build the sample table from co-registered predictor and response stacks.
///
/// A pixel yields a sample only where every predictor band and every listed
/// response band is finite (no imputation) and the pixel centre falls in some
/// tile core. `sample_id` is the row-major pixel index, which makes the table
/// reproducible for a fixed stack.
pub fn build_samples(
    predictors: &PredictorStack,
    response_stack: &PredictorStack,
    response_names: &[&str],
    tiles: &[Tile],
) -> Result<Vec<Sample>> {
    if response_stack.width() != predictors.width()
        || response_stack.height() != predictors.height()
    {
        return Err(MapError::DimensionMismatch {
            expected_w: predictors.width(),
            expected_h: predictors.height(),
            got_w: response_stack.width(),
            got_h: response_stack.height(),
        });
    }
    let response_bands: Vec<_> = response_names
        .iter()
        .map(|n| response_stack.band(n))
        .collect::<Result<_>>()?;

    let mut samples = Vec::new();
    for row in 0..predictors.height() {
        for col in 0..predictors.width() {
            let Some(pred) = predictors.pixel_vector(row, col) else {
                continue;
            };
            let mut resp = Vec::with_capacity(response_bands.len());
            let mut complete = true;
            for band in &response_bands {
                let v = band.get(row, col);
                if !v.is_finite() {
                    complete = false;
                    break;
                }
                resp.push(v as f64);
            }
            if !complete {
                continue;
            }

            let (x, y) = predictors.bands[0].pixel_center(row, col);
            let Some(tile) = tiles.iter().find(|t| t.core.contains(x, y)) else {
                continue;
            };

            samples.push(Sample {
                sample_id: (row * predictors.width() + col) as u64,
                tile_id: tile.id,
                pixel_label: pixel_label(x, y),
                x,
                y,
                predictors: pred,
                responses: resp,
            });
        }
    }
    Ok(samples)
}

/// Bounded per-tile subset: stable sort by `sample_id`, then truncate.
///
/// Deterministic across re-runs for the same sample-ID universe, but not a
/// statistically random draw; kept as the established collection behaviour.
pub fn collect_limited<'a>(samples: &'a [Sample], tile_id: u32, limit: usize) -> Vec<&'a Sample> {
    let mut subset: Vec<&Sample> = samples.iter().filter(|s| s.tile_id == tile_id).collect();
    subset.sort_by_key(|s| s.sample_id);
    subset.truncate(limit);
    subset
}

/// Index split into train/test by a seeded shuffle.
pub fn split_indices(n: usize, train_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut idx: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    idx.shuffle(&mut rng);
    let n_train = ((n as f64) * train_fraction).round() as usize;
    let n_train = n_train.clamp(usize::from(n > 1), n.saturating_sub(usize::from(n > 1)));
    let test = idx.split_off(n_train);
    (idx, test)
}

/// One repeated train/test drawing for ablation studies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drawing {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// K independent drawings of up to `m` samples without replacement, each
/// split 80/20. Seeds derive from (tile ID, drawing index), so drawings are
/// independent of each other and reproducible in any execution order.
pub fn ablation_drawings(
    n_samples: usize,
    k_drawings: usize,
    m: usize,
    tile_id: u32,
    base_seed: u64,
) -> Vec<Drawing> {
    (0..k_drawings)
        .map(|d| {
            let seed = derive_seed(base_seed, u64::from(tile_id), d as u64);
            let mut idx: Vec<usize> = (0..n_samples).collect();
            let mut rng = StdRng::seed_from_u64(seed);
            idx.shuffle(&mut rng);
            idx.truncate(m.min(n_samples));

            let n_train = ((idx.len() as f64) * 0.8).round() as usize;
            let n_train = n_train.clamp(
                usize::from(idx.len() > 1),
                idx.len().saturating_sub(usize::from(idx.len() > 1)),
            );
            let test = idx.split_off(n_train);
            Drawing { train: idx, test }
        })
        .collect()
}
