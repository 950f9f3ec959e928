//! Per-tile model training, evaluation and prediction.
//!
//! Every (tile, response variable) pair trains one forest on the tile's
//! samples, scores it on a held-out split from the same tile, predicts every
//! valid pixel inside the tile footprint, and emits a [`TileRecord`] keyed by
//! (tile ID, response). Tiles are processed in fixed-size batches with the
//! tiles of a batch running in parallel; all randomness derives from
//! (tile ID, response index), so results are independent of execution order
//! and re-running a job overwrites the same key with identical output.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{MapError, Result};
use crate::forest::{Hyperparams, RandomForestRegressor};
use crate::grid::Tile;
use crate::metrics::{r_squared, rmse};
use crate::predictors::ResponseVar;
use crate::raster::{PredictorStack, RasterFragment};
use crate::samples::{derive_seed, split_indices, Sample};

/// Immutable per-response context, constructed fresh for each response
/// variable and passed by reference into the tile workers.
#[derive(Debug, Clone)]
pub struct ResponseContext {
    pub response: ResponseVar,
    /// Column of [`Sample::responses`] holding this response.
    pub response_slot: usize,
    pub hyperparams: Hyperparams,
    pub predictor_names: Vec<String>,
}

/// Trainer budget knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub base_seed: u64,
    /// Deterministic per-tile sample cap (sort by ID, truncate).
    pub max_samples_per_tile: usize,
    /// Importances retained per record.
    pub top_k: usize,
    /// Tiles per batch; bounds the cost of one parallel group.
    pub batch_size: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            base_seed: 42,
            max_samples_per_tile: 3000,
            top_k: 20,
            batch_size: 50,
        }
    }
}

/// The persisted unit of per-tile output, keyed by (tile_id, response).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TileRecord {
    pub tile_id: u32,
    pub response: ResponseVar,
    pub rmse: f64,
    /// None when the held-out response was near-constant (SS_tot ≈ 0).
    pub r2: Option<f64>,
    pub n_train: usize,
    pub n_test: usize,
    pub fragment: RasterFragment,
    /// Top-K (predictor name, importance), descending.
    pub importances: Vec<(String, f64)>,
}

/// Outcome of a batch run: records in tile order plus per-tile failures.
#[derive(Debug)]
pub struct BatchOutcome {
    pub records: Vec<TileRecord>,
    pub failures: Vec<(u32, MapError)>,
}

const FOREST_SEED_MIX: u64 = 0x4A90_D1E8_37C5_2B6F;

// A tile needs at least this many samples for an 80/20 split to leave both
// sides usable; the selector's t_abs sits far above this floor.
const MIN_TILE_SAMPLES: usize = 10;

/// Train, evaluate and predict one (tile, response) pair.
pub fn train_tile(
    ctx: &ResponseContext,
    tile: &Tile,
    samples: &[Sample],
    stack: &PredictorStack,
    config: &TrainerConfig,
) -> Result<TileRecord> {
    // Footprint filter picks up overlap samples from neighbouring cores.
    let mut tile_samples: Vec<&Sample> = samples
        .iter()
        .filter(|s| tile.footprint.contains(s.x, s.y))
        .collect();
    tile_samples.sort_by_key(|s| s.sample_id);
    tile_samples.truncate(config.max_samples_per_tile);

    if tile_samples.len() < MIN_TILE_SAMPLES {
        return Err(MapError::InsufficientSamples {
            tile_id: tile.id,
            available: tile_samples.len(),
            required: MIN_TILE_SAMPLES,
        });
    }

    let split_seed = derive_seed(config.base_seed, u64::from(tile.id), ctx.response.index() as u64);
    let (train, test) = split_indices(tile_samples.len(), 0.8, split_seed);

    let train_x: Vec<Vec<f64>> = train.iter().map(|&i| tile_samples[i].predictors.clone()).collect();
    let train_y: Vec<f64> = train
        .iter()
        .map(|&i| tile_samples[i].responses[ctx.response_slot])
        .collect();

    let forest_seed = derive_seed(
        config.base_seed ^ FOREST_SEED_MIX,
        u64::from(tile.id),
        ctx.response.index() as u64,
    );
    let rf = RandomForestRegressor::fit(&train_x, &train_y, &ctx.hyperparams, forest_seed)?;

    let test_y: Vec<f64> = test
        .iter()
        .map(|&i| tile_samples[i].responses[ctx.response_slot])
        .collect();
    let test_x: Vec<Vec<f64>> = test
        .iter()
        .map(|&i| tile_samples[i].predictors.clone())
        .collect();
    let pred_y = rf.predict_batch(&test_x);

    let fragment = predict_fragment(&rf, tile, stack);
    let mut importances = rf.ranked_importances(&ctx.predictor_names);
    importances.truncate(config.top_k);

    Ok(TileRecord {
        tile_id: tile.id,
        response: ctx.response,
        rmse: rmse(&test_y, &pred_y),
        r2: r_squared(&test_y, &pred_y),
        n_train: train.len(),
        n_test: test.len(),
        fragment,
        importances,
    })
}

/// Apply a trained model to every valid pixel clipped to the tile footprint.
fn predict_fragment(rf: &RandomForestRegressor, tile: &Tile, stack: &PredictorStack) -> RasterFragment {
    let extent = stack.extent();
    let px = stack.pixel_size_m();

    let col_lo = (((tile.footprint.min_x - extent.min_x) / px).floor().max(0.0)) as usize;
    let row_lo = (((tile.footprint.min_y - extent.min_y) / px).floor().max(0.0)) as usize;
    let col_hi = (((tile.footprint.max_x - extent.min_x) / px).ceil().max(0.0) as usize).min(stack.width());
    let row_hi = (((tile.footprint.max_y - extent.min_y) / px).ceil().max(0.0) as usize).min(stack.height());

    if col_lo >= col_hi || row_lo >= row_hi {
        return RasterFragment::masked(0, 0, 0, 0);
    }

    let mut frag = RasterFragment::masked(col_lo, row_lo, col_hi - col_lo, row_hi - row_lo);
    for row in row_lo..row_hi {
        for col in col_lo..col_hi {
            let (x, y) = stack.bands[0].pixel_center(row, col);
            if !tile.footprint.contains(x, y) {
                continue;
            }
            if let Some(v) = stack.pixel_vector(row, col) {
                frag.set(row - row_lo, col - col_lo, rf.predict(&v) as f32);
            }
        }
    }
    frag
}

/// Run one response over all selected tiles in fixed-size parallel batches.
///
/// A failed tile (for example too few usable samples after the cap) is
/// reported, never fatal; remaining tiles are unaffected.
pub fn train_batches(
    ctx: &ResponseContext,
    tiles: &[Tile],
    samples: &[Sample],
    stack: &PredictorStack,
    config: &TrainerConfig,
) -> BatchOutcome {
    let mut records = Vec::with_capacity(tiles.len());
    let mut failures = Vec::new();

    for batch in tiles.chunks(config.batch_size.max(1)) {
        let results: Vec<(u32, Result<TileRecord>)> = batch
            .par_iter()
            .map(|tile| (tile.id, train_tile(ctx, tile, samples, stack, config)))
            .collect();
        for (tile_id, result) in results {
            match result {
                Ok(record) => records.push(record),
                Err(err) => failures.push((tile_id, err)),
            }
        }
    }

    BatchOutcome { records, failures }
}
