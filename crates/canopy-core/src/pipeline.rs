//! Pipeline orchestrator: runs all mapping stages in order.
//!
//! Partition → count/select → collect → per-tile train/predict (batched) →
//! weighted composition, per response variable. Each response iteration
//! builds a fresh immutable [`ResponseContext`]; nothing is carried across
//! iterations except the shared read-only inputs.

use serde::{Deserialize, Serialize};

use crate::composite::{composite, CompositeResult, CompositorConfig};
use crate::error::Result;
use crate::forest::Hyperparams;
use crate::grid::{build_partitions, PartitionConfig, PartitionSet, Tile};
use crate::predictors::ResponseVar;
use crate::raster::PredictorStack;
use crate::samples::build_samples;
use crate::selection::{select_tiles, Selection, SelectionThresholds};
use crate::trainer::{train_batches, ResponseContext, TileRecord, TrainerConfig};

/// User-facing pipeline parameters. Defaults reproduce the production
/// 60/30/10 km partition and the 1250-sample density gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapperConfig {
    pub seed: u64,
    pub tile_size_m: f64,
    pub cell_size_m: f64,
    pub fine_size_m: f64,
    /// Tile footprint overlap buffer.
    pub buffer_m: f64,
    /// Minimum samples per tile.
    pub t_abs: usize,
    /// Minimum grid-cell sample share.
    pub t_ratio: f64,
    pub max_samples_per_tile: usize,
    /// Tiles per training batch.
    pub batch_size: usize,
    /// Importances retained per tile record.
    pub top_k: usize,
    pub pseudo_max_distance_m: Option<f64>,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            tile_size_m: 60_000.0,
            cell_size_m: 30_000.0,
            fine_size_m: 10_000.0,
            buffer_m: 5_000.0,
            t_abs: 1250,
            t_ratio: 0.1,
            max_samples_per_tile: 3000,
            batch_size: 50,
            top_k: 20,
            pseudo_max_distance_m: None,
        }
    }
}

impl MapperConfig {
    pub fn partition_config(&self) -> PartitionConfig {
        PartitionConfig {
            seed: self.seed,
            tile_size_m: self.tile_size_m,
            cell_size_m: self.cell_size_m,
            fine_size_m: self.fine_size_m,
            buffer_m: self.buffer_m,
        }
    }

    pub fn thresholds(&self) -> SelectionThresholds {
        SelectionThresholds {
            t_abs: self.t_abs,
            t_ratio: self.t_ratio,
        }
    }

    pub fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            base_seed: self.seed,
            max_samples_per_tile: self.max_samples_per_tile,
            top_k: self.top_k,
            batch_size: self.batch_size,
        }
    }

    pub fn compositor_config(&self) -> CompositorConfig {
        CompositorConfig {
            pseudo_max_distance_m: self.pseudo_max_distance_m,
        }
    }
}

/// Everything produced for one response variable.
#[derive(Debug, Serialize)]
pub struct ResponseMosaic {
    pub response: ResponseVar,
    pub records: Vec<TileRecord>,
    pub composite: CompositeResult,
    /// (tile_id, reason) for tiles that failed training; retryable by
    /// re-running the pipeline — output keys are idempotent.
    pub failures: Vec<(u32, String)>,
}

/// Full output of the mapping pipeline.
#[derive(Debug, Serialize)]
pub struct PipelineResult {
    pub partitions: PartitionSet,
    pub selection: Selection,
    pub n_samples: usize,
    pub mosaics: Vec<ResponseMosaic>,
}

/// Run the full pipeline for the given responses.
///
/// `tuned` carries the per-response hyperparameter optima from the tuner;
/// responses without an entry fall back to [`Hyperparams::default`].
pub fn run_pipeline(
    predictors: &PredictorStack,
    response_stack: &PredictorStack,
    responses: &[ResponseVar],
    tuned: &[(ResponseVar, Hyperparams)],
    config: &MapperConfig,
) -> Result<PipelineResult> {
    let domain = predictors.extent();
    let partitions = build_partitions(domain, &config.partition_config())?;

    let response_names: Vec<&str> = responses.iter().map(ResponseVar::name).collect();
    let samples = build_samples(predictors, response_stack, &response_names, &partitions.tiles)?;

    let selection = select_tiles(
        &partitions.tiles,
        &partitions.grid_cells,
        &samples,
        &config.thresholds(),
    );
    let selected_tiles: Vec<Tile> = selection.selected.iter().map(|s| s.tile).collect();

    let trainer_config = config.trainer_config();
    let compositor_config = config.compositor_config();
    let grid = predictors.grid();

    let mut mosaics = Vec::with_capacity(responses.len());
    for (slot, &response) in responses.iter().enumerate() {
        let hyperparams = tuned
            .iter()
            .find(|(r, _)| *r == response)
            .map(|(_, hp)| *hp)
            .unwrap_or_default();

        let ctx = ResponseContext {
            response,
            response_slot: slot,
            hyperparams,
            predictor_names: predictors.names.clone(),
        };

        let outcome = train_batches(&ctx, &selected_tiles, &samples, predictors, &trainer_config);
        let composite = composite(
            response,
            &outcome.records,
            &selected_tiles,
            &grid,
            &compositor_config,
        );

        mosaics.push(ResponseMosaic {
            response,
            records: outcome.records,
            composite,
            failures: outcome
                .failures
                .into_iter()
                .map(|(id, err)| (id, err.to_string()))
                .collect(),
        });
    }

    Ok(PipelineResult {
        partitions,
        selection,
        n_samples: samples.len(),
        mosaics,
    })
}
