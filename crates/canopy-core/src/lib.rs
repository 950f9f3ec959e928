//! Tile-based canopy-structure mapping.
//!
//! Partitions a study domain into overlapping modeling tiles, gates tiles on
//! sample density, trains one random-forest regressor per (tile, response
//! variable) pair on LiDAR-derived samples, and blends the per-tile
//! prediction fragments into seamless mosaics with distance- and
//! accuracy-weighted averaging. Every stochastic step is seeded from stable
//! IDs, so parallel and repeated runs are bit-identical.

pub mod composite;
pub mod error;
pub mod forest;
pub mod grid;
pub mod importance;
pub mod metrics;
pub mod pipeline;
pub mod predictors;
pub mod raster;
pub mod samples;
pub mod selection;
pub mod trainer;
pub mod tuning;

pub use composite::{composite, CompositeResult, CompositorConfig};
pub use error::{MapError, Result};
pub use forest::{Hyperparams, RandomForestRegressor};
pub use grid::{build_partitions, partition, PartitionConfig, PartitionSet, Tile};
pub use pipeline::{run_pipeline, MapperConfig, PipelineResult};
pub use predictors::{PredictorGroup, ResponseVar};
pub use raster::{DomainGrid, Extent, PredictorStack, Raster, RasterFragment};
pub use samples::{build_samples, Sample};
pub use selection::{select_tiles, Selection, SelectionThresholds};
pub use trainer::{train_batches, train_tile, ResponseContext, TileRecord, TrainerConfig};
pub use tuning::{tune_response, TunerConfig, TuningOutcome};
