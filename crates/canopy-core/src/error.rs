use thiserror::Error;

/// Errors surfaced by the mapping pipeline.
///
/// Data-quality conditions (sparse tiles, unpaired grid cells, degenerate R²)
/// are not errors: they are filtered and reported by the stages that detect
/// them. `MapError` covers genuinely malformed inputs.
#[derive(Debug, Error)]
pub enum MapError {
    #[error("study domain has non-positive extent ({width_m:.1} m x {height_m:.1} m)")]
    EmptyDomain { width_m: f64, height_m: f64 },

    #[error("cell size {cell_size_m:.1} m is not positive")]
    BadCellSize { cell_size_m: f64 },

    #[error("raster dimension mismatch: expected {expected_w}x{expected_h}, got {got_w}x{got_h}")]
    DimensionMismatch {
        expected_w: usize,
        expected_h: usize,
        got_w: usize,
        got_h: usize,
    },

    #[error("feature table is empty")]
    EmptyFeatureTable,

    #[error("feature row {row} has {got} columns, expected {expected}")]
    RaggedFeatureTable {
        row: usize,
        got: usize,
        expected: usize,
    },

    #[error("feature/target length mismatch: {features} rows vs {targets} targets")]
    TargetLengthMismatch { features: usize, targets: usize },

    #[error("tile {tile_id} has {available} usable samples, need at least {required}")]
    InsufficientSamples {
        tile_id: u32,
        available: usize,
        required: usize,
    },

    #[error("predictor band {0:?} not present in stack")]
    MissingBand(String),
}

pub type Result<T> = std::result::Result<T, MapError>;
