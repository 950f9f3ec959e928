//! Study-domain partitioning.
//!
//! Three square partitions are derived from one domain and one seed: modeling
//! tiles (buffered so neighbours overlap), QC grid cells paired 1:1 with
//! tiles, and a finer sampling partition. Cell IDs are assigned by drawing an
//! independent seeded random number per cell and ranking the draws, so IDs do
//! not correlate with scan order and are reproducible for a fixed seed no
//! matter how the cells were traversed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{MapError, Result};
use crate::raster::Extent;

/// One cell of a square partition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Cell {
    pub id: u32,
    pub extent: Extent,
}

/// A modeling tile: the partition cell (`core`) plus a buffered `footprint`.
/// Cores are disjoint; footprints of neighbouring tiles overlap by design so
/// a pixel near a core boundary is predicted by several tiles.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Tile {
    pub id: u32,
    pub core: Extent,
    pub footprint: Extent,
}

impl Tile {
    pub fn centroid(&self) -> (f64, f64) {
        self.core.centroid()
    }
}

/// QC grid cell paired with a tile (shares its `tile_id`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridCell {
    pub tile_id: u32,
    pub extent: Extent,
}

/// Sizes and seed for all three partition scales.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub seed: u64,
    /// Tile edge length (modeling unit), metres.
    pub tile_size_m: f64,
    /// QC grid-cell edge length, metres.
    pub cell_size_m: f64,
    /// Fine sampling-partition edge length, metres.
    pub fine_size_m: f64,
    /// Symmetric tile footprint buffer, metres.
    pub buffer_m: f64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            tile_size_m: 60_000.0,
            cell_size_m: 30_000.0,
            fine_size_m: 10_000.0,
            buffer_m: 5_000.0,
        }
    }
}

/// All partition outputs for one domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionSet {
    pub tiles: Vec<Tile>,
    pub grid_cells: Vec<GridCell>,
    pub fine_cells: Vec<Cell>,
}

// Per-scale seed mixing constants, one per partition stage.
const TILE_SEED_MIX: u64 = 0x7C3A_915E_D42B_0F68;
const CELL_SEED_MIX: u64 = 0x1B6F_A8D3_59E0_47C2;
const FINE_SEED_MIX: u64 = 0x9E24_D071_3FA6_8B15;

/// Cover `domain` with non-overlapping square cells of edge `cell_size_m`,
/// anchored at the domain's min corner, and assign ranked random IDs 1..=N.
pub fn partition(domain: Extent, cell_size_m: f64, seed: u64) -> Result<Vec<Cell>> {
    if domain.width_m() <= 0.0 || domain.height_m() <= 0.0 {
        return Err(MapError::EmptyDomain {
            width_m: domain.width_m(),
            height_m: domain.height_m(),
        });
    }
    if cell_size_m <= 0.0 {
        return Err(MapError::BadCellSize { cell_size_m });
    }

    let n_cols = (domain.width_m() / cell_size_m).ceil() as usize;
    let n_rows = (domain.height_m() / cell_size_m).ceil() as usize;
    let n = n_cols * n_rows;

    // One random draw per cell in a fixed row-major order, then rank the
    // draws. Ties broken by cell index so the ranking is total.
    let mut rng = StdRng::seed_from_u64(seed);
    let draws: Vec<u64> = (0..n).map(|_| rng.gen::<u64>()).collect();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by_key(|&i| (draws[i], i));

    let mut ids = vec![0_u32; n];
    for (rank, &cell_idx) in order.iter().enumerate() {
        ids[cell_idx] = rank as u32 + 1;
    }

    let mut cells = Vec::with_capacity(n);
    for r in 0..n_rows {
        for c in 0..n_cols {
            let min_x = domain.min_x + c as f64 * cell_size_m;
            let min_y = domain.min_y + r as f64 * cell_size_m;
            cells.push(Cell {
                id: ids[r * n_cols + c],
                extent: Extent::new(min_x, min_y, min_x + cell_size_m, min_y + cell_size_m),
            });
        }
    }
    Ok(cells)
}

/// Build all three partition scales from one seed.
///
/// Tile ↔ grid-cell pairing: the QC cell containing a tile's centroid adopts
/// that tile's ID. With cell_size <= tile_size every tile centroid falls in
/// exactly one cell, so the pairing is 1:1 on the tile side.
pub fn build_partitions(domain: Extent, config: &PartitionConfig) -> Result<PartitionSet> {
    let tile_cells = partition(domain, config.tile_size_m, config.seed ^ TILE_SEED_MIX)?;
    let qc_cells = partition(domain, config.cell_size_m, config.seed ^ CELL_SEED_MIX)?;
    let fine_cells = partition(domain, config.fine_size_m, config.seed ^ FINE_SEED_MIX)?;

    let tiles: Vec<Tile> = tile_cells
        .iter()
        .map(|cell| Tile {
            id: cell.id,
            core: cell.extent,
            footprint: cell.extent.buffered(config.buffer_m),
        })
        .collect();

    let mut grid_cells = Vec::with_capacity(tiles.len());
    for tile in &tiles {
        let (cx, cy) = tile.centroid();
        if let Some(cell) = qc_cells.iter().find(|c| c.extent.contains(cx, cy)) {
            grid_cells.push(GridCell {
                tile_id: tile.id,
                extent: cell.extent,
            });
        }
        // A centroid outside every QC cell cannot happen for cells anchored
        // at the same domain corner; if geometry inputs ever disagree the
        // tile is simply left unpaired and the selector drops it.
    }

    Ok(PartitionSet {
        tiles,
        grid_cells,
        fine_cells,
    })
}
