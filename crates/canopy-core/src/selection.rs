//! Tile selection by sample density.
//!
//! Tiles train independent models, so a tile is kept only when it holds
//! enough samples overall and its paired QC grid cell holds a representative
//! share of them. Both checks are deterministic data-quality gates, not
//! errors.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::grid::{GridCell, Tile};
use crate::samples::Sample;

/// Selection thresholds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SelectionThresholds {
    /// Minimum total samples in a tile.
    pub t_abs: usize,
    /// Minimum grid-cell share of the tile's samples.
    pub t_ratio: f64,
}

impl Default for SelectionThresholds {
    fn default() -> Self {
        Self {
            t_abs: 1250,
            t_ratio: 0.1,
        }
    }
}

/// A selected tile joined 1:1 with its QC grid cell and counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectedTile {
    pub tile: Tile,
    pub grid_cell: GridCell,
    pub sample_count: usize,
    pub grid_cell_sample_size: usize,
    pub sample_count_ratio: f64,
}

/// Why a tile was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DropReason {
    /// Zero samples; excluded before any ratio is computed.
    NoSamples,
    /// Total samples below `t_abs`.
    BelowAbsoluteThreshold,
    /// Grid-cell share below `t_ratio`.
    BelowRatioThreshold,
    /// No paired grid cell (data-integrity condition, never retried).
    MissingGridCell,
}

/// Full selection outcome: kept tiles plus a drop report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub selected: Vec<SelectedTile>,
    pub dropped: Vec<(u32, DropReason)>,
}

/// Apply the density gate to every tile.
///
/// Keep iff `sample_count >= t_abs && ratio >= t_ratio`, where
/// `ratio = grid_cell_sample_size / sample_count`. Monotone: raising either
/// threshold never adds a tile.
pub fn select_tiles(
    tiles: &[Tile],
    grid_cells: &[GridCell],
    samples: &[Sample],
    thresholds: &SelectionThresholds,
) -> Selection {
    let cell_by_tile: HashMap<u32, &GridCell> =
        grid_cells.iter().map(|g| (g.tile_id, g)).collect();

    // Tile counts come from the core-cell assignment baked into each sample;
    // grid-cell counts are a point-in-cell test over the same table.
    let mut tile_counts: HashMap<u32, usize> = HashMap::new();
    for s in samples {
        *tile_counts.entry(s.tile_id).or_insert(0) += 1;
    }

    let mut selected = Vec::new();
    let mut dropped = Vec::new();

    for tile in tiles {
        let Some(&grid_cell) = cell_by_tile.get(&tile.id) else {
            dropped.push((tile.id, DropReason::MissingGridCell));
            continue;
        };

        let sample_count = tile_counts.get(&tile.id).copied().unwrap_or(0);
        if sample_count == 0 {
            dropped.push((tile.id, DropReason::NoSamples));
            continue;
        }

        let grid_cell_sample_size = samples
            .iter()
            .filter(|s| s.tile_id == tile.id && grid_cell.extent.contains(s.x, s.y))
            .count();
        let ratio = grid_cell_sample_size as f64 / sample_count as f64;

        if sample_count < thresholds.t_abs {
            dropped.push((tile.id, DropReason::BelowAbsoluteThreshold));
        } else if ratio < thresholds.t_ratio {
            dropped.push((tile.id, DropReason::BelowRatioThreshold));
        } else {
            selected.push(SelectedTile {
                tile: *tile,
                grid_cell: *grid_cell,
                sample_count,
                grid_cell_sample_size,
                sample_count_ratio: ratio,
            });
        }
    }

    Selection { selected, dropped }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Extent;
    use crate::samples::pixel_label;

    fn tile(id: u32, min_x: f64) -> Tile {
        let core = Extent::new(min_x, 0.0, min_x + 100.0, 100.0);
        Tile {
            id,
            core,
            footprint: core.buffered(10.0),
        }
    }

    fn cell_for(t: &Tile) -> GridCell {
        // Central half-size cell.
        GridCell {
            tile_id: t.id,
            extent: Extent::new(
                t.core.min_x + 25.0,
                25.0,
                t.core.min_x + 75.0,
                75.0,
            ),
        }
    }

    /// `in_cell` of the `count` samples land inside the paired grid cell.
    fn synth_samples(t: &Tile, count: usize, in_cell: usize) -> Vec<Sample> {
        (0..count)
            .map(|i| {
                let (x, y) = if i < in_cell {
                    (t.core.min_x + 50.0, 50.0)
                } else {
                    (t.core.min_x + 5.0, 5.0)
                };
                Sample {
                    sample_id: i as u64,
                    tile_id: t.id,
                    pixel_label: pixel_label(x, y),
                    x,
                    y,
                    predictors: vec![0.0],
                    responses: vec![0.0],
                }
            })
            .collect()
    }

    #[test]
    fn threshold_scenarios() {
        // 1000 samples: excluded on t_abs regardless of ratio.
        // 2000 samples, ratio 0.05: excluded on t_ratio.
        // 2000 samples, ratio 0.2: included.
        let tiles = [tile(1, 0.0), tile(2, 100.0), tile(3, 200.0)];
        let cells: Vec<GridCell> = tiles.iter().map(cell_for).collect();
        let mut samples = synth_samples(&tiles[0], 1000, 1000);
        samples.extend(synth_samples(&tiles[1], 2000, 100));
        samples.extend(synth_samples(&tiles[2], 2000, 400));

        let sel = select_tiles(&tiles, &cells, &samples, &SelectionThresholds::default());
        let kept: Vec<u32> = sel.selected.iter().map(|s| s.tile.id).collect();
        assert_eq!(kept, vec![3]);
        assert!(sel
            .dropped
            .contains(&(1, DropReason::BelowAbsoluteThreshold)));
        assert!(sel.dropped.contains(&(2, DropReason::BelowRatioThreshold)));
        let s3 = &sel.selected[0];
        assert_eq!(s3.sample_count, 2000);
        assert_eq!(s3.grid_cell_sample_size, 400);
        assert!((s3.sample_count_ratio - 0.2).abs() < 1e-12);
    }

    #[test]
    fn zero_sample_tile_excluded_before_ratio() {
        let tiles = [tile(1, 0.0)];
        let cells = [cell_for(&tiles[0])];
        let sel = select_tiles(&tiles, &cells, &[], &SelectionThresholds::default());
        assert!(sel.selected.is_empty());
        assert_eq!(sel.dropped, vec![(1, DropReason::NoSamples)]);
    }

    #[test]
    fn unpaired_tile_dropped_not_retried() {
        let tiles = [tile(1, 0.0)];
        let samples = synth_samples(&tiles[0], 2000, 500);
        let sel = select_tiles(&tiles, &[], &samples, &SelectionThresholds::default());
        assert_eq!(sel.dropped, vec![(1, DropReason::MissingGridCell)]);
    }

    #[test]
    fn selection_monotone_in_both_thresholds() {
        let tiles = [tile(1, 0.0), tile(2, 100.0), tile(3, 200.0)];
        let cells: Vec<GridCell> = tiles.iter().map(cell_for).collect();
        let mut samples = synth_samples(&tiles[0], 1500, 200);
        samples.extend(synth_samples(&tiles[1], 3000, 250));
        samples.extend(synth_samples(&tiles[2], 800, 700));

        let kept = |t_abs: usize, t_ratio: f64| -> Vec<u32> {
            let sel = select_tiles(
                &tiles,
                &cells,
                &samples,
                &SelectionThresholds { t_abs, t_ratio },
            );
            let mut ids: Vec<u32> = sel.selected.iter().map(|s| s.tile.id).collect();
            ids.sort_unstable();
            ids
        };

        let loose = kept(500, 0.05);
        for &(t_abs, t_ratio) in &[(1000, 0.05), (500, 0.1), (1500, 0.12), (2500, 0.2)] {
            let tight = kept(t_abs, t_ratio);
            assert!(
                tight.iter().all(|id| loose.contains(id)),
                "tightening to ({t_abs}, {t_ratio}) added tiles: {tight:?} vs {loose:?}"
            );
        }
    }
}
