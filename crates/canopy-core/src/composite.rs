//! Distance- and accuracy-weighted composition of per-tile predictions.
//!
//! Overlapping tile fragments are blended per pixel with a weight that is the
//! product of two independently normalized terms in (0, 1]:
//!
//! - **location weight** `1 − d / pseudo_max_d`, where `d` is the distance
//!   from the pixel to the tile centroid and `pseudo_max_d` exceeds the
//!   largest possible in-tile distance. Edge pixels approach 0, so
//!   overlapping neighbours dominate near boundaries.
//! - **reliability weight** `(1/MSE) / max(1/MSE)` over all tiles for the
//!   response; the most accurate tile scores exactly 1. Tiles with an
//!   undefined score are excluded outright, never treated as weight 0.
//!
//! Weight fragments are built as a parallel map over tiles, then reduced
//! into the mosaic in one explicit accumulation pass. A plain unweighted
//! mean mosaic over the same fragments is a first-class second output.

use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::grid::Tile;
use crate::predictors::ResponseVar;
use crate::raster::{DomainGrid, Raster, RasterFragment};
use crate::trainer::TileRecord;

/// Compositor knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositorConfig {
    /// Distance normalizer; None derives it from the tile geometry as the
    /// largest footprint half-diagonal with a 5% margin.
    pub pseudo_max_distance_m: Option<f64>,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            pseudo_max_distance_m: None,
        }
    }
}

/// Both mosaics for one response variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeResult {
    pub response: ResponseVar,
    pub weighted: Raster,
    pub unweighted: Raster,
    /// Tiles excluded from the weighted mosaic for lacking a defined score.
    pub excluded_tiles: Vec<u32>,
}

/// Smallest pseudo-max distance strictly exceeding every possible
/// pixel-to-centroid distance, with margin.
pub fn derive_pseudo_max_distance(tiles: &[Tile]) -> f64 {
    let max_half_diag = tiles
        .iter()
        .map(|t| t.footprint.diagonal_m() * 0.5)
        .fold(0.0_f64, f64::max);
    max_half_diag * 1.05
}

/// Reversed, normalized distance to the tile centroid.
/// In (0, 1] whenever `pseudo_max_d` exceeds the in-tile maximum distance.
pub fn location_weight(x: f64, y: f64, tile: &Tile, pseudo_max_d: f64) -> f64 {
    let (cx, cy) = tile.centroid();
    let d = ((x - cx).powi(2) + (y - cy).powi(2)).sqrt();
    (1.0 - d / pseudo_max_d).max(0.0)
}

/// Per-tile reliability in (0, 1]: inverse MSE normalized by the best tile.
/// Records with undefined R² (degenerate held-out response) are omitted from
/// both the map and the normalizing maximum.
pub fn reliability_weights(records: &[TileRecord]) -> HashMap<u32, f64> {
    let inverses: Vec<(u32, f64)> = records
        .iter()
        .filter(|r| r.r2.is_some())
        .map(|r| {
            let mse = (r.rmse * r.rmse).max(1e-12);
            (r.tile_id, 1.0 / mse)
        })
        .collect();
    let max_inv = inverses.iter().map(|&(_, v)| v).fold(0.0_f64, f64::max);
    if max_inv <= 0.0 {
        return HashMap::new();
    }
    inverses
        .into_iter()
        .map(|(id, v)| (id, v / max_inv))
        .collect()
}

/// Combined weight fragment for one record: location × reliability, defined
/// exactly where the prediction fragment is defined.
pub fn weight_fragment(
    record: &TileRecord,
    tile: &Tile,
    grid: &DomainGrid,
    pseudo_max_d: f64,
    reliability: f64,
) -> RasterFragment {
    let f = &record.fragment;
    let mut out = RasterFragment::masked(f.col_off, f.row_off, f.width, f.height);
    for (row, col, _) in f.valid_pixels() {
        let (x, y) = grid.pixel_center(row, col);
        let w = location_weight(x, y, tile, pseudo_max_d) * reliability;
        out.set(row - f.row_off, col - f.col_off, w as f32);
    }
    out
}

/// Blend all fragments of one response into the two mosaics.
///
/// `response` labels the result even when `records` is empty (every tile
/// failed), so an empty mosaic is never mis-keyed.
///
/// Weighted value per pixel: `Σ(w·p) / Σw` over covering tiles with a
/// positive weight; pixels with zero weight-sum (no coverage, or covered
/// only by excluded tiles) stay NaN — "no data", never zero.
pub fn composite(
    response: ResponseVar,
    records: &[TileRecord],
    tiles: &[Tile],
    grid: &DomainGrid,
    config: &CompositorConfig,
) -> CompositeResult {
    let tile_by_id: HashMap<u32, &Tile> = tiles.iter().map(|t| (t.id, t)).collect();
    let reliability = reliability_weights(records);
    let pseudo_max_d = config
        .pseudo_max_distance_m
        .unwrap_or_else(|| derive_pseudo_max_distance(tiles));

    let excluded_tiles: Vec<u32> = records
        .iter()
        .filter(|r| !reliability.contains_key(&r.tile_id))
        .map(|r| r.tile_id)
        .collect();

    // Parallel map: one independent weight fragment per record.
    let weights: Vec<Option<RasterFragment>> = records
        .par_iter()
        .map(|record| {
            let tile = tile_by_id.get(&record.tile_id)?;
            let rel = reliability.get(&record.tile_id)?;
            Some(weight_fragment(record, tile, grid, pseudo_max_d, *rel))
        })
        .collect();

    // Explicit reduce into the accumulation buffers.
    let n = grid.width * grid.height;
    let mut weight_sum = vec![0.0_f64; n];
    let mut weighted_sum = vec![0.0_f64; n];
    let mut plain_sum = vec![0.0_f64; n];
    let mut cover_count = vec![0_u32; n];

    for (record, weight_frag) in records.iter().zip(&weights) {
        for (row, col, pred) in record.fragment.valid_pixels() {
            let idx = row * grid.width + col;
            plain_sum[idx] += f64::from(pred);
            cover_count[idx] += 1;
            if let Some(wf) = weight_frag {
                let w = f64::from(wf.get(row - wf.row_off, col - wf.col_off));
                if w > 0.0 {
                    weight_sum[idx] += w;
                    weighted_sum[idx] += w * f64::from(pred);
                }
            }
        }
    }

    let mut weighted = grid.empty_raster();
    let mut unweighted = grid.empty_raster();
    for idx in 0..n {
        if weight_sum[idx] > 0.0 {
            weighted.data[idx] = (weighted_sum[idx] / weight_sum[idx]) as f32;
        }
        if cover_count[idx] > 0 {
            unweighted.data[idx] = (plain_sum[idx] / f64::from(cover_count[idx])) as f32;
        }
    }

    CompositeResult {
        response,
        weighted,
        unweighted,
        excluded_tiles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Extent;
    use approx::assert_relative_eq;

    fn grid_1d() -> DomainGrid {
        DomainGrid {
            extent: Extent::new(0.0, 0.0, 20.0, 1.0),
            pixel_size_m: 1.0,
            width: 20,
            height: 1,
        }
    }

    fn tile(id: u32, core: Extent, buffer: f64) -> Tile {
        Tile {
            id,
            core,
            footprint: core.buffered(buffer),
        }
    }

    fn constant_fragment(col_off: usize, width: usize, value: f32) -> RasterFragment {
        let mut f = RasterFragment::masked(col_off, 0, width, 1);
        for c in 0..width {
            f.set(0, c, value);
        }
        f
    }

    fn record(tile_id: u32, rmse: f64, frag: RasterFragment) -> TileRecord {
        TileRecord {
            tile_id,
            response: ResponseVar::Rh98,
            rmse,
            r2: Some(0.5),
            n_train: 80,
            n_test: 20,
            fragment: frag,
            importances: vec![],
        }
    }

    /// Two overlapping tiles: reliability 1.0 vs 0.5, location weights 0.3 vs
    /// 0.9 at the probe pixel → blended value (10·0.3 + 20·0.45) / 0.75 = 16.
    #[test]
    fn overlap_strip_blends_to_expected_value() {
        let grid = grid_1d();
        // Centroids at x = 2.5 and x = 10.5; probe pixel centre x = 9.5.
        let a = tile(1, Extent::new(0.0, 0.0, 5.0, 1.0), 6.0);
        let b = tile(2, Extent::new(8.5, 0.0, 12.5, 1.0), 2.0);
        // MSE 1 vs 2 → reliabilities 1.0 and 0.5.
        let records = vec![
            record(1, 1.0, constant_fragment(0, 11, 10.0)),
            record(2, 2.0_f64.sqrt(), constant_fragment(7, 7, 20.0)),
        ];
        let cfg = CompositorConfig {
            pseudo_max_distance_m: Some(10.0),
        };
        let out = composite(ResponseVar::Rh98, &records, &[a, b], &grid, &cfg);

        let probe = out.weighted.get(0, 9);
        assert_relative_eq!(f64::from(probe), 16.0, epsilon = 1e-5);
        // Unweighted mean in the overlap is the plain average.
        assert_relative_eq!(f64::from(out.unweighted.get(0, 9)), 15.0, epsilon = 1e-5);
    }

    #[test]
    fn empty_record_set_keeps_response_label() {
        let grid = grid_1d();
        let a = tile(1, Extent::new(0.0, 0.0, 5.0, 1.0), 2.0);
        let out = composite(ResponseVar::Pai, &[], &[a], &grid, &CompositorConfig::default());
        assert_eq!(out.response, ResponseVar::Pai);
        assert!(out.excluded_tiles.is_empty());
        assert!(out.weighted.data.iter().all(|v| !v.is_finite()));
        assert!(out.unweighted.data.iter().all(|v| !v.is_finite()));
    }

    #[test]
    fn uncovered_pixels_masked_not_zero() {
        let grid = grid_1d();
        let a = tile(1, Extent::new(0.0, 0.0, 5.0, 1.0), 1.0);
        let records = vec![record(1, 1.0, constant_fragment(0, 6, 4.0))];
        let out = composite(ResponseVar::Rh98, &records, &[a], &grid, &CompositorConfig::default());
        assert!(!out.weighted.get(0, 15).is_finite());
        assert!(!out.unweighted.get(0, 15).is_finite());
        assert!(out.weighted.get(0, 2).is_finite());
    }

    #[test]
    fn reliability_max_is_exactly_one_and_bounded() {
        let records = vec![
            record(1, 0.5, constant_fragment(0, 2, 1.0)),
            record(2, 1.0, constant_fragment(0, 2, 1.0)),
            record(3, 2.0, constant_fragment(0, 2, 1.0)),
        ];
        let w = reliability_weights(&records);
        assert_relative_eq!(w[&1], 1.0, epsilon = 1e-12);
        for (&id, &v) in &w {
            assert!(v > 0.0 && v <= 1.0, "tile {id} reliability {v} out of (0,1]");
        }
    }

    #[test]
    fn undefined_score_tile_excluded_not_zero_weighted() {
        let grid = grid_1d();
        let a = tile(1, Extent::new(0.0, 0.0, 5.0, 1.0), 2.0);
        let b = tile(2, Extent::new(2.0, 0.0, 7.0, 1.0), 2.0);
        let mut bad = record(2, 0.0, constant_fragment(0, 9, 100.0));
        bad.r2 = None; // degenerate held-out response
        let records = vec![record(1, 1.0, constant_fragment(0, 7, 10.0)), bad];
        let out = composite(ResponseVar::Rh98, &records, &[a, b], &grid, &CompositorConfig::default());

        assert_eq!(out.excluded_tiles, vec![2]);
        // Weighted mosaic sees only tile 1.
        assert_relative_eq!(f64::from(out.weighted.get(0, 3)), 10.0, epsilon = 1e-5);
        // Unweighted mean still counts every covering fragment.
        assert_relative_eq!(f64::from(out.unweighted.get(0, 3)), 55.0, epsilon = 1e-5);
    }

    #[test]
    fn location_weight_unit_at_centroid_and_positive_inside() {
        let t = tile(1, Extent::new(0.0, 0.0, 10.0, 10.0), 2.0);
        let pmax = derive_pseudo_max_distance(std::slice::from_ref(&t));
        let (cx, cy) = t.centroid();
        assert_relative_eq!(location_weight(cx, cy, &t, pmax), 1.0, epsilon = 1e-12);
        // Footprint corner: worst case, still strictly positive.
        let w = location_weight(t.footprint.min_x, t.footprint.min_y, &t, pmax);
        assert!(w > 0.0 && w < 1.0, "corner weight {w} out of (0,1)");
    }

    #[test]
    fn composited_value_within_contributing_hull() {
        let grid = grid_1d();
        let a = tile(1, Extent::new(0.0, 0.0, 8.0, 1.0), 4.0);
        let b = tile(2, Extent::new(6.0, 0.0, 14.0, 1.0), 4.0);
        let c = tile(3, Extent::new(9.0, 0.0, 17.0, 1.0), 4.0);
        let records = vec![
            record(1, 0.7, constant_fragment(0, 12, 3.0)),
            record(2, 1.3, constant_fragment(2, 16, 8.0)),
            record(3, 0.9, constant_fragment(5, 15, 5.0)),
        ];
        let out = composite(ResponseVar::Rh98, &records, &[a, b, c], &grid, &CompositorConfig::default());
        for col in 0..20 {
            let v = out.weighted.get(0, col);
            if v.is_finite() {
                let covering: Vec<f32> = records
                    .iter()
                    .filter_map(|r| {
                        let f = &r.fragment;
                        (col >= f.col_off && col < f.col_off + f.width)
                            .then(|| f.get(0, col - f.col_off))
                    })
                    .filter(|p| p.is_finite())
                    .collect();
                let lo = covering.iter().cloned().fold(f32::INFINITY, f32::min);
                let hi = covering.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
                assert!(
                    v >= lo - 1e-5 && v <= hi + 1e-5,
                    "col {col}: {v} outside hull [{lo}, {hi}]"
                );
            }
        }
    }
}
