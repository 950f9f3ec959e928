use serde::{Deserialize, Serialize};

use crate::error::{MapError, Result};

/// Axis-aligned rectangle in projected metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    pub fn width_m(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height_m(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Point-in-rectangle test, closed on the min edges and open on the max
    /// edges so that adjacent partition cells never both claim a point.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x < self.max_x && y >= self.min_y && y < self.max_y
    }

    pub fn centroid(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) * 0.5,
            (self.min_y + self.max_y) * 0.5,
        )
    }

    /// Expand symmetrically by `buffer_m` on every side.
    pub fn buffered(&self, buffer_m: f64) -> Self {
        Self {
            min_x: self.min_x - buffer_m,
            min_y: self.min_y - buffer_m,
            max_x: self.max_x + buffer_m,
            max_y: self.max_y + buffer_m,
        }
    }

    /// Diagonal length in metres.
    pub fn diagonal_m(&self) -> f64 {
        (self.width_m().powi(2) + self.height_m().powi(2)).sqrt()
    }
}

/// A 2D raster storing values as f32, row-major, in a projected CRS.
/// Row 0 is the southernmost row. NaN marks nodata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Raster {
    /// Row-major values.
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
    pub extent: Extent,
    /// Square pixel edge length in metres.
    pub pixel_size_m: f64,
}

impl Raster {
    /// Create a new Raster filled with the given value.
    pub fn new(width: usize, height: usize, extent: Extent, pixel_size_m: f64, fill: f32) -> Self {
        Self {
            data: vec![fill; width * height],
            width,
            height,
            extent,
            pixel_size_m,
        }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f32) {
        self.data[row * self.width + col] = val;
    }

    #[inline]
    pub fn is_valid(&self, row: usize, col: usize) -> bool {
        self.get(row, col).is_finite()
    }

    /// Projected coordinates of the centre of pixel (row, col).
    #[inline]
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.extent.min_x + (col as f64 + 0.5) * self.pixel_size_m,
            self.extent.min_y + (row as f64 + 0.5) * self.pixel_size_m,
        )
    }

    /// Replace every pixel equal to `sentinel` with NaN (nodata).
    /// Serialized rasters carry sentinel nodata because JSON has no NaN.
    pub fn mask_sentinel(&mut self, sentinel: f32) {
        for v in &mut self.data {
            if *v == sentinel {
                *v = f32::NAN;
            }
        }
    }

    /// Copy with NaN pixels replaced by `sentinel`, for serialization.
    pub fn fill_nodata(&self, sentinel: f32) -> Raster {
        let mut out = self.clone();
        for v in &mut out.data {
            if !v.is_finite() {
                *v = sentinel;
            }
        }
        out
    }
}

/// Grid geometry shared by every raster of one domain, without pixel data.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DomainGrid {
    pub extent: Extent,
    pub pixel_size_m: f64,
    pub width: usize,
    pub height: usize,
}

impl DomainGrid {
    #[inline]
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.extent.min_x + (col as f64 + 0.5) * self.pixel_size_m,
            self.extent.min_y + (row as f64 + 0.5) * self.pixel_size_m,
        )
    }

    pub fn empty_raster(&self) -> Raster {
        Raster::new(self.width, self.height, self.extent, self.pixel_size_m, f32::NAN)
    }
}

/// A rectangular window of predictions within a domain raster grid.
/// Offsets are in domain pixel coordinates; NaN marks unpredicted pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterFragment {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
    /// Row-major, `width * height` values.
    pub data: Vec<f32>,
}

impl RasterFragment {
    pub fn masked(col_off: usize, row_off: usize, width: usize, height: usize) -> Self {
        Self {
            col_off,
            row_off,
            width,
            height,
            data: vec![f32::NAN; width * height],
        }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f32) {
        self.data[row * self.width + col] = val;
    }

    /// Iterate valid pixels as (domain_row, domain_col, value).
    pub fn valid_pixels(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        self.data.iter().enumerate().filter_map(move |(i, &v)| {
            if v.is_finite() {
                Some((self.row_off + i / self.width, self.col_off + i % self.width, v))
            } else {
                None
            }
        })
    }
}

/// Named predictor bands sharing one grid. A pixel is usable only where every
/// band holds a finite value (no imputation of partial coverage).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorStack {
    pub names: Vec<String>,
    pub bands: Vec<Raster>,
}

impl PredictorStack {
    pub fn new(names: Vec<String>, bands: Vec<Raster>) -> Result<Self> {
        if bands.is_empty() {
            return Err(MapError::EmptyFeatureTable);
        }
        let (w, h) = (bands[0].width, bands[0].height);
        for b in &bands[1..] {
            if b.width != w || b.height != h {
                return Err(MapError::DimensionMismatch {
                    expected_w: w,
                    expected_h: h,
                    got_w: b.width,
                    got_h: b.height,
                });
            }
        }
        Ok(Self { names, bands })
    }

    pub fn width(&self) -> usize {
        self.bands[0].width
    }

    pub fn height(&self) -> usize {
        self.bands[0].height
    }

    pub fn extent(&self) -> Extent {
        self.bands[0].extent
    }

    pub fn pixel_size_m(&self) -> f64 {
        self.bands[0].pixel_size_m
    }

    pub fn band(&self, name: &str) -> Result<&Raster> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.bands[i])
            .ok_or_else(|| MapError::MissingBand(name.to_string()))
    }

    pub fn grid(&self) -> DomainGrid {
        DomainGrid {
            extent: self.extent(),
            pixel_size_m: self.pixel_size_m(),
            width: self.width(),
            height: self.height(),
        }
    }

    /// Full predictor vector at (row, col), or None if any band is nodata.
    pub fn pixel_vector(&self, row: usize, col: usize) -> Option<Vec<f64>> {
        let mut out = Vec::with_capacity(self.bands.len());
        for b in &self.bands {
            let v = b.get(row, col);
            if !v.is_finite() {
                return None;
            }
            out.push(v as f64);
        }
        Some(out)
    }
}
